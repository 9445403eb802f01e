//! Transfer orchestration for Norman payloads.
//!
//! Ties the socket transfer to the control plane: allocate a socket, stream
//! the payload through it while digesting, then finalize (uploads) or verify
//! (downloads). Direct retrieves skip the socket and stream the HTTP body.
//!
//! Every transfer is tracked through [`TransferState`] and reported as
//! [`TransferEvent`]s on the orchestrator's event channel.

pub mod client;
pub mod config;
pub mod error;
mod orchestrator;
pub mod pull;
pub mod push;
pub mod retrieve;
pub mod retry;
pub mod state;
pub mod stream;
#[cfg(test)]
mod testing;
pub mod types;

pub use client::NormanClient;
pub use config::ClientConfig;
pub use error::ServiceError;
pub use pull::FilePull;
pub use push::FilePush;
pub use retrieve::Retrieve;
pub use retry::RetryPolicy;
pub use state::TransferState;
pub use stream::{ByteStream, SocketDownload};
pub use types::{TransferEvent, TransferReceipt};

pub use norman_api::{ControlPlane, Sensitive};
pub use norman_transfer::Digest;
