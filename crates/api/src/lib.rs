//! Control-plane HTTP client.
//!
//! The control plane allocates sockets, verifies upload checksums, accepts
//! link submissions and serves direct reads. [`ControlPlane`] is the seam
//! the transfer services depend on; [`ApiClient`] implements it over
//! `reqwest` with Bearer authentication.

pub mod client;
pub mod config;
pub mod control;
pub mod credential;
pub mod error;
pub mod response;

pub use client::ApiClient;
pub use config::HttpConfig;
pub use control::{
    BoxFuture, ControlPlane, FinalizeOutcome, LinkSubmission, RetrieveTarget, SocketTarget,
};
pub use credential::Sensitive;
pub use error::ApiError;
pub use response::{ApiResponse, HttpByteStream, ResponseEncoding};
