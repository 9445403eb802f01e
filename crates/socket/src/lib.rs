//! Encrypted socket channel for bulk payload transfers.
//!
//! The control plane allocates a socket endpoint and hands out per-session
//! secrets. This crate connects to that endpoint, authenticates with the
//! session header and streams ChaCha20-encrypted chunks while computing the
//! plaintext digest on the fly.
//!
//! # Wire format
//!
//! See the [`wire`] module for the frame layout.

pub mod channel;
pub mod client;
pub mod error;
pub mod peer;
pub mod wire;

pub use channel::SocketChannel;
pub use client::{DownloadStream, TransferSession, open_download, read_and_digest, write_and_digest};
pub use error::SocketError;
pub use peer::{LoopbackPeer, PeerReport, PeerSecrets};
pub use wire::{ChunkFrame, FrameHeader};

use std::time::Duration;

/// Timeout for the TCP connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the authentication handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest authentication header accepted in a handshake frame.
pub const MAX_HANDSHAKE_LEN: usize = 4096;
