//! # Peer Link
//!
//! Trusted, encrypted, newline-framed transport between two peer devices.
//!
//! A raw TCP connection is accepted (or dialed), upgraded in place to a
//! mutually authenticated TLS session using self-issued device certificates,
//! and then read as a sequence of discrete line-delimited frames.
//!
//! ## Modules
//! - [`core`]: line codec and buffered frame reader
//! - [`transport`]: acceptor, connection, TLS session and trust store
//! - [`identity`]: self-signed device identities and peer certificate details
//! - [`config`]: TOML/env configuration
//! - [`utils`]: logging, metrics and timeout helpers
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use peer_link::{Connection, Identity, LineReader, TrustMode};
//!
//! # async fn run() -> peer_link::Result<()> {
//! let identity = Arc::new(Identity::generate("Laptop")?);
//! let mut connection = Connection::connect("192.168.1.20:1716").await?;
//! connection.set_local_identity(identity);
//! connection.set_trust_mode(TrustMode::Opportunistic);
//! connection.start_client_encryption().await?;
//!
//! let mut reader = LineReader::new(connection);
//! while let Some(frame) = reader.next_frame().await? {
//!     println!("{} bytes", frame.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod identity;
pub mod transport;
pub mod utils;

pub use crate::config::LinkConfig;
pub use crate::core::codec::LineCodec;
pub use crate::core::line_reader::LineReader;
pub use crate::error::{ProtocolError, Result};
pub use crate::identity::{Fingerprint, Identity, PeerIdentity};
pub use crate::transport::acceptor::Acceptor;
pub use crate::transport::connection::{ChannelState, Connection};
pub use crate::transport::tls::{TlsVersion, TrustMode};
pub use crate::transport::trust_store::AcceptedIssuerSet;
