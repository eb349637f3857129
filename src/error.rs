//! # Error Types
//!
//! Error handling for the peer link transport.
//!
//! This module defines every error variant that can surface while accepting
//! connections, negotiating the secure channel, or reading frames.
//!
//! ## Error Categories
//! - **I/O Errors**: Socket failures that are not a plain peer disconnect
//! - **Handshake Errors**: TLS negotiation or peer-trust failures
//! - **Caller Errors**: Operations invoked in the wrong state (empty acceptor
//!   queue, handshake started twice, missing identity)
//! - **Framing Errors**: Unterminated frames that outgrow the buffer limit
//! - **Identity Errors**: Certificate generation or parsing failures
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use peer_link::error::{ProtocolError, Result};
//! use peer_link::transport::acceptor::Acceptor;
//! use tracing::warn;
//!
//! fn claim(acceptor: &Acceptor) -> Result<()> {
//!     match acceptor.take_pending() {
//!         Ok(_connection) => Ok(()),
//!         Err(ProtocolError::NoPendingConnection) => {
//!             warn!("Nothing queued yet");
//!             Ok(())
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NO_PENDING_CONNECTION: &str = "No pending connection";

    /// Secure channel state errors
    pub const ERR_NOT_IDLE: &str = "Handshake can only start from the idle state";
    pub const ERR_NO_IDENTITY: &str = "No local identity configured";
    pub const ERR_NO_PEER_NAME: &str = "Strict trust mode requires an expected peer name";
    pub const ERR_ALREADY_ENCRYPTED: &str = "Connection is already encrypted";

    /// Identity errors
    pub const ERR_NO_CERTIFICATE: &str = "No certificate found in PEM input";
    pub const ERR_NO_PRIVATE_KEY: &str = "No PKCS8 private key found in PEM input";
    pub const ERR_NO_COMMON_NAME: &str = "Certificate carries no common name";
    pub const ERR_EMPTY_DEVICE_NAME: &str = "Device name cannot be empty";
}

/// ProtocolError is the primary error type for all link operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Handshake failed: {0}")]
    HandshakeFailure(String),

    #[error("No pending connection")]
    NoPendingConnection,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Frame too large: {0} bytes buffered without a delimiter")]
    OversizedFrame(usize),

    #[error("Identity error: {0}")]
    IdentityError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Timeout occurred")]
    Timeout,
}

impl ProtocolError {
    /// Map an I/O error onto the link taxonomy.
    ///
    /// Errors that only mean "the peer is gone" become [`ProtocolError::ConnectionClosed`].
    pub fn from_io(err: io::Error) -> Self {
        if is_disconnect(&err) {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(err)
        }
    }
}

/// Whether an I/O error represents a vanished peer rather than a local fault.
pub(crate) fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_kinds_map_to_connection_closed() {
        for kind in [
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::NotConnected,
        ] {
            let err = ProtocolError::from_io(io::Error::new(kind, "gone"));
            assert!(matches!(err, ProtocolError::ConnectionClosed), "{kind:?}");
        }
    }

    #[test]
    fn test_other_io_errors_are_preserved() {
        let err = ProtocolError::from_io(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
