//! # Error Types
//!
//! Error handling for the dual-channel protocol.
//!
//! This module defines all error variants that can occur while framing, encrypting,
//! authenticating and routing packets over the TCP and UDP channels.
//!
//! ## Error Categories
//! - **Transport Errors**: socket failures (refused, unreachable, reset)
//! - **Protocol Violations**: oversized or malformed packets, unexpected handshake messages
//! - **Cryptographic Errors**: decryption failures, bad key lengths
//! - **Handshake Errors**: rejections, timeouts, capacity limits
//! - **Configuration Errors**: invalid settings
//!
//! A protocol violation is fatal for the offending connection only; it never
//! stops the server or affects other peers.
//!
//! ## Example Usage
//! ```rust
//! use double_socket::error::{ProtocolError, Result};
//! use double_socket::utils::crypto::AnyKeyCrypto;
//! use tracing::{info, warn};
//!
//! fn open(key: &[u8; 16], datagram: &[u8]) -> Result<Vec<u8>> {
//!     AnyKeyCrypto.decrypt(key, datagram)
//! }
//!
//! match open(&[7; 16], &[1, 2, 3]) {
//!     Ok(plaintext) => info!(len = plaintext.len(), "Decrypted datagram"),
//!     Err(ProtocolError::DecryptionFailure) => warn!("Dropping corrupt datagram"),
//!     Err(e) => warn!(error = %e, "Unexpected error"),
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_INVALID_HEADER: &str = "Invalid packet header";
    pub const ERR_OVERSIZED_PACKET: &str = "Packet exceeds maximum size";
    pub const ERR_CHECKSUM_MISMATCH: &str = "Packet checksum mismatch";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_ALREADY_STARTED: &str = "Client has already been started";
    pub const ERR_TIMEOUT: &str = "Authentication timed out";

    /// Cryptographic errors
    pub const ERR_DECRYPTION_FAILED: &str = "Decryption failed";

    /// Handshake errors
    pub const ERR_TRUNCATED_AUTH_RESPONSE: &str = "Truncated TCP authentication response";
    pub const ERR_KEY_GENERATION: &str = "Failed to generate UDP authentication key";
    pub const ERR_UNEXPECTED_MESSAGE: &str = "Unexpected message for the current state";

    /// Synchronisation errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid packet header")]
    InvalidHeader,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Packet checksum mismatch")]
    ChecksumMismatch,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Invalid encryption key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Authentication rejected with error code {0}")]
    AuthenticationRejected(u8),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Server is at capacity")]
    CapacityExceeded,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Synchronization primitive poisoned")]
    LockPoisoned,

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let err: ProtocolError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(matches!(err, ProtocolError::Io(_)));
        assert!(err.to_string().contains("reset"));
    }
}
