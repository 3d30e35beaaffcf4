//! # Protocol Layer
//!
//! Connection states, the handshake messages and the ordering rules applied on
//! top of the framed channels.
//!
//! ## Components
//! - **Handshake**: authentication reply encoding, UDP key generation
//! - **Sequence**: wrapping TCP sequence ids with gap rejection
//! - **Timestamp**: wraparound-aware UDP packet timestamps
//!
//! ## Connection Lifecycle
//! ```text
//! Disconnected -> TcpAuthenticating -> UdpAuthenticating -> Authenticated
//!                        |                    |                  |
//!                        +--------------------+------------------+--> Disconnected
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod handshake;
pub mod sequence;
pub mod timestamp;


pub use sequence::SequenceTracker;
pub use timestamp::TimestampTracker;

/// Handshake progress of a connection, shared by both endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    /// Waiting for the TCP authentication exchange
    TcpAuthenticating,
    /// Waiting for the UDP key to arrive from the client's UDP endpoint
    UdpAuthenticating,
    /// Both channels are bound; application traffic flows
    Authenticated,
}

impl ConnectionState {
    pub fn is_authenticating(self) -> bool {
        matches!(
            self,
            ConnectionState::TcpAuthenticating | ConnectionState::UdpAuthenticating
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::TcpAuthenticating => "tcp-authenticating",
            ConnectionState::UdpAuthenticating => "udp-authenticating",
            ConnectionState::Authenticated => "authenticated",
        };
        f.write_str(name)
    }
}
