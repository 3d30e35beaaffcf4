//! Two-phase handshake binding a TCP connection to a UDP endpoint.
//!
//! 1. The client sends its authentication data as a plaintext TCP packet.
//! 2. The server answers with an encrypted [`AuthReply`]: a single error byte
//!    on rejection, or the sequence bound, a one-time UDP key and the
//!    connection start time on acceptance.
//! 3. The client repeatedly sends the raw 8-byte key over UDP.
//! 4. The server binds the sender's address to the connection and confirms
//!    over TCP with [`CONFIRMATION_MARKER`] followed by an optional payload.

use crate::config::SEQUENCE_BOUND_RANGE;
use crate::core::bit_buffer::BitBuffer;
use crate::error::{constants, ProtocolError, Result};
use rand::Rng;
use tracing::{debug, instrument, warn};

/// Length of the UDP authentication datagram
pub const UDP_AUTH_KEY_LEN: usize = 8;

/// First byte of the TCP packet completing the handshake
pub const CONFIRMATION_MARKER: u8 = 0;

/// Encoded length of an accepted [`TcpAuthResponse`]
pub const AUTH_RESPONSE_LEN: usize = 1 + 8 + 8;

const MAX_KEY_ATTEMPTS: usize = 64;

/// Parameters the server hands out on accepting a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpAuthResponse {
    pub sequence_bound: u8,
    pub udp_key: u64,
    /// Epoch milliseconds, the origin of UDP packet timestamps
    pub connection_start: u64,
}

impl TcpAuthResponse {
    pub fn write(&self, buffer: &mut BitBuffer) {
        buffer.write_u8(self.sequence_bound);
        buffer.write_u64(self.udp_key);
        buffer.write_u64(self.connection_start);
    }

    pub fn read(buffer: &mut BitBuffer) -> Result<Self> {
        if buffer.started_bytes_left() < AUTH_RESPONSE_LEN {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_TRUNCATED_AUTH_RESPONSE.into(),
            ));
        }
        Ok(Self {
            sequence_bound: buffer.read_u8(),
            udp_key: buffer.read_u64(),
            connection_start: buffer.read_u64(),
        })
    }
}

/// The server's answer to a TCP authentication packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthReply {
    Rejected(u8),
    Accepted(TcpAuthResponse),
}

impl AuthReply {
    pub fn write(&self, buffer: &mut BitBuffer) {
        match self {
            AuthReply::Rejected(error_code) => buffer.write_u8(*error_code),
            AuthReply::Accepted(response) => response.write(buffer),
        }
    }

    /// Decode a decrypted reply; its length tells the two cases apart
    pub fn read(buffer: &mut BitBuffer) -> Result<Self> {
        match buffer.started_bytes_left() {
            1 => Ok(AuthReply::Rejected(buffer.read_u8())),
            n if n >= AUTH_RESPONSE_LEN => TcpAuthResponse::read(buffer).map(AuthReply::Accepted),
            n => {
                warn!(len = n, "Malformed TCP authentication reply");
                Err(ProtocolError::HandshakeError(
                    constants::ERR_TRUNCATED_AUTH_RESPONSE.into(),
                ))
            }
        }
    }
}

/// Random sequence bound for a new connection
pub fn generate_sequence_bound() -> u8 {
    rand::rng().random_range(SEQUENCE_BOUND_RANGE)
}

/// Random UDP key that `is_taken` does not report as in use
#[instrument(skip(is_taken))]
pub fn generate_udp_key<F>(is_taken: F) -> Result<u64>
where
    F: Fn(u64) -> bool,
{
    for _ in 0..MAX_KEY_ATTEMPTS {
        let mut bytes = [0u8; UDP_AUTH_KEY_LEN];
        getrandom::fill(&mut bytes)
            .map_err(|_| ProtocolError::HandshakeError(constants::ERR_KEY_GENERATION.into()))?;
        let key = u64::from_le_bytes(bytes);
        if !is_taken(key) {
            return Ok(key);
        }
        debug!("UDP key collision, regenerating");
    }
    Err(ProtocolError::HandshakeError(
        constants::ERR_KEY_GENERATION.into(),
    ))
}

/// The raw datagram proving ownership of `key`
pub fn udp_auth_datagram(key: u64) -> [u8; UDP_AUTH_KEY_LEN] {
    key.to_le_bytes()
}

/// The key carried by a datagram, if it is shaped like an authentication datagram
pub fn parse_udp_key(datagram: &[u8]) -> Option<u64> {
    <[u8; UDP_AUTH_KEY_LEN]>::try_from(datagram)
        .ok()
        .map(u64::from_le_bytes)
}
