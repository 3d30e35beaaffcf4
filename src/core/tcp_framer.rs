//! # TCP Framing
//!
//! Length-prefixed packets over a byte stream.
//!
//! ## Wire Format
//! ```text
//! [Length(2, little-endian)] [Body(Length)]
//! ```
//!
//! [`TcpFramer`] reassembles bodies from arbitrarily split reads. It is
//! resumable at every byte boundary, including between the two length bytes.
//! When a read holds a whole body it is handed to the callback straight from
//! the read buffer; otherwise the bytes are staged in a reassembly buffer sized
//! once to the maximum packet length. One framer serves one connection.
//!
//! [`TcpFrameEncoder`] is the write side, used with `tokio_util::codec::FramedWrite`.

use crate::error::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Incremental reassembly of length-prefixed packets
pub struct TcpFramer {
    length_bytes: [u8; LENGTH_PREFIX_SIZE],
    saved_length_bytes: usize,
    pending_length: Option<usize>,
    buffer: Box<[u8]>,
    saved_payload: usize,
}

impl TcpFramer {
    /// Create a framer accepting bodies of up to `max_packet_length` bytes
    pub fn new(max_packet_length: usize) -> Self {
        Self {
            length_bytes: [0; LENGTH_PREFIX_SIZE],
            saved_length_bytes: 0,
            pending_length: None,
            buffer: vec![0; max_packet_length].into_boxed_slice(),
            saved_payload: 0,
        }
    }

    /// Largest body this framer accepts
    pub fn max_packet_length(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a packet is partially received
    pub fn is_mid_packet(&self) -> bool {
        self.saved_length_bytes > 0 || self.pending_length.is_some()
    }

    /// Drop any partially received packet
    pub fn reset(&mut self) {
        self.saved_length_bytes = 0;
        self.pending_length = None;
        self.saved_payload = 0;
    }

    /// Consume one read from the stream, calling `on_packet` once per completed body.
    ///
    /// A declared length above [`max_packet_length`](Self::max_packet_length)
    /// yields [`ProtocolError::OversizedPacket`]; the stream cannot be
    /// resynchronised after that and the connection must be closed.
    pub fn feed<F>(&mut self, mut chunk: &[u8], mut on_packet: F) -> Result<()>
    where
        F: FnMut(&[u8]),
    {
        loop {
            let length = match self.pending_length {
                Some(length) => length,
                None => {
                    let length = usize::from(match (self.saved_length_bytes, chunk.len()) {
                        (_, 0) => return Ok(()),
                        (0, 1) => {
                            self.length_bytes[0] = chunk[0];
                            self.saved_length_bytes = 1;
                            return Ok(());
                        }
                        (0, _) => {
                            let length = u16::from_le_bytes([chunk[0], chunk[1]]);
                            chunk = &chunk[2..];
                            length
                        }
                        _ => {
                            self.length_bytes[1] = chunk[0];
                            chunk = &chunk[1..];
                            u16::from_le_bytes(self.length_bytes)
                        }
                    });
                    self.saved_length_bytes = 0;

                    if length > self.buffer.len() {
                        warn!(length, max = self.buffer.len(), "Declared TCP packet length too large");
                        self.reset();
                        return Err(ProtocolError::OversizedPacket(length));
                    }
                    self.pending_length = Some(length);
                    length
                }
            };

            if self.saved_payload == 0 && chunk.len() >= length {
                self.pending_length = None;
                on_packet(&chunk[..length]);
                chunk = &chunk[length..];
                continue;
            }

            if chunk.is_empty() {
                return Ok(());
            }

            let take = (length - self.saved_payload).min(chunk.len());
            self.buffer[self.saved_payload..self.saved_payload + take]
                .copy_from_slice(&chunk[..take]);
            self.saved_payload += take;
            chunk = &chunk[take..];

            if self.saved_payload == length {
                self.pending_length = None;
                self.saved_payload = 0;
                on_packet(&self.buffer[..length]);
            }
        }
    }
}

/// Prepend the 2-byte length prefix when writing packets
#[derive(Debug, Clone, Copy)]
pub struct TcpFrameEncoder {
    max_packet_length: usize,
}

impl TcpFrameEncoder {
    pub fn new(max_packet_length: usize) -> Self {
        Self {
            max_packet_length: max_packet_length.min(u16::MAX as usize),
        }
    }
}

impl Default for TcpFrameEncoder {
    fn default() -> Self {
        Self::new(u16::MAX as usize)
    }
}

impl Encoder<Bytes> for TcpFrameEncoder {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_packet_length {
            return Err(ProtocolError::OversizedPacket(item.len()));
        }
        dst.reserve(LENGTH_PREFIX_SIZE + item.len());
        dst.put_u16_le(item.len() as u16);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// Frame one body into a fresh vector
pub fn frame_packet(body: &[u8]) -> Result<Vec<u8>> {
    if body.len() > u16::MAX as usize {
        return Err(ProtocolError::OversizedPacket(body.len()));
    }
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    framed.extend_from_slice(&(body.len() as u16).to_le_bytes());
    framed.extend_from_slice(body);
    Ok(framed)
}
