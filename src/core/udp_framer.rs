//! # UDP Framing
//!
//! Integrity and timestamp prefix for datagram plaintexts.
//!
//! ```text
//! [CRC-32(4, little-endian)] [Timestamp(20 bits)] [Payload...]
//! ```
//!
//! The CRC covers everything after its own four bytes. The whole packet,
//! prefix included, is encrypted before it is sent.

use crate::core::bit_buffer::BitBuffer;
use crate::core::crc32::crc32_range;
use crate::error::{ProtocolError, Result};

/// Width of the timestamp field in bits
pub const TIMESTAMP_BITS: u32 = 20;

/// Bytes taken by the checksum
pub const CRC_SIZE: usize = 4;

/// Smallest valid packet: checksum plus a timestamp rounded up to whole bytes
pub const MIN_PACKET_SIZE: usize = CRC_SIZE + (TIMESTAMP_BITS as usize).div_ceil(8);

/// Write the prefix, run `writer` for the payload, then backfill the checksum.
///
/// `buffer` must be empty.
pub fn write_prefixed<F>(buffer: &mut BitBuffer, timestamp: u32, writer: F)
where
    F: FnOnce(&mut BitBuffer),
{
    let start = buffer.offset();
    buffer.advance_writer((CRC_SIZE * 8) as isize);
    buffer.write_bits(u64::from(timestamp), TIMESTAMP_BITS);
    writer(buffer);

    let size = buffer.size();
    let crc = crc32_range(buffer.array(), start + CRC_SIZE, size - CRC_SIZE);
    buffer.array_mut()[start..start + CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
}

/// Validate the prefix of a received packet and return its timestamp.
///
/// On success the read cursor is positioned at the first payload bit.
pub fn check_prefix(buffer: &mut BitBuffer) -> Result<u32> {
    let size = buffer.size();
    if size < MIN_PACKET_SIZE {
        return Err(ProtocolError::InvalidHeader);
    }

    let start = buffer.offset();
    let array = buffer.array();
    let mut stored = [0u8; CRC_SIZE];
    stored.copy_from_slice(&array[start..start + CRC_SIZE]);
    if u32::from_le_bytes(stored) != crc32_range(array, start + CRC_SIZE, size - CRC_SIZE) {
        return Err(ProtocolError::ChecksumMismatch);
    }

    buffer.advance_reader((CRC_SIZE * 8) as isize);
    Ok(buffer.read_bits(TIMESTAMP_BITS) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_roundtrip() {
        let mut buffer = BitBuffer::with_capacity(64);
        write_prefixed(&mut buffer, 0xABCDE, |b| b.write_bytes(b"payload"));

        let mut received = BitBuffer::from_vec(buffer.as_slice().to_vec());
        assert_eq!(check_prefix(&mut received).unwrap(), 0xABCDE);
        assert_eq!(received.read_bytes(7), b"payload");
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let mut buffer = BitBuffer::with_capacity(16);
        write_prefixed(&mut buffer, 5, |_| {});
        assert_eq!(buffer.size(), MIN_PACKET_SIZE);

        let mut received = BitBuffer::from_vec(buffer.as_slice().to_vec());
        assert_eq!(check_prefix(&mut received).unwrap(), 5);
    }

    #[test]
    fn test_short_packet_rejected() {
        let mut received = BitBuffer::from_vec(vec![0; MIN_PACKET_SIZE - 1]);
        assert!(matches!(
            check_prefix(&mut received),
            Err(ProtocolError::InvalidHeader)
        ));
    }

    #[test]
    fn test_flipped_bit_rejected() {
        let mut buffer = BitBuffer::with_capacity(64);
        write_prefixed(&mut buffer, 1, |b| b.write_u32(42));
        let mut bytes = buffer.as_slice().to_vec();
        bytes[6] ^= 0x10;

        let mut received = BitBuffer::from_vec(bytes);
        assert!(matches!(
            check_prefix(&mut received),
            Err(ProtocolError::ChecksumMismatch)
        ));
    }
}
