//! # Bit Buffer
//!
//! A fixed-capacity, bit-granular read/write cursor over a byte array. Every
//! payload on both channels is serialised through this type.
//!
//! Bits are packed least-significant first, so byte-aligned multi-byte values
//! land on the wire in little-endian order.
//!
//! ## Lifecycles
//! - **Reusable**: created once with [`BitBuffer::with_capacity`] and handed out
//!   through [`BitBuffer::scoped`], which resets the cursors when the guard drops.
//! - **Mutable contents**: [`BitBuffer::reinitialize`] swaps the backing array
//!   wholesale, which is how decrypted packets are read.
//! - **Pooled**: see [`crate::utils::buffer_pool`].
//!
//! Writing past the backing array is a programmer error and panics; buffers
//! are sized by the protocol's maximum packet sizes. Reads past the end yield
//! zero bits, so a short packet from a peer can never take down a reader.

use std::ops::{Deref, DerefMut};

const BIT_MASKS: [u64; 8] = [1, 3, 7, 15, 31, 63, 127, 255];

/// Bit-level buffer with independent read and write cursors
#[derive(Debug, Clone, Default)]
pub struct BitBuffer {
    array: Vec<u8>,
    write_index: usize,
    read_index: usize,
    bits_left_in_write_byte: u32,
    bits_left_in_read_byte: u32,
}

impl BitBuffer {
    /// Create a buffer backed by a zeroed array of `size` bytes
    pub fn with_capacity(size: usize) -> Self {
        Self::from_parts(vec![0; size], 0, 0)
    }

    /// Create a buffer whose readable contents are the whole of `array`
    pub fn from_vec(array: Vec<u8>) -> Self {
        let len = array.len();
        Self::from_parts(array, len, 0)
    }

    fn from_parts(array: Vec<u8>, write_index: usize, read_index: usize) -> Self {
        Self {
            array,
            write_index,
            read_index,
            bits_left_in_write_byte: 8,
            bits_left_in_read_byte: 8,
        }
    }

    /// Replace the backing array; all of it becomes readable
    pub fn reinitialize(&mut self, array: Vec<u8>) {
        let len = array.len();
        self.reinitialize_range(array, 0, len);
    }

    /// Replace the backing array; `size` bytes starting at `offset` become readable
    pub fn reinitialize_range(&mut self, array: Vec<u8>, offset: usize, size: usize) {
        self.array = array;
        self.set_state(offset + size, offset);
    }

    /// Mark the first `size` bytes as written after filling [`array_mut`](Self::array_mut) directly
    pub fn set_size(&mut self, size: usize) {
        self.set_state(size, 0);
    }

    /// Reset both cursors to the start of the array
    pub fn reset(&mut self) {
        self.set_state(0, 0);
    }

    fn set_state(&mut self, write_index: usize, read_index: usize) {
        self.write_index = write_index;
        self.read_index = read_index;
        self.bits_left_in_write_byte = 8;
        self.bits_left_in_read_byte = 8;
    }

    /// Borrow this buffer until the returned guard drops, then reset it
    pub fn scoped(&mut self) -> ScopedBitBuffer<'_> {
        ScopedBitBuffer { buffer: self }
    }

    /// The underlying array
    pub fn array(&self) -> &[u8] {
        &self.array
    }

    /// Mutable access to the underlying array, used to backfill reserved headers
    pub fn array_mut(&mut self) -> &mut [u8] {
        &mut self.array
    }

    /// Size of the underlying array in bytes
    pub fn capacity(&self) -> usize {
        self.array.len()
    }

    /// Take the backing array, leaving this buffer empty
    pub fn into_vec(self) -> Vec<u8> {
        self.array
    }

    /// Byte index of the first unread byte
    pub fn offset(&self) -> usize {
        self.read_index
    }

    /// Count of meaningful bytes from [`offset`](Self::offset), partially written bytes included
    pub fn size(&self) -> usize {
        self.write_index + (8 - self.bits_left_in_write_byte as usize).div_ceil(8) - self.offset()
    }

    /// The meaningful bytes, for handing to a transport without copying
    pub fn as_slice(&self) -> &[u8] {
        let offset = self.offset();
        &self.array[offset..offset + self.size()]
    }

    /// Count of remaining written bits
    pub fn total_bits_left(&self) -> usize {
        let bytes = self.write_index as isize - self.read_index as isize;
        let bits = bytes * 8 + self.bits_left_in_read_byte as isize
            - self.bits_left_in_write_byte as isize;
        bits.max(0) as usize
    }

    /// Count of remaining bytes, fully or partially written
    pub fn started_bytes_left(&self) -> usize {
        self.total_bits_left().div_ceil(8)
    }

    /// Whether the write cursor sits on a byte boundary
    pub fn is_write_aligned(&self) -> bool {
        self.bits_left_in_write_byte == 8
    }

    /// Whether the read cursor sits on a byte boundary
    pub fn is_read_aligned(&self) -> bool {
        self.bits_left_in_read_byte == 8
    }

    fn advance_index(bit_count: isize, bits_left: &mut u32, byte_index: &mut usize) {
        let mut bit_index = *bits_left as isize - bit_count;
        let mut index = *byte_index as isize;
        if bit_index <= 0 {
            let full = bit_index / 8 - 1;
            bit_index -= full * 8;
            index -= full;
        } else if bit_index > 8 {
            let full = (bit_index - 1) / 8;
            bit_index -= full * 8;
            index -= full;
        }
        assert!(index >= 0, "cursor moved before the start of the buffer");
        *bits_left = bit_index as u32;
        *byte_index = index as usize;
    }

    /// Move the write cursor by `bit_count` bits; negative values rewind
    pub fn advance_writer(&mut self, bit_count: isize) {
        Self::advance_index(
            bit_count,
            &mut self.bits_left_in_write_byte,
            &mut self.write_index,
        );
    }

    /// Move the read cursor by `bit_count` bits; negative values rewind
    pub fn advance_reader(&mut self, bit_count: isize) {
        Self::advance_index(
            bit_count,
            &mut self.bits_left_in_read_byte,
            &mut self.read_index,
        );
    }

    /// Write the low `bit_count` bits of `value` (1..=64)
    pub fn write_bits(&mut self, mut value: u64, mut bit_count: u32) {
        debug_assert!((1..=64).contains(&bit_count), "bit count out of range");
        if bit_count < 64 {
            value &= (1 << bit_count) - 1;
        }
        if self.bits_left_in_write_byte == 8 {
            self.array[self.write_index] = 0;
        }
        loop {
            self.array[self.write_index] |= (value << (8 - self.bits_left_in_write_byte)) as u8;
            if self.bits_left_in_write_byte == bit_count {
                self.write_index += 1;
                self.bits_left_in_write_byte = 8;
                break;
            } else if self.bits_left_in_write_byte > bit_count {
                self.bits_left_in_write_byte -= bit_count;
                break;
            }
            value >>= self.bits_left_in_write_byte;
            bit_count -= self.bits_left_in_write_byte;
            self.write_index += 1;
            self.array[self.write_index] = 0;
            self.bits_left_in_write_byte = 8;
        }
    }

    /// Read `bit_count` bits (1..=64)
    pub fn read_bits(&mut self, mut bit_count: u32) -> u64 {
        debug_assert!((1..=64).contains(&bit_count), "bit count out of range");
        let mut value = 0u64;
        let mut read_count = 0i32;
        loop {
            let mask = if bit_count >= 8 {
                255
            } else {
                BIT_MASKS[bit_count as usize - 1]
            };
            let byte = self.array.get(self.read_index).copied().unwrap_or(0);
            let mut read = u64::from(byte) & (mask << (8 - self.bits_left_in_read_byte));
            let delta = read_count + self.bits_left_in_read_byte as i32 - 8;
            if delta > 0 {
                read <<= delta;
            } else if delta < 0 {
                read >>= -delta;
            }
            value |= read;

            if self.bits_left_in_read_byte == bit_count {
                self.read_index += 1;
                self.bits_left_in_read_byte = 8;
                break;
            } else if self.bits_left_in_read_byte > bit_count {
                self.bits_left_in_read_byte -= bit_count;
                break;
            }
            read_count += self.bits_left_in_read_byte as i32;
            bit_count -= self.bits_left_in_read_byte;
            self.read_index += 1;
            self.bits_left_in_read_byte = 8;
        }
        value
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_bits(u64::from(value), 1);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(u64::from(value), 8);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.write_u8(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(u64::from(value), 16);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_u16(value as u16);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(u64::from(value), 32);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bits(value, 64);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_u64(value as u64);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    /// Write raw bytes; a direct copy when the write cursor is byte-aligned
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.is_write_aligned() {
            self.array[self.write_index..self.write_index + bytes.len()].copy_from_slice(bytes);
            self.write_index += bytes.len();
        } else {
            for &byte in bytes {
                self.write_u8(byte);
            }
        }
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_bits(1) == 1
    }

    pub fn read_u8(&mut self) -> u8 {
        self.read_bits(8) as u8
    }

    pub fn read_i8(&mut self) -> i8 {
        self.read_u8() as i8
    }

    pub fn read_u16(&mut self) -> u16 {
        self.read_bits(16) as u16
    }

    pub fn read_i16(&mut self) -> i16 {
        self.read_u16() as i16
    }

    pub fn read_u32(&mut self) -> u32 {
        self.read_bits(32) as u32
    }

    pub fn read_i32(&mut self) -> i32 {
        self.read_u32() as i32
    }

    pub fn read_u64(&mut self) -> u64 {
        self.read_bits(64)
    }

    pub fn read_i64(&mut self) -> i64 {
        self.read_u64() as i64
    }

    pub fn read_f32(&mut self) -> f32 {
        f32::from_bits(self.read_u32())
    }

    pub fn read_f64(&mut self) -> f64 {
        f64::from_bits(self.read_u64())
    }

    /// Read `count` raw bytes; a direct copy when the read cursor is byte-aligned
    pub fn read_bytes(&mut self, count: usize) -> Vec<u8> {
        if self.is_read_aligned() && self.read_index + count <= self.array.len() {
            let bytes = self.array[self.read_index..self.read_index + count].to_vec();
            self.read_index += count;
            bytes
        } else {
            (0..count).map(|_| self.read_u8()).collect()
        }
    }

    /// Read every remaining whole byte; trailing pad bits are left unread
    pub fn read_remaining_bytes(&mut self) -> Vec<u8> {
        let count = self.total_bits_left() / 8;
        self.read_bytes(count)
    }
}

/// A borrowed [`BitBuffer`] that is reset when dropped
pub struct ScopedBitBuffer<'a> {
    buffer: &'a mut BitBuffer,
}

impl Deref for ScopedBitBuffer<'_> {
    type Target = BitBuffer;

    fn deref(&self) -> &Self::Target {
        self.buffer
    }
}

impl DerefMut for ScopedBitBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buffer
    }
}

impl Drop for ScopedBitBuffer<'_> {
    fn drop(&mut self) {
        self.buffer.reset();
    }
}
