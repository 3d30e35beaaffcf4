//! CRC-32 (IEEE, reflected polynomial 0xEDB88320) over byte ranges.

/// Checksum of the whole slice
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Checksum of `count` bytes of `bytes` starting at `offset`
pub fn crc32_range(bytes: &[u8], offset: usize, count: usize) -> u32 {
    crc32fast::hash(&bytes[offset..offset + count])
}
