//! # Core Wire Components
//!
//! Bit-level serialization and packet framing for both channels.
//!
//! ## Components
//! - **BitBuffer**: bit-granular read/write cursor every payload is written through
//! - **Crc32**: checksum over byte ranges
//! - **TcpFramer**: length-prefixed reassembly over a byte stream
//! - **UdpFramer**: checksum and timestamp prefix for datagrams
//!
//! ## Wire Format
//! ```text
//! TCP:  [Length(2)] [Ciphertext]
//! UDP:  [Ciphertext]  where the plaintext is  [CRC(4)] [Timestamp(20 bits)] [Payload]
//! ```

pub mod bit_buffer;
pub mod crc32;
pub mod tcp_framer;
pub mod udp_framer;

pub use bit_buffer::{BitBuffer, ScopedBitBuffer};
