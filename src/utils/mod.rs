//! # Utility Modules
//!
//! Supporting utilities for cryptography, buffer pooling, logging, and timing.
//!
//! ## Components
//! - **Crypto**: AES-128-CBC packet encryption
//! - **Buffer Pool**: bounded pool of receive buffers
//! - **Logging**: Structured logging configuration
//! - **Time**: Wall-clock milliseconds
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom) for authentication keys
//! - Memory zeroing for connection keys (zeroize crate)

pub mod buffer_pool;
pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod time;

pub use buffer_pool::{BitBufferPool, PooledBitBuffer};
