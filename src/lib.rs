//! # double-socket
//!
//! Dual-channel client/server networking: a reliable, ordered, encrypted TCP
//! channel next to an unreliable, timestamped, encrypted UDP channel, bound
//! together by a handshake that proves the client owns both endpoints.
//!
//! ## Handshake
//! ```text
//! client                                   server
//!   | --- TCP  auth data (plaintext) ------> |  authenticate()
//!   | <-- TCP  {bound, udp key, start} ----- |  (or a single error byte)
//!   | --- UDP  udp key, resent ~30/s ------> |  bind UDP endpoint
//!   | <-- TCP  0 + confirmation payload ---- |
//! ```
//!
//! ## Layers
//! - [`core`]: bit buffer, checksum, TCP and UDP framing
//! - [`protocol`]: connection states, handshake messages, sequencing, timestamps
//! - [`transport`]: socket seams and their tokio implementations
//! - [`service`]: the connection state machines and [`DoubleClient`] / [`DoubleServer`]
//! - [`utils`]: crypto, buffer pool, logging, metrics
//!
//! ## Example
//! ```no_run
//! use double_socket::{
//!     Authentication, BitBuffer, ConnectionId, DoubleServer, NetworkConfig, ServerHandler,
//!     ServerRegistry,
//! };
//!
//! struct Echo;
//!
//! impl ServerHandler for Echo {
//!     fn authenticate(&mut self, _: &mut ServerRegistry, _: ConnectionId, _: &mut BitBuffer) -> Authentication {
//!         Authentication::Accepted { encryption_key: [7; 16] }
//!     }
//!
//!     fn on_tcp_received(&mut self, server: &mut ServerRegistry, id: ConnectionId, payload: &mut BitBuffer) {
//!         let bytes = payload.read_remaining_bytes();
//!         let _ = server.send_tcp(id, |b| b.write_bytes(&bytes));
//!     }
//!
//!     fn on_udp_received(&mut self, server: &mut ServerRegistry, id: ConnectionId, payload: &mut BitBuffer, _: u32) {
//!         let bytes = payload.read_remaining_bytes();
//!         server.send_udp(id, |b| b.write_bytes(&bytes));
//!     }
//! }
//!
//! # async fn run() -> double_socket::Result<()> {
//! let server = DoubleServer::bind(&NetworkConfig::default(), Echo).await?;
//! println!("listening on {}", server.local_addr());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::NetworkConfig;
pub use core::bit_buffer::BitBuffer;
pub use error::{ProtocolError, Result};
pub use protocol::ConnectionState;
pub use service::{
    Authentication, ClientConnection, ClientHandler, DoubleClient, DoubleServer, ServerClient,
    ServerHandler, ServerRegistry,
};
pub use transport::ConnectionId;
pub use utils::crypto::EncryptionKey;
pub use utils::logging::init_logging;
