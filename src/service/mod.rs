//! # Service Layer
//!
//! Connection state machines and the tokio-driven client and server built on
//! them.
//!
//! - [`ClientConnection`]: one client's handshake and data exchange
//! - [`ServerRegistry`]: all peers of a server, handshake and admission control
//! - [`DoubleClient`] / [`DoubleServer`]: the state machines on tokio sockets
//! - [`ClientHandler`] / [`ServerHandler`]: application callbacks

pub mod client;
pub mod client_connection;
pub mod handler;
pub mod registry;
pub mod server;

pub use client::DoubleClient;
pub use client_connection::ClientConnection;
pub use handler::{Authentication, ClientHandler, ServerHandler};
pub use registry::{ServerClient, ServerRegistry};
pub use server::DoubleServer;
