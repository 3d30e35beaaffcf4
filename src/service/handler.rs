//! Application callbacks.
//!
//! Callbacks run on the driver task while the instance mutex is held, so they
//! must not block. They receive the state machine itself and may send, close
//! or disconnect from inside a callback.

use crate::core::bit_buffer::BitBuffer;
use crate::error::ProtocolError;
use crate::protocol::ConnectionState;
use crate::service::client_connection::ClientConnection;
use crate::service::registry::{ServerClient, ServerRegistry};
use crate::transport::ConnectionId;
use crate::utils::crypto::EncryptionKey;

/// Events of one client connection
pub trait ClientHandler: Send + 'static {
    /// The TCP connection could not be established
    fn on_connection_failure(&mut self, _connection: &mut ClientConnection, _error: ProtocolError) {}

    /// The server rejected the authentication data
    fn on_tcp_authentication_failure(&mut self, _connection: &mut ClientConnection, _error_code: u8) {}

    /// A handshake phase ran out of time
    fn on_authentication_timeout(&mut self, _connection: &mut ClientConnection, _state: ConnectionState) {}

    /// Both channels are bound; `payload` holds the server's confirmation payload
    fn on_full_authentication(&mut self, _connection: &mut ClientConnection, _payload: &mut BitBuffer) {}

    fn on_tcp_received(&mut self, connection: &mut ClientConnection, payload: &mut BitBuffer);

    /// `timestamp` is the packet's send time in ticks since the connection started
    fn on_udp_received(
        &mut self,
        connection: &mut ClientConnection,
        payload: &mut BitBuffer,
        timestamp: u32,
    );

    /// The connection dropped; `state` is the state it was in
    fn on_connection_lost(&mut self, _connection: &mut ClientConnection, _state: ConnectionState) {}
}

/// Outcome of authenticating a new client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authentication {
    /// Continue the handshake; all further traffic is encrypted with `encryption_key`
    Accepted { encryption_key: EncryptionKey },
    /// Send `error_code` encrypted with `encryption_key`, then disconnect
    Rejected {
        encryption_key: EncryptionKey,
        error_code: u8,
    },
}

/// Events of a server and its clients
pub trait ServerHandler: Send + 'static {
    /// Decide on a new client from its authentication data
    fn authenticate(
        &mut self,
        server: &mut ServerRegistry,
        id: ConnectionId,
        payload: &mut BitBuffer,
    ) -> Authentication;

    /// `id` proved its UDP endpoint; anything written to `confirmation` is
    /// delivered with the handshake confirmation
    fn on_full_authentication(
        &mut self,
        _server: &mut ServerRegistry,
        _id: ConnectionId,
        _confirmation: &mut BitBuffer,
    ) {
    }

    fn on_tcp_received(&mut self, server: &mut ServerRegistry, id: ConnectionId, payload: &mut BitBuffer);

    fn on_udp_received(
        &mut self,
        server: &mut ServerRegistry,
        id: ConnectionId,
        payload: &mut BitBuffer,
        timestamp: u32,
    );

    /// `client` was dropped by the network, a protocol violation or admission
    /// control; `state` is the state it was in
    fn on_lost_connection(
        &mut self,
        _server: &mut ServerRegistry,
        _client: ServerClient,
        _state: ConnectionState,
    ) {
    }

    /// `client` did not finish the handshake phase `state` in time
    fn on_authentication_timeout(
        &mut self,
        _server: &mut ServerRegistry,
        _client: ServerClient,
        _state: ConnectionState,
    ) {
    }
}
