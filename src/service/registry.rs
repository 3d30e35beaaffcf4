//! # Server Registry
//!
//! Server-side peer records and the handshake state machine, free of I/O.
//!
//! Peers are looked up three ways: by [`ConnectionId`] for TCP traffic, by UDP
//! address once bound, and by pending UDP key while the handshake waits for the
//! client's UDP endpoint. A peer is removed from all three maps together.
//!
//! ## Admission control
//! Peers in `UdpAuthenticating` or `Authenticated` hold a capacity slot. When
//! the last slot is taken the transport stops accepting and every peer still
//! in `TcpAuthenticating` is dropped. Releasing a slot resumes accepting.

use crate::config::{ServerConfig, SEND_BUFFER_SIZE};
use crate::core::bit_buffer::BitBuffer;
use crate::core::udp_framer;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{
    generate_sequence_bound, generate_udp_key, parse_udp_key, AuthReply, TcpAuthResponse,
    CONFIRMATION_MARKER,
};
use crate::protocol::timestamp::{self, current_packet_timestamp};
use crate::protocol::{ConnectionState, SequenceTracker, TimestampTracker};
use crate::service::handler::{Authentication, ServerHandler};
use crate::transport::{ConnectionId, ServerEvent, ServerTransport, TcpLink};
use crate::utils::buffer_pool::PooledBitBuffer;
use crate::utils::crypto::{AnyKeyCrypto, EncryptionKey};
use crate::utils::metrics::Metrics;
use crate::utils::time::time_millis;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroize;

/// One peer of the server
pub struct ServerClient {
    id: ConnectionId,
    tcp_address: SocketAddr,
    state: ConnectionState,
    link: Box<dyn TcpLink>,
    udp_address: Option<SocketAddr>,
    key: EncryptionKey,
    sequence: SequenceTracker,
    udp_key: Option<u64>,
    connection_start: u64,
    timestamps: TimestampTracker,
    extra_data: Option<Box<dyn Any + Send>>,
}

impl ServerClient {
    fn new(id: ConnectionId, tcp_address: SocketAddr, link: Box<dyn TcpLink>) -> Self {
        Self {
            id,
            tcp_address,
            state: ConnectionState::TcpAuthenticating,
            link,
            udp_address: None,
            key: [0; 16],
            sequence: SequenceTracker::default(),
            udp_key: None,
            connection_start: 0,
            timestamps: TimestampTracker::new(),
            extra_data: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn tcp_address(&self) -> SocketAddr {
        self.tcp_address
    }

    /// The bound UDP endpoint, known once the peer is authenticated
    pub fn udp_address(&self) -> Option<SocketAddr> {
        self.udp_address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Epoch milliseconds at which the peer's authentication was accepted
    pub fn connection_start(&self) -> u64 {
        self.connection_start
    }

    pub fn sequence_bound(&self) -> u8 {
        self.sequence.bound()
    }

    /// Record `timestamp` if it is newer than every UDP packet seen from this peer
    pub fn is_packet_newest(&mut self, timestamp: u32) -> bool {
        self.timestamps.is_newest(timestamp)
    }

    pub fn trip_time(&self, timestamp: u32) -> u64 {
        timestamp::trip_time(self.connection_start, timestamp, time_millis())
    }

    pub fn extra_data(&self) -> Option<&(dyn Any + Send)> {
        self.extra_data.as_deref()
    }

    pub fn extra_data_mut(&mut self) -> Option<&mut (dyn Any + Send)> {
        self.extra_data.as_deref_mut()
    }

    /// Attach application state to this peer, returning the previous value
    pub fn set_extra_data(&mut self, data: Box<dyn Any + Send>) -> Option<Box<dyn Any + Send>> {
        self.extra_data.replace(data)
    }

    pub fn take_extra_data(&mut self) -> Option<Box<dyn Any + Send>> {
        self.extra_data.take()
    }
}

impl Drop for ServerClient {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for ServerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerClient")
            .field("id", &self.id)
            .field("tcp_address", &self.tcp_address)
            .field("udp_address", &self.udp_address)
            .field("state", &self.state)
            .field("connection_start", &self.connection_start)
            .finish_non_exhaustive()
    }
}

/// All peers of one server
pub struct ServerRegistry {
    transport: Box<dyn ServerTransport>,
    clients: HashMap<ConnectionId, ServerClient>,
    udp_clients: HashMap<SocketAddr, ConnectionId>,
    pending_udp_keys: HashMap<u64, ConnectionId>,
    authenticated_count: usize,
    accepting: bool,
    closed: bool,
    crypto: AnyKeyCrypto,
    send_buffer: BitBuffer,
    confirmation_buffer: BitBuffer,
    receive_buffer: BitBuffer,
    config: ServerConfig,
    metrics: Arc<Metrics>,
}

impl ServerRegistry {
    pub fn new(
        config: ServerConfig,
        transport: Box<dyn ServerTransport>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            transport,
            clients: HashMap::new(),
            udp_clients: HashMap::new(),
            pending_udp_keys: HashMap::new(),
            authenticated_count: 0,
            accepting: true,
            closed: false,
            crypto: AnyKeyCrypto,
            send_buffer: BitBuffer::with_capacity(SEND_BUFFER_SIZE),
            confirmation_buffer: BitBuffer::with_capacity(SEND_BUFFER_SIZE),
            receive_buffer: BitBuffer::default(),
            config,
            metrics,
        }
    }

    pub fn client(&self, id: ConnectionId) -> Option<&ServerClient> {
        self.clients.get(&id)
    }

    pub fn client_mut(&mut self, id: ConnectionId) -> Option<&mut ServerClient> {
        self.clients.get_mut(&id)
    }

    pub fn clients(&self) -> impl Iterator<Item = &ServerClient> {
        self.clients.values()
    }

    /// Peers holding a capacity slot
    pub fn authenticated_count(&self) -> usize {
        self.authenticated_count
    }

    pub fn max_authenticated(&self) -> usize {
        self.config.max_authenticated
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Send a payload over TCP to an authenticated peer.
    ///
    /// Unknown or unauthenticated peers are skipped. A body whose ciphertext
    /// exceeds the link's packet limit is refused with
    /// [`ProtocolError::OversizedPacket`] and nothing is sent.
    pub fn send_tcp<F>(&mut self, id: ConnectionId, writer: F) -> Result<()>
    where
        F: FnOnce(&mut BitBuffer),
    {
        let Some(client) = self.clients.get_mut(&id) else {
            return Ok(());
        };
        if client.state != ConnectionState::Authenticated {
            return Ok(());
        }

        let ciphertext = {
            let mut buffer = self.send_buffer.scoped();
            buffer.write_u8(client.sequence.peek_send_id());
            writer(&mut buffer);
            self.crypto.encrypt(&client.key, buffer.as_slice())
        };
        // An oversized packet must not consume a sequence id
        if ciphertext.len() > client.link.max_packet_size() {
            return Err(ProtocolError::OversizedPacket(ciphertext.len()));
        }
        client.sequence.next_send_id();
        self.metrics.tcp_sent(ciphertext.len());
        client.link.send(ciphertext);
        Ok(())
    }

    /// Send a timestamped payload over UDP to an authenticated peer
    pub fn send_udp<F>(&mut self, id: ConnectionId, writer: F)
    where
        F: FnOnce(&mut BitBuffer),
    {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        let (ConnectionState::Authenticated, Some(to)) = (client.state, client.udp_address) else {
            return;
        };

        let ciphertext = {
            let mut buffer = self.send_buffer.scoped();
            udp_framer::write_prefixed(
                &mut buffer,
                current_packet_timestamp(client.connection_start),
                writer,
            );
            self.crypto.encrypt(&client.key, buffer.as_slice())
        };
        self.metrics.udp_sent(ciphertext.len());
        self.transport.send_udp(to, ciphertext);
    }

    /// Drop a peer without notifying the handler; false if it was unknown
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        self.remove_client(id).is_some()
    }

    /// Disconnect every peer and close the sockets. Idempotent.
    #[instrument(skip(self))]
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let ids: Vec<ConnectionId> = self.clients.keys().copied().collect();
        for id in ids {
            self.remove_client(id);
        }
        self.accepting = false;
        self.transport.close();
        info!("Server closed");
    }

    /// Feed one transport event through the state machine
    pub fn handle_event<H: ServerHandler + ?Sized>(&mut self, handler: &mut H, event: ServerEvent) {
        match event {
            ServerEvent::TcpAccepted { id, peer, link } => self.on_tcp_accepted(id, peer, link),
            ServerEvent::TcpPacket { id, payload } => self.on_tcp_packet(handler, id, payload),
            ServerEvent::TcpClosed { id, reason } => {
                if let Some(e) = &reason {
                    debug!(%id, error = %e, "TCP connection failed");
                }
                self.lose_client(handler, id);
            }
            ServerEvent::UdpDatagram { from, payload } => {
                self.on_udp_datagram(handler, from, payload.as_slice())
            }
            ServerEvent::Timeout { id, state } => self.on_timeout(handler, id, state),
        }
    }

    /// Register a freshly accepted TCP connection
    pub fn on_tcp_accepted(&mut self, id: ConnectionId, peer: SocketAddr, link: Box<dyn TcpLink>) {
        if self.closed || self.authenticated_count >= self.config.max_authenticated {
            debug!(%id, %peer, "Refusing connection while full");
            link.close();
            return;
        }
        debug!(%id, %peer, "Client connected");
        self.metrics.connection_established();
        self.metrics.handshake_attempt();
        self.clients.insert(id, ServerClient::new(id, peer, link));
        self.transport.arm_timeout(
            id,
            ConnectionState::TcpAuthenticating,
            self.config.tcp_auth_timeout,
        );
    }

    /// One reassembled TCP packet body from `id`
    pub fn on_tcp_packet<H: ServerHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        id: ConnectionId,
        mut payload: PooledBitBuffer,
    ) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        self.metrics.tcp_received(payload.size());
        let state = client.state;
        match state {
            ConnectionState::TcpAuthenticating => self.authenticate(handler, id, &mut payload),
            ConnectionState::UdpAuthenticating => {
                debug!(%id, "Ignoring TCP packet while waiting for the UDP key");
            }
            ConnectionState::Authenticated => {
                let plaintext = match self.crypto.decrypt(&client.key, payload.as_slice()) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        warn!(%id, error = %e, "Undecryptable TCP packet");
                        self.metrics.protocol_error();
                        self.lose_client(handler, id);
                        return;
                    }
                };
                self.deliver_tcp(handler, id, plaintext);
            }
            ConnectionState::Disconnected => {}
        }
    }

    fn deliver_tcp<H: ServerHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        id: ConnectionId,
        plaintext: Vec<u8>,
    ) {
        let mut buffer = std::mem::take(&mut self.receive_buffer);
        buffer.reinitialize(plaintext);
        let in_order = match self.clients.get_mut(&id) {
            Some(client) if buffer.size() > 0 => {
                let sequence_id = buffer.read_u8();
                client.sequence.check_receive_id(sequence_id)
            }
            _ => false,
        };
        if in_order {
            handler.on_tcp_received(self, id, &mut buffer);
        } else {
            self.metrics.sequence_reject();
            debug!(%id, "Dropping out-of-order TCP packet");
        }
        self.receive_buffer = buffer;
    }

    #[instrument(skip(self, handler, payload))]
    fn authenticate<H: ServerHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        id: ConnectionId,
        payload: &mut BitBuffer,
    ) {
        let decision = handler.authenticate(self, id, payload);

        // The handler may have dropped the peer itself
        if self.clients.get(&id).map(ServerClient::state) != Some(ConnectionState::TcpAuthenticating)
        {
            return;
        }

        match decision {
            Authentication::Rejected {
                encryption_key,
                error_code,
            } => {
                info!(%id, error_code, "Authentication rejected");
                let reply = {
                    let mut buffer = self.send_buffer.scoped();
                    AuthReply::Rejected(error_code).write(&mut buffer);
                    self.crypto.encrypt(&encryption_key, buffer.as_slice())
                };
                if let Some(client) = self.clients.get(&id) {
                    client.link.send(reply);
                }
                self.metrics.handshake_failed();
                self.remove_client(id);
            }
            Authentication::Accepted { encryption_key } => {
                let udp_key = match generate_udp_key(|k| self.pending_udp_keys.contains_key(&k)) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(%id, error = %e, "Could not generate a UDP key");
                        self.metrics.handshake_failed();
                        self.lose_client(handler, id);
                        return;
                    }
                };
                self.accept(id, encryption_key, udp_key);
                if self.authenticated_count >= self.config.max_authenticated {
                    self.stop_accepting(handler, id);
                }
            }
        }
    }

    fn accept(&mut self, id: ConnectionId, encryption_key: EncryptionKey, udp_key: u64) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        let response = TcpAuthResponse {
            sequence_bound: generate_sequence_bound(),
            udp_key,
            connection_start: time_millis(),
        };
        client.key = encryption_key;
        client.sequence = SequenceTracker::new(response.sequence_bound);
        client.udp_key = Some(udp_key);
        client.connection_start = response.connection_start;
        client.state = ConnectionState::UdpAuthenticating;
        self.pending_udp_keys.insert(udp_key, id);
        self.authenticated_count += 1;

        let reply = {
            let mut buffer = self.send_buffer.scoped();
            AuthReply::Accepted(response).write(&mut buffer);
            self.crypto.encrypt(&client.key, buffer.as_slice())
        };
        client.link.send(reply);
        debug!(%id, bound = response.sequence_bound, "TCP authenticated, waiting for UDP key");

        self.transport.arm_timeout(
            id,
            ConnectionState::UdpAuthenticating,
            self.config.udp_auth_timeout,
        );
    }

    /// The last slot went to `winner`: pause accepting and drop the other contenders
    fn stop_accepting<H: ServerHandler + ?Sized>(&mut self, handler: &mut H, winner: ConnectionId) {
        info!(count = self.authenticated_count, "At capacity, pausing accepts");
        self.accepting = false;
        self.transport.set_accepting(false);

        let losers: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|c| c.id != winner && c.state == ConnectionState::TcpAuthenticating)
            .map(ServerClient::id)
            .collect();
        for id in losers {
            debug!(%id, "Dropping contender for the last slot");
            self.lose_client(handler, id);
        }
    }

    /// One datagram received on the shared UDP socket
    pub fn on_udp_datagram<H: ServerHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        from: SocketAddr,
        datagram: &[u8],
    ) {
        if let Some(&id) = self.udp_clients.get(&from) {
            self.deliver_udp(handler, id, datagram);
            return;
        }

        let Some(id) = parse_udp_key(datagram).and_then(|k| self.pending_udp_keys.remove(&k)) else {
            self.metrics.udp_dropped();
            debug!(%from, len = datagram.len(), "Dropping datagram from unknown endpoint");
            return;
        };
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        client.udp_key = None;
        client.udp_address = Some(from);
        client.state = ConnectionState::Authenticated;
        self.udp_clients.insert(from, id);
        self.metrics.handshake_success();
        info!(%id, udp = %from, "Client authenticated");

        let mut confirmation = std::mem::take(&mut self.confirmation_buffer);
        confirmation.write_u8(CONFIRMATION_MARKER);
        handler.on_full_authentication(self, id, &mut confirmation);
        if let Some(client) = self.clients.get(&id) {
            let ciphertext = self.crypto.encrypt(&client.key, confirmation.as_slice());
            self.metrics.tcp_sent(ciphertext.len());
            client.link.send(ciphertext);
        }
        confirmation.reset();
        self.confirmation_buffer = confirmation;
    }

    fn deliver_udp<H: ServerHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        id: ConnectionId,
        datagram: &[u8],
    ) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        let Ok(plaintext) = self.crypto.decrypt(&client.key, datagram) else {
            self.metrics.udp_dropped();
            return;
        };

        let mut buffer = std::mem::take(&mut self.receive_buffer);
        buffer.reinitialize(plaintext);
        match udp_framer::check_prefix(&mut buffer) {
            Ok(timestamp) => {
                self.metrics.udp_received(datagram.len());
                handler.on_udp_received(self, id, &mut buffer, timestamp);
            }
            Err(e) => {
                self.metrics.udp_dropped();
                debug!(%id, error = %e, "Dropping invalid UDP packet");
            }
        }
        self.receive_buffer = buffer;
    }

    /// A handshake deadline passed for `id`
    pub fn on_timeout<H: ServerHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        id: ConnectionId,
        state: ConnectionState,
    ) {
        if self.clients.get(&id).map(ServerClient::state) != Some(state) || !state.is_authenticating()
        {
            return;
        }
        warn!(%id, %state, "Authentication timed out");
        self.metrics.handshake_timed_out();
        if let Some(client) = self.remove_client(id) {
            handler.on_authentication_timeout(self, client, state);
        }
    }

    fn lose_client<H: ServerHandler + ?Sized>(&mut self, handler: &mut H, id: ConnectionId) {
        if let Some(client) = self.remove_client(id) {
            let state = client.state;
            info!(%id, %state, "Client disconnected");
            handler.on_lost_connection(self, client, state);
        }
    }

    /// Remove `id` from every map, close its link and release its slot
    fn remove_client(&mut self, id: ConnectionId) -> Option<ServerClient> {
        let client = self.clients.remove(&id)?;
        if let Some(address) = client.udp_address {
            self.udp_clients.remove(&address);
        }
        if let Some(key) = client.udp_key {
            self.pending_udp_keys.remove(&key);
        }
        client.link.close();
        self.metrics.connection_closed();

        if client.state != ConnectionState::TcpAuthenticating {
            let was_full = self.authenticated_count >= self.config.max_authenticated;
            self.authenticated_count = self.authenticated_count.saturating_sub(1);
            if was_full && !self.closed {
                info!(count = self.authenticated_count, "Slot released, resuming accepts");
                self.accepting = true;
                self.transport.set_accepting(true);
            }
        }
        Some(client)
    }
}

impl fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("clients", &self.clients.len())
            .field("authenticated_count", &self.authenticated_count)
            .field("accepting", &self.accepting)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
