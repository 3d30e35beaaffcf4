//! # Client Connection
//!
//! The client-side state machine, free of I/O.
//!
//! ```text
//! start()          Disconnected      -> TcpAuthenticating   (connect, send auth data)
//! auth reply       TcpAuthenticating -> UdpAuthenticating   (open UDP, resend key)
//! confirmation     UdpAuthenticating -> Authenticated
//! close/error      any               -> Disconnected
//! ```
//!
//! Sends are silently skipped unless the connection is authenticated, so a
//! late send racing a close never fails.

use crate::config::{ClientConfig, SEND_BUFFER_SIZE};
use crate::core::bit_buffer::BitBuffer;
use crate::core::udp_framer;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::{udp_auth_datagram, AuthReply, CONFIRMATION_MARKER};
use crate::protocol::timestamp::{self, current_packet_timestamp};
use crate::protocol::{ConnectionState, SequenceTracker, TimestampTracker};
use crate::service::handler::ClientHandler;
use crate::transport::{ClientEvent, ClientTransport, TcpLink};
use crate::utils::crypto::{EncryptionKey, FixedKeyCrypto};
use crate::utils::metrics::Metrics;
use crate::utils::time::time_millis;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// State of one client's connection to a server
pub struct ClientConnection {
    state: ConnectionState,
    crypto: FixedKeyCrypto,
    auth_data: Vec<u8>,
    config: ClientConfig,
    transport: Box<dyn ClientTransport>,
    tcp: Option<Box<dyn TcpLink>>,
    send_buffer: BitBuffer,
    receive_buffer: BitBuffer,
    sequence: SequenceTracker,
    connection_start: u64,
    timestamps: TimestampTracker,
    attempt: u64,
    metrics: Arc<Metrics>,
}

impl ClientConnection {
    pub fn new(
        config: ClientConfig,
        encryption_key: EncryptionKey,
        auth_data: Vec<u8>,
        transport: Box<dyn ClientTransport>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            crypto: FixedKeyCrypto::new(encryption_key),
            auth_data,
            config,
            transport,
            tcp: None,
            send_buffer: BitBuffer::with_capacity(SEND_BUFFER_SIZE),
            receive_buffer: BitBuffer::default(),
            sequence: SequenceTracker::default(),
            connection_start: 0,
            timestamps: TimestampTracker::new(),
            attempt: 0,
            metrics,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Epoch milliseconds at which the server accepted this connection
    pub fn connection_start(&self) -> u64 {
        self.connection_start
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Number of the current connection attempt, bumped by every [`start`](Self::start)
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Record `timestamp` if it is newer than every UDP packet seen so far
    pub fn is_packet_newest(&mut self, timestamp: u32) -> bool {
        self.timestamps.is_newest(timestamp)
    }

    /// One-way transit time in milliseconds of a UDP packet stamped `timestamp`
    pub fn trip_time(&self, timestamp: u32) -> u64 {
        timestamp::trip_time(self.connection_start, timestamp, time_millis())
    }

    /// Begin connecting; fails unless the connection is disconnected
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(ProtocolError::Custom(constants::ERR_ALREADY_STARTED.into()));
        }
        self.state = ConnectionState::TcpAuthenticating;
        self.attempt = self.attempt.wrapping_add(1);
        self.sequence = SequenceTracker::default();
        self.timestamps.reset();
        self.metrics.handshake_attempt();
        self.transport.connect_tcp();
        self.transport.arm_timeout(
            ConnectionState::TcpAuthenticating,
            self.attempt,
            self.config.tcp_auth_timeout,
        );
        info!("Connecting");
        Ok(())
    }

    /// Close both channels; does nothing when already disconnected
    pub fn close(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        debug!(state = %self.state, "Closing connection");
        self.state = ConnectionState::Disconnected;
        if let Some(link) = self.tcp.take() {
            link.close();
            self.metrics.connection_closed();
        }
        self.transport.stop_udp_authentication();
        self.transport.close();
    }

    /// Send a payload over TCP.
    ///
    /// A body whose ciphertext exceeds the link's packet limit is refused with
    /// [`ProtocolError::OversizedPacket`] and nothing is sent.
    pub fn send_tcp<F>(&mut self, writer: F) -> Result<()>
    where
        F: FnOnce(&mut BitBuffer),
    {
        if self.state != ConnectionState::Authenticated {
            return Ok(());
        }
        let Some(link) = &self.tcp else {
            return Ok(());
        };

        let ciphertext = {
            let mut buffer = self.send_buffer.scoped();
            buffer.write_u8(self.sequence.peek_send_id());
            writer(&mut buffer);
            self.crypto.encrypt(buffer.as_slice())
        };
        // An oversized packet must not consume a sequence id
        if ciphertext.len() > link.max_packet_size() {
            return Err(ProtocolError::OversizedPacket(ciphertext.len()));
        }
        self.sequence.next_send_id();
        self.metrics.tcp_sent(ciphertext.len());
        link.send(ciphertext);
        Ok(())
    }

    /// Send a timestamped payload over UDP
    pub fn send_udp<F>(&mut self, writer: F)
    where
        F: FnOnce(&mut BitBuffer),
    {
        if self.state != ConnectionState::Authenticated {
            return;
        }
        let ciphertext = {
            let mut buffer = self.send_buffer.scoped();
            udp_framer::write_prefixed(
                &mut buffer,
                current_packet_timestamp(self.connection_start),
                writer,
            );
            self.crypto.encrypt(buffer.as_slice())
        };
        self.metrics.udp_sent(ciphertext.len());
        self.transport.send_udp(ciphertext);
    }

    /// Feed one transport event through the state machine
    pub fn handle_event<H: ClientHandler + ?Sized>(&mut self, handler: &mut H, event: ClientEvent) {
        match event {
            ClientEvent::TcpConnected(link) => self.on_tcp_connected(link),
            ClientEvent::TcpConnectFailed(e) => {
                if self.state == ConnectionState::TcpAuthenticating {
                    warn!(error = %e, "Failed to connect");
                    self.close();
                    self.metrics.handshake_failed();
                    handler.on_connection_failure(self, e.into());
                }
            }
            ClientEvent::TcpPacket(packet) => self.on_tcp_packet(handler, packet.as_slice()),
            ClientEvent::TcpClosed(reason) => self.on_tcp_closed(handler, reason),
            ClientEvent::UdpDatagram(datagram) => self.on_udp_datagram(handler, datagram.as_slice()),
            ClientEvent::Timeout { state, attempt } => self.on_timeout(handler, state, attempt),
        }
    }

    /// The TCP connection is up: send the authentication data in plaintext
    pub fn on_tcp_connected(&mut self, link: Box<dyn TcpLink>) {
        if self.state != ConnectionState::TcpAuthenticating || self.tcp.is_some() {
            link.close();
            return;
        }
        debug!(server = %link.peer_addr(), "TCP connected, authenticating");
        self.metrics.connection_established();
        link.send(self.auth_data.clone());
        self.tcp = Some(link);
    }

    /// One reassembled TCP packet body
    pub fn on_tcp_packet<H: ClientHandler + ?Sized>(&mut self, handler: &mut H, ciphertext: &[u8]) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        let plaintext = match self.crypto.decrypt(ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(error = %e, state = %self.state, "Undecryptable TCP packet");
                self.lose_connection(handler);
                return;
            }
        };
        self.metrics.tcp_received(ciphertext.len());

        let mut buffer = std::mem::take(&mut self.receive_buffer);
        buffer.reinitialize(plaintext);
        match self.state {
            ConnectionState::TcpAuthenticating => self.on_auth_reply(handler, &mut buffer),
            ConnectionState::UdpAuthenticating => {
                if buffer.size() > 0 && buffer.read_u8() == CONFIRMATION_MARKER {
                    self.transport.stop_udp_authentication();
                    self.state = ConnectionState::Authenticated;
                    self.metrics.handshake_success();
                    info!("Authenticated");
                    handler.on_full_authentication(self, &mut buffer);
                } else {
                    debug!("Ignoring TCP packet before handshake confirmation");
                }
            }
            ConnectionState::Authenticated => {
                if buffer.size() == 0 {
                    debug!("Ignoring empty TCP packet");
                } else if self.sequence.check_receive_id(buffer.read_u8()) {
                    handler.on_tcp_received(self, &mut buffer);
                } else {
                    self.metrics.sequence_reject();
                    debug!(
                        expected = self.sequence.expected_receive_id(),
                        "Dropping out-of-order TCP packet"
                    );
                }
            }
            ConnectionState::Disconnected => {}
        }
        self.receive_buffer = buffer;
    }

    fn on_auth_reply<H: ClientHandler + ?Sized>(&mut self, handler: &mut H, buffer: &mut BitBuffer) {
        match AuthReply::read(buffer) {
            Ok(AuthReply::Rejected(error_code)) => {
                info!(error_code, "Authentication rejected");
                self.close();
                self.metrics.handshake_failed();
                handler.on_tcp_authentication_failure(self, error_code);
            }
            Ok(AuthReply::Accepted(response)) => {
                self.sequence = SequenceTracker::new(response.sequence_bound);
                self.connection_start = response.connection_start;
                self.state = ConnectionState::UdpAuthenticating;
                if let Err(e) = self.transport.start_udp() {
                    warn!(error = %e, "Failed to open UDP socket");
                    self.close();
                    self.metrics.handshake_failed();
                    handler.on_connection_failure(self, e.into());
                    return;
                }
                debug!(bound = response.sequence_bound, "TCP authenticated, binding UDP");
                self.transport
                    .start_udp_authentication(udp_auth_datagram(response.udp_key), self.attempt);
            }
            Err(e) => {
                warn!(error = %e, "Invalid authentication reply");
                self.lose_connection(handler);
            }
        }
    }

    /// The TCP stream ended or failed
    pub fn on_tcp_closed<H: ClientHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        reason: Option<ProtocolError>,
    ) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        match reason {
            Some(e) => warn!(error = %e, "TCP connection failed"),
            None => info!("Server closed the connection"),
        }
        let state = self.state;
        self.close();
        handler.on_connection_lost(self, state);
    }

    /// One UDP datagram from the server
    pub fn on_udp_datagram<H: ClientHandler + ?Sized>(&mut self, handler: &mut H, ciphertext: &[u8]) {
        if self.state != ConnectionState::Authenticated {
            return;
        }
        let Ok(plaintext) = self.crypto.decrypt(ciphertext) else {
            self.metrics.udp_dropped();
            return;
        };

        let mut buffer = std::mem::take(&mut self.receive_buffer);
        buffer.reinitialize(plaintext);
        match udp_framer::check_prefix(&mut buffer) {
            Ok(timestamp) => {
                self.metrics.udp_received(ciphertext.len());
                handler.on_udp_received(self, &mut buffer, timestamp);
            }
            Err(e) => {
                self.metrics.udp_dropped();
                debug!(error = %e, "Dropping invalid UDP packet");
            }
        }
        self.receive_buffer = buffer;
    }

    /// A handshake deadline armed by `attempt` passed.
    ///
    /// Deadlines of earlier attempts, or of a phase already left, are ignored.
    pub fn on_timeout<H: ClientHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        state: ConnectionState,
        attempt: u64,
    ) {
        if attempt != self.attempt || self.state != state || !state.is_authenticating() {
            debug!(%state, attempt, "Ignoring stale timeout");
            return;
        }
        warn!(%state, "Authentication timed out");
        self.close();
        self.metrics.handshake_timed_out();
        handler.on_authentication_timeout(self, state);
    }

    fn lose_connection<H: ClientHandler + ?Sized>(&mut self, handler: &mut H) {
        let state = self.state;
        self.metrics.protocol_error();
        self.close();
        handler.on_connection_lost(self, state);
    }
}
