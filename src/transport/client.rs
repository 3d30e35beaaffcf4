//! Tokio implementation of [`ClientTransport`].

use crate::config::{NetworkConfig, TCP_BUFFER_SIZE};
use crate::error::{ProtocolError, Result};
use crate::protocol::ConnectionState;
use crate::transport::tcp::{spawn_connection, TcpInbound};
use crate::transport::{ClientEvent, ClientTransport};
use crate::utils::buffer_pool::BitBufferPool;
use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Client sockets driven by tokio tasks
pub struct TokioClientTransport {
    server: SocketAddr,
    events: mpsc::UnboundedSender<ClientEvent>,
    max_tcp_packet_size: usize,
    tcp_pool: BitBufferPool,
    udp_pool: BitBufferPool,
    udp_auth_interval: Duration,
    udp_auth_attempts: u32,
    udp: Option<Arc<UdpSocket>>,
    resend: Option<CancellationToken>,
    shutdown: CancellationToken,
}

impl TokioClientTransport {
    /// Create a transport towards `config.client.address`, returning the event receiver
    pub fn new(config: &NetworkConfig) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let server: SocketAddr = config.client.address.parse().map_err(|e| {
            ProtocolError::ConfigError(format!(
                "Invalid server address '{}': {e}",
                config.client.address
            ))
        })?;
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            server,
            events,
            max_tcp_packet_size: config.transport.max_tcp_packet_size,
            tcp_pool: BitBufferPool::new(config.transport.pool_size, TCP_BUFFER_SIZE),
            udp_pool: BitBufferPool::new(
                config.transport.pool_size,
                config.transport.udp_buffer_size,
            ),
            udp_auth_interval: config.client.udp_auth_interval(),
            udp_auth_attempts: config.client.udp_auth_attempts(),
            udp: None,
            resend: None,
            shutdown: CancellationToken::new(),
        };
        Ok((transport, rx))
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    fn bind_udp(&self) -> io::Result<UdpSocket> {
        let local: SocketAddr = if self.server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = StdUdpSocket::bind(local)?;
        socket.connect(self.server)?;
        socket.set_nonblocking(true)?;
        UdpSocket::from_std(socket)
    }
}

impl ClientTransport for TokioClientTransport {
    #[instrument(skip(self), fields(server = %self.server))]
    fn connect_tcp(&mut self) {
        let server = self.server;
        let events = self.events.clone();
        let token = self.shutdown.child_token();
        let max_packet = self.max_tcp_packet_size;
        let pool = self.tcp_pool.clone();

        tokio::spawn(async move {
            let connected = tokio::select! {
                _ = token.cancelled() => return,
                connected = TcpStream::connect(server) => connected,
            };
            match connected {
                Ok(stream) => {
                    let (link, reader) = spawn_connection(stream, server, max_packet, pool, token);
                    if events.send(ClientEvent::TcpConnected(Box::new(link))).is_err() {
                        return;
                    }
                    reader.spawn(move |inbound| {
                        let event = match inbound {
                            TcpInbound::Packet(packet) => ClientEvent::TcpPacket(packet),
                            TcpInbound::Closed(reason) => ClientEvent::TcpClosed(reason),
                        };
                        let _ = events.send(event);
                    });
                }
                Err(e) => {
                    debug!(error = %e, "TCP connect failed");
                    let _ = events.send(ClientEvent::TcpConnectFailed(e));
                }
            }
        });
    }

    fn start_udp(&mut self) -> io::Result<()> {
        let socket = Arc::new(self.bind_udp()?);
        self.udp = Some(socket.clone());

        let events = self.events.clone();
        let token = self.shutdown.child_token();
        let pool = self.udp_pool.clone();

        tokio::spawn(async move {
            loop {
                let mut datagram = pool.acquire();
                let received = tokio::select! {
                    _ = token.cancelled() => return,
                    received = socket.recv(datagram.array_mut()) => received,
                };
                match received {
                    Ok(size) => {
                        datagram.set_size(size);
                        if events.send(ClientEvent::UdpDatagram(datagram)).is_err() {
                            return;
                        }
                    }
                    Err(e) => debug!(error = %e, "UDP receive failed"),
                }
            }
        });
        Ok(())
    }

    fn send_udp(&mut self, datagram: Vec<u8>) {
        if let Some(socket) = &self.udp {
            if let Err(e) = socket.try_send(&datagram) {
                debug!(error = %e, "Dropping UDP packet");
            }
        }
    }

    fn start_udp_authentication(&mut self, datagram: [u8; 8], attempt: u64) {
        let Some(socket) = self.udp.clone() else {
            warn!("UDP authentication started without a UDP socket");
            return;
        };
        self.stop_udp_authentication();
        let token = self.shutdown.child_token();
        self.resend = Some(token.clone());

        let events = self.events.clone();
        let period = self.udp_auth_interval;
        let attempts = self.udp_auth_attempts;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            for _ in 0..attempts {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = interval.tick() => {
                        if let Err(e) = socket.try_send(&datagram) {
                            debug!(error = %e, "UDP authentication send failed");
                        }
                    }
                }
            }
            tokio::select! {
                _ = token.cancelled() => {}
                _ = interval.tick() => {
                    let _ = events.send(ClientEvent::Timeout {
                        state: ConnectionState::UdpAuthenticating,
                        attempt,
                    });
                }
            }
        });
    }

    fn stop_udp_authentication(&mut self) {
        if let Some(token) = self.resend.take() {
            token.cancel();
        }
    }

    fn arm_timeout(&mut self, state: ConnectionState, attempt: u64, after: Duration) {
        let events = self.events.clone();
        let token = self.shutdown.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    let _ = events.send(ClientEvent::Timeout { state, attempt });
                }
            }
        });
    }

    fn close(&mut self) {
        self.shutdown.cancel();
        self.shutdown = CancellationToken::new();
        self.resend = None;
        self.udp = None;
    }
}
