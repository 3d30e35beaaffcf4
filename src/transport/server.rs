//! Tokio implementation of [`ServerTransport`].
//!
//! The TCP listener and the UDP socket share one port. Accepting is gated by a
//! `watch` flag so admission control can pause the accept loop without
//! closing the listener.

use crate::config::{NetworkConfig, TCP_BUFFER_SIZE};
use crate::error::{ProtocolError, Result};
use crate::protocol::ConnectionState;
use crate::transport::tcp::{spawn_connection, TcpInbound};
use crate::transport::{ConnectionId, ServerEvent, ServerTransport};
use crate::utils::buffer_pool::BitBufferPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Server sockets driven by tokio tasks
pub struct TokioServerTransport {
    udp: Arc<UdpSocket>,
    accepting: watch::Sender<bool>,
    events: mpsc::UnboundedSender<ServerEvent>,
    shutdown: CancellationToken,
    local_addr: SocketAddr,
}

impl TokioServerTransport {
    /// Bind the listener and UDP socket and start the accept and receive loops
    #[instrument(skip(config), fields(address = %config.server.address))]
    pub async fn bind(
        config: &NetworkConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>)> {
        let address: SocketAddr = config.server.address.parse().map_err(|e| {
            ProtocolError::ConfigError(format!(
                "Invalid listen address '{}': {e}",
                config.server.address
            ))
        })?;

        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(address)?;
        let listener = socket.listen(config.server.max_pending_connections)?;
        let local_addr = listener.local_addr()?;
        let udp = Arc::new(UdpSocket::bind(local_addr).await?);
        info!(%local_addr, "Listening on TCP and UDP");

        let (events, rx) = mpsc::unbounded_channel();
        let (accepting, accepting_rx) = watch::channel(true);
        let shutdown = CancellationToken::new();

        tokio::spawn(accept_loop(
            listener,
            accepting_rx,
            events.clone(),
            shutdown.clone(),
            config.transport.max_tcp_packet_size,
            BitBufferPool::new(config.transport.pool_size, TCP_BUFFER_SIZE),
        ));
        tokio::spawn(receive_loop(
            udp.clone(),
            events.clone(),
            shutdown.clone(),
            BitBufferPool::new(config.transport.pool_size, config.transport.udp_buffer_size),
        ));

        Ok((
            Self {
                udp,
                accepting,
                events,
                shutdown,
                local_addr,
            },
            rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut accepting: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<ServerEvent>,
    shutdown: CancellationToken,
    max_packet: usize,
    pool: BitBufferPool,
) {
    let mut next_id = 0u64;
    loop {
        if !*accepting.borrow_and_update() {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                changed = accepting.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
            }
        }

        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = accepting.changed() => {
                if changed.is_err() {
                    return;
                }
                continue;
            }
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Error accepting connection");
                continue;
            }
        };

        let id = ConnectionId(next_id);
        next_id += 1;
        debug!(%id, %peer, "Accepted TCP connection");

        let (link, reader) = spawn_connection(
            stream,
            peer,
            max_packet,
            pool.clone(),
            shutdown.child_token(),
        );
        if events
            .send(ServerEvent::TcpAccepted {
                id,
                peer,
                link: Box::new(link),
            })
            .is_err()
        {
            return;
        }

        let events = events.clone();
        reader.spawn(move |inbound| {
            let event = match inbound {
                TcpInbound::Packet(payload) => ServerEvent::TcpPacket { id, payload },
                TcpInbound::Closed(reason) => ServerEvent::TcpClosed { id, reason },
            };
            let _ = events.send(event);
        });
    }
}

async fn receive_loop(
    udp: Arc<UdpSocket>,
    events: mpsc::UnboundedSender<ServerEvent>,
    shutdown: CancellationToken,
    pool: BitBufferPool,
) {
    loop {
        let mut payload = pool.acquire();
        let received = tokio::select! {
            _ = shutdown.cancelled() => return,
            received = udp.recv_from(payload.array_mut()) => received,
        };
        match received {
            Ok((size, from)) => {
                payload.set_size(size);
                if events.send(ServerEvent::UdpDatagram { from, payload }).is_err() {
                    return;
                }
            }
            Err(e) => debug!(error = %e, "UDP receive failed"),
        }
    }
}

impl ServerTransport for TokioServerTransport {
    fn send_udp(&mut self, to: SocketAddr, datagram: Vec<u8>) {
        if let Err(e) = self.udp.try_send_to(&datagram, to) {
            debug!(error = %e, %to, "Dropping UDP packet");
        }
    }

    fn set_accepting(&mut self, accepting: bool) {
        info!(accepting, "Changing TCP admission");
        self.accepting.send_replace(accepting);
    }

    fn arm_timeout(&mut self, id: ConnectionId, state: ConnectionState, after: Duration) {
        let events = self.events.clone();
        let token = self.shutdown.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    let _ = events.send(ServerEvent::Timeout { id, state });
                }
            }
        });
    }

    fn close(&mut self) {
        self.shutdown.cancel();
    }
}
