//! # Transport Layer
//!
//! The seams between the connection state machines and the sockets.
//!
//! The state machines in [`crate::service`] never touch a socket. They drive
//! the traits below and consume [`ClientEvent`]s and [`ServerEvent`]s. The
//! tokio implementations spawn reader, writer and timer tasks that turn socket
//! activity into events on an unbounded channel; a driver task feeds the
//! events to the state machine under the instance mutex.
//!
//! ## Cancellation
//! Every spawned task selects on a `CancellationToken`. Closing a transport
//! cancels its timers, the UDP key resend loop and all socket tasks; nothing
//! is reported for cancelled work.

use crate::error::ProtocolError;
use crate::protocol::ConnectionState;
use crate::utils::buffer_pool::PooledBitBuffer;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

pub mod client;
pub mod server;
pub mod tcp;

pub use client::TokioClientTransport;
pub use server::TokioServerTransport;

/// Identity of a server-side connection, issued at accept time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Write side of one TCP connection
pub trait TcpLink: Send {
    /// Queue one packet body; the length prefix is added by the link
    fn send(&self, body: Vec<u8>);

    /// Flush queued packets, then close the connection
    fn close(&self);

    fn peer_addr(&self) -> SocketAddr;

    /// Largest body [`send`](Self::send) will frame; larger bodies fail the connection
    fn max_packet_size(&self) -> usize {
        u16::MAX as usize
    }
}

/// Socket operations a client connection needs
pub trait ClientTransport: Send {
    /// Start connecting; the outcome arrives as [`ClientEvent::TcpConnected`]
    /// or [`ClientEvent::TcpConnectFailed`]
    fn connect_tcp(&mut self);

    /// Open the UDP socket towards the server
    fn start_udp(&mut self) -> io::Result<()>;

    fn send_udp(&mut self, datagram: Vec<u8>);

    /// Resend `datagram` on a fixed schedule; when the schedule runs out a
    /// [`ClientEvent::Timeout`] for [`ConnectionState::UdpAuthenticating`] and
    /// `attempt` follows
    fn start_udp_authentication(&mut self, datagram: [u8; 8], attempt: u64);

    fn stop_udp_authentication(&mut self);

    /// Deliver [`ClientEvent::Timeout`] with `state` and `attempt` after `after`
    fn arm_timeout(&mut self, state: ConnectionState, attempt: u64, after: Duration);

    /// Close the sockets and cancel every pending task
    fn close(&mut self);
}

/// Socket operations a server registry needs
pub trait ServerTransport: Send {
    fn send_udp(&mut self, to: SocketAddr, datagram: Vec<u8>);

    /// Pause or resume accepting TCP connections
    fn set_accepting(&mut self, accepting: bool);

    /// Deliver [`ServerEvent::Timeout`] for `id` and `state` after `after`
    fn arm_timeout(&mut self, id: ConnectionId, state: ConnectionState, after: Duration);

    /// Close the listener and UDP socket and cancel every pending task
    fn close(&mut self);
}

/// Socket activity reported to a client connection
pub enum ClientEvent {
    TcpConnected(Box<dyn TcpLink>),
    TcpConnectFailed(io::Error),
    /// One reassembled TCP packet body
    TcpPacket(PooledBitBuffer),
    /// The server closed the stream, or it failed
    TcpClosed(Option<ProtocolError>),
    UdpDatagram(PooledBitBuffer),
    /// A handshake deadline armed by connection attempt `attempt`
    Timeout {
        state: ConnectionState,
        attempt: u64,
    },
}

impl fmt::Debug for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientEvent::TcpConnected(link) => write!(f, "TcpConnected({})", link.peer_addr()),
            ClientEvent::TcpConnectFailed(e) => write!(f, "TcpConnectFailed({e})"),
            ClientEvent::TcpPacket(p) => write!(f, "TcpPacket({} bytes)", p.size()),
            ClientEvent::TcpClosed(reason) => write!(f, "TcpClosed({reason:?})"),
            ClientEvent::UdpDatagram(p) => write!(f, "UdpDatagram({} bytes)", p.size()),
            ClientEvent::Timeout { state, attempt } => {
                write!(f, "Timeout({state}, attempt {attempt})")
            }
        }
    }
}

/// Socket activity reported to a server registry
pub enum ServerEvent {
    TcpAccepted {
        id: ConnectionId,
        peer: SocketAddr,
        link: Box<dyn TcpLink>,
    },
    TcpPacket {
        id: ConnectionId,
        payload: PooledBitBuffer,
    },
    TcpClosed {
        id: ConnectionId,
        reason: Option<ProtocolError>,
    },
    UdpDatagram {
        from: SocketAddr,
        payload: PooledBitBuffer,
    },
    Timeout {
        id: ConnectionId,
        state: ConnectionState,
    },
}

impl fmt::Debug for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::TcpAccepted { id, peer, .. } => write!(f, "TcpAccepted({id}, {peer})"),
            ServerEvent::TcpPacket { id, payload } => {
                write!(f, "TcpPacket({id}, {} bytes)", payload.size())
            }
            ServerEvent::TcpClosed { id, reason } => write!(f, "TcpClosed({id}, {reason:?})"),
            ServerEvent::UdpDatagram { from, payload } => {
                write!(f, "UdpDatagram({from}, {} bytes)", payload.size())
            }
            ServerEvent::Timeout { id, state } => write!(f, "Timeout({id}, {state})"),
        }
    }
}
