//! Tokio TCP connection tasks.
//!
//! A connection is split into a writer task fed through an unbounded channel
//! and a reader task that reassembles packets with a [`TcpFramer`]. The link
//! handle is returned before the reader starts so the owner can register it
//! before the first packet is reported.

use crate::config::TCP_BUFFER_SIZE;
use crate::core::tcp_framer::{TcpFrameEncoder, TcpFramer};
use crate::error::ProtocolError;
use crate::transport::TcpLink;
use crate::utils::buffer_pool::{BitBufferPool, PooledBitBuffer};
use bytes::{Bytes, BytesMut};
use futures::SinkExt;
use std::net::SocketAddr;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// What a reader task reports
#[derive(Debug)]
pub enum TcpInbound {
    Packet(PooledBitBuffer),
    /// End of stream (`None`) or the error that ended it
    Closed(Option<ProtocolError>),
}

enum WriterCommand {
    Frame(Bytes),
    Close,
}

/// Handle to a running TCP connection
pub struct TokioTcpLink {
    commands: mpsc::UnboundedSender<WriterCommand>,
    token: CancellationToken,
    peer: SocketAddr,
    max_packet_length: usize,
}

impl TcpLink for TokioTcpLink {
    fn send(&self, body: Vec<u8>) {
        if self.commands.send(WriterCommand::Frame(Bytes::from(body))).is_err() {
            debug!(peer = %self.peer, "Dropping TCP packet for closed connection");
        }
    }

    fn close(&self) {
        if self.commands.send(WriterCommand::Close).is_err() {
            self.token.cancel();
        }
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_length
    }
}

/// The not yet started read side of a connection
pub struct TcpReader {
    read_half: OwnedReadHalf,
    write_failure: oneshot::Receiver<ProtocolError>,
    token: CancellationToken,
    peer: SocketAddr,
    max_packet_length: usize,
    pool: BitBufferPool,
}

impl TcpReader {
    /// Start reading; `on_inbound` is called from the reader task.
    ///
    /// A failed write is reported as [`TcpInbound::Closed`] like a failed read.
    /// Nothing is reported once the connection's token is cancelled.
    pub fn spawn<F>(self, on_inbound: F)
    where
        F: FnMut(TcpInbound) + Send + 'static,
    {
        tokio::spawn(self.run(on_inbound));
    }

    #[instrument(skip(self, on_inbound), fields(peer = %self.peer))]
    async fn run<F>(mut self, mut on_inbound: F)
    where
        F: FnMut(TcpInbound) + Send + 'static,
    {
        let mut framer = TcpFramer::new(self.max_packet_length);
        let mut chunk = BytesMut::with_capacity(TCP_BUFFER_SIZE);

        loop {
            chunk.clear();
            let read = tokio::select! {
                _ = self.token.cancelled() => return,
                failure = &mut self.write_failure => {
                    // The writer drops its end without a value when closed on purpose
                    let Ok(e) = failure else {
                        return;
                    };
                    on_inbound(TcpInbound::Closed(Some(e)));
                    break;
                }
                read = self.read_half.read_buf(&mut chunk) => read,
            };

            match read {
                Ok(0) => {
                    debug!("TCP stream ended");
                    on_inbound(TcpInbound::Closed(None));
                    break;
                }
                Ok(_) => {
                    let mut packets = Vec::new();
                    let fed = framer.feed(&chunk, |body| {
                        let mut packet = self.pool.acquire();
                        packet.write_bytes(body);
                        packets.push(packet);
                    });
                    for packet in packets {
                        on_inbound(TcpInbound::Packet(packet));
                    }
                    if let Err(e) = fed {
                        warn!(error = %e, "Closing TCP connection after framing error");
                        on_inbound(TcpInbound::Closed(Some(e)));
                        break;
                    }
                }
                Err(e) => {
                    if !self.token.is_cancelled() {
                        debug!(error = %e, "TCP read failed");
                        on_inbound(TcpInbound::Closed(Some(e.into())));
                    }
                    break;
                }
            }
        }
        self.token.cancel();
    }
}

#[instrument(skip(write_half, commands, failure, token))]
async fn run_writer(
    write_half: OwnedWriteHalf,
    peer: SocketAddr,
    max_packet_length: usize,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    failure: oneshot::Sender<ProtocolError>,
    token: CancellationToken,
) {
    let mut framed = FramedWrite::new(write_half, TcpFrameEncoder::new(max_packet_length));

    loop {
        let command = tokio::select! {
            _ = token.cancelled() => return,
            command = commands.recv() => command,
        };
        match command {
            Some(WriterCommand::Frame(body)) => {
                if let Err(e) = framed.send(body).await {
                    warn!(error = %e, "TCP write failed");
                    // The reader reports the failure and cancels the token
                    let _ = failure.send(e);
                    return;
                }
            }
            Some(WriterCommand::Close) | None => break,
        }
    }

    let _ = framed.close().await;
    token.cancel();
}

/// Split `stream` into a running writer and a reader waiting to be spawned
pub fn spawn_connection(
    stream: TcpStream,
    peer: SocketAddr,
    max_packet_length: usize,
    pool: BitBufferPool,
    token: CancellationToken,
) -> (TokioTcpLink, TcpReader) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to disable Nagle's algorithm");
    }
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let (failure_tx, failure_rx) = oneshot::channel();

    tokio::spawn(run_writer(
        write_half,
        peer,
        max_packet_length,
        rx,
        failure_tx,
        token.clone(),
    ));

    let link = TokioTcpLink {
        commands: tx,
        token: token.clone(),
        peer,
        max_packet_length: max_packet_length.min(u16::MAX as usize),
    };
    let reader = TcpReader {
        read_half,
        write_failure: failure_rx,
        token,
        peer,
        max_packet_length,
        pool,
    };
    (link, reader)
}
