//! # Double Client
//!
//! A [`ClientConnection`] on tokio sockets.
//!
//! The connection and its handler live behind one mutex. A driver task feeds
//! transport events to the connection under that mutex, and every public
//! method takes it too, so the handler never runs concurrently with itself or
//! with a send.

use crate::config::NetworkConfig;
use crate::core::bit_buffer::BitBuffer;
use crate::error::{ProtocolError, Result};
use crate::protocol::ConnectionState;
use crate::service::client_connection::ClientConnection;
use crate::service::handler::ClientHandler;
use crate::transport::{ClientEvent, TokioClientTransport};
use crate::utils::crypto::EncryptionKey;
use crate::utils::metrics::Metrics;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

struct ClientInner<H> {
    handler: H,
    connection: ClientConnection,
}

/// Client end of a TCP+UDP connection
pub struct DoubleClient<H: ClientHandler> {
    inner: Arc<Mutex<ClientInner<H>>>,
    metrics: Arc<Metrics>,
    driver: JoinHandle<()>,
}

impl<H: ClientHandler> DoubleClient<H> {
    /// Create a client for `config.client.address`; nothing connects until [`start`](Self::start).
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &NetworkConfig,
        encryption_key: EncryptionKey,
        auth_data: Vec<u8>,
        handler: H,
    ) -> Result<Self> {
        let (transport, events) = TokioClientTransport::new(config)?;
        let metrics = Arc::new(Metrics::new());
        let connection = ClientConnection::new(
            config.client.clone(),
            encryption_key,
            auth_data,
            Box::new(transport),
            metrics.clone(),
        );
        let inner = Arc::new(Mutex::new(ClientInner {
            handler,
            connection,
        }));
        let driver = tokio::spawn(drive(Arc::downgrade(&inner), events));
        Ok(Self {
            inner,
            metrics,
            driver,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, ClientInner<H>>> {
        self.inner.lock().map_err(|_| ProtocolError::LockPoisoned)
    }

    /// Connect and authenticate; progress is reported through the handler
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        self.lock()?.connection.start()
    }

    pub fn close(&self) -> Result<()> {
        self.lock()?.connection.close();
        Ok(())
    }

    pub fn state(&self) -> Result<ConnectionState> {
        Ok(self.lock()?.connection.state())
    }

    /// Send a TCP payload; skipped unless authenticated
    pub fn send_tcp<F>(&self, writer: F) -> Result<()>
    where
        F: FnOnce(&mut BitBuffer),
    {
        self.lock()?.connection.send_tcp(writer)
    }

    /// Send a UDP payload; skipped unless authenticated
    pub fn send_udp<F>(&self, writer: F) -> Result<()>
    where
        F: FnOnce(&mut BitBuffer),
    {
        self.lock()?.connection.send_udp(writer);
        Ok(())
    }

    pub fn with_connection<R>(&self, f: impl FnOnce(&mut ClientConnection) -> R) -> Result<R> {
        Ok(f(&mut self.lock()?.connection))
    }

    pub fn with_handler<R>(&self, f: impl FnOnce(&mut H) -> R) -> Result<R> {
        Ok(f(&mut self.lock()?.handler))
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

impl<H: ClientHandler> Drop for DoubleClient<H> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.connection.close();
        }
        self.driver.abort();
    }
}

async fn drive<H: ClientHandler>(
    inner: Weak<Mutex<ClientInner<H>>>,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let Ok(mut guard) = inner.lock() else {
            warn!("Client state poisoned, stopping event loop");
            break;
        };
        let ClientInner {
            handler,
            connection,
        } = &mut *guard;
        connection.handle_event(handler, event);
    }
    debug!("Client event loop finished");
}
