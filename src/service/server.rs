//! # Double Server
//!
//! A [`ServerRegistry`] on tokio sockets, with the same locking scheme as
//! [`DoubleClient`](crate::service::client::DoubleClient).

use crate::config::NetworkConfig;
use crate::core::bit_buffer::BitBuffer;
use crate::error::{ProtocolError, Result};
use crate::service::handler::ServerHandler;
use crate::service::registry::ServerRegistry;
use crate::transport::{ConnectionId, ServerEvent, TokioServerTransport};
use crate::utils::metrics::Metrics;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

struct ServerInner<H> {
    handler: H,
    registry: ServerRegistry,
}

/// Server accepting TCP+UDP clients on one port
pub struct DoubleServer<H: ServerHandler> {
    inner: Arc<Mutex<ServerInner<H>>>,
    metrics: Arc<Metrics>,
    local_addr: SocketAddr,
    driver: JoinHandle<()>,
}

impl<H: ServerHandler> DoubleServer<H> {
    /// Bind `config.server.address` and start accepting
    #[instrument(skip(config, handler), fields(address = %config.server.address))]
    pub async fn bind(config: &NetworkConfig, handler: H) -> Result<Self> {
        let (transport, events) = TokioServerTransport::bind(config).await?;
        let local_addr = transport.local_addr();
        let metrics = Arc::new(Metrics::new());
        let registry = ServerRegistry::new(
            config.server.clone(),
            Box::new(transport),
            metrics.clone(),
        );
        let inner = Arc::new(Mutex::new(ServerInner { handler, registry }));
        let driver = tokio::spawn(drive(Arc::downgrade(&inner), events));
        Ok(Self {
            inner,
            metrics,
            local_addr,
            driver,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, ServerInner<H>>> {
        self.inner.lock().map_err(|_| ProtocolError::LockPoisoned)
    }

    /// The bound address, useful when listening on port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn send_tcp<F>(&self, id: ConnectionId, writer: F) -> Result<()>
    where
        F: FnOnce(&mut BitBuffer),
    {
        self.lock()?.registry.send_tcp(id, writer)
    }

    pub fn send_udp<F>(&self, id: ConnectionId, writer: F) -> Result<()>
    where
        F: FnOnce(&mut BitBuffer),
    {
        self.lock()?.registry.send_udp(id, writer);
        Ok(())
    }

    /// Drop a client without notifying the handler
    pub fn disconnect(&self, id: ConnectionId) -> Result<bool> {
        Ok(self.lock()?.registry.disconnect(id))
    }

    pub fn close(&self) -> Result<()> {
        self.lock()?.registry.close();
        Ok(())
    }

    pub fn with_registry<R>(&self, f: impl FnOnce(&mut ServerRegistry) -> R) -> Result<R> {
        Ok(f(&mut self.lock()?.registry))
    }

    pub fn with_handler<R>(&self, f: impl FnOnce(&mut H) -> R) -> Result<R> {
        Ok(f(&mut self.lock()?.handler))
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

impl<H: ServerHandler> Drop for DoubleServer<H> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.registry.close();
        }
        self.driver.abort();
    }
}

async fn drive<H: ServerHandler>(
    inner: Weak<Mutex<ServerInner<H>>>,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let Ok(mut guard) = inner.lock() else {
            warn!("Server state poisoned, stopping event loop");
            break;
        };
        let ServerInner { handler, registry } = &mut *guard;
        registry.handle_event(handler, event);
    }
    debug!("Server event loop finished");
}
