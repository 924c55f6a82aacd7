//! In-process messaging channel

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

use super::{MessagingClient, MessagingServer, RequestListener, TransportError};

/// Buffered broadcasts per subscriber before older ones are dropped
const BROADCAST_CAPACITY: usize = 64;

struct Shared {
    listener: RwLock<Option<Arc<dyn RequestListener>>>,
    signals: broadcast::Sender<Vec<u8>>,
    bound: AtomicBool,
    terminated: watch::Sender<bool>,
    broadcasts_sent: AtomicUsize,
}

/// In-process coordinator endpoint
///
/// Worker endpoints are created with [`LocalServer::client`]; requests call
/// the installed listener directly.
///
/// # Example
///
/// ```
/// use cluster_executor::transport::LocalServer;
///
/// let server = LocalServer::new();
/// let client = server.client();
/// ```
#[derive(Clone)]
pub struct LocalServer {
    shared: Arc<Shared>,
}

impl LocalServer {
    /// Create an unbound server
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (terminated, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                listener: RwLock::new(None),
                signals,
                bound: AtomicBool::new(false),
                terminated,
                broadcasts_sent: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a worker endpoint connected to this server
    pub fn client(&self) -> LocalClient {
        LocalClient {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of broadcasts sent so far
    pub fn broadcasts_sent(&self) -> usize {
        self.shared.broadcasts_sent.load(Ordering::Relaxed)
    }

    /// Whether the server is accepting requests
    pub fn is_bound(&self) -> bool {
        self.shared.bound.load(Ordering::Acquire)
    }
}

impl Default for LocalServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingServer for LocalServer {
    fn set_listener(&self, listener: Arc<dyn RequestListener>) {
        *self.shared.listener.write() = Some(listener);
    }

    async fn bind(&self) -> Result<(), TransportError> {
        if *self.shared.terminated.borrow() {
            return Err(TransportError::Closed);
        }
        self.shared.bound.store(true, Ordering::Release);
        debug!("Local server bound");
        Ok(())
    }

    async fn send_broadcast(&self, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_bound() {
            return Err(TransportError::NotConnected);
        }

        // No subscribers is not an error for a fire-and-forget broadcast
        let receivers = self.shared.signals.send(payload.to_vec()).unwrap_or(0);
        self.shared.broadcasts_sent.fetch_add(1, Ordering::Relaxed);
        trace!(receivers, "Broadcast sent");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.shared.bound.store(false, Ordering::Release);
        self.shared.terminated.send_replace(true);
        debug!("Local server shut down");
        Ok(())
    }

    async fn await_termination(&self) -> Result<(), TransportError> {
        let mut rx = self.shared.terminated.subscribe();
        rx.wait_for(|terminated| *terminated)
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(())
    }
}

/// In-process worker endpoint
#[derive(Clone)]
pub struct LocalClient {
    shared: Arc<Shared>,
}

#[async_trait]
impl MessagingClient for LocalClient {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.shared.bound.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    async fn request(&self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        if *self.shared.terminated.borrow() {
            return Err(TransportError::Closed);
        }
        if !self.shared.bound.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }

        let listener = self
            .shared
            .listener
            .read()
            .clone()
            .ok_or(TransportError::NotConnected)?;

        Ok(listener.on_request_received(&payload))
    }

    fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.shared.signals.subscribe()
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
