//! Messaging channel between coordinator and workers
//!
//! The cluster only needs three primitives from its transport:
//! - a best-effort broadcast from the coordinator to every worker
//! - a request/response call from a worker to the coordinator, answered
//!   synchronously by a [`RequestListener`]
//! - lifecycle control (bind/connect, shutdown, await termination)
//!
//! [`LocalServer`] and [`LocalClient`] implement them in-process.

mod local;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use local::{LocalClient, LocalServer};

/// Transport errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The peer is not bound or not reachable
    #[error("not connected")]
    NotConnected,

    /// The channel has been shut down
    #[error("channel closed")]
    Closed,

    /// A message could not be delivered
    #[error("send failed: {0}")]
    Send(String),
}

/// Answers point-to-point messages on the coordinator
///
/// Implementations must not block: they are called on the transport's own
/// listener thread.
pub trait RequestListener: Send + Sync {
    /// Handle one message and produce the reply
    fn on_request_received(&self, payload: &[u8]) -> Vec<u8>;
}

/// Coordinator side of the messaging channel
#[async_trait]
pub trait MessagingServer: Send + Sync {
    /// Install the listener answering worker requests
    fn set_listener(&self, listener: Arc<dyn RequestListener>);

    /// Start accepting requests; idempotent
    async fn bind(&self) -> Result<(), TransportError>;

    /// Send a message to every connected worker
    async fn send_broadcast(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Stop accepting requests
    async fn shutdown(&self) -> Result<(), TransportError>;

    /// Wait until the transport has released its resources
    async fn await_termination(&self) -> Result<(), TransportError>;
}

/// Worker side of the messaging channel
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Connect to the coordinator; idempotent
    async fn connect(&self) -> Result<(), TransportError>;

    /// Send a message and wait for the coordinator's reply
    async fn request(&self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError>;

    /// Receive the coordinator's broadcasts
    fn subscribe(&self) -> broadcast::Receiver<Vec<u8>>;

    /// Disconnect
    async fn shutdown(&self) -> Result<(), TransportError>;
}
