//! Worker side of the cluster
//!
//! This module provides:
//! - [`WorkerDaemon`] - connects to the coordinator and keeps the executor fed
//! - [`WorkerExecutor`] - bounded execution of pulled requests
//! - [`Availability`] - capacity accounting advertised on every pull
//! - [`PullPoller`] - pull requests with idle backoff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerDaemon                           │
//! │  ┌──────────────────┐        ┌──────────────────────────┐   │
//! │  │ broadcast 0x00   │──pull──│  PullPoller (backoff)    │   │
//! │  │ custom signals   │        └────────────┬─────────────┘   │
//! │  └──────────────────┘                     │ Vec<Request>    │
//! │                                           ▼                  │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │        WorkerExecutor (Semaphore-limited)            │    │
//! │  │  [Req 1] [Req 2] ... [Req N]  ──callback──► coord    │    │
//! │  │        ▲                           │                 │    │
//! │  │        └──── piggy-backed request ◄┘                 │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod availability;
mod daemon;
mod executor;
mod poller;

pub use availability::{Availability, SlotGuard};
pub use daemon::{SignalHandler, WorkerDaemon};
pub use executor::WorkerExecutor;
pub use poller::PullPoller;

use crate::protocol::ProtocolError;
use crate::transport::TransportError;

/// Worker status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Created, not started
    Stopped,
    /// Connecting to the coordinator
    Starting,
    /// Pulling and executing work
    Running,
    /// Waiting for in-flight callables to finish
    Draining,
    /// Shut down
    Terminated,
}

/// Worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Worker already started
    #[error("worker is already running")]
    AlreadyRunning,

    /// Worker was shut down
    #[error("worker has been shut down")]
    ShutDown,

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// In-flight callables did not finish in time
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}
