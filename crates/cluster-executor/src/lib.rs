//! # Cluster Executor
//!
//! Pull-based distributed execution of serializable callables across a
//! coordinator and a pool of workers.
//!
//! ## Features
//!
//! - **Task futures**: cancellable handles with a CAS-guarded state machine
//! - **Pull scheduling**: workers ask for exactly as much work as they can run
//! - **Piggy-backed pulls**: delivering a result also fetches the next request
//! - **Custom traffic**: application signals and requests share the channel
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Coordinator                           │
//! │  (owns the ExecutionQueue, notifier, callback dispatcher)   │
//! └─────────────────────────────────────────────────────────────┘
//!            │ broadcast 0x00             ▲ 0x00 pull / 0x01 callback
//!            ▼                            │
//! ┌─────────────────────────────────────────────────────────────┐
//! │              MessagingServer / MessagingClient               │
//! │  (opaque transport; LocalServer runs in-process)            │
//! └─────────────────────────────────────────────────────────────┘
//!            │                            ▲
//!            ▼                            │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerDaemon                           │
//! │  (pulls on hint or timer, runs callables, reports back)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use cluster_executor::prelude::*;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Divide { a: i64, b: i64 }
//!
//! #[async_trait]
//! impl DistributedCallable for Divide {
//!     const NAME: &'static str = "divide";
//!     type Output = i64;
//!
//!     async fn call(self) -> Result<i64, CallableError> {
//!         if self.b == 0 {
//!             return Err(CallableError::new("DivideByZero", "b is zero"));
//!         }
//!         Ok(self.a / self.b)
//!     }
//! }
//!
//! let server = LocalServer::new();
//! let coordinator = Coordinator::new(Arc::new(server.clone()), CoordinatorConfig::default());
//! coordinator.start().await?;
//!
//! let mut registry = CallableRegistry::new();
//! registry.register::<Divide>();
//! let worker = WorkerDaemon::new(WorkerConfig::new(4), registry, Arc::new(server.client()));
//! worker.start().await?;
//!
//! let quotient = coordinator.submit(Divide { a: 6, b: 3 })?.get().await?;
//! ```

pub mod callable;
pub mod config;
pub mod coordinator;
pub mod protocol;
pub mod queue;
pub mod task;
pub mod transport;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::callable::{
        CallableError, CallablePayload, CallableRegistry, DistributedCallable,
    };
    pub use crate::config::{CoordinatorConfig, PollerConfig, WorkerConfig};
    pub use crate::coordinator::{Coordinator, CoordinatorError, CustomRequestHandler};
    pub use crate::queue::SubmitError;
    pub use crate::task::{TaskError, TaskFuture, TaskId, TaskState};
    pub use crate::transport::{LocalServer, MessagingClient, MessagingServer};
    pub use crate::worker::{SignalHandler, WorkerDaemon, WorkerError};
}

// Re-export key types at crate root
pub use callable::{
    CallableError, CallablePayload, CallableRegistry, CallableResult, DistributedCallable,
};
pub use config::{CoordinatorConfig, PollerConfig, WorkerConfig};
pub use coordinator::{Coordinator, CoordinatorError, CoordinatorStatus, CustomRequestHandler};
pub use protocol::{ProtocolError, Request, Response};
pub use queue::{ExecutionQueue, SubmitError};
pub use task::{
    DistributedTask, IdGenerator, RandomIdGenerator, SequenceIdGenerator, TaskError, TaskFuture,
    TaskId, TaskState,
};
pub use transport::{
    LocalClient, LocalServer, MessagingClient, MessagingServer, RequestListener, TransportError,
};
pub use worker::{SignalHandler, WorkerDaemon, WorkerError, WorkerExecutor, WorkerStatus};
