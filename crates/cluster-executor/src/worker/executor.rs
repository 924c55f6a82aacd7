//! Bounded execution of pulled requests
//!
//! Each request runs on its own tokio task, gated by a semaphore sized to the
//! worker's capacity. The result is sent back as a callback; the coordinator's
//! reply carries at most one more request, which is fed straight back in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace, warn};

use super::availability::Availability;
use crate::callable::{CallableError, CallablePayload, CallableRegistry, CallableResult};
use crate::protocol::{decode_batch, encode_callback, Request, Response};
use crate::transport::MessagingClient;

/// Worker-side bounded executor
pub struct WorkerExecutor {
    worker_id: String,
    registry: CallableRegistry,
    client: Arc<dyn MessagingClient>,
    availability: Arc<Availability>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    accepting: AtomicBool,
}

impl WorkerExecutor {
    /// Create an executor running at most `capacity` callables at once
    pub fn new(
        worker_id: impl Into<String>,
        capacity: usize,
        registry: CallableRegistry,
        client: Arc<dyn MessagingClient>,
    ) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            worker_id: worker_id.into(),
            registry,
            client,
            availability: Availability::new(capacity),
            permits: Arc::new(Semaphore::new(capacity)),
            tracker: TaskTracker::new(),
            accepting: AtomicBool::new(true),
        })
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.availability.capacity()
    }

    /// Free slots to advertise on the next pull
    pub fn available(&self) -> usize {
        self.availability.available()
    }

    /// Requests accepted and not finished yet, including queued ones
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Whether new batches are accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Schedule a batch of requests
    ///
    /// Requests beyond the free capacity wait for a permit. Returns the
    /// number of requests accepted. After shutdown nothing is accepted: each
    /// request is answered with a `Rejected` error so its caller is released.
    pub fn submit(self: &Arc<Self>, requests: Vec<Request>) -> usize {
        if requests.is_empty() {
            return 0;
        }

        if !self.is_accepting() {
            warn!(
                worker_id = %self.worker_id,
                rejected = requests.len(),
                "Executor is shut down, rejecting requests"
            );
            for request in requests {
                let executor = Arc::clone(self);
                self.tracker.spawn(async move { executor.reject(request).await });
            }
            return 0;
        }

        self.schedule(requests)
    }

    /// Stop accepting batches
    ///
    /// In-flight requests keep running, and so does any request the
    /// coordinator piggy-backs on their callbacks: it is already in the
    /// coordinator's running set.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
        self.tracker.close();
    }

    /// Wait for in-flight requests to drain
    ///
    /// Returns true if they finished within `timeout`.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
    }

    fn schedule(self: &Arc<Self>, requests: Vec<Request>) -> usize {
        let scheduled = requests.len();
        for request in requests {
            let executor = Arc::clone(self);
            self.tracker.spawn(async move { executor.run(request).await });
        }

        if scheduled > 0 {
            debug!(worker_id = %self.worker_id, scheduled, "Requests scheduled");
        }
        scheduled
    }

    async fn run(self: Arc<Self>, request: Request) {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };
        let slot = self.availability.acquire();

        let Request { id, callable } = request;
        trace!(worker_id = %self.worker_id, task_id = %id, callable = %callable.name, "Executing");

        let result = self.execute(callable).await;
        let next = self.report(Response::new(id, result)).await;

        drop(slot);
        drop(permit);

        self.schedule(next);
    }

    async fn reject(self: Arc<Self>, request: Request) {
        let error = CallableError::new("Rejected", "worker is shutting down");
        let next = self.report(Response::new(request.id, Err(error))).await;
        self.schedule(next);
    }

    /// Run a callable, turning a missing handler or a panic into an error
    async fn execute(&self, callable: CallablePayload) -> CallableResult {
        let Some(handler) = self.registry.get(&callable.name) else {
            warn!(worker_id = %self.worker_id, callable = %callable.name, "No handler registered");
            return Err(CallableError::unknown_callable(&callable.name));
        };

        match tokio::spawn(handler(callable.input)).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    worker_id = %self.worker_id,
                    callable = %callable.name,
                    "Callable failed unexpectedly: {}", e
                );
                Err(CallableError::panic(e.to_string()))
            }
        }
    }

    /// Deliver a response and return the piggy-backed requests
    async fn report(&self, response: Response) -> Vec<Request> {
        let task_id = response.id;

        let message = match encode_callback(&response) {
            Ok(message) => message,
            Err(e) => {
                error!(%task_id, "Failed to encode response: {}", e);
                return Vec::new();
            }
        };

        let reply = match self.client.request(message).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(%task_id, "Failed to deliver response: {}", e);
                return Vec::new();
            }
        };

        match decode_batch(&reply) {
            Ok(batch) => batch,
            Err(e) => {
                error!(%task_id, "Dropping malformed pull response: {}", e);
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for WorkerExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerExecutor")
            .field("worker_id", &self.worker_id)
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}
