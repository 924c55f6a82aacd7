//! Coordinator
//!
//! Leader-side orchestrator: accepts local submissions, tells workers that
//! work exists, answers their pull requests and reconciles their results.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Coordinator                           │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌───────────────┐   │
//! │  │  Notifier   │  │ Callback         │  │  Terminator   │   │
//! │  │  (200ms)    │  │ Dispatcher       │  │  (once)       │   │
//! │  └──────┬──────┘  └────────▲─────────┘  └───────────────┘   │
//! │         │ 0x00             │ Response                        │
//! │         ▼                  │                                 │
//! │  ┌─────────────────────────┴───────────────────────────┐    │
//! │  │     PacketListener (transport thread, never blocks) │    │
//! │  │     0x00 pull ─► ExecutionQueue::pull_next()        │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A task whose worker dies mid-execution stays in running until its caller
//! cancels it; there is no automatic retry.

mod listener;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

pub use listener::CustomRequestHandler;

use self::listener::{CallbackMessage, PacketListener};
use crate::callable::{CallablePayload, DistributedCallable};
use crate::config::CoordinatorConfig;
use crate::protocol::{encode_signal, Outcome, ProtocolError, SIGNAL_EXEC};
use crate::queue::{ExecutionQueue, SubmitError};
use crate::task::{IdGenerator, RandomIdGenerator, TaskFuture};
use crate::transport::{MessagingServer, TransportError};

/// Coordinator status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorStatus {
    /// Created, not started
    Stopped,
    /// Binding the transport
    Starting,
    /// Serving workers
    Running,
    /// Terminator is running
    ShuttingDown,
    /// All background work has finished
    Terminated,
}

/// Coordinator errors
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Coordinator already started
    #[error("coordinator is already running")]
    AlreadyRunning,

    /// Coordinator was shut down
    #[error("coordinator has been shut down")]
    ShutDown,

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Leader-side task coordinator
///
/// # Example
///
/// ```ignore
/// let server = Arc::new(LocalServer::new());
/// let coordinator = Coordinator::new(server.clone(), CoordinatorConfig::default());
/// coordinator.start().await?;
///
/// let future = coordinator.submit(Divide { a: 6, b: 3 })?;
/// assert_eq!(future.get().await?, 2);
///
/// coordinator.shutdown();
/// coordinator.await_termination(Duration::from_secs(5)).await;
/// ```
pub struct Coordinator {
    config: CoordinatorConfig,
    queue: Arc<ExecutionQueue>,
    server: Arc<dyn MessagingServer>,
    listener: Arc<PacketListener>,
    callbacks: mpsc::UnboundedSender<CallbackMessage>,
    callback_rx: Mutex<Option<mpsc::UnboundedReceiver<CallbackMessage>>>,
    broadcast_lock: Arc<tokio::sync::Mutex<()>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    status: Arc<RwLock<CoordinatorStatus>>,
    notifier_handle: Mutex<Option<JoinHandle<()>>>,
    callback_handle: Mutex<Option<JoinHandle<()>>>,
    terminator_started: AtomicBool,
    terminated: Arc<watch::Sender<bool>>,
}

impl Coordinator {
    /// Create a coordinator issuing random task ids
    pub fn new(server: Arc<dyn MessagingServer>, config: CoordinatorConfig) -> Self {
        Self::with_id_generator(server, config, Arc::new(RandomIdGenerator))
    }

    /// Create a coordinator with an injected id generator
    pub fn with_id_generator(
        server: Arc<dyn MessagingServer>,
        config: CoordinatorConfig,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let queue = ExecutionQueue::with_id_generator(ids);
        let (callbacks, callback_rx) = mpsc::unbounded_channel();
        let listener = Arc::new(PacketListener::new(Arc::clone(&queue), callbacks.clone()));
        server.set_listener(listener.clone());

        let (shutdown_tx, _) = watch::channel(false);
        let (terminated, _) = watch::channel(false);

        Self {
            config,
            queue,
            server,
            listener,
            callbacks,
            callback_rx: Mutex::new(Some(callback_rx)),
            broadcast_lock: Arc::new(tokio::sync::Mutex::new(())),
            shutdown_tx: Arc::new(shutdown_tx),
            status: Arc::new(RwLock::new(CoordinatorStatus::Stopped)),
            notifier_handle: Mutex::new(None),
            callback_handle: Mutex::new(None),
            terminator_started: AtomicBool::new(false),
            terminated: Arc::new(terminated),
        }
    }

    /// Bind the transport and start the background loops
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), CoordinatorError> {
        {
            let mut status = self.status.write();
            match *status {
                CoordinatorStatus::Stopped => *status = CoordinatorStatus::Starting,
                CoordinatorStatus::Starting | CoordinatorStatus::Running => {
                    return Err(CoordinatorError::AlreadyRunning)
                }
                _ => return Err(CoordinatorError::ShutDown),
            }
        }

        if let Err(e) = self.server.bind().await {
            let mut status = self.status.write();
            if *status == CoordinatorStatus::Starting {
                *status = CoordinatorStatus::Stopped;
            }
            return Err(e.into());
        }

        {
            // Shutdown may have run while binding
            let mut status = self.status.write();
            if *status != CoordinatorStatus::Starting {
                debug!(status = ?*status, "Shutdown requested during start");
                return Err(CoordinatorError::ShutDown);
            }

            let callback_rx = self
                .callback_rx
                .lock()
                .take()
                .ok_or(CoordinatorError::AlreadyRunning)?;

            self.start_callback_loop(callback_rx);
            self.start_notifier_loop();
            *status = CoordinatorStatus::Running;
        }

        info!(
            exec_signal_interval_ms = self.config.exec_signal_interval.as_millis() as u64,
            "Coordinator started"
        );
        Ok(())
    }

    /// Submit a typed callable
    ///
    /// Never blocks; the returned future resolves once a worker reports back.
    pub fn submit<C: DistributedCallable>(
        &self,
        callable: C,
    ) -> Result<TaskFuture<C::Output>, SubmitError> {
        let payload = CallablePayload::from_callable(&callable)?;
        let task = self.queue.submit(payload)?;
        Ok(TaskFuture::new(task))
    }

    /// Submit an untyped callable payload
    pub fn submit_payload(
        &self,
        payload: CallablePayload,
    ) -> Result<TaskFuture<serde_json::Value>, SubmitError> {
        let task = self.queue.submit(payload)?;
        Ok(TaskFuture::new(task))
    }

    /// Broadcast a custom signal to every worker
    ///
    /// Signal `0x00` is reserved for the work-available hint.
    pub async fn send_broadcast_signal(
        &self,
        signal: u8,
        payload: &[u8],
    ) -> Result<(), CoordinatorError> {
        let message = encode_signal(signal, payload)?;
        let _guard = self.broadcast_lock.lock().await;
        self.server.send_broadcast(&message).await?;
        Ok(())
    }

    /// Install the handler for custom point-to-point requests
    pub fn set_custom_handler(&self, handler: Arc<dyn CustomRequestHandler>) {
        self.listener.set_custom_handler(handler);
    }

    /// The execution queue
    pub fn queue(&self) -> &Arc<ExecutionQueue> {
        &self.queue
    }

    /// Current status
    pub fn status(&self) -> CoordinatorStatus {
        *self.status.read()
    }

    /// Stop accepting work and begin termination
    ///
    /// Every outstanding task is cancelled immediately. The background loops
    /// and the transport are stopped by a terminator task that runs once, no
    /// matter how often this is called. Must be called within a tokio runtime.
    pub fn shutdown(&self) {
        let cancelled = self.queue.shutdown();

        if self.terminator_started.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(cancelled, "Initiating coordinator shutdown");
        *self.status.write() = CoordinatorStatus::ShuttingDown;

        let notifier = self.notifier_handle.lock().take();
        let callback = self.callback_handle.lock().take();
        let callbacks = self.callbacks.clone();
        let server = Arc::clone(&self.server);
        let shutdown_tx = Arc::clone(&self.shutdown_tx);
        let status = Arc::clone(&self.status);
        let terminated = Arc::clone(&self.terminated);

        tokio::spawn(async move {
            shutdown_tx.send_replace(true);
            if let Some(handle) = notifier {
                if let Err(e) = handle.await {
                    warn!("Notifier loop ended abnormally: {}", e);
                }
            }

            let _ = callbacks.send(CallbackMessage::Poison);
            if let Some(handle) = callback {
                if let Err(e) = handle.await {
                    warn!("Callback loop ended abnormally: {}", e);
                }
            }

            if let Err(e) = server.shutdown().await {
                warn!("Transport shutdown failed: {}", e);
            }
            if let Err(e) = server.await_termination().await {
                warn!("Transport termination failed: {}", e);
            }

            *status.write() = CoordinatorStatus::Terminated;
            terminated.send_replace(true);
            info!("Coordinator terminated");
        });
    }

    /// Wait for the terminator to finish
    ///
    /// Returns true if termination completed within `timeout`.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let mut rx = self.terminated.subscribe();
        let terminated = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|terminated| *terminated)).await,
            Ok(Ok(_))
        );
        terminated
    }

    /// Start the "work available" notifier
    fn start_notifier_loop(&self) {
        let queue = Arc::clone(&self.queue);
        let server = Arc::clone(&self.server);
        let broadcast_lock = Arc::clone(&self.broadcast_lock);
        let interval = self.config.exec_signal_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                if queue.pending_size() > 0 {
                    let _guard = broadcast_lock.lock().await;
                    if let Err(e) = server.send_broadcast(&[SIGNAL_EXEC]).await {
                        error!("Failed to send exec signal: {}", e);
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => {
                        debug!("Notifier loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Notifier loop exited");
        });

        *self.notifier_handle.lock() = Some(handle);
    }

    /// Start the callback dispatcher
    ///
    /// Responses are applied one at a time, so reconciliation never races
    /// with itself.
    fn start_callback_loop(&self, mut rx: mpsc::UnboundedReceiver<CallbackMessage>) {
        let queue = Arc::clone(&self.queue);

        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let response = match message {
                    CallbackMessage::Response(response) => response,
                    CallbackMessage::Poison => break,
                };

                let Some(task) = queue.complete_running(&response.id) else {
                    debug!(task_id = %response.id, "Discarding response for unknown task");
                    continue;
                };

                let applied = match response.outcome {
                    Outcome::Value(value) => task.set(value),
                    Outcome::Error(error) => task.set_exception(error),
                };

                debug!(task_id = %response.id, applied, state = %task.state(), "Task reconciled");
            }

            debug!("Callback loop exited");
        });

        *self.callback_handle.lock() = Some(handle);
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("status", &self.status())
            .finish()
    }
}
