//! Worker daemon
//!
//! Connects to the coordinator, listens for broadcasts and keeps the
//! executor fed: every "work available" hint and every poll tick becomes a
//! pull request sized to the executor's free slots.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use super::executor::WorkerExecutor;
use super::poller::PullPoller;
use super::{WorkerError, WorkerStatus};
use crate::callable::CallableRegistry;
use crate::config::WorkerConfig;
use crate::protocol::SIGNAL_EXEC;
use crate::transport::MessagingClient;

/// Receives custom broadcast signals
pub trait SignalHandler: Send + Sync {
    /// Handle one broadcast; `signal` is never `0x00`
    fn on_signal(&self, signal: u8, payload: &[u8]);
}

/// Worker process entry point
///
/// # Example
///
/// ```ignore
/// let mut registry = CallableRegistry::new();
/// registry.register::<Divide>();
///
/// let worker = WorkerDaemon::new(WorkerConfig::new(4), registry, Arc::new(server.client()));
/// worker.start().await?;
/// // ...
/// worker.shutdown().await?;
/// ```
pub struct WorkerDaemon {
    config: WorkerConfig,
    client: Arc<dyn MessagingClient>,
    executor: Arc<WorkerExecutor>,
    signal_handler: Arc<RwLock<Option<Arc<dyn SignalHandler>>>>,
    shutdown_tx: watch::Sender<bool>,
    status: RwLock<WorkerStatus>,
    pull_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerDaemon {
    /// Create a daemon
    pub fn new(
        config: WorkerConfig,
        registry: CallableRegistry,
        client: Arc<dyn MessagingClient>,
    ) -> Self {
        let executor = WorkerExecutor::new(
            config.worker_id.clone(),
            config.capacity,
            registry,
            Arc::clone(&client),
        );
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            client,
            executor,
            signal_handler: Arc::new(RwLock::new(None)),
            shutdown_tx,
            status: RwLock::new(WorkerStatus::Stopped),
            pull_handle: Mutex::new(None),
        }
    }

    /// Install the handler for custom broadcast signals
    pub fn set_signal_handler(&self, handler: Arc<dyn SignalHandler>) {
        *self.signal_handler.write() = Some(handler);
    }

    /// Connect and start pulling work
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn start(&self) -> Result<(), WorkerError> {
        {
            let mut status = self.status.write();
            match *status {
                WorkerStatus::Stopped => *status = WorkerStatus::Starting,
                WorkerStatus::Starting | WorkerStatus::Running => {
                    return Err(WorkerError::AlreadyRunning)
                }
                WorkerStatus::Draining | WorkerStatus::Terminated => {
                    return Err(WorkerError::ShutDown)
                }
            }
        }

        if let Err(e) = self.client.connect().await {
            let mut status = self.status.write();
            if *status == WorkerStatus::Starting {
                *status = WorkerStatus::Stopped;
            }
            return Err(e.into());
        }

        {
            // Shutdown may have run while connecting
            let mut status = self.status.write();
            if *status != WorkerStatus::Starting {
                debug!(status = ?*status, "Shutdown requested during start");
                return Err(WorkerError::ShutDown);
            }
            self.start_pull_loop();
            *status = WorkerStatus::Running;
        }

        info!(
            worker_id = %self.config.worker_id,
            capacity = self.config.capacity,
            "Worker started"
        );
        Ok(())
    }

    /// Stop pulling and drain in-flight callables
    ///
    /// Fails with [`WorkerError::ShutdownTimeout`] if callables are still
    /// running after the configured timeout.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        {
            let mut status = self.status.write();
            if matches!(*status, WorkerStatus::Draining | WorkerStatus::Terminated) {
                return Ok(());
            }
            *status = WorkerStatus::Draining;
        }

        info!(worker_id = %self.config.worker_id, "Initiating graceful shutdown");

        self.shutdown_tx.send_replace(true);
        let handle = self.pull_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Pull loop ended abnormally: {}", e);
            }
        }

        self.executor.shutdown();
        let drained = self
            .executor
            .await_termination(self.config.shutdown_timeout)
            .await;

        if let Err(e) = self.client.shutdown().await {
            warn!("Client shutdown failed: {}", e);
        }
        *self.status.write() = WorkerStatus::Terminated;

        if !drained {
            warn!(
                remaining = self.executor.outstanding(),
                "Shutdown timeout reached"
            );
            return Err(WorkerError::ShutdownTimeout);
        }

        info!(worker_id = %self.config.worker_id, "Worker stopped");
        Ok(())
    }

    /// Current status
    pub fn status(&self) -> WorkerStatus {
        *self.status.read()
    }

    /// Free execution slots
    pub fn available(&self) -> usize {
        self.executor.available()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.executor.capacity()
    }

    /// The underlying executor
    pub fn executor(&self) -> &Arc<WorkerExecutor> {
        &self.executor
    }

    fn start_pull_loop(&self) {
        let client = Arc::clone(&self.client);
        let executor = Arc::clone(&self.executor);
        let signal_handler = Arc::clone(&self.signal_handler);
        let mut signals = Some(client.subscribe());
        let mut poller = PullPoller::new(
            self.config.worker_id.clone(),
            self.config.poller.clone(),
            self.shutdown_tx.subscribe(),
        );

        let handle = tokio::spawn(async move {
            // First pull picks up anything queued before we connected
            let mut pull_now = true;

            loop {
                if poller.is_shutdown() {
                    debug!("Pull loop: shutdown requested");
                    break;
                }

                if pull_now {
                    let available = executor.available();
                    if available == 0 {
                        trace!("No free slots, skipping pull");
                    } else {
                        match poller.poll(client.as_ref(), available).await {
                            Ok(batch) => {
                                executor.submit(batch);
                            }
                            Err(e) => error!("Pull failed: {}", e),
                        }
                    }
                }

                tokio::select! {
                    stopped = poller.wait() => {
                        if stopped {
                            debug!("Pull loop: shutdown requested");
                            break;
                        }
                        pull_now = true;
                    }
                    signal = next_signal(&mut signals) => {
                        pull_now = match signal {
                            Ok(message) => match message.split_first() {
                                Some((&SIGNAL_EXEC, _)) => true,
                                Some((&signal, payload)) => {
                                    let handler = signal_handler.read().clone();
                                    match handler {
                                        Some(handler) => handler.on_signal(signal, payload),
                                        None => warn!(signal, "No handler for custom signal"),
                                    }
                                    false
                                }
                                None => false,
                            },
                            Err(RecvError::Lagged(missed)) => {
                                debug!(missed, "Broadcasts lagged");
                                true
                            }
                            Err(RecvError::Closed) => {
                                warn!("Broadcast channel closed, relying on polling");
                                signals = None;
                                false
                            }
                        };
                    }
                }
            }

            debug!("Pull loop exited");
        });

        *self.pull_handle.lock() = Some(handle);
    }
}

async fn next_signal(
    signals: &mut Option<broadcast::Receiver<Vec<u8>>>,
) -> Result<Vec<u8>, RecvError> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for WorkerDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDaemon")
            .field("worker_id", &self.config.worker_id)
            .field("status", &self.status())
            .field("executor", &self.executor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::empty_batch;
    use crate::transport::{
        LocalClient, LocalServer, MessagingServer, RequestListener, TransportError,
    };
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Idle;

    impl RequestListener for Idle {
        fn on_request_received(&self, _payload: &[u8]) -> Vec<u8> {
            empty_batch()
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(u8, Vec<u8>)>>,
    }

    impl SignalHandler for Recorder {
        fn on_signal(&self, signal: u8, payload: &[u8]) {
            self.seen.lock().push((signal, payload.to_vec()));
        }
    }

    async fn bound_server() -> LocalServer {
        let server = LocalServer::new();
        server.set_listener(Arc::new(Idle));
        server.bind().await.unwrap();
        server
    }

    fn daemon(server: &LocalServer) -> WorkerDaemon {
        let config = WorkerConfig::new(2)
            .with_worker_id("test-worker")
            .with_shutdown_timeout(Duration::from_secs(1));
        WorkerDaemon::new(config, CallableRegistry::new(), Arc::new(server.client()))
    }

    #[tokio::test]
    async fn test_start_requires_reachable_coordinator() {
        let server = LocalServer::new();
        let worker = daemon(&server);

        assert!(matches!(
            worker.start().await,
            Err(WorkerError::Transport(TransportError::NotConnected))
        ));
        assert_eq!(worker.status(), WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let server = bound_server().await;
        let worker = daemon(&server);

        worker.start().await.unwrap();
        assert_eq!(worker.status(), WorkerStatus::Running);
        assert!(matches!(
            worker.start().await,
            Err(WorkerError::AlreadyRunning)
        ));

        worker.shutdown().await.unwrap();
        worker.shutdown().await.unwrap();
        assert_eq!(worker.status(), WorkerStatus::Terminated);
        assert!(matches!(worker.start().await, Err(WorkerError::ShutDown)));
        assert_eq!(worker.available(), worker.capacity());
    }

    #[tokio::test]
    async fn test_custom_signal_reaches_handler() {
        let server = bound_server().await;
        let worker = daemon(&server);
        let recorder = Arc::new(Recorder::default());
        worker.set_signal_handler(recorder.clone());
        worker.start().await.unwrap();

        server.send_broadcast(&[SIGNAL_EXEC]).await.unwrap();
        server.send_broadcast(&[0x05, 9, 9]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(recorder.seen.lock().clone(), vec![(0x05, vec![9, 9])]);
        worker.shutdown().await.unwrap();
    }

    /// Client whose connect blocks until released
    struct GatedClient {
        inner: LocalClient,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl MessagingClient for GatedClient {
        async fn connect(&self) -> Result<(), TransportError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.connect().await
        }

        async fn request(&self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
            self.inner.request(payload).await
        }

        fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
            self.inner.subscribe()
        }

        async fn shutdown(&self) -> Result<(), TransportError> {
            self.inner.shutdown().await
        }
    }

    #[tokio::test]
    async fn test_shutdown_during_start_wins() {
        let server = bound_server().await;
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let client = GatedClient {
            inner: server.client(),
            entered: entered.clone(),
            release: release.clone(),
        };
        let worker = WorkerDaemon::new(
            WorkerConfig::new(1).with_shutdown_timeout(Duration::from_secs(1)),
            CallableRegistry::new(),
            Arc::new(client),
        );

        let (started, stopped) = tokio::join!(worker.start(), async {
            entered.notified().await;
            assert!(matches!(worker.start().await, Err(WorkerError::AlreadyRunning)));
            let stopped = worker.shutdown().await;
            release.notify_one();
            stopped
        });

        assert!(matches!(started, Err(WorkerError::ShutDown)));
        stopped.unwrap();
        assert_eq!(worker.status(), WorkerStatus::Terminated);
        assert!(worker.pull_handle.lock().is_none());
    }
}
