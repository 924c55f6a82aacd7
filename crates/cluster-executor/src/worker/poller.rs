//! Pull requests with exponential backoff
//!
//! Workers pull whenever the coordinator hints that work is pending, and
//! also on their own timer so a missed broadcast never strands work.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use super::WorkerError;
use crate::config::PollerConfig;
use crate::protocol::{decode_batch, encode_pull, Request};
use crate::transport::MessagingClient;

/// Issues pull requests and tracks the idle backoff interval
pub struct PullPoller {
    worker_id: String,
    config: PollerConfig,
    current_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl PullPoller {
    /// Create a new poller
    pub fn new(
        worker_id: impl Into<String>,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            current_interval: config.min_interval,
            config,
            shutdown_rx,
        }
    }

    /// Ask the coordinator for up to `available` requests
    ///
    /// Nothing is sent when `available` is zero.
    #[instrument(skip(self, client), fields(worker_id = %self.worker_id))]
    pub async fn poll(
        &mut self,
        client: &dyn MessagingClient,
        available: usize,
    ) -> Result<Vec<Request>, WorkerError> {
        if self.is_shutdown() || available == 0 {
            return Ok(vec![]);
        }

        let result = match client.request(encode_pull(available)).await {
            Ok(reply) => decode_batch(&reply).map_err(WorkerError::from),
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(batch) if !batch.is_empty() => {
                self.reset_backoff();
                debug!(count = batch.len(), "Pulled requests");
            }
            _ => {
                self.increase_backoff();
                trace!(
                    interval_ms = self.current_interval.as_millis() as u64,
                    "No requests pulled, backing off"
                );
            }
        }

        result
    }

    /// Wait for the current backoff interval
    ///
    /// Returns true if shutdown was signaled during the wait.
    pub async fn wait(&mut self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown_rx.changed() => {
                debug!("Shutdown signal received during wait");
                true
            }
        }
    }

    /// Current poll interval
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn reset_backoff(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    fn increase_backoff(&mut self) {
        let next = Duration::from_secs_f64(
            self.current_interval.as_secs_f64() * self.config.backoff_multiplier,
        );
        self.current_interval = next.min(self.config.max_interval);
    }
}
