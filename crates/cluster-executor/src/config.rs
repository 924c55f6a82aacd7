//! Coordinator and worker configuration

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default interval between "work available" broadcasts
pub const DEFAULT_EXEC_SIGNAL_INTERVAL: Duration = Duration::from_millis(200);

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Minimum interval between "work available" broadcasts
    #[serde(with = "duration_millis")]
    pub exec_signal_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            exec_signal_interval: DEFAULT_EXEC_SIGNAL_INTERVAL,
        }
    }
}

impl CoordinatorConfig {
    /// Create a new coordinator configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `CLUSTER_EXEC_SIGNAL_INTERVAL_MS`: broadcast interval (default: 200)
    pub fn from_env() -> Self {
        let exec_signal_interval = env::var("CLUSTER_EXEC_SIGNAL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_EXEC_SIGNAL_INTERVAL);

        Self {
            exec_signal_interval,
        }
    }

    /// Set the broadcast interval
    pub fn with_exec_signal_interval(mut self, interval: Duration) -> Self {
        self.exec_signal_interval = interval.max(Duration::from_millis(1));
        self
    }
}

/// Worker-side pull cadence
///
/// Workers pull on every "work available" broadcast and, independently, on
/// this timer: it resets to `min_interval` when a pull returns work and backs
/// off up to `max_interval` when it does not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Poll interval while work keeps arriving
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    /// Poll interval ceiling when idle
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier when no work found
    pub backoff_multiplier: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
        }
    }
}

impl PollerConfig {
    /// Create a new poller configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set minimum poll interval
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set maximum poll interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker ID, used in logs
    pub worker_id: String,

    /// Number of callables executed concurrently
    pub capacity: usize,

    /// Independent pull cadence
    pub poller: PollerConfig,

    /// How long shutdown waits for in-flight callables
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            capacity: 10,
            poller: PollerConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create a worker configuration with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self::default().with_capacity(capacity)
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WORKER_ID`: worker identifier (default: `worker-<uuid>`)
    /// - `WORKER_CAPACITY`: concurrent executions (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let worker_id = env::var("WORKER_ID").unwrap_or(defaults.worker_id);

        let capacity = env::var("WORKER_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.capacity);

        Self {
            worker_id,
            ..Self::default()
        }
        .with_capacity(capacity)
    }

    /// Set the worker ID
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Set poller configuration
    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
