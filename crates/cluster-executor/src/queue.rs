//! Execution queue
//!
//! Holds tasks waiting to be handed to a worker (pending, FIFO) and tasks a
//! worker has pulled but not answered yet (running, keyed by id). A task id is
//! never present in both containers at the same time.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::callable::CallablePayload;
use crate::task::{DistributedTask, IdGenerator, RandomIdGenerator, TaskId, TaskState};

/// Error returned when a task cannot be submitted
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The queue has been shut down
    #[error("execution queue is shut down")]
    Rejected,

    /// The callable could not be serialized
    #[error("failed to encode callable: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Pending/running task container owned by the coordinator
pub struct ExecutionQueue {
    pending: Mutex<VecDeque<Arc<DistributedTask>>>,
    running: DashMap<TaskId, Arc<DistributedTask>>,
    shutdown: RwLock<bool>,
    ids: Arc<dyn IdGenerator>,
}

impl ExecutionQueue {
    /// Create a queue issuing random ids
    pub fn new() -> Arc<Self> {
        Self::with_id_generator(Arc::new(RandomIdGenerator))
    }

    /// Create a queue with an injected id generator
    pub fn with_id_generator(ids: Arc<dyn IdGenerator>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(VecDeque::new()),
            running: DashMap::new(),
            shutdown: RwLock::new(false),
            ids,
        })
    }

    /// Wrap a callable in a new task and enqueue it
    pub fn submit(
        self: &Arc<Self>,
        payload: CallablePayload,
    ) -> Result<Arc<DistributedTask>, SubmitError> {
        let task = Arc::new(DistributedTask::new(
            self.ids.next_id(),
            payload,
            Arc::downgrade(self),
        ));
        self.enqueue(Arc::clone(&task))?;
        Ok(task)
    }

    /// Append a task to pending
    pub fn enqueue(&self, task: Arc<DistributedTask>) -> Result<(), SubmitError> {
        let shutdown = self.shutdown.read();
        if *shutdown {
            return Err(SubmitError::Rejected);
        }

        debug!(task_id = %task.id(), "Task enqueued");
        self.pending.lock().push_back(task);
        Ok(())
    }

    /// Move the oldest pending task to running and return it
    ///
    /// Returns `None` when nothing is pending or the queue is shutting down;
    /// in the latter case a popped task is cancelled instead of handed out.
    pub fn pull_next(&self) -> Option<Arc<DistributedTask>> {
        loop {
            let task = self.pending.lock().pop_front()?;

            if self.is_shutdown() {
                task.cancel(false);
                return None;
            }

            // Cancelled while it sat in pending
            if task.state() != TaskState::New {
                continue;
            }

            self.running.insert(task.id(), Arc::clone(&task));

            if self.is_shutdown() {
                self.remove_from_running(&task, false);
                task.cancel(false);
                return None;
            }

            // Cancelled between pop and insert
            if task.state() != TaskState::New {
                self.remove_from_running(&task, false);
                continue;
            }

            return Some(task);
        }
    }

    /// Remove and return the running task with the given id
    pub fn complete_running(&self, id: &TaskId) -> Option<Arc<DistributedTask>> {
        self.running.remove(id).map(|(_, task)| task)
    }

    /// Remove a task from running, and optionally from pending
    ///
    /// Returns true if the task was found in either container.
    pub fn remove_from_running(&self, task: &DistributedTask, also_from_pending: bool) -> bool {
        let id = task.id();
        let mut removed = self.running.remove(&id).is_some();

        if also_from_pending {
            let mut pending = self.pending.lock();
            let before = pending.len();
            pending.retain(|t| t.id() != id);
            removed |= pending.len() != before;
        }

        removed
    }

    /// Number of tasks waiting to be pulled
    pub fn pending_size(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of tasks handed to workers and not answered yet
    pub fn running_size(&self) -> usize {
        self.running.len()
    }

    /// Whether a task id is in pending
    pub fn is_pending(&self, id: &TaskId) -> bool {
        self.pending.lock().iter().any(|t| t.id() == *id)
    }

    /// Whether a task id is in running
    pub fn is_running(&self, id: &TaskId) -> bool {
        self.running.contains_key(id)
    }

    /// Whether shutdown has been flagged
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.read()
    }

    /// Reject further submissions and cancel every queued task
    ///
    /// Idempotent. Returns the number of tasks cancelled by this call.
    pub fn shutdown(&self) -> usize {
        {
            let mut flag = self.shutdown.write();
            if *flag {
                return 0;
            }
            *flag = true;
        }

        let mut drained: Vec<Arc<DistributedTask>> = self.pending.lock().drain(..).collect();

        let running_ids: Vec<TaskId> = self.running.iter().map(|entry| *entry.key()).collect();
        for id in running_ids {
            if let Some((_, task)) = self.running.remove(&id) {
                drained.push(task);
            }
        }

        let cancelled = drained.iter().filter(|task| task.cancel(false)).count();

        info!(cancelled, "Execution queue shut down");
        cancelled
    }
}

impl std::fmt::Debug for ExecutionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionQueue")
            .field("pending", &self.pending_size())
            .field("running", &self.running_size())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
