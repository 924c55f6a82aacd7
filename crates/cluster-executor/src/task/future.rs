//! Distributed task record and caller handle

use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::trace;

use super::id::TaskId;
use super::state::{AtomicTaskState, TaskState};
use crate::callable::{CallableError, CallablePayload, CallableResult};
use crate::queue::ExecutionQueue;

/// Error observed by a caller waiting on a task
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The callable raised an error on the worker
    #[error("task execution failed: {0}")]
    Execution(CallableError),

    /// The task was cancelled before it completed
    #[error("task was cancelled")]
    Cancelled,

    /// The local wait expired; the remote execution is not affected
    #[error("timed out after {0:?} waiting for task")]
    Timeout(Duration),
}

/// One unit of remote work
///
/// Shared between the execution queue, the coordinator's callback path and
/// every [`TaskFuture`] handed to callers.
pub struct DistributedTask {
    id: TaskId,
    state: AtomicTaskState,
    payload: Mutex<Option<CallablePayload>>,
    outcome: Mutex<Option<CallableResult>>,
    done: watch::Sender<bool>,
    queue: Weak<ExecutionQueue>,
}

impl DistributedTask {
    pub(crate) fn new(id: TaskId, payload: CallablePayload, queue: Weak<ExecutionQueue>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            id,
            state: AtomicTaskState::new(TaskState::New),
            payload: Mutex::new(Some(payload)),
            outcome: Mutex::new(None),
            done,
            queue,
        }
    }

    /// Task id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.state.load()
    }

    /// Whether the task left `NEW`
    pub fn is_done(&self) -> bool {
        self.state.load() != TaskState::New
    }

    /// Whether the task was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state.load().is_cancelled()
    }

    /// Copy of the callable, `None` once the task has completed
    pub fn payload(&self) -> Option<CallablePayload> {
        self.payload.lock().clone()
    }

    /// Complete the task with a value
    ///
    /// Returns false if the task already left `NEW`.
    pub fn set(&self, value: serde_json::Value) -> bool {
        self.complete(Ok(value), TaskState::Normal)
    }

    /// Complete the task with an error raised by the callable
    ///
    /// Returns false if the task already left `NEW`.
    pub fn set_exception(&self, error: CallableError) -> bool {
        self.complete(Err(error), TaskState::Exceptional)
    }

    /// Cancel the task if it has not completed yet
    ///
    /// The task is removed from the execution queue. With `may_interrupt` the
    /// task settles to `INTERRUPTED` instead of `CANCELLED`; nothing is sent
    /// to a worker that may already be running it.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let next = if may_interrupt {
            TaskState::Interrupting
        } else {
            TaskState::Cancelled
        };

        if !self.state.transition(TaskState::New, next) {
            return false;
        }

        if let Some(queue) = self.queue.upgrade() {
            queue.remove_from_running(self, true);
        }

        if may_interrupt {
            self.state.store(TaskState::Interrupted);
        }

        trace!(task_id = %self.id, state = %self.state.load(), "Task cancelled");
        self.finish_completion();
        true
    }

    /// Wait until the task reaches a terminal state
    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        // The sender lives as long as self, so this only returns once fired
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Outcome of a terminal task
    pub(crate) fn report(&self) -> Result<serde_json::Value, TaskError> {
        match self.state.load() {
            TaskState::Normal | TaskState::Exceptional => match self.outcome.lock().clone() {
                Some(Ok(value)) => Ok(value),
                Some(Err(error)) => Err(TaskError::Execution(error)),
                None => Err(TaskError::Cancelled),
            },
            _ => Err(TaskError::Cancelled),
        }
    }

    fn complete(&self, outcome: CallableResult, terminal: TaskState) -> bool {
        if !self.state.transition(TaskState::New, TaskState::Completing) {
            return false;
        }

        *self.outcome.lock() = Some(outcome);
        self.state.store(terminal);
        self.finish_completion();
        true
    }

    fn finish_completion(&self) {
        self.payload.lock().take();
        self.done.send_replace(true);
    }
}

impl std::fmt::Debug for DistributedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedTask")
            .field("id", &self.id)
            .field("state", &self.state.load())
            .finish()
    }
}

/// Caller handle for a submitted callable
///
/// Cloning the handle shares the underlying task.
pub struct TaskFuture<V> {
    task: Arc<DistributedTask>,
    _output: PhantomData<fn() -> V>,
}

impl<V> Clone for TaskFuture<V> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            _output: PhantomData,
        }
    }
}

impl<V> std::fmt::Debug for TaskFuture<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TaskFuture").field(&self.task).finish()
    }
}

impl<V: DeserializeOwned> TaskFuture<V> {
    pub(crate) fn new(task: Arc<DistributedTask>) -> Self {
        Self {
            task,
            _output: PhantomData,
        }
    }

    /// Task id
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Whether the task left `NEW`
    pub fn is_done(&self) -> bool {
        self.task.is_done()
    }

    /// Whether the task was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    /// Cancel the task; see [`DistributedTask::cancel`]
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.task.cancel(may_interrupt)
    }

    /// The shared task record
    pub fn task(&self) -> &Arc<DistributedTask> {
        &self.task
    }

    /// Wait for the outcome
    pub async fn get(&self) -> Result<V, TaskError> {
        self.task.wait().await;
        self.decode()
    }

    /// Wait for the outcome, at most `timeout`
    ///
    /// Expiry does not cancel the task.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<V, TaskError> {
        tokio::time::timeout(timeout, self.task.wait())
            .await
            .map_err(|_| TaskError::Timeout(timeout))?;
        self.decode()
    }

    fn decode(&self) -> Result<V, TaskError> {
        let value = self.task.report()?;
        serde_json::from_value(value).map_err(|e| {
            TaskError::Execution(CallableError::new("OutputDecode", e.to_string()))
        })
    }
}
