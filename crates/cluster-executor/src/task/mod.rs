//! Task futures and identifiers
//!
//! This module provides:
//! - [`TaskId`] and the [`IdGenerator`] implementations used by the queue
//! - [`TaskState`] - the lifecycle state machine of one unit of remote work
//! - [`DistributedTask`] - the shared record the queue and the coordinator operate on
//! - [`TaskFuture`] - the typed, cancellable handle returned to the caller
//!
//! # Lifecycle
//!
//! ```text
//!          ┌──────────────► COMPLETING ──┬──► NORMAL
//!          │                             └──► EXCEPTIONAL
//!   NEW ───┤
//!          ├──────────────► CANCELLED
//!          └──────────────► INTERRUPTING ───► INTERRUPTED
//! ```
//!
//! Only one transition out of `NEW` ever succeeds.

mod future;
mod id;
mod state;

pub use future::{DistributedTask, TaskError, TaskFuture};
pub use id::{IdGenerator, RandomIdGenerator, SequenceIdGenerator, TaskId};
pub use state::TaskState;
