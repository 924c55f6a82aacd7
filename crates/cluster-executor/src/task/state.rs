//! Task lifecycle states

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a distributed task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Submitted, waiting in the queue or running remotely
    New = 0,
    /// Outcome is being stored
    Completing = 1,
    /// Completed with a value
    Normal = 2,
    /// Completed with an error raised by the callable
    Exceptional = 3,
    /// Cancelled without interruption
    Cancelled = 4,
    /// Cancellation with interruption in progress
    Interrupting = 5,
    /// Cancelled with interruption
    Interrupted = 6,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::New,
            1 => Self::Completing,
            2 => Self::Normal,
            3 => Self::Exceptional,
            4 => Self::Cancelled,
            5 => Self::Interrupting,
            _ => Self::Interrupted,
        }
    }

    /// Whether no further transition can happen
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Normal | Self::Exceptional | Self::Cancelled | Self::Interrupted
        )
    }

    /// Whether the state belongs to the cancellation branch
    pub fn is_cancelled(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Interrupting | Self::Interrupted
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Completing => write!(f, "completing"),
            Self::Normal => write!(f, "normal"),
            Self::Exceptional => write!(f, "exceptional"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Interrupting => write!(f, "interrupting"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Atomic cell holding a [`TaskState`]
#[derive(Debug)]
pub(crate) struct AtomicTaskState(AtomicU8);

impl AtomicTaskState {
    pub(crate) fn new(state: TaskState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: TaskState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `current` to `next`; false if the state was not `current`
    pub(crate) fn transition(&self, current: TaskState, next: TaskState) -> bool {
        self.0
            .compare_exchange(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
