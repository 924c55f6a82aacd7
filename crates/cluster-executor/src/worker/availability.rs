//! Worker capacity accounting
//!
//! Tracks how many callables are in flight so pull requests never ask for
//! more work than the worker can run. Uses atomics only; reads are a hint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed capacity and live in-flight counter
#[derive(Debug)]
pub struct Availability {
    capacity: usize,
    in_flight: AtomicUsize,
}

impl Availability {
    /// Create with the given capacity
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Callables currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Free slots, never negative
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.in_flight())
    }

    /// Claim a slot for the lifetime of the returned guard
    pub fn acquire(self: &Arc<Self>) -> SlotGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        SlotGuard {
            availability: Arc::clone(self),
        }
    }
}

/// Releases its slot on drop, including during unwinding
#[derive(Debug)]
pub struct SlotGuard {
    availability: Arc<Availability>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.availability.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
