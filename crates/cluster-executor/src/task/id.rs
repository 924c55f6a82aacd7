//! Task identifiers and id generation

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a task
///
/// Ids are only ever compared for equality (map keys); no ordering is implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Source of task ids for an execution queue
pub trait IdGenerator: Send + Sync {
    /// Produce an id never returned before by this generator
    fn next_id(&self) -> TaskId;
}

/// Random 128-bit ids (UUID v7)
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> TaskId {
        TaskId(Uuid::now_v7())
    }
}

/// Sequential ids namespaced by coordinator identity
///
/// The high 64 bits carry the namespace, the low 64 bits a per-generator
/// counter. Two coordinators with distinct namespaces never collide.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    namespace: u64,
    counter: AtomicU64,
}

impl SequenceIdGenerator {
    /// Create a generator for the given namespace
    pub fn new(namespace: u64) -> Self {
        Self {
            namespace,
            counter: AtomicU64::new(0),
        }
    }

    /// Create a generator with a random namespace
    pub fn random() -> Self {
        Self::new(rand::random())
    }

    /// The namespace in the high half of every id
    pub fn namespace(&self) -> u64 {
        self.namespace
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> TaskId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        TaskId(Uuid::from_u64_pair(self.namespace, seq))
    }
}
