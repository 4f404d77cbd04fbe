//! Unique identifier for Mutex instances

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MUTEX_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a Mutex
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MutexId(u64);

impl MutexId {
    /// Generate a new unique MutexId
    pub fn new() -> Self {
        MutexId(NEXT_MUTEX_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a MutexId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        MutexId(id)
    }
}

impl Default for MutexId {
    fn default() -> Self {
        Self::new()
    }
}
