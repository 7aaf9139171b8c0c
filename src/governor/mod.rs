//! Admission control: per-conversation cooldown and a process-wide cap on
//! concurrent heavy operations.
//!
//! Both checks are fast paths: the cooldown takes a per-conversation lock
//! for a map lookup and a clock read, and the gate is a plain semaphore.
//! Neither performs I/O.

use crate::types::ConversationId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

/// Per-conversation debounce: a turn is admitted only if at least `min_gap`
/// has elapsed since the previous admitted turn for that conversation.
/// Admission is atomic per conversation key.
pub struct CooldownLimiter {
    min_gap: Duration,
    entries: std::sync::Mutex<HashMap<ConversationId, Arc<Mutex<Option<Instant>>>>>,
}

impl CooldownLimiter {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            entries: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, id: ConversationId) -> Arc<Mutex<Option<Instant>>> {
        let mut map = self.entries.lock().expect("cooldown map poisoned");
        map.entry(id).or_default().clone()
    }

    /// Check-and-stamp in one critical section. A denied turn leaves the
    /// previous stamp untouched, so it does not push the window forward.
    pub async fn admit(&self, id: ConversationId) -> bool {
        let entry = self.entry(id);
        let mut last = entry.lock().await;
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.min_gap {
                return false;
            }
        }
        *last = Some(now);
        true
    }
}

/// Fixed-size admission gate around the expensive section of a turn
/// (validation + moderation + retrieval + generation).
#[derive(Clone)]
pub struct HeavyGate {
    permits: Arc<Semaphore>,
}

impl HeavyGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Wait for a slot. The permit releases on drop.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The gate semaphore is never closed.
        self.permits
            .clone()
            .acquire_owned()
            .await
            .expect("gate semaphore closed")
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
