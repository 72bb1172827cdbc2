//! Connection limiting.
//!
//! Caps the number of concurrently open WebSocket sessions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tracks open connections against a fixed maximum.
#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    inner: Arc<LimiterInner>,
}

#[derive(Debug)]
struct LimiterInner {
    active: AtomicUsize,
    max_connections: usize,
}

impl ConnectionLimiter {
    /// Create a limiter allowing `max_connections` open sessions.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                active: AtomicUsize::new(0),
                max_connections,
            }),
        }
    }

    /// Take a slot, or `None` when at capacity.
    ///
    /// The slot is released when the returned guard is dropped.
    #[must_use]
    pub fn try_acquire(&self) -> Option<ConnectionSlot> {
        self.inner
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.inner.max_connections).then_some(current + 1)
            })
            .ok()
            .map(|_| ConnectionSlot {
                inner: Arc::clone(&self.inner),
            })
    }

    /// Number of slots in use.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }
}

/// A held connection slot.
#[derive(Debug)]
pub struct ConnectionSlot {
    inner: Arc<LimiterInner>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::AcqRel);
    }
}
