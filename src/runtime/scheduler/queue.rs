//! Run queues for the scheduler
//!
//! Multi-producer, multi-consumer queue of runnable fibers.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::runtime::fiber::FiberRuntime;

/// A thread-safe queue of fibers waiting for a turn.
#[derive(Debug, Default)]
pub struct RunQueue {
    inner: Mutex<VecDeque<Arc<FiberRuntime>>>,
}

impl RunQueue {
    /// Create a new empty run queue.
    #[inline]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Push a fiber to the back of the queue.
    #[inline]
    pub fn push(
        &self,
        fiber: Arc<FiberRuntime>,
    ) {
        self.inner.lock().push_back(fiber);
    }

    /// Push a fiber to the front of the queue (runs next).
    #[inline]
    pub fn push_front(
        &self,
        fiber: Arc<FiberRuntime>,
    ) {
        self.inner.lock().push_front(fiber);
    }

    /// Pop a fiber from the front of the queue.
    #[inline]
    pub fn pop_front(&self) -> Option<Arc<FiberRuntime>> {
        self.inner.lock().pop_front()
    }

    /// Pop a fiber from the back of the queue (for work stealing).
    #[inline]
    pub fn pop_back(&self) -> Option<Arc<FiberRuntime>> {
        self.inner.lock().pop_back()
    }

    /// Number of queued fibers.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop every queued fiber.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
