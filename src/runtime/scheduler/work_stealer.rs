//! Work stealing for load balancing across worker threads.
//!
//! Idle workers take runnable fibers from the back of a busy worker's local
//! queue, so the owner keeps popping its oldest work from the front.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;

use super::queue::RunQueue;
use crate::runtime::fiber::FiberRuntime;

/// Statistics about work stealing operations.
#[derive(Debug, Default)]
pub struct StealStats {
    /// Number of successful steals.
    pub steal_successes: AtomicUsize,
    /// Number of failed steal attempts.
    pub steal_failures: AtomicUsize,
    /// Total number of steal attempts.
    pub total_attempts: AtomicUsize,
    /// Total fibers stolen.
    pub fibers_stolen: AtomicUsize,
}

impl StealStats {
    /// Record a successful steal.
    #[inline]
    pub fn record_success(
        &self,
        count: usize,
    ) {
        self.steal_successes.fetch_add(1, Ordering::Relaxed);
        self.fibers_stolen.fetch_add(count, Ordering::Relaxed);
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed steal attempt.
    #[inline]
    pub fn record_failure(&self) {
        self.steal_failures.fetch_add(1, Ordering::Relaxed);
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Success rate in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_attempts.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        let successes = self.steal_successes.load(Ordering::Relaxed);
        successes as f64 / total as f64
    }
}

/// Which end of a victim's queue to steal from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealStrategy {
    /// Steal from the back of victim's queue (reduces contention).
    Back,
    /// Steal from the front of victim's queue (FIFO).
    Front,
    /// Randomly choose between front and back.
    Random,
}

/// Per-worker local queues plus the stealing policy over them.
#[derive(Debug)]
pub struct WorkStealer {
    queues: Vec<Arc<RunQueue>>,
    strategy: StealStrategy,
    stats: StealStats,
}

impl WorkStealer {
    /// Create a work stealer with one local queue per worker.
    pub fn new(num_workers: usize) -> Self {
        Self {
            queues: (0..num_workers).map(|_| Arc::new(RunQueue::new())).collect(),
            strategy: StealStrategy::Back,
            stats: StealStats::default(),
        }
    }

    /// Number of workers.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.queues.len()
    }

    /// Local queue of a worker.
    #[inline]
    pub fn local_queue(
        &self,
        worker_id: usize,
    ) -> Option<&Arc<RunQueue>> {
        self.queues.get(worker_id)
    }

    /// Push a fiber onto a worker's local queue.
    #[inline]
    pub fn push_local(
        &self,
        worker_id: usize,
        fiber: Arc<FiberRuntime>,
    ) {
        if let Some(queue) = self.queues.get(worker_id) {
            queue.push(fiber);
        }
    }

    /// Pop the oldest fiber from a worker's own queue.
    #[inline]
    pub fn try_local(
        &self,
        worker_id: usize,
    ) -> Option<Arc<FiberRuntime>> {
        self.queues.get(worker_id).and_then(|q| q.pop_front())
    }

    /// Steal up to `max_count` fibers from random victims.
    pub fn steal_batch(
        &self,
        thief: usize,
        max_count: usize,
    ) -> Vec<Arc<FiberRuntime>> {
        let mut stolen = Vec::with_capacity(max_count);
        let num_workers = self.num_workers();

        if num_workers < 2 || max_count == 0 {
            return stolen;
        }

        let victim_count = (num_workers / 4).max(1).min(num_workers - 1);

        for _ in 0..victim_count {
            if stolen.len() >= max_count {
                break;
            }

            let victim = self.random_victim(thief);
            while stolen.len() < max_count {
                match self.steal_from(victim) {
                    Some(fiber) => stolen.push(fiber),
                    None => break,
                }
            }
        }

        if stolen.is_empty() {
            self.stats.record_failure();
        } else {
            self.stats.record_success(stolen.len());
        }

        stolen
    }

    fn steal_from(
        &self,
        victim: usize,
    ) -> Option<Arc<FiberRuntime>> {
        let queue = self.queues.get(victim)?;
        match self.strategy {
            StealStrategy::Back => queue.pop_back(),
            StealStrategy::Front => queue.pop_front(),
            StealStrategy::Random => {
                if rand::rng().random_bool(0.5) {
                    queue.pop_back()
                } else {
                    queue.pop_front()
                }
            }
        }
    }

    /// A worker other than `thief`. Requires at least two workers.
    fn random_victim(
        &self,
        thief: usize,
    ) -> usize {
        let n = self.num_workers();
        let offset = rand::rng().random_range(1..n);
        (thief + offset) % n
    }

    /// Total fibers sitting in local queues.
    pub fn queued(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    /// Drop every queued fiber.
    pub fn clear(&self) {
        for queue in &self.queues {
            queue.clear();
        }
    }

    #[inline]
    pub fn stats(&self) -> &StealStats {
        &self.stats
    }

    #[inline]
    pub fn set_strategy(
        &mut self,
        strategy: StealStrategy,
    ) {
        self.strategy = strategy;
    }

    #[inline]
    pub fn strategy(&self) -> StealStrategy {
        self.strategy
    }
}
