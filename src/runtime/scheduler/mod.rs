//! Fiber scheduler
//!
//! A fixed pool of worker threads runs fiber turns. Every worker owns a local
//! run queue; wake-ups coming from outside the pool land in a global
//! injection queue, and idle workers steal batches from their peers.

pub mod queue;
pub mod work_stealer;

#[cfg(test)]
mod tests;

pub use queue::RunQueue;
pub use work_stealer::{StealStats, StealStrategy, WorkStealer};

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};

use crate::runtime::clock::{ClockRef, SystemClock};
use crate::runtime::fiber::{FiberId, FiberIdGenerator, FiberRuntime};

static NEXT_SCHEDULER: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// (scheduler uid, worker index) of the worker running on this thread.
    static WORKER: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads.
    pub num_workers: usize,
    /// Primitive operations a fiber may perform in one turn before yielding.
    pub ops_per_turn: usize,
    /// Work stealing batch size.
    pub steal_batch: usize,
    /// Whether to use work stealing.
    pub use_work_stealing: bool,
    /// How long an idle worker parks before looking for work again.
    pub idle_timeout: Duration,
    /// How long shutdown waits for interrupted fibers to terminate before
    /// abandoning them.
    pub shutdown_timeout: Duration,
    /// Source of fiber start times.
    pub clock: ClockRef,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let num_cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            num_workers: num_cpus,
            ops_per_turn: 2048,
            steal_batch: 4,
            use_work_stealing: true,
            idle_timeout: Duration::from_millis(1),
            shutdown_timeout: Duration::from_secs(1),
            clock: Arc::new(SystemClock::new()),
        }
    }
}

/// Scheduler statistics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Total fibers forked.
    pub fibers_forked: AtomicUsize,
    /// Total fibers that published an exit.
    pub fibers_completed: AtomicUsize,
    /// Total fiber turns run.
    pub turns: AtomicUsize,
    /// Total fibers stolen.
    pub fibers_stolen: AtomicUsize,
    /// Total steal attempts.
    pub steal_attempts: AtomicUsize,
    /// Total successful steals.
    pub steal_success: AtomicUsize,
}

impl SchedulerStats {
    #[inline]
    pub fn record_forked(&self) {
        self.fibers_forked.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_completed(&self) {
        self.fibers_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_turn(&self) {
        self.turns.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a steal attempt that took `count` fibers.
    #[inline]
    pub fn record_steal(
        &self,
        count: usize,
    ) {
        self.steal_attempts.fetch_add(1, Ordering::Relaxed);
        if count > 0 {
            self.steal_success.fetch_add(1, Ordering::Relaxed);
            self.fibers_stolen.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Get steal success rate.
    pub fn steal_success_rate(&self) -> f64 {
        let attempts = self.steal_attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return 1.0;
        }
        self.steal_success.load(Ordering::Relaxed) as f64 / attempts as f64
    }

    /// Plain-value copy for reporting.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fibers_forked: self.fibers_forked.load(Ordering::Relaxed),
            fibers_completed: self.fibers_completed.load(Ordering::Relaxed),
            turns: self.turns.load(Ordering::Relaxed),
            fibers_stolen: self.fibers_stolen.load(Ordering::Relaxed),
            steal_attempts: self.steal_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub fibers_forked: usize,
    pub fibers_completed: usize,
    pub turns: usize,
    pub fibers_stolen: usize,
    pub steal_attempts: usize,
}

#[derive(Debug)]
struct Shared {
    uid: usize,
    config: SchedulerConfig,
    work_stealer: WorkStealer,
    injector: RunQueue,
    running: AtomicBool,
    /// Fibers forked on this scheduler that have not published an exit.
    live: Mutex<IndexMap<FiberId, Arc<FiberRuntime>>>,
    idle_lock: Mutex<()>,
    idle: Condvar,
    stats: SchedulerStats,
}

/// Cloneable reference to a scheduler, held by every fiber it runs.
#[derive(Debug, Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    /// Enqueue a fiber for its next turn.
    ///
    /// From a worker of this scheduler the fiber goes to that worker's local
    /// queue, otherwise to the injection queue. Dropped once the scheduler
    /// stopped.
    pub(crate) fn schedule(
        &self,
        fiber: Arc<FiberRuntime>,
    ) {
        let shared = &self.shared;
        if !shared.running.load(Ordering::Acquire) {
            tracing::trace!(fiber = %fiber.id(), "scheduler stopped; turn dropped");
            return;
        }

        match WORKER.with(|w| w.get()) {
            Some((uid, worker_id)) if uid == shared.uid => {
                shared.work_stealer.push_local(worker_id, fiber)
            }
            _ => shared.injector.push(fiber),
        }

        shared.idle.notify_one();
    }

    /// Track a freshly forked fiber until it publishes its exit.
    ///
    /// Returns `false` once the scheduler stopped; the caller abandons the
    /// fiber then.
    pub(crate) fn register(
        &self,
        fiber: &Arc<FiberRuntime>,
    ) -> bool {
        let mut live = self.shared.live.lock();
        if !self.shared.running.load(Ordering::Acquire) {
            return false;
        }
        live.insert(fiber.id().clone(), fiber.clone());
        true
    }

    pub(crate) fn forget(
        &self,
        id: &FiberId,
    ) {
        self.shared.live.lock().shift_remove(id);
    }

    /// Fibers forked on this scheduler that have not terminated yet.
    pub fn live(&self) -> usize {
        self.shared.live.lock().len()
    }

    /// Allocate a process-unique fiber id stamped with the scheduler's clock.
    #[inline]
    pub(crate) fn next_fiber_id(&self) -> FiberId {
        FiberIdGenerator::process().next(&self.shared.config.clock)
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    #[inline]
    pub fn stats(&self) -> &SchedulerStats {
        &self.shared.stats
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Fibers waiting for a turn.
    pub fn queued(&self) -> usize {
        self.shared.injector.len() + self.shared.work_stealer.queued()
    }
}

/// Pool of worker threads running fiber turns.
#[derive(Debug)]
pub struct Scheduler {
    handle: Handle,
    workers: Vec<thread::JoinHandle<()>>,
}

impl Scheduler {
    /// Create a new scheduler with default config.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with custom configuration.
    pub fn with_config(mut config: SchedulerConfig) -> Self {
        config.num_workers = config.num_workers.max(1);
        config.ops_per_turn = config.ops_per_turn.max(1);
        let num_workers = config.num_workers;

        let shared = Arc::new(Shared {
            uid: NEXT_SCHEDULER.fetch_add(1, Ordering::Relaxed),
            work_stealer: WorkStealer::new(num_workers),
            injector: RunQueue::new(),
            running: AtomicBool::new(true),
            live: Mutex::new(IndexMap::new()),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
            stats: SchedulerStats::default(),
            config,
        });

        let mut workers = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let shared = shared.clone();
            let worker = thread::Builder::new()
                .name(format!("fiber-worker-{}", worker_id))
                .spawn(move || Self::worker_loop(worker_id, &shared))
                .expect("Failed to spawn worker thread");
            workers.push(worker);
        }

        tracing::debug!(workers = num_workers, "scheduler started");

        Self {
            handle: Handle { shared },
            workers,
        }
    }

    /// Worker thread main loop.
    fn worker_loop(
        worker_id: usize,
        shared: &Arc<Shared>,
    ) {
        WORKER.with(|w| w.set(Some((shared.uid, worker_id))));
        let config = &shared.config;

        while shared.running.load(Ordering::Acquire) {
            // 1. Local queue
            if let Some(fiber) = shared.work_stealer.try_local(worker_id) {
                Self::run_turn(shared, &fiber);
                continue;
            }

            // 2. Injection queue
            if let Some(fiber) = shared.injector.pop_front() {
                Self::run_turn(shared, &fiber);
                continue;
            }

            // 3. Work stealing
            if config.use_work_stealing {
                let stolen = shared
                    .work_stealer
                    .steal_batch(worker_id, config.steal_batch);
                shared.stats.record_steal(stolen.len());
                if !stolen.is_empty() {
                    for fiber in stolen {
                        Self::run_turn(shared, &fiber);
                    }
                    continue;
                }
            }

            // 4. Park
            let mut guard = shared.idle_lock.lock();
            if shared.running.load(Ordering::Acquire) {
                shared.idle.wait_for(&mut guard, config.idle_timeout);
            }
        }

        WORKER.with(|w| w.set(None));
    }

    fn run_turn(
        shared: &Shared,
        fiber: &Arc<FiberRuntime>,
    ) {
        let turn = catch_unwind(AssertUnwindSafe(|| fiber.run_turn()));
        if turn.is_err() {
            tracing::error!(fiber = %fiber.id(), "fiber turn panicked outside its body");
        }
        shared.stats.record_turn();
    }

    #[inline]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    #[inline]
    pub fn stats(&self) -> &SchedulerStats {
        self.handle.stats()
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.handle.config().num_workers
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Interrupt every live fiber, wait up to `shutdown_timeout` for them to
    /// terminate, then stop and join the workers.
    ///
    /// Fibers that outlast the timeout are abandoned: their exit is published
    /// as an interruption without running them again.
    pub fn shutdown(&mut self) {
        self.wind_down();

        let shared = &self.handle.shared;
        {
            let _live = shared.live.lock();
            shared.running.store(false, Ordering::Release);
        }
        {
            let _guard = shared.idle_lock.lock();
            shared.idle.notify_all();
        }

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("fiber worker panicked");
            }
        }

        shared.injector.clear();
        shared.work_stealer.clear();

        let abandoned: Vec<_> = shared.live.lock().drain(..).map(|(_, f)| f).collect();
        if !abandoned.is_empty() {
            tracing::warn!(fibers = abandoned.len(), "abandoning fibers at shutdown");
        }
        for fiber in abandoned {
            fiber.abandon(FiberId::None);
        }
        tracing::debug!("scheduler stopped");
    }

    fn wind_down(&self) {
        let shared = &self.handle.shared;
        let deadline = Instant::now() + shared.config.shutdown_timeout;
        loop {
            let fibers: Vec<_> = shared.live.lock().values().cloned().collect();
            if fibers.is_empty() || Instant::now() >= deadline {
                return;
            }
            // Repeated each round so fibers forked meanwhile are caught too.
            for fiber in &fibers {
                fiber.interrupt_as(FiberId::None);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}
