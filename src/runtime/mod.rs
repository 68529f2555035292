//! Runtime system
//!
//! This module contains the fiber runtime: fibers and their scopes, the
//! scheduler driving them, and the synchronization primitives built on top.

pub mod cause;
pub mod clock;
pub mod error;
pub mod exit;
pub mod fiber;
pub mod scheduler;
pub mod sync;


use std::future::Future;

pub use cause::{Cause, Defect, Interrupted};
pub use error::FiberError;
pub use exit::Exit;
pub use fiber::{Fiber, FiberId, FiberScope, RuntimeFlags};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats};

use crate::util::config::RuntimeConfig;

/// Owns a scheduler and runs fibers on it from ordinary threads.
#[derive(Debug)]
pub struct Runtime {
    scheduler: Scheduler,
}

impl Runtime {
    /// Create a runtime with the default scheduler configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            scheduler: Scheduler::with_config(config),
        }
    }

    /// Create a runtime from a loaded configuration file.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::with_config(config.scheduler_config())
    }

    #[inline]
    pub fn handle(&self) -> &scheduler::Handle {
        self.scheduler.handle()
    }

    #[inline]
    pub fn stats(&self) -> &SchedulerStats {
        self.scheduler.stats()
    }

    /// Fork `future` as a root fiber in the global scope.
    pub fn fork_daemon<F, E, A>(
        &self,
        future: F,
    ) -> Fiber<E, A>
    where
        F: Future<Output = Result<A, Cause<E>>> + Send + 'static,
        E: Send + Sync + 'static,
        A: Send + Sync + 'static,
    {
        fiber::handle::spawn_in(
            self.scheduler.handle(),
            RuntimeFlags::default(),
            &FiberScope::global(),
            future,
        )
    }

    /// Run `future` in a root fiber and block the calling thread until it
    /// exits.
    ///
    /// Must not be called from inside a fiber.
    pub fn block_on<F, E, A>(
        &self,
        future: F,
    ) -> Exit<E, A>
    where
        F: Future<Output = Result<A, Cause<E>>> + Send + 'static,
        E: Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
    {
        debug_assert!(
            fiber::current_fiber().is_none(),
            "Runtime::block_on called from inside a fiber"
        );
        self.fork_daemon(future).wait_blocking()
    }

    /// Like [`Runtime::block_on`], returning the result.
    pub fn run<F, E, A>(
        &self,
        future: F,
    ) -> Result<A, Cause<E>>
    where
        F: Future<Output = Result<A, Cause<E>>> + Send + 'static,
        E: Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
    {
        self.block_on(future).into_result()
    }

    /// Interrupt every fiber still running, wait for them to terminate and
    /// stop the worker threads.
    ///
    /// Fibers that do not terminate within
    /// [`SchedulerConfig::shutdown_timeout`] exit as interrupted without
    /// running again.
    pub fn shutdown(mut self) {
        self.scheduler.shutdown();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
