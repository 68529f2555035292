//! Time source for fiber identities.
//!
//! Fiber ids carry the millisecond at which the fiber was created. The
//! runtime reads it through [`Clock`] so tests can pin it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A millisecond clock.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds.
    fn now_millis(&self) -> u64;
}

/// Wall-clock anchored, monotonic clock.
///
/// The epoch offset is sampled once; later readings advance with
/// [`Instant`] so they never go backwards.
#[derive(Debug)]
pub struct SystemClock {
    anchor: Instant,
    epoch_millis: u64,
}

impl SystemClock {
    pub fn new() -> Self {
        let epoch_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            anchor: Instant::now(),
            epoch_millis,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now_millis(&self) -> u64 {
        self.epoch_millis + self.anchor.elapsed().as_millis() as u64
    }
}

/// Manually driven clock for tests.
#[derive(Debug, Default)]
pub struct TestClock {
    millis: AtomicU64,
}

impl TestClock {
    pub fn new(start: u64) -> Self {
        Self {
            millis: AtomicU64::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(
        &self,
        millis: u64,
    ) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    #[inline]
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Shared clock handle.
pub type ClockRef = Arc<dyn Clock>;
