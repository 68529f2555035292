//! Scheduler 单元测试
//!
//! 测试调度器的配置、统计和 fiber 执行


use crate::runtime::fiber::{FiberRuntime, RuntimeFlags};
use crate::runtime::scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
use crate::runtime::Runtime;
use std::sync::Arc;
use std::time::Duration;

pub(super) fn small_config(num_workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        num_workers,
        ..SchedulerConfig::default()
    }
}

/// A fiber with no future, for queue bookkeeping tests.
pub(super) fn idle_fiber(scheduler: &Scheduler) -> Arc<FiberRuntime> {
    let handle = scheduler.handle();
    FiberRuntime::new(handle.next_fiber_id(), RuntimeFlags::default(), handle.clone())
}

#[cfg(test)]
mod scheduler_config_tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert!(config.num_workers > 0);
        assert_eq!(config.ops_per_turn, 2048);
        assert_eq!(config.steal_batch, 4);
        assert!(config.use_work_stealing);
        assert_eq!(config.idle_timeout, Duration::from_millis(1));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let scheduler = Scheduler::with_config(SchedulerConfig {
            num_workers: 0,
            ops_per_turn: 0,
            ..SchedulerConfig::default()
        });
        assert_eq!(scheduler.num_workers(), 1);
        assert_eq!(scheduler.handle().config().ops_per_turn, 1);
    }
}

#[cfg(test)]
mod scheduler_stats_tests {
    use super::*;

    #[test]
    fn test_steal_success_rate() {
        let stats = SchedulerStats::default();
        assert_eq!(stats.steal_success_rate(), 1.0);

        stats.record_steal(3);
        stats.record_steal(0);
        assert_eq!(stats.steal_success_rate(), 0.5);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.steal_attempts, 2);
        assert_eq!(snapshot.fibers_stolen, 3);
    }

    #[test]
    fn test_record_counters() {
        let stats = SchedulerStats::default();
        stats.record_forked();
        stats.record_forked();
        stats.record_completed();
        stats.record_turn();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.fibers_forked, 2);
        assert_eq!(snapshot.fibers_completed, 1);
        assert_eq!(snapshot.turns, 1);
    }
}

#[cfg(test)]
mod scheduler_tests {
    use super::*;

    #[test]
    fn test_scheduler_creation() {
        let scheduler = Scheduler::with_config(small_config(2));
        assert!(scheduler.is_running());
        assert_eq!(scheduler.num_workers(), 2);
        assert_eq!(scheduler.handle().queued(), 0);
    }

    #[test]
    fn test_scheduler_shutdown() {
        let mut scheduler = Scheduler::with_config(small_config(2));
        assert!(scheduler.is_running());

        scheduler.shutdown();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_schedule_after_shutdown_is_dropped() {
        let mut scheduler = Scheduler::with_config(small_config(1));
        let fiber = idle_fiber(&scheduler);
        scheduler.shutdown();

        fiber.schedule();
        assert_eq!(scheduler.handle().queued(), 0);
    }

    #[test]
    fn test_fiber_ids_are_unique_across_schedulers() {
        let a = Scheduler::with_config(small_config(1));
        let b = Scheduler::with_config(small_config(1));
        let x = a.handle().next_fiber_id();
        let y = b.handle().next_fiber_id();
        assert_ne!(x, y);
    }

    #[test]
    fn test_many_fibers_complete() {
        let runtime = Runtime::with_config(small_config(4));
        let fibers: Vec<_> = (0..64u64)
            .map(|i| {
                runtime.fork_daemon(async move {
                    crate::runtime::fiber::yield_now().await?;
                    Ok::<u64, crate::runtime::Cause<()>>(i * 2)
                })
            })
            .collect();

        let total: u64 = fibers
            .iter()
            .map(|f| f.wait_blocking().into_result().unwrap())
            .sum();
        assert_eq!(total, (0..64u64).map(|i| i * 2).sum::<u64>());

        let stats = runtime.stats().snapshot();
        assert!(stats.fibers_forked >= 64);
        assert!(stats.fibers_completed >= 64);
        assert!(stats.turns >= 64);
    }
}
