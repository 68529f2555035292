//! Shared helpers for the integration tests

use std::future::Future;

use yaoxiang_fiber::runtime::fiber::yield_now;
use yaoxiang_fiber::runtime::sync::Queue;
use yaoxiang_fiber::runtime::{Cause, Runtime, SchedulerConfig};

pub type Res<A> = Result<A, Cause<String>>;

pub fn runtime(num_workers: usize) -> Runtime {
    Runtime::with_config(SchedulerConfig {
        num_workers,
        ..SchedulerConfig::default()
    })
}

/// Run `future` as a root fiber on a single worker, so forked fibers start
/// in the order they were forked.
pub fn run<F, A>(future: F) -> A
where
    F: Future<Output = Res<A>> + Send + 'static,
    A: Clone + Send + Sync + 'static,
{
    run_on(1, future)
}

pub fn run_on<F, A>(
    num_workers: usize,
    future: F,
) -> A
where
    F: Future<Output = Res<A>> + Send + 'static,
    A: Clone + Send + Sync + 'static,
{
    runtime(num_workers)
        .run(future)
        .unwrap_or_else(|cause| panic!("root fiber failed: {}", cause))
}

/// Yield until the queue reports `size`.
pub async fn wait_for_size<A: Send + 'static>(
    queue: &Queue<A>,
    size: isize,
) -> Res<isize> {
    loop {
        let current = queue.size()?;
        if current == size {
            return Ok(current);
        }
        yield_now().await?;
    }
}
