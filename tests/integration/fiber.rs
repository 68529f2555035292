//! Fiber trees, interruption and scheduling across workers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use yaoxiang_fiber::runtime::fiber::{fork, fork_all, join_all, yield_now, Fiber};
use yaoxiang_fiber::runtime::sync::Deferred;
use yaoxiang_fiber::runtime::{Cause, SchedulerConfig};
use yaoxiang_fiber::Runtime;

use crate::support::{run_on, runtime, Res};

async fn spin() -> Res<()> {
    loop {
        yield_now().await?;
    }
}

/// Fork a chain `depth` deep; every fiber spins until interrupted and
/// reports its start through `started`.
fn chain(
    depth: usize,
    started: Arc<AtomicUsize>,
) -> Fiber<String, ()> {
    fork(async move {
        started.fetch_add(1, Ordering::SeqCst);
        if depth > 1 {
            chain(depth - 1, started.clone());
        }
        spin().await
    })
}

#[test]
fn test_interrupt_winds_down_a_deep_tree() {
    let (started, exit) = run_on(4, async {
        let started = Arc::new(AtomicUsize::new(0));
        let root = chain(16, started.clone());
        while started.load(Ordering::SeqCst) < 16 {
            yield_now().await?;
        }
        let exit = root.interrupt().await;
        Ok::<_, Cause<String>>((started.load(Ordering::SeqCst), exit))
    });
    assert_eq!(started, 16);
    assert!(exit.is_interrupted());
}

#[test]
fn test_child_panic_surfaces_as_defect() {
    let result = runtime(2).run(async {
        let child: Fiber<String, ()> = fork(async {
            yield_now().await?;
            let v: Vec<u8> = Vec::new();
            let _ = v[1];
            Ok::<(), Cause<String>>(())
        });
        child.join().await
    });
    let cause = result.unwrap_err();
    assert!(cause.is_die());
    assert!(cause.defects()[0].message().contains("index out of bounds"));
}

#[test]
fn test_sibling_failure_does_not_stop_others() {
    let (failed, ok) = run_on(2, async {
        let bad = fork(async { Err::<u32, _>(Cause::fail("bad".to_string())) });
        let good = fork(async {
            yield_now().await?;
            Ok::<_, Cause<String>>(5u32)
        });
        Ok::<_, Cause<String>>((bad.join().await, good.join().await?))
    });
    assert_eq!(failed, Err(Cause::fail("bad".to_string())));
    assert_eq!(ok, 5);
}

#[test]
fn test_many_fibers_across_workers() {
    let rt = Runtime::with_config(SchedulerConfig {
        num_workers: 4,
        ops_per_turn: 8,
        ..SchedulerConfig::default()
    });
    let total = rt.run(async {
        let fibers = fork_all((0..500u64).map(|i| async move {
            for _ in 0..3 {
                yield_now().await?;
            }
            Ok::<_, Cause<String>>(i)
        }));
        let values = join_all(&fibers).await?;
        Ok::<_, Cause<String>>(values.into_iter().sum::<u64>())
    });
    assert_eq!(total, Ok((0..500u64).sum()));

    let stats = rt.stats().snapshot();
    assert!(stats.fibers_forked >= 501);
    assert!(stats.turns >= 501 * 2);
}

#[test]
fn test_two_runtimes_side_by_side() {
    let a = runtime(1);
    let b = runtime(1);
    let ia = a.fork_daemon(async { Ok::<_, Cause<()>>(1) });
    let ib = b.fork_daemon(async { Ok::<_, Cause<()>>(2) });
    assert_ne!(ia.id(), ib.id());
    assert_eq!(ia.wait_blocking().into_result(), Ok(1));
    assert_eq!(ib.wait_blocking().into_result(), Ok(2));
}

#[test]
fn test_completion_from_plain_thread_wakes_fiber() {
    let rt = runtime(2);
    let deferred = Deferred::<String, u32>::new();
    let waiting = deferred.clone();
    let fiber = rt.fork_daemon(async move { waiting.await_().await });

    std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(5));
        deferred.succeed(99);
    })
    .join()
    .unwrap();

    assert_eq!(fiber.wait_blocking().into_result(), Ok(99));
}

#[test]
fn test_interrupt_daemon_from_outside() {
    let rt = runtime(2);
    let fiber = rt.fork_daemon(spin());
    fiber.interrupt_fork();
    let exit = fiber.wait_blocking();
    assert!(exit.is_interrupted());
    assert!(fiber.interruptors().iter().all(|id| id.is_none()));
}
