//! Queue behaviour across fibers
//!
//! Strategies, back pressure, waiting takers, shutdown and the batch
//! operations, driven from a single worker so fibers start in fork order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use yaoxiang_fiber::runtime::fiber::{fiber_id, fork, fork_all, join_all, yield_now};
use yaoxiang_fiber::runtime::sync::{Deferred, Queue};
use yaoxiang_fiber::runtime::{Cause, Interrupted};

use crate::support::{run, wait_for_size, Res};

fn take_fiber(queue: &Queue<u32>) -> yaoxiang_fiber::Fiber<String, u32> {
    let queue = queue.clone();
    fork(async move { Ok::<_, Cause<String>>(queue.take().await?) })
}

fn offer_fiber(
    queue: &Queue<u32>,
    items: Vec<u32>,
) -> yaoxiang_fiber::Fiber<String, bool> {
    let queue = queue.clone();
    fork(async move { Ok::<_, Cause<String>>(queue.offer_all(items).await?) })
}

async fn offer_forever(
    queue: Queue<u32>,
    yielding: bool,
) -> Res<()> {
    loop {
        queue.offer(10).await?;
        if yielding {
            yield_now().await?;
        }
    }
}

async fn take_forever(queue: Queue<u32>) -> Res<()> {
    loop {
        queue.take().await?;
    }
}

#[test]
fn test_bounded_offer_all_with_space() {
    let accepted = run(async {
        let queue = Queue::bounded(5);
        Ok::<_, Cause<String>>(queue.offer_all([1u32, 2, 3]).await?)
    });
    assert!(accepted);
}

#[test]
fn test_dropping_offer_all() {
    let (accepted, items) = run(async {
        let queue = Queue::dropping(4);
        let accepted = queue.offer_all([1u32, 2, 3, 4, 5]).await?;
        Ok::<_, Cause<String>>((accepted, queue.take_all()?))
    });
    assert!(!accepted);
    assert_eq!(items, vec![1, 2, 3, 4]);
}

#[test]
fn test_dropping_keeps_first_items() {
    let (accepted, items) = run(async {
        let queue = Queue::dropping(128);
        let accepted = queue.offer_all(1u32..=256).await?;
        Ok::<_, Cause<String>>((accepted, queue.take_all()?))
    });
    assert!(!accepted);
    assert_eq!(items, (1..=128).collect::<Vec<_>>());
}

#[test]
fn test_dropping_with_pending_taker() {
    let (accepted, taken) = run(async {
        let queue = Queue::dropping(2);
        let taker = take_fiber(&queue);
        wait_for_size(&queue, -1).await?;
        let accepted = queue.offer_all([1, 2, 3, 4]).await?;
        Ok::<_, Cause<String>>((accepted, taker.join().await?))
    });
    assert!(!accepted);
    assert_eq!(taken, 1);
}

#[test]
fn test_sliding_offer() {
    let (second, third, items) = run(async {
        let queue = Queue::sliding(2);
        queue.offer(1u32).await?;
        let second = queue.offer(2).await?;
        let third = queue.offer(3).await?;
        Ok::<_, Cause<String>>((second, third, queue.take_all()?))
    });
    assert!(second && third);
    assert_eq!(items, vec![2, 3]);
}

#[test]
fn test_sliding_offer_all() {
    let (accepted, size, items) = run(async {
        let queue = Queue::sliding(2);
        let accepted = queue.offer_all([1u32, 2, 3, 4, 5, 6]).await?;
        let size = queue.size()?;
        Ok::<_, Cause<String>>((accepted, size, queue.take_all()?))
    });
    assert!(accepted);
    assert_eq!(size, 2);
    assert_eq!(items, vec![5, 6]);
}

#[test]
fn test_sliding_with_enough_capacity() {
    let items = run(async {
        let queue = Queue::sliding(100);
        for i in 1u32..=3 {
            queue.offer(i).await?;
        }
        Ok::<_, Cause<String>>(queue.take_all()?)
    });
    assert_eq!(items, vec![1, 2, 3]);
}

#[test]
fn test_sliding_with_pending_taker() {
    let (accepted, next) = run(async {
        let queue = Queue::sliding(2);
        let _taker = take_fiber(&queue);
        wait_for_size(&queue, -1).await?;
        let accepted = queue.offer_all([1, 2, 3, 4]).await?;
        Ok::<_, Cause<String>>((accepted, queue.take().await?))
    });
    assert!(accepted);
    assert_eq!(next, 3);
}

#[test]
fn test_await_shutdown_wakes_every_waiter() {
    let (first, second) = run(async {
        let queue = Queue::<u32>::bounded(3);
        let done = [Deferred::<String, bool>::new(), Deferred::new()];
        for deferred in &done {
            let (queue, deferred) = (queue.clone(), deferred.clone());
            fork(async move {
                queue.await_shutdown().await?;
                deferred.succeed(true);
                Ok::<_, Cause<String>>(())
            });
        }
        yield_now().await?;
        queue.shutdown();
        Ok::<_, Cause<String>>((done[0].await_().await?, done[1].await_().await?))
    });
    assert!(first && second);
}

#[test]
fn test_offers_suspended_by_back_pressure() {
    let still_waiting = run(async {
        let queue = Queue::bounded(10);
        for _ in 0..10 {
            queue.offer(1u32).await?;
        }
        let flag = Arc::new(AtomicBool::new(true));
        let (producer, done) = (queue.clone(), flag.clone());
        let fiber = fork(async move {
            producer.offer(2).await?;
            done.store(false, Ordering::SeqCst);
            Ok::<_, Cause<String>>(())
        });
        wait_for_size(&queue, 11).await?;
        let still_waiting = flag.load(Ordering::SeqCst);
        fiber.interrupt().await;
        Ok::<_, Cause<String>>(still_waiting)
    });
    assert!(still_waiting);
}

#[test]
fn test_back_pressured_offers_are_retrieved_in_order() {
    let values = run(async {
        let queue = Queue::bounded(5);
        let producers: Vec<_> = (1u32..=10).map(|n| offer_fiber(&queue, vec![n])).collect();
        wait_for_size(&queue, 10).await?;
        let mut values = Vec::new();
        for _ in 0..10 {
            values.push(queue.take().await?);
        }
        join_all(&producers).await?;
        Ok::<_, Cause<String>>(values)
    });
    assert_eq!(values, (1..=10).collect::<Vec<_>>());
}

#[test]
fn test_back_pressured_offer_completes_after_take() {
    let (first, second, rest) = run(async {
        let queue = Queue::bounded(2);
        queue.offer_all([1u32, 2]).await?;
        let producer = offer_fiber(&queue, vec![3]);
        wait_for_size(&queue, 3).await?;
        let first = queue.take().await?;
        let second = queue.take().await?;
        producer.join().await?;
        Ok::<_, Cause<String>>((first, second, queue.take_all()?))
    });
    assert_eq!((first, second), (1, 2));
    assert_eq!(rest, vec![3]);
}

#[test]
fn test_back_pressured_offer_all_completes_after_take_all() {
    let batches = run(async {
        let queue = Queue::bounded(2);
        queue.offer_all([1u32, 2]).await?;
        let producer = offer_fiber(&queue, vec![3, 4, 5]);
        wait_for_size(&queue, 5).await?;
        let batches = vec![queue.take_all()?, queue.take_all()?, queue.take_all()?];
        producer.join().await?;
        Ok::<_, Cause<String>>(batches)
    });
    assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
}

#[test]
fn test_back_pressured_offer_completes_after_take_up_to() {
    let items = run(async {
        let queue = Queue::bounded(2);
        queue.offer_all([1u32, 2]).await?;
        let producer = offer_fiber(&queue, vec![3]);
        wait_for_size(&queue, 3).await?;
        let items = queue.take_up_to(2)?;
        producer.join().await?;
        Ok::<_, Cause<String>>(items)
    });
    assert_eq!(items, vec![1, 2]);
}

#[test]
fn test_take_interruption() {
    let size = run(async {
        let queue = Queue::bounded(100);
        let taker = take_fiber(&queue);
        wait_for_size(&queue, -1).await?;
        assert!(taker.interrupt().await.is_interrupted());
        Ok::<_, Cause<String>>(queue.size()?)
    });
    assert_eq!(size, 0);
}

#[test]
fn test_offer_interruption() {
    let size = run(async {
        let queue = Queue::bounded(2);
        queue.offer(1u32).await?;
        queue.offer(1).await?;
        let producer = offer_fiber(&queue, vec![1]);
        wait_for_size(&queue, 3).await?;
        producer.interrupt().await;
        Ok::<_, Cause<String>>(queue.size()?)
    });
    assert_eq!(size, 2);
}

#[test]
fn test_interrupted_offer_all_keeps_moved_items_only() {
    let (first, second) = run(async {
        let queue = Queue::bounded(2);
        queue.offer_all([1u32, 2]).await?;
        let producer = offer_fiber(&queue, vec![3, 4]);
        wait_for_size(&queue, 4).await?;
        producer.interrupt().await;
        Ok::<_, Cause<String>>((queue.take_all()?, queue.take_all()?))
    });
    assert_eq!(first, vec![1, 2]);
    assert!(second.is_empty());
}

#[test]
fn test_offer_all_back_pressure_keeps_order() {
    let items = run(async {
        let queue = Queue::bounded(64);
        let producer = offer_fiber(&queue, (1..=128).collect());
        wait_for_size(&queue, 128).await?;
        let items = queue.take_all()?;
        producer.interrupt().await;
        Ok::<_, Cause<String>>(items)
    });
    assert_eq!(items, (1..=64).collect::<Vec<_>>());
}

#[test]
fn test_offer_all_serves_pending_takers() {
    let (values, size) = run(async {
        let queue = Queue::bounded(50);
        let takers: Vec<_> = (0..100).map(|_| take_fiber(&queue)).collect();
        wait_for_size(&queue, -100).await?;
        queue.offer_all(1u32..=100).await?;
        let values = join_all(&takers).await?;
        Ok::<_, Cause<String>>((values, queue.size()?))
    });
    assert_eq!(values, (1..=100).collect::<Vec<_>>());
    assert_eq!(size, 0);
}

#[test]
fn test_offer_all_fills_buffer_after_takers() {
    let (values, size) = run(async {
        let queue = Queue::bounded(256);
        let takers: Vec<_> = (0..64).map(|_| take_fiber(&queue)).collect();
        wait_for_size(&queue, -64).await?;
        queue.offer_all(1u32..=128).await?;
        let values = join_all(&takers).await?;
        Ok::<_, Cause<String>>((values, queue.size()?))
    });
    assert_eq!(values, (1..=64).collect::<Vec<_>>());
    assert_eq!(size, 64);
}

#[test]
fn test_takers_resolve_in_arrival_order() {
    let (values, size) = run(async {
        let queue = Queue::bounded(200);
        let first: Vec<_> = (0..100).map(|_| take_fiber(&queue)).collect();
        wait_for_size(&queue, -100).await?;
        let second: Vec<_> = (0..100).map(|_| take_fiber(&queue)).collect();
        wait_for_size(&queue, -200).await?;
        queue.offer_all(1u32..=100).await?;
        let values = join_all(&first).await?;
        let size = queue.size()?;
        for fiber in &second {
            fiber.interrupt().await;
        }
        Ok::<_, Cause<String>>((values, size))
    });
    assert_eq!(values, (1..=100).collect::<Vec<_>>());
    assert_eq!(size, -100);
}

#[test]
fn test_multiple_back_pressured_offer_alls() {
    let values = run(async {
        let queue = Queue::bounded(2);
        offer_fiber(&queue, vec![1, 2, 3]);
        wait_for_size(&queue, 3).await?;
        offer_fiber(&queue, vec![4, 5]);
        wait_for_size(&queue, 5).await?;
        let mut values = Vec::new();
        for _ in 0..5 {
            values.push(queue.take().await?);
        }
        Ok::<_, Cause<String>>(values)
    });
    assert_eq!(values, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_offer_offer_all_take_take_all() {
    let (batch, tail) = run(async {
        let queue = Queue::bounded(32);
        queue.offer(1u32).await?;
        queue.offer(2).await?;
        offer_fiber(&queue, (3..=35).collect());
        wait_for_size(&queue, 35).await?;
        let batch = queue.take_all()?;
        let tail = vec![queue.take().await?, queue.take().await?, queue.take().await?];
        Ok::<_, Cause<String>>((batch, tail))
    });
    assert_eq!(batch, (1..=32).collect::<Vec<_>>());
    assert_eq!(tail, vec![33, 34, 35]);
}

#[test]
fn test_parallel_takes_and_sequential_offers() {
    let values = run(async {
        let queue = Queue::bounded(100);
        let takers: Vec<_> = (0..10).map(|_| take_fiber(&queue)).collect();
        for i in 1..=10 {
            queue.offer(i).await?;
        }
        join_all(&takers).await
    });
    assert_eq!(values, (1..=10).collect::<Vec<_>>());
}

#[test]
fn test_sequential_take_and_offer() {
    let joined = run(async {
        let queue = Queue::<String>::bounded(100);
        let consumer = queue.clone();
        let fiber = fork(async move {
            let a = consumer.take().await?;
            let b = consumer.take().await?;
            Ok::<_, Cause<String>>(a + &b)
        });
        queue.offer("don't ".to_string()).await?;
        queue.offer("give up :D".to_string()).await?;
        fiber.join().await
    });
    assert_eq!(joined, "don't give up :D");
}

#[test]
fn test_polls() {
    let polls = run(async {
        let queue = Queue::bounded(5);
        let empty = queue.poll()?;
        queue.offer_all([1u32, 2]).await?;
        let polls = vec![empty, queue.poll()?, queue.poll()?, queue.poll()?];
        Ok::<_, Cause<String>>(polls)
    });
    assert_eq!(polls, vec![None, Some(1), Some(2), None]);
}

#[test]
fn test_shutdown_interrupts_waiting_taker() {
    let (result, me) = run(async {
        let queue = Queue::bounded(3);
        let taker = take_fiber(&queue);
        wait_for_size(&queue, -1).await?;
        queue.shutdown();
        Ok::<_, Cause<String>>((taker.join().await, fiber_id()))
    });
    assert_eq!(result, Err(Cause::interrupt(me)));
}

#[test]
fn test_shutdown_interrupts_waiting_offer() {
    let (result, me) = run(async {
        let queue = Queue::bounded(2);
        queue.offer_all([1u32, 1]).await?;
        let producer = offer_fiber(&queue, vec![1]);
        wait_for_size(&queue, 3).await?;
        queue.shutdown();
        Ok::<_, Cause<String>>((producer.join().await, fiber_id()))
    });
    assert_eq!(result, Err(Cause::interrupt(me)));
}

#[test]
fn test_operations_after_shutdown_fail() {
    let (offer, take, take_all, take_up_to, size, me) = run(async {
        let queue = Queue::<u32>::bounded(1);
        queue.shutdown();
        Ok::<_, Cause<String>>((
            queue.offer(1).await,
            queue.take().await,
            queue.take_all(),
            queue.take_up_to(1),
            queue.size(),
            fiber_id(),
        ))
    });
    let interrupted = Interrupted(me);
    assert_eq!(offer, Err(interrupted.clone()));
    assert_eq!(take, Err(interrupted.clone()));
    assert_eq!(take_all, Err(interrupted.clone()));
    assert_eq!(take_up_to, Err(interrupted.clone()));
    assert_eq!(size, Err(interrupted));
}

#[test]
fn test_shutdown_races_with_offer_loop() {
    let failed = run(async {
        let queue = Queue::bounded(2);
        let fiber = fork(offer_forever(queue.clone(), false));
        queue.shutdown();
        Ok::<_, Cause<String>>(fiber.await_exit().await?.is_failure())
    });
    assert!(failed);
}

#[test]
fn test_shutdown_races_with_take_loop() {
    let failed = run(async {
        let queue = Queue::bounded(2);
        queue.offer_all([1u32, 1]).await?;
        let fiber = fork(take_forever(queue.clone()));
        queue.shutdown();
        Ok::<_, Cause<String>>(fiber.await_exit().await?.is_failure())
    });
    assert!(failed);
}

#[test]
fn test_is_shutdown() {
    let states = run(async {
        let queue = Queue::bounded(5);
        let mut states = vec![queue.is_shutdown()];
        queue.offer(1u32).await?;
        states.push(queue.is_shutdown());
        queue.take_all()?;
        states.push(queue.is_shutdown());
        queue.shutdown();
        states.push(queue.is_shutdown());
        Ok::<_, Cause<String>>(states)
    });
    assert_eq!(states, vec![false, false, false, true]);
}

#[test]
fn test_take_all_does_not_return_pending_offers() {
    let (batch, next) = run(async {
        let queue = Queue::bounded(4);
        for i in 1u32..=4 {
            queue.offer(i).await?;
        }
        offer_fiber(&queue, vec![5]);
        wait_for_size(&queue, 5).await?;
        let batch = queue.take_up_to(5)?;
        Ok::<_, Cause<String>>((batch, queue.take().await?))
    });
    assert_eq!(batch, vec![1, 2, 3, 4]);
    assert_eq!(next, 5);
}

#[test]
fn test_take_all_from_empty_queue() {
    let (first, second) = run(async {
        let queue = Queue::unbounded();
        let first = queue.take_all()?;
        queue.offer(1u32).await?;
        queue.take().await?;
        Ok::<_, Cause<String>>((first, queue.take_all()?))
    });
    assert!(first.is_empty());
    assert!(second.is_empty());
}

#[test]
fn test_take_between() {
    let (ready, inverted) = run(async {
        let queue = Queue::bounded(100);
        queue.offer_all([1u32, 2, 3]).await?;
        let ready = queue.take_between(2, 5).await?;
        queue.offer_all([1, 2, 3]).await?;
        Ok::<_, Cause<String>>((ready, queue.take_between(5, 2).await?))
    });
    assert_eq!(ready, vec![1, 2, 3]);
    assert!(inverted.is_empty());
}

#[test]
fn test_take_between_waits_for_minimum() {
    let taken = run(async {
        let queue = Queue::bounded(100);
        let updater = fork(offer_forever(queue.clone(), true));
        let taken = queue.take_between(5, 10).await?;
        updater.interrupt().await;
        Ok::<_, Cause<String>>(taken)
    });
    assert!(taken.len() >= 5 && taken.len() <= 10);
}

#[test]
fn test_take_between_keeps_order() {
    let values = run(async {
        let queue = Queue::bounded(100);
        let producer = queue.clone();
        let fiber = fork(async move {
            for n in [10u32, 7, 4, 1, 5, 12] {
                producer.offer(n).await?;
                yield_now().await?;
            }
            Ok::<_, Cause<String>>(())
        });
        let values = queue.take_between(6, 6).await?;
        fiber.join().await?;
        Ok::<_, Cause<String>>(values)
    });
    assert_eq!(values, vec![10, 7, 4, 1, 5, 12]);
}

#[test]
fn test_take_n() {
    let (three, none) = run(async {
        let queue = Queue::bounded(100);
        queue.offer_all([1u32, 2, 3, 4, 5]).await?;
        Ok::<_, Cause<String>>((queue.take_n(3).await?, queue.take_n(0).await?))
    });
    assert_eq!(three, vec![1, 2, 3]);
    assert!(none.is_empty());
}

#[test]
fn test_take_n_waits_for_all_items() {
    let taken = run(async {
        let queue = Queue::bounded(100);
        let producers = fork_all((0..5u32).map(|n| {
            let queue = queue.clone();
            async move {
                yield_now().await?;
                Ok::<_, Cause<String>>(queue.offer(n).await?)
            }
        }));
        let taken = queue.take_n(5).await?;
        join_all(&producers).await?;
        Ok::<_, Cause<String>>(taken)
    });
    assert_eq!(taken.len(), 5);
}

#[test]
fn test_take_up_to() {
    let batches = run(async {
        let queue = Queue::bounded(100);
        let empty = queue.take_up_to(2)?;
        queue.offer_all([1u32, 2, 3, 4]).await?;
        let zero = queue.take_up_to(0)?;
        let two = queue.take_up_to(2)?;
        let rest = queue.take_up_to(10)?;
        queue.offer(5).await?;
        let unlimited = queue.take_up_to(usize::MAX)?;
        Ok::<_, Cause<String>>(vec![empty, zero, two, rest, unlimited])
    });
    assert_eq!(
        batches,
        vec![vec![], vec![], vec![1, 2], vec![3, 4], vec![5]]
    );
}

#[test]
fn test_unbounded_ordering_and_zero_values() {
    let values = run(async {
        let queue = Queue::unbounded();
        for i in [0u32, 1, 2, 3] {
            queue.offer(i).await?;
        }
        let mut values = Vec::new();
        for _ in 0..4 {
            values.push(queue.take().await?);
        }
        Ok::<_, Cause<String>>(values)
    });
    assert_eq!(values, vec![0, 1, 2, 3]);
}

#[test]
fn test_interrupted_taker_does_not_lose_items() {
    let (values, rest) = run(async {
        let queue = Queue::bounded(8);
        let lost = take_fiber(&queue);
        let kept = take_fiber(&queue);
        wait_for_size(&queue, -2).await?;
        lost.interrupt().await;
        queue.offer_all([1u32, 2]).await?;
        let value = kept.join().await?;
        Ok::<_, Cause<String>>((vec![value], queue.take_all()?))
    });
    assert_eq!(values, vec![1]);
    assert_eq!(rest, vec![2]);
}

fn assert_send<T: Send>(_: &T) {}

#[test]
fn test_queue_futures_are_send() {
    let queue = Queue::<u32>::bounded(1);
    assert_send(&queue.offer(1));
    assert_send(&queue.take());
}
