//! Concurrent queues
//!
//! A [`Queue`] hands items from producer fibers to consumer fibers in FIFO
//! order. Consumers waiting on an empty queue and producers waiting on a
//! full back-pressured queue are parked as FIFO waiter lists, each waiter
//! holding a [`Deferred`] the queue completes when it is served.
//!
//! While the buffer holds items no taker waits, and while the buffer has
//! spare capacity no offer waits.

pub mod strategy;


pub use strategy::Strategy;

use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;

use self::strategy::Surplus;
use crate::runtime::cause::{Cause, Interrupted};
use crate::runtime::exit::Exit;
use crate::runtime::fiber::{context, FiberId};
use crate::runtime::sync::deferred::{Deferred, Wait};

type Signal = Deferred<Infallible, ()>;

/// A consumer parked on an empty queue.
struct Taker<A> {
    key: u64,
    slot: Arc<Mutex<Option<A>>>,
    signal: Signal,
}

/// A producer parked on a full queue with the items still to enqueue.
struct Putter<A> {
    key: u64,
    items: VecDeque<A>,
    signal: Signal,
}

struct State<A> {
    buffer: VecDeque<A>,
    takers: VecDeque<Taker<A>>,
    putters: VecDeque<Putter<A>>,
    shutdown: Option<FiberId>,
    next_key: u64,
}

impl<A> State<A> {
    fn next_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    /// Hand buffered items to waiting takers, oldest first.
    fn complete_takers(&mut self) {
        while !self.buffer.is_empty() {
            let Some(taker) = self.takers.pop_front() else {
                break;
            };
            if let Some(item) = self.buffer.pop_front() {
                deliver(taker, item);
            }
        }
    }

    /// Move waiting offer items into freed slots, one at a time and in
    /// arrival order, then serve takers.
    fn on_queue_empty_space(
        &mut self,
        capacity: usize,
    ) {
        while self.buffer.len() < capacity {
            let Some(putter) = self.putters.front_mut() else {
                break;
            };
            if let Some(item) = putter.items.pop_front() {
                self.buffer.push_back(item);
            }
            if putter.items.is_empty() {
                if let Some(putter) = self.putters.pop_front() {
                    putter.signal.succeed(());
                }
            }
        }
        self.complete_takers();
    }

    fn take_up_to(
        &mut self,
        max: usize,
        capacity: usize,
    ) -> Vec<A> {
        let n = max.min(self.buffer.len());
        let items: Vec<A> = self.buffer.drain(..n).collect();
        self.on_queue_empty_space(capacity);
        items
    }

    fn pending_offer_items(&self) -> usize {
        self.putters.iter().map(|p| p.items.len()).sum()
    }
}

fn deliver<A>(
    taker: Taker<A>,
    item: A,
) {
    *taker.slot.lock() = Some(item);
    taker.signal.succeed(());
}

/// The interruption carried by a failed waiter signal.
fn interrupted_from(cause: &Cause<Infallible>) -> Interrupted {
    Interrupted(FiberId::combine_all(cause.interruptors().iter()))
}

struct Shared<A> {
    capacity: usize,
    strategy: Strategy,
    state: Mutex<State<A>>,
    shutdown_hook: Signal,
}

/// A concurrent FIFO queue shared between fibers.
pub struct Queue<A> {
    shared: Arc<Shared<A>>,
}

impl<A> Clone for Queue<A> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<A> fmt::Debug for Queue<A> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Queue")
            .field("strategy", &self.shared.strategy)
            .field("capacity", &self.shared.capacity)
            .field("buffered", &state.buffer.len())
            .field("takers", &state.takers.len())
            .field("putters", &state.putters.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

enum Submitted {
    Done(bool),
    Suspended(u64, Signal),
}

impl<A: Send + 'static> Queue<A> {
    fn with_strategy(
        capacity: usize,
        strategy: Strategy,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity,
                strategy,
                state: Mutex::new(State {
                    buffer: VecDeque::new(),
                    takers: VecDeque::new(),
                    putters: VecDeque::new(),
                    shutdown: None,
                    next_key: 0,
                }),
                shutdown_hook: Deferred::new(),
            }),
        }
    }

    /// A queue that suspends producers while full.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self::with_strategy(capacity, Strategy::BackPressure)
    }

    /// A queue that discards new items while full.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn dropping(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self::with_strategy(capacity, Strategy::Dropping)
    }

    /// A queue that evicts its oldest items while full.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn sliding(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self::with_strategy(capacity, Strategy::Sliding)
    }

    /// A queue without a capacity limit; offers never suspend.
    pub fn unbounded() -> Self {
        Self::with_strategy(usize::MAX, Strategy::Unbounded)
    }

    /// Build a queue from a strategy; `capacity` is ignored for
    /// [`Strategy::Unbounded`].
    pub fn new(
        strategy: Strategy,
        capacity: usize,
    ) -> Self {
        match strategy {
            Strategy::BackPressure => Self::bounded(capacity),
            Strategy::Dropping => Self::dropping(capacity),
            Strategy::Sliding => Self::sliding(capacity),
            Strategy::Unbounded => Self::unbounded(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    #[inline]
    pub fn strategy(&self) -> Strategy {
        self.shared.strategy
    }

    /// Enqueue one item. See [`Queue::offer_all`].
    pub fn offer(
        &self,
        item: A,
    ) -> Offer<A> {
        self.offer_all([item])
    }

    /// Enqueue items in order.
    ///
    /// Waiting takers are served first. Resolves to `false` when a dropping
    /// queue discarded part of the items; a back-pressured queue suspends
    /// until every item is enqueued.
    pub fn offer_all(
        &self,
        items: impl IntoIterator<Item = A>,
    ) -> Offer<A> {
        Offer {
            queue: self.clone(),
            items: Some(items.into_iter().collect()),
            waiting: None,
        }
    }

    fn submit(
        &self,
        mut items: VecDeque<A>,
    ) -> Result<Submitted, Interrupted> {
        let capacity = self.shared.capacity;
        let mut state = self.shared.state.lock();
        if state.shutdown.is_some() {
            return Err(Interrupted(context::fiber_id()));
        }

        if state.buffer.is_empty() {
            while !items.is_empty() {
                let Some(taker) = state.takers.pop_front() else {
                    break;
                };
                if let Some(item) = items.pop_front() {
                    deliver(taker, item);
                }
            }
        }

        let space = capacity.saturating_sub(state.buffer.len());
        let fits = space.min(items.len());
        state.buffer.extend(items.drain(..fits));
        state.complete_takers();

        let surplus = self
            .shared
            .strategy
            .handle_surplus(&mut state.buffer, capacity, items);
        match surplus {
            Surplus::Accepted => Ok(Submitted::Done(true)),
            Surplus::Dropped => Ok(Submitted::Done(false)),
            Surplus::Suspend(items) => {
                let key = state.next_key();
                let signal = Signal::new();
                state.putters.push_back(Putter {
                    key,
                    items,
                    signal: signal.clone(),
                });
                Ok(Submitted::Suspended(key, signal))
            }
        }
    }

    fn remove_putter(
        &self,
        key: u64,
    ) -> bool {
        let mut state = self.shared.state.lock();
        match state.putters.iter().position(|p| p.key == key) {
            Some(index) => {
                state.putters.remove(index);
                true
            }
            None => false,
        }
    }

    fn remove_taker(
        &self,
        key: u64,
    ) -> bool {
        let mut state = self.shared.state.lock();
        match state.takers.iter().position(|t| t.key == key) {
            Some(index) => {
                state.takers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Dequeue the oldest item, suspending while the queue is empty.
    pub fn take(&self) -> Take<A> {
        Take {
            queue: self.clone(),
            waiting: None,
            started: false,
        }
    }

    /// Everything currently buffered. Never suspends.
    pub fn take_all(&self) -> Result<Vec<A>, Interrupted> {
        self.take_up_to(usize::MAX)
    }

    /// At most `max` buffered items. Never suspends.
    pub fn take_up_to(
        &self,
        max: usize,
    ) -> Result<Vec<A>, Interrupted> {
        let mut state = self.shared.state.lock();
        if state.shutdown.is_some() {
            return Err(Interrupted(context::fiber_id()));
        }
        Ok(state.take_up_to(max, self.shared.capacity))
    }

    /// At least `min` and at most `max` items, suspending until `min` are
    /// available. Empty when `max < min`.
    pub async fn take_between(
        &self,
        min: usize,
        max: usize,
    ) -> Result<Vec<A>, Interrupted> {
        let mut acc = Vec::new();
        let (mut min, mut max) = (min, max);
        loop {
            if max < min {
                return Ok(acc);
            }
            let batch = self.take_up_to(max)?;
            let taken = batch.len();
            acc.extend(batch);
            if taken >= min {
                return Ok(acc);
            }
            let remaining = min - taken;
            acc.push(self.take().await?);
            if remaining == 1 {
                return Ok(acc);
            }
            min = remaining - 1;
            max = max - taken - 1;
        }
    }

    /// Exactly `n` items, suspending until they are available.
    pub async fn take_n(
        &self,
        n: usize,
    ) -> Result<Vec<A>, Interrupted> {
        self.take_between(n, n).await
    }

    /// The oldest item, if any. Never suspends.
    pub fn poll(&self) -> Result<Option<A>, Interrupted> {
        Ok(self.take_up_to(1)?.into_iter().next())
    }

    /// Buffered plus pending offered items minus waiting takers.
    pub fn size(&self) -> Result<isize, Interrupted> {
        let state = self.shared.state.lock();
        if state.shutdown.is_some() {
            return Err(Interrupted(context::fiber_id()));
        }
        Ok(state.buffer.len() as isize + state.pending_offer_items() as isize
            - state.takers.len() as isize)
    }

    #[inline]
    pub fn is_empty(&self) -> Result<bool, Interrupted> {
        Ok(self.size()? <= 0)
    }

    /// Never true for an unbounded queue.
    #[inline]
    pub fn is_full(&self) -> Result<bool, Interrupted> {
        let size = self.size()?;
        Ok(isize::try_from(self.shared.capacity).is_ok_and(|capacity| size >= capacity))
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown.is_some()
    }

    /// Shut the queue down on behalf of the calling fiber.
    ///
    /// Waiting takers and offers fail with an interruption by the calling
    /// fiber, buffered items are discarded. Idempotent.
    pub fn shutdown(&self) {
        let fiber_id = context::fiber_id();
        let (takers, putters) = {
            let mut state = self.shared.state.lock();
            if state.shutdown.is_some() {
                return;
            }
            state.shutdown = Some(fiber_id.clone());
            state.buffer.clear();
            (
                std::mem::take(&mut state.takers),
                std::mem::take(&mut state.putters),
            )
        };

        tracing::debug!(
            by = %fiber_id,
            takers = takers.len(),
            offers = putters.len(),
            "queue shut down"
        );
        for taker in takers {
            taker.signal.interrupt_with(fiber_id.clone());
        }
        for putter in putters {
            putter.signal.interrupt_with(fiber_id.clone());
        }
        self.shared.shutdown_hook.succeed(());
    }

    /// Suspend until the queue is shut down.
    pub async fn await_shutdown(&self) -> Result<(), Interrupted> {
        self.shared.shutdown_hook.wait().await.map(|_| ())
    }
}

struct PendingOffer {
    key: u64,
    signal: Signal,
    wait: Wait<Infallible, ()>,
}

/// Future returned by [`Queue::offer`] and [`Queue::offer_all`].
#[must_use = "futures do nothing unless polled"]
pub struct Offer<A> {
    queue: Queue<A>,
    items: Option<VecDeque<A>>,
    waiting: Option<PendingOffer>,
}

impl<A> Unpin for Offer<A> {}

impl<A: Send + 'static> Future for Offer<A> {
    type Output = Result<bool, Interrupted>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(items) = this.items.take() {
            if context::poll_budget(cx).is_pending() {
                this.items = Some(items);
                return Poll::Pending;
            }
            if let Some(interrupted) = context::poll_interrupt() {
                return Poll::Ready(Err(interrupted));
            }
            match this.queue.submit(items)? {
                Submitted::Done(accepted) => return Poll::Ready(Ok(accepted)),
                Submitted::Suspended(key, signal) => {
                    let wait = signal.wait();
                    this.waiting = Some(PendingOffer { key, signal, wait });
                }
            }
        }

        let Some(pending) = this.waiting.as_mut() else {
            panic!("`Offer` polled after completion");
        };
        let outcome = match Pin::new(&mut pending.wait).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(exit)) => match &*exit {
                Exit::Success(()) => Ok(true),
                Exit::Failure(cause) => Err(interrupted_from(cause)),
            },
            Poll::Ready(Err(interrupted)) => {
                if this.queue.remove_putter(pending.key) {
                    Err(interrupted)
                } else {
                    match pending.signal.exit().as_deref() {
                        Some(Exit::Success(())) => Ok(true),
                        Some(Exit::Failure(cause)) => Err(interrupted_from(cause)),
                        None => Err(interrupted),
                    }
                }
            }
        };
        this.waiting = None;
        Poll::Ready(outcome)
    }
}

impl<A> Drop for Offer<A> {
    fn drop(&mut self) {
        if let Some(pending) = self.waiting.take() {
            let mut state = self.queue.shared.state.lock();
            if let Some(index) = state.putters.iter().position(|p| p.key == pending.key) {
                state.putters.remove(index);
            }
        }
    }
}

struct PendingTake<A> {
    key: u64,
    slot: Arc<Mutex<Option<A>>>,
    wait: Wait<Infallible, ()>,
}

/// Future returned by [`Queue::take`].
#[must_use = "futures do nothing unless polled"]
pub struct Take<A> {
    queue: Queue<A>,
    waiting: Option<PendingTake<A>>,
    started: bool,
}

impl<A> Unpin for Take<A> {}

impl<A: Send + 'static> Future for Take<A> {
    type Output = Result<A, Interrupted>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let this = self.get_mut();

        if !this.started {
            if context::poll_budget(cx).is_pending() {
                return Poll::Pending;
            }
            if let Some(interrupted) = context::poll_interrupt() {
                return Poll::Ready(Err(interrupted));
            }
            this.started = true;

            let capacity = this.queue.shared.capacity;
            let mut state = this.queue.shared.state.lock();
            if state.shutdown.is_some() {
                return Poll::Ready(Err(Interrupted(context::fiber_id())));
            }
            if let Some(item) = state.buffer.pop_front() {
                state.on_queue_empty_space(capacity);
                return Poll::Ready(Ok(item));
            }

            let key = state.next_key();
            let slot = Arc::new(Mutex::new(None));
            let signal = Signal::new();
            state.takers.push_back(Taker {
                key,
                slot: slot.clone(),
                signal: signal.clone(),
            });
            drop(state);
            this.waiting = Some(PendingTake {
                key,
                slot,
                wait: signal.wait(),
            });
        }

        let Some(pending) = this.waiting.as_mut() else {
            panic!("`Take` polled after completion");
        };
        let outcome = match Pin::new(&mut pending.wait).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(exit)) => match &*exit {
                Exit::Success(()) => pending
                    .slot
                    .lock()
                    .take()
                    .ok_or_else(|| Interrupted(context::fiber_id())),
                Exit::Failure(cause) => Err(interrupted_from(cause)),
            },
            Poll::Ready(Err(interrupted)) => {
                if this.queue.remove_taker(pending.key) {
                    Err(interrupted)
                } else {
                    // Served concurrently with the interruption.
                    pending.slot.lock().take().ok_or(interrupted)
                }
            }
        };
        this.waiting = None;
        Poll::Ready(outcome)
    }
}

impl<A> Drop for Take<A> {
    fn drop(&mut self) {
        let Some(pending) = self.waiting.take() else {
            return;
        };
        let mut state = self.queue.shared.state.lock();
        if let Some(index) = state.takers.iter().position(|t| t.key == pending.key) {
            state.takers.remove(index);
            return;
        }
        if let Some(item) = pending.slot.lock().take() {
            if state.shutdown.is_none() {
                state.buffer.push_front(item);
                state.complete_takers();
            }
        };
    }
}
