//! The scheduled unit behind a [`Fiber`](super::Fiber) handle.
//!
//! A `FiberRuntime` owns a type-erased future and everything the scheduler
//! needs to drive it: a status, runtime flags, a mailbox, the children
//! registered in its scope and the fibers that asked it to stop.
//!
//! Children are only touched while the fiber processes its own mailbox, so
//! registration and removal requests coming from other fibers are ordered by
//! the mailbox.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use crossbeam::queue::SegQueue;
use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context;
use super::{FiberId, FiberMessage, FiberScope, RuntimeFlags};
use crate::runtime::cause::Interrupted;
use crate::runtime::scheduler::Handle;

/// Publishes a finished fiber's exit to its typed handle.
pub(crate) type Completion = Box<dyn FnOnce() + Send>;

/// The future a fiber drives; resolves to its exit publisher.
pub(crate) type FiberFuture = Pin<Box<dyn Future<Output = Completion> + Send>>;

/// Publishes an interruption exit for a fiber that will never run again.
pub(crate) type Abandon = Box<dyn FnOnce(FiberId) + Send>;

type Observer = Box<dyn FnOnce() + Send>;

/// Fiber status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// Being polled right now, or queued for a turn.
    Running,
    /// Waiting for an event.
    Suspended,
    /// Exit published.
    Done,
}

impl FiberStatus {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => FiberStatus::Suspended,
            2 => FiberStatus::Done,
            _ => FiberStatus::Running,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            FiberStatus::Running => 0,
            FiberStatus::Suspended => 1,
            FiberStatus::Done => 2,
        }
    }
}

#[derive(Default)]
struct Turn {
    future: Option<FiberFuture>,
    completion: Option<Completion>,
    abandon: Option<Abandon>,
}

/// A fiber as seen by the scheduler.
pub struct FiberRuntime {
    id: FiberId,
    status: AtomicU8,
    flags: AtomicU8,
    /// Set while the fiber sits in a run queue.
    notified: AtomicBool,
    /// Set once the future resolved; children are being wound down.
    finishing: AtomicBool,
    turn: Mutex<Turn>,
    mailbox: SegQueue<FiberMessage>,
    children: Mutex<IndexMap<FiberId, Arc<FiberRuntime>>>,
    interruptors: Mutex<BTreeSet<FiberId>>,
    /// `None` once the observers fired.
    observers: Mutex<Option<SmallVec<[Observer; 2]>>>,
    scheduler: Handle,
}

impl fmt::Debug for FiberRuntime {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("FiberRuntime")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("flags", &self.flags())
            .field("children", &self.children.lock().len())
            .finish()
    }
}

impl FiberRuntime {
    pub(crate) fn new(
        id: FiberId,
        flags: RuntimeFlags,
        scheduler: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            status: AtomicU8::new(FiberStatus::Running.as_u8()),
            flags: AtomicU8::new(flags.bits()),
            notified: AtomicBool::new(false),
            finishing: AtomicBool::new(false),
            turn: Mutex::new(Turn::default()),
            mailbox: SegQueue::new(),
            children: Mutex::new(IndexMap::new()),
            interruptors: Mutex::new(BTreeSet::new()),
            observers: Mutex::new(Some(SmallVec::new())),
            scheduler,
        })
    }

    #[inline]
    pub fn id(&self) -> &FiberId {
        &self.id
    }

    #[inline]
    pub fn status(&self) -> FiberStatus {
        FiberStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.status() == FiberStatus::Done
    }

    #[inline]
    pub fn flags(&self) -> RuntimeFlags {
        RuntimeFlags::from_bits(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_flags(
        &self,
        flags: RuntimeFlags,
    ) {
        self.flags.store(flags.bits(), Ordering::Release);
    }

    /// The scheduler this fiber runs on.
    #[inline]
    pub fn scheduler(&self) -> &Handle {
        &self.scheduler
    }

    /// The scope children forked by this fiber are registered in.
    pub fn scope(self: &Arc<Self>) -> FiberScope {
        FiberScope::local(self)
    }

    /// Ids of the children currently registered in this fiber's scope.
    pub fn children(&self) -> Vec<FiberId> {
        self.children.lock().keys().cloned().collect()
    }

    /// Every fiber that requested interruption of this one.
    pub fn interruptors(&self) -> BTreeSet<FiberId> {
        self.interruptors.lock().clone()
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        !self.interruptors.lock().is_empty()
    }

    pub(crate) fn pending_interruption(&self) -> Option<Interrupted> {
        let interruptors = self.interruptors.lock();
        if interruptors.is_empty() {
            None
        } else {
            Some(Interrupted(FiberId::combine_all(interruptors.iter())))
        }
    }

    pub(crate) fn set_future(
        &self,
        future: FiberFuture,
        abandon: Abandon,
    ) {
        let mut turn = self.turn.lock();
        turn.future = Some(future);
        turn.abandon = Some(abandon);
    }

    /// Run `f` once this fiber has terminated; immediately if it already has.
    pub fn add_observer(
        &self,
        f: impl FnOnce() + Send + 'static,
    ) {
        let mut observers = self.observers.lock();
        match observers.as_mut() {
            Some(list) => list.push(Box::new(f)),
            None => {
                drop(observers);
                f();
            }
        }
    }

    /// Deliver a message. From the fiber's own turn the message is picked up
    /// before the turn ends; otherwise the fiber is scheduled.
    pub fn tell(
        self: &Arc<Self>,
        message: FiberMessage,
    ) {
        self.mailbox.push(message);
        if !context::is_current(self) {
            self.schedule();
        }
    }

    /// Queue the fiber for a turn unless it is queued already.
    pub(crate) fn schedule(self: &Arc<Self>) {
        if !self.notified.swap(true, Ordering::AcqRel) {
            self.scheduler.schedule(self.clone());
        }
    }

    /// Request interruption on behalf of `by`.
    ///
    /// Adding an interruptor that is already known, or interrupting a fiber
    /// that is done, changes nothing else.
    pub fn interrupt_as(
        self: &Arc<Self>,
        by: FiberId,
    ) {
        let added = self.interruptors.lock().insert(by.clone());
        if !added || self.is_done() {
            return;
        }
        tracing::debug!(fiber = %self.id, by = %by, "interrupt requested");
        self.tell(FiberMessage::InterruptSignal(by));
    }

    /// Register a child in this fiber's scope. Runs on this fiber's turn.
    pub(crate) fn add_child(
        self: &Arc<Self>,
        child: &Arc<FiberRuntime>,
    ) {
        self.children
            .lock()
            .insert(child.id().clone(), child.clone());

        let parent = self.clone();
        let child_id = child.id().clone();
        child.add_observer(move || {
            parent.tell(FiberMessage::stateful(move |parent| {
                parent.remove_child(&child_id)
            }));
        });

        if self.finishing.load(Ordering::Acquire) || self.is_done() {
            tracing::trace!(fiber = %self.id, child = %child.id(), "orphan interrupted");
            child.interrupt_as(self.id.clone());
        }
    }

    pub(crate) fn remove_child(
        &self,
        id: &FiberId,
    ) {
        self.children.lock().shift_remove(id);
    }

    fn interrupt_children(&self) {
        let children: Vec<_> = self.children.lock().values().cloned().collect();
        for child in children {
            child.interrupt_as(self.id.clone());
        }
    }

    fn drain_mailbox(self: &Arc<Self>) {
        while let Some(message) = self.mailbox.pop() {
            match message {
                FiberMessage::Stateful(f) => f(self),
                FiberMessage::InterruptSignal(by) => {
                    tracing::trace!(fiber = %self.id, by = %by, "interrupt signal");
                    self.interrupt_children();
                }
                FiberMessage::Resume => {}
            }
        }
    }

    /// One scheduling slot: drain the mailbox, poll the future once, drain
    /// again, publish the exit if finished and childless.
    pub(crate) fn run_turn(self: &Arc<Self>) {
        // Woken while another worker is still polling it: try again later
        // instead of blocking this worker.
        let Some(mut turn) = self.turn.try_lock() else {
            self.scheduler.schedule(self.clone());
            return;
        };
        self.notified.store(false, Ordering::Release);
        let _enter = context::enter(self.clone(), self.scheduler.config().ops_per_turn);

        self.drain_mailbox();

        if let Some(future) = turn.future.as_mut() {
            self.status
                .store(FiberStatus::Running.as_u8(), Ordering::Release);
            let waker = Waker::from(self.clone());
            let mut cx = Context::from_waker(&waker);
            match future.as_mut().poll(&mut cx) {
                Poll::Ready(completion) => {
                    turn.future = None;
                    turn.completion = Some(completion);
                    self.finishing.store(true, Ordering::Release);
                    self.interrupt_children();
                }
                Poll::Pending => self
                    .status
                    .store(FiberStatus::Suspended.as_u8(), Ordering::Release),
            }
            self.drain_mailbox();
        }

        if turn.completion.is_some() && self.children.lock().is_empty() {
            let completion = turn.completion.take();
            turn.abandon = None;
            drop(turn);
            if let Some(completion) = completion {
                self.publish(completion);
            }
        }
    }

    /// Make the exit visible, then notify observers (scope removal).
    fn publish(
        &self,
        completion: Completion,
    ) {
        self.status
            .store(FiberStatus::Done.as_u8(), Ordering::Release);
        self.scheduler.stats().record_completed();
        completion();
        self.notify_observers();
        self.scheduler.forget(&self.id);
        tracing::debug!(fiber = %self.id, "fiber done");
    }

    /// Terminate a fiber that will not get another turn, typically because
    /// its scheduler stopped.
    ///
    /// A fiber whose body already finished publishes its own exit; any other
    /// publishes an interruption by `by`. Must not race with a turn.
    pub(crate) fn abandon(
        &self,
        by: FiberId,
    ) {
        if self.is_done() {
            return;
        }
        let (completion, abandon) = {
            let mut turn = self.turn.lock();
            turn.future = None;
            (turn.completion.take(), turn.abandon.take())
        };
        if let Some(completion) = completion {
            self.publish(completion);
            return;
        }

        self.interruptors.lock().insert(by.clone());
        self.status
            .store(FiberStatus::Done.as_u8(), Ordering::Release);
        self.scheduler.stats().record_completed();
        if let Some(abandon) = abandon {
            abandon(by);
        }
        self.notify_observers();
        self.scheduler.forget(&self.id);
        tracing::debug!(fiber = %self.id, "fiber abandoned");
    }

    fn notify_observers(&self) {
        let observers = self.observers.lock().take().unwrap_or_default();
        for observer in observers {
            observer();
        }
    }
}

impl Wake for FiberRuntime {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}
