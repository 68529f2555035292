//! Single-assignment cells
//!
//! A [`Deferred`] starts empty and is completed at most once with an
//! [`Exit`]. Fibers awaiting it suspend until then; observers registered
//! before or after completion see the final exit exactly once.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll, Waker};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::runtime::cause::{Cause, Defect, Interrupted};
use crate::runtime::exit::Exit;
use crate::runtime::fiber::{context, FiberId};

type Observer<E, A> = Box<dyn FnOnce(&Exit<E, A>) + Send>;

/// Identifies an observer for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverKey(u64);

enum State<E, A> {
    Pending {
        observers: SmallVec<[(u64, Observer<E, A>); 2]>,
        next_key: u64,
    },
    Done(Arc<Exit<E, A>>),
}

struct Inner<E, A> {
    state: Mutex<State<E, A>>,
    blocking_on: FiberId,
}

/// A promise completed once with an [`Exit`].
pub struct Deferred<E, A> {
    inner: Arc<Inner<E, A>>,
}

impl<E, A> Clone for Deferred<E, A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E, A> fmt::Debug for Deferred<E, A> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("blocking_on", &self.inner.blocking_on)
            .field("done", &self.is_done())
            .finish()
    }
}

impl<E, A> Default for Deferred<E, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, A> Deferred<E, A> {
    /// An empty deferred attributed to the calling fiber.
    pub fn new() -> Self {
        Self::with_blocking_on(context::fiber_id())
    }

    /// An empty deferred attributed to `fiber_id`.
    pub fn with_blocking_on(fiber_id: FiberId) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending {
                    observers: SmallVec::new(),
                    next_key: 0,
                }),
                blocking_on: fiber_id,
            }),
        }
    }

    /// The fiber a waiter on this deferred is blocked on.
    #[inline]
    pub fn blocking_on(&self) -> &FiberId {
        &self.inner.blocking_on
    }

    /// Complete with `exit`. Returns `false` when already completed, in
    /// which case nothing changes.
    ///
    /// Observers run on the calling thread, in registration order, after the
    /// state is visible as done.
    pub fn complete(
        &self,
        exit: Exit<E, A>,
    ) -> bool {
        let (observers, exit) = {
            let mut state = self.inner.state.lock();
            let observers = match &mut *state {
                State::Done(_) => return false,
                State::Pending { observers, .. } => std::mem::take(observers),
            };
            let exit = Arc::new(exit);
            *state = State::Done(exit.clone());
            (observers, exit)
        };
        for (_, observer) in observers {
            observer(&exit);
        }
        true
    }

    #[inline]
    pub fn succeed(
        &self,
        value: A,
    ) -> bool {
        self.complete(Exit::succeed(value))
    }

    #[inline]
    pub fn fail(
        &self,
        error: E,
    ) -> bool {
        self.complete(Exit::fail(error))
    }

    #[inline]
    pub fn fail_cause(
        &self,
        cause: Cause<E>,
    ) -> bool {
        self.complete(Exit::fail_cause(cause))
    }

    #[inline]
    pub fn die(
        &self,
        defect: Defect,
    ) -> bool {
        self.complete(Exit::die(defect))
    }

    /// Complete with an interruption by the calling fiber.
    #[inline]
    pub fn interrupt(&self) -> bool {
        self.interrupt_with(context::fiber_id())
    }

    #[inline]
    pub fn interrupt_with(
        &self,
        fiber_id: FiberId,
    ) -> bool {
        self.complete(Exit::interrupt(fiber_id))
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Done(_))
    }

    /// The exit, if completed.
    pub fn poll(&self) -> Option<Exit<E, A>>
    where
        E: Clone,
        A: Clone,
    {
        self.exit().map(|exit| (*exit).clone())
    }

    pub(crate) fn exit(&self) -> Option<Arc<Exit<E, A>>> {
        match &*self.inner.state.lock() {
            State::Done(exit) => Some(exit.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Run `f` with the exit once completed.
    ///
    /// On an already completed deferred `f` runs immediately and `None` is
    /// returned; otherwise the key can be used to remove the observer.
    pub fn add_observer(
        &self,
        f: impl FnOnce(&Exit<E, A>) + Send + 'static,
    ) -> Option<ObserverKey> {
        let mut state = self.inner.state.lock();
        match &mut *state {
            State::Pending {
                observers,
                next_key,
            } => {
                let key = *next_key;
                *next_key += 1;
                observers.push((key, Box::new(f)));
                Some(ObserverKey(key))
            }
            State::Done(exit) => {
                let exit = exit.clone();
                drop(state);
                f(&exit);
                None
            }
        }
    }

    /// Remove a pending observer. `false` if it already ran or is unknown.
    pub fn remove_observer(
        &self,
        key: ObserverKey,
    ) -> bool {
        match &mut *self.inner.state.lock() {
            State::Pending { observers, .. } => {
                let before = observers.len();
                observers.retain(|(k, _)| *k != key.0);
                observers.len() != before
            }
            State::Done(_) => false,
        }
    }
}

impl<E: 'static, A: 'static> Deferred<E, A> {
    /// Suspend until completed. Interruptible.
    pub fn wait(&self) -> Wait<E, A> {
        Wait::new(self.clone(), true)
    }

    pub(crate) fn wait_uninterruptible(&self) -> Wait<E, A> {
        Wait::new(self.clone(), false)
    }

    /// Block the calling OS thread until completed. Never call this from a
    /// fiber: it would hold a worker hostage.
    pub fn wait_blocking(&self) -> Arc<Exit<E, A>> {
        let (tx, rx) = crossbeam::channel::bounded::<()>(1);
        self.add_observer(move |_| {
            let _ = tx.send(());
        });
        let _ = rx.recv();
        self.exit().unwrap_or_else(|| {
            Arc::new(Exit::die(Defect::new(
                "deferred observer dropped before completion",
            )))
        })
    }
}

impl<E, A> Deferred<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Suspend until completed and unwrap the exit.
    ///
    /// An interruption of the awaiting fiber is reported as
    /// `Cause::Interrupt`.
    pub async fn await_(&self) -> Result<A, Cause<E>> {
        match self.wait().await {
            Ok(exit) => match &*exit {
                Exit::Success(value) => Ok(value.clone()),
                Exit::Failure(cause) => Err(cause.clone()),
            },
            Err(interrupted) => Err(interrupted.into()),
        }
    }

    /// Suspend until completed and return a copy of the exit.
    pub async fn await_exit(&self) -> Result<Exit<E, A>, Interrupted> {
        let exit = self.wait().await?;
        Ok((*exit).clone())
    }
}

/// Future returned by [`Deferred::wait`].
///
/// Registers a waker observer while pending and removes it when dropped.
#[must_use = "futures do nothing unless polled"]
pub struct Wait<E, A> {
    deferred: Deferred<E, A>,
    key: Option<u64>,
    waker: Arc<Mutex<Option<Waker>>>,
    interruptible: bool,
}

impl<E, A> Wait<E, A> {
    fn new(
        deferred: Deferred<E, A>,
        interruptible: bool,
    ) -> Self {
        Self {
            deferred,
            key: None,
            waker: Arc::new(Mutex::new(None)),
            interruptible,
        }
    }

    fn release(&mut self) {
        if let Some(key) = self.key.take() {
            self.deferred.remove_observer(ObserverKey(key));
        }
    }
}

impl<E: 'static, A: 'static> Future for Wait<E, A> {
    type Output = Result<Arc<Exit<E, A>>, Interrupted>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let this = self.get_mut();
        ready!(context::poll_budget(cx));

        if this.interruptible {
            if let Some(interrupted) = context::poll_interrupt() {
                this.release();
                return Poll::Ready(Err(interrupted));
            }
        }

        let mut state = this.deferred.inner.state.lock();
        match &mut *state {
            State::Done(exit) => {
                this.key = None;
                Poll::Ready(Ok(exit.clone()))
            }
            State::Pending {
                observers,
                next_key,
            } => {
                *this.waker.lock() = Some(cx.waker().clone());
                if this.key.is_none() {
                    let key = *next_key;
                    *next_key += 1;
                    let slot = this.waker.clone();
                    observers.push((
                        key,
                        Box::new(move |_: &Exit<E, A>| {
                            if let Some(waker) = slot.lock().take() {
                                waker.wake();
                            }
                        }),
                    ));
                    this.key = Some(key);
                }
                Poll::Pending
            }
        }
    }
}

impl<E, A> Drop for Wait<E, A> {
    fn drop(&mut self) {
        self.release();
    }
}
