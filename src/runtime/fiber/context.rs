//! The fiber running on the current worker thread.
//!
//! A worker installs the fiber before polling it and restores the previous
//! one afterwards. Runtime primitives consult this context to find out who
//! is calling them, whether that caller has been interrupted, and whether
//! its per-turn budget is spent.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::runtime::cause::Interrupted;
use crate::runtime::fiber::{FiberId, FiberRuntime, RuntimeFlags};

thread_local! {
    static CURRENT: RefCell<Option<Arc<FiberRuntime>>> = const { RefCell::new(None) };
    static BUDGET: Cell<usize> = const { Cell::new(0) };
}

/// Restores the previously running fiber on drop.
pub(crate) struct EnterGuard {
    prev: Option<Arc<FiberRuntime>>,
    prev_budget: usize,
}

/// Install `fiber` as the current fiber with a fresh budget.
pub(crate) fn enter(
    fiber: Arc<FiberRuntime>,
    budget: usize,
) -> EnterGuard {
    let prev = CURRENT.with(|c| c.replace(Some(fiber)));
    let prev_budget = BUDGET.with(|b| b.replace(budget));
    EnterGuard { prev, prev_budget }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT.with(|c| *c.borrow_mut() = prev);
        BUDGET.with(|b| b.set(self.prev_budget));
    }
}

/// The fiber running on this thread, if any.
pub fn current_fiber() -> Option<Arc<FiberRuntime>> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Id of the calling fiber; `FiberId::None` outside of fibers.
pub fn fiber_id() -> FiberId {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .map_or(FiberId::None, |f| f.id().clone())
    })
}

/// Whether `fiber` is the one running on this thread.
pub(crate) fn is_current(fiber: &FiberRuntime) -> bool {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .is_some_and(|f| std::ptr::eq(Arc::as_ptr(f), fiber))
    })
}

/// The pending interruption of the calling fiber, if it is interruptible.
pub(crate) fn poll_interrupt() -> Option<Interrupted> {
    CURRENT.with(|c| {
        let current = c.borrow();
        let fiber = current.as_ref()?;
        if !fiber.flags().interruptible() {
            return None;
        }
        fiber.pending_interruption()
    })
}

/// Spend one unit of the turn budget.
///
/// Once the budget is exhausted a fiber with cooperative yielding enabled is
/// rescheduled and `Pending` is returned; the next turn refills the budget.
pub(crate) fn poll_budget(cx: &mut Context<'_>) -> Poll<()> {
    let yielding = CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .is_some_and(|f| f.flags().cooperative_yielding())
    });
    if !yielding {
        return Poll::Ready(());
    }

    BUDGET.with(|b| match b.get() {
        0 => {
            cx.waker().wake_by_ref();
            Poll::Pending
        }
        n => {
            b.set(n - 1);
            Poll::Ready(())
        }
    })
}

/// Give up the worker for one turn.
///
/// Fails when the calling fiber has been interrupted.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = Result<(), Interrupted>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        if let Some(interrupted) = poll_interrupt() {
            return Poll::Ready(Err(interrupted));
        }
        if self.yielded {
            return Poll::Ready(Ok(()));
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Run `future` with interruption disabled for the calling fiber.
///
/// Interruptions requested meanwhile are kept and observed by the first
/// interruptible suspension point after the future completes.
pub fn uninterruptible<F: Future>(future: F) -> Uninterruptible<F> {
    Uninterruptible {
        future: Box::pin(future),
    }
}

/// Future returned by [`uninterruptible`].
#[must_use = "futures do nothing unless polled"]
pub struct Uninterruptible<F> {
    future: Pin<Box<F>>,
}

struct FlagsGuard {
    fiber: Arc<FiberRuntime>,
    saved: RuntimeFlags,
}

impl Drop for FlagsGuard {
    fn drop(&mut self) {
        self.fiber.set_flags(self.saved);
    }
}

impl<F: Future> Future for Uninterruptible<F> {
    type Output = F::Output;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<F::Output> {
        let _guard = current_fiber().map(|fiber| {
            let saved = fiber.flags();
            fiber.set_flags(saved.disable(RuntimeFlags::INTERRUPTION));
            FlagsGuard { fiber, saved }
        });
        self.future.as_mut().poll(cx)
    }
}
