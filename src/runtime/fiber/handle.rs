//! Typed fiber handles and forking.

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::runtime::Completion;
use super::{context, FiberId, FiberRuntime, FiberScope, FiberStatus, RuntimeFlags};
use crate::runtime::cause::{Cause, Defect, Interrupted};
use crate::runtime::error::FiberError;
use crate::runtime::exit::Exit;
use crate::runtime::scheduler::Handle;
use crate::runtime::sync::Deferred;

/// Handle to a forked fiber producing `Result<A, Cause<E>>`.
pub struct Fiber<E, A> {
    runtime: Arc<FiberRuntime>,
    exit: Deferred<E, A>,
}

impl<E, A> Clone for Fiber<E, A> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            exit: self.exit.clone(),
        }
    }
}

impl<E, A> fmt::Debug for Fiber<E, A> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", self.runtime.id())
            .field("status", &self.runtime.status())
            .finish()
    }
}

impl<E, A> Fiber<E, A> {
    #[inline]
    pub fn id(&self) -> &FiberId {
        self.runtime.id()
    }

    /// The untyped runtime behind this handle.
    #[inline]
    pub fn runtime(&self) -> &Arc<FiberRuntime> {
        &self.runtime
    }

    #[inline]
    pub fn status(&self) -> FiberStatus {
        self.runtime.status()
    }

    #[inline]
    pub fn children(&self) -> Vec<FiberId> {
        self.runtime.children()
    }

    #[inline]
    pub fn interruptors(&self) -> std::collections::BTreeSet<FiberId> {
        self.runtime.interruptors()
    }

    /// Whether the exit has been published.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.exit.is_done()
    }

    /// The exit, if published.
    pub fn poll(&self) -> Option<Exit<E, A>>
    where
        E: Clone,
        A: Clone,
    {
        self.exit.poll()
    }

    /// Deferred completed with this fiber's exit.
    #[inline]
    pub fn exit_deferred(&self) -> &Deferred<E, A> {
        &self.exit
    }

    /// Signal interruption on behalf of the calling fiber without waiting.
    pub fn interrupt_fork(&self) {
        self.runtime.interrupt_as(context::fiber_id());
    }

    /// Signal interruption on behalf of `by` without waiting.
    pub fn interrupt_as_fork(
        &self,
        by: FiberId,
    ) {
        self.runtime.interrupt_as(by);
    }
}

impl<E, A> Fiber<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Wait for the fiber and return its result.
    ///
    /// An interruption of the waiting fiber is reported as
    /// `Cause::Interrupt`; the target keeps running.
    pub async fn join(&self) -> Result<A, Cause<E>> {
        self.exit.await_().await
    }

    /// Wait for the fiber's exit.
    pub async fn await_exit(&self) -> Result<Exit<E, A>, Interrupted> {
        self.exit.await_exit().await
    }

    /// Interrupt on behalf of the calling fiber and wait for the exit.
    ///
    /// The wait itself cannot be interrupted; it completes once the target
    /// and every fiber in its scope have terminated.
    pub async fn interrupt(&self) -> Exit<E, A> {
        self.interrupt_as(context::fiber_id()).await
    }

    /// Interrupt on behalf of `by` and wait for the exit.
    pub async fn interrupt_as(
        &self,
        by: FiberId,
    ) -> Exit<E, A> {
        self.runtime.interrupt_as(by);
        match self.exit.wait_uninterruptible().await {
            Ok(exit) => (*exit).clone(),
            Err(interrupted) => Exit::Failure(interrupted.into()),
        }
    }

    /// Block the calling OS thread until the fiber is done.
    pub fn wait_blocking(&self) -> Exit<E, A> {
        (*self.exit.wait_blocking()).clone()
    }
}

/// Wait for every fiber, in order; the first failure wins.
pub async fn join_all<E, A>(fibers: &[Fiber<E, A>]) -> Result<Vec<A>, Cause<E>>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    let mut values = Vec::with_capacity(fibers.len());
    for fiber in fibers {
        values.push(fiber.join().await?);
    }
    Ok(values)
}

/// Drives the user future: catches panics and skips the body entirely when
/// the fiber was interrupted before its first turn.
struct Supervised<F> {
    future: Pin<Box<F>>,
    started: bool,
}

impl<F, E, A> Future for Supervised<F>
where
    F: Future<Output = Result<A, Cause<E>>>,
{
    type Output = Exit<E, A>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Exit<E, A>> {
        if !self.started {
            self.started = true;
            if let Some(interrupted) = context::poll_interrupt() {
                return Poll::Ready(Exit::Failure(interrupted.into()));
            }
        }

        match catch_unwind(AssertUnwindSafe(|| self.future.as_mut().poll(cx))) {
            Ok(Poll::Ready(result)) => Poll::Ready(Exit::from_result(result)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Exit::die(Defect::from_panic(payload))),
        }
    }
}

/// Create a fiber running `future` on `scheduler`, register it in `scope`
/// and queue its first turn.
pub(crate) fn spawn_in<F, E, A>(
    scheduler: &Handle,
    flags: RuntimeFlags,
    scope: &FiberScope,
    future: F,
) -> Fiber<E, A>
where
    F: Future<Output = Result<A, Cause<E>>> + Send + 'static,
    E: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    let id = scheduler.next_fiber_id();
    let runtime = FiberRuntime::new(id.clone(), flags, scheduler.clone());
    let exit = Deferred::with_blocking_on(id.clone());

    let slot = exit.clone();
    let supervised = Supervised {
        future: Box::pin(future),
        started: false,
    };
    let abandoned = exit.clone();
    runtime.set_future(
        Box::pin(async move {
            let exit = supervised.await;
            Box::new(move || {
                slot.complete(exit);
            }) as Completion
        }),
        Box::new(move |by| {
            abandoned.complete(Exit::interrupt(by));
        }),
    );

    scope.add(flags, &runtime);
    scheduler.stats().record_forked();
    tracing::debug!(fiber = %id, parent = %scope.fiber_id(), "fiber forked");
    if scheduler.register(&runtime) {
        runtime.schedule();
    } else {
        runtime.abandon(FiberId::None);
    }

    Fiber { runtime, exit }
}

/// Fork `future` as a child of the calling fiber.
///
/// # Panics
///
/// Panics when called outside of a fiber; use
/// [`Runtime::fork_daemon`](crate::runtime::Runtime::fork_daemon) there.
pub fn fork<F, E, A>(future: F) -> Fiber<E, A>
where
    F: Future<Output = Result<A, Cause<E>>> + Send + 'static,
    E: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    match try_fork(future) {
        Ok(fiber) => fiber,
        Err(e) => panic!("{}", e),
    }
}

/// Fork `future` as a child of the calling fiber.
pub fn try_fork<F, E, A>(future: F) -> Result<Fiber<E, A>, FiberError>
where
    F: Future<Output = Result<A, Cause<E>>> + Send + 'static,
    E: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    let parent = context::current_fiber().ok_or(FiberError::NoCurrentFiber)?;
    let scope = parent.scope();
    Ok(spawn_in(parent.scheduler(), parent.flags(), &scope, future))
}

/// Fork `future` into the global scope; it outlives the calling fiber.
///
/// # Panics
///
/// Panics when called outside of a fiber.
pub fn fork_daemon<F, E, A>(future: F) -> Fiber<E, A>
where
    F: Future<Output = Result<A, Cause<E>>> + Send + 'static,
    E: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    fork_in(&FiberScope::global(), future)
}

/// Fork `future` into an explicit scope.
///
/// # Panics
///
/// Panics when called outside of a fiber.
pub fn fork_in<F, E, A>(
    scope: &FiberScope,
    future: F,
) -> Fiber<E, A>
where
    F: Future<Output = Result<A, Cause<E>>> + Send + 'static,
    E: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    let Some(parent) = context::current_fiber() else {
        panic!("{}", FiberError::NoCurrentFiber);
    };
    spawn_in(parent.scheduler(), parent.flags(), scope, future)
}

/// Fork every future as a child of the calling fiber.
pub fn fork_all<I, F, E, A>(futures: I) -> Vec<Fiber<E, A>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<A, Cause<E>>> + Send + 'static,
    E: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    futures.into_iter().map(fork).collect()
}
