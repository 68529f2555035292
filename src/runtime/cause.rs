//! Failure causes
//!
//! A [`Cause`] is an immutable tree describing why a computation did not
//! succeed. Concurrent branches that fail together are kept side by side in
//! [`Cause::Parallel`], a failure during cleanup follows the original one in
//! [`Cause::Sequential`], so nothing is lost when fibers race.

use std::collections::BTreeSet;
use std::fmt;

use crate::runtime::fiber::FiberId;

/// An unexpected fault (a panic inside a fiber, a broken invariant).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("defect: {message}")]
pub struct Defect {
    message: String,
}

impl Defect {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build a defect from a panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "fiber panicked".to_string()
        };
        Self { message }
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Returned by runtime primitives when the calling fiber was interrupted, or
/// when the primitive was shut down underneath it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("interrupted by {0}")]
pub struct Interrupted(pub FiberId);

impl Interrupted {
    /// The fiber(s) that requested the interruption.
    #[inline]
    pub fn fiber_id(&self) -> &FiberId {
        &self.0
    }
}

/// Why a computation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause<E> {
    /// No failure at all.
    Empty,
    /// An expected, typed failure.
    Fail(E),
    /// An unexpected defect.
    Die(Defect),
    /// Interruption requested by a fiber.
    Interrupt(FiberId),
    /// The left cause happened, then the right one.
    Sequential(Box<Cause<E>>, Box<Cause<E>>),
    /// Both causes happened concurrently.
    Parallel(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Cause<E> {
    #[inline]
    pub fn empty() -> Self {
        Cause::Empty
    }

    #[inline]
    pub fn fail(error: E) -> Self {
        Cause::Fail(error)
    }

    #[inline]
    pub fn die(defect: Defect) -> Self {
        Cause::Die(defect)
    }

    /// Interruption by `id`. A composite id becomes one parallel node per
    /// fiber.
    pub fn interrupt(id: FiberId) -> Self {
        match id {
            FiberId::Composite(ids) => ids
                .into_iter()
                .map(Cause::Interrupt)
                .fold(Cause::Empty, Cause::both),
            id => Cause::Interrupt(id),
        }
    }

    /// Sequential composition; empty sides are dropped.
    pub fn then(
        self,
        that: Cause<E>,
    ) -> Self {
        match (self, that) {
            (Cause::Empty, that) => that,
            (this, Cause::Empty) => this,
            (this, that) => Cause::Sequential(Box::new(this), Box::new(that)),
        }
    }

    /// Parallel composition; empty sides are dropped.
    pub fn both(
        self,
        that: Cause<E>,
    ) -> Self {
        match (self, that) {
            (Cause::Empty, that) => that,
            (this, Cause::Empty) => this,
            (this, that) => Cause::Parallel(Box::new(this), Box::new(that)),
        }
    }

    /// True when the tree holds no failure, defect or interruption.
    pub fn is_empty(&self) -> bool {
        match self {
            Cause::Empty => true,
            Cause::Fail(_) | Cause::Die(_) | Cause::Interrupt(_) => false,
            Cause::Sequential(l, r) | Cause::Parallel(l, r) => l.is_empty() && r.is_empty(),
        }
    }

    /// True when some fiber requested interruption.
    pub fn is_interrupted(&self) -> bool {
        self.find(&mut |c| matches!(c, Cause::Interrupt(_)).then_some(()))
            .is_some()
    }

    /// True when the cause is made of interruptions only.
    pub fn is_interrupted_only(&self) -> bool {
        match self {
            Cause::Empty => true,
            Cause::Interrupt(_) => true,
            Cause::Fail(_) | Cause::Die(_) => false,
            Cause::Sequential(l, r) | Cause::Parallel(l, r) => {
                l.is_interrupted_only() && r.is_interrupted_only()
            }
        }
    }

    /// True when the cause holds a typed failure.
    pub fn is_failure(&self) -> bool {
        self.find(&mut |c| matches!(c, Cause::Fail(_)).then_some(()))
            .is_some()
    }

    /// True when the cause holds a defect.
    pub fn is_die(&self) -> bool {
        self.find(&mut |c| matches!(c, Cause::Die(_)).then_some(()))
            .is_some()
    }

    /// Every fiber that requested interruption.
    pub fn interruptors(&self) -> BTreeSet<FiberId> {
        let mut out = BTreeSet::new();
        self.walk(&mut |c| {
            if let Cause::Interrupt(id) = c {
                out.extend(id.to_set());
            }
        });
        out
    }

    /// Whether `id` is among the interruptors.
    pub fn is_interrupted_by(
        &self,
        id: &FiberId,
    ) -> bool {
        self.interruptors().contains(id)
    }

    /// Typed failures, left to right.
    pub fn failures(&self) -> Vec<&E> {
        let mut out = Vec::new();
        self.walk(&mut |c| {
            if let Cause::Fail(e) = c {
                out.push(e);
            }
        });
        out
    }

    /// Defects, left to right.
    pub fn defects(&self) -> Vec<&Defect> {
        let mut out = Vec::new();
        self.walk(&mut |c| {
            if let Cause::Die(d) = c {
                out.push(d);
            }
        });
        out
    }

    /// Depth-first search for the first node `f` maps to `Some`.
    pub fn find<'a, B>(
        &'a self,
        f: &mut impl FnMut(&'a Cause<E>) -> Option<B>,
    ) -> Option<B> {
        if let Some(b) = f(self) {
            return Some(b);
        }
        match self {
            Cause::Sequential(l, r) | Cause::Parallel(l, r) => l.find(f).or_else(|| r.find(f)),
            _ => None,
        }
    }

    /// Transform typed failures, keeping the shape of the tree.
    pub fn map<E2>(
        self,
        f: &mut impl FnMut(E) -> E2,
    ) -> Cause<E2> {
        match self {
            Cause::Empty => Cause::Empty,
            Cause::Fail(e) => Cause::Fail(f(e)),
            Cause::Die(d) => Cause::Die(d),
            Cause::Interrupt(id) => Cause::Interrupt(id),
            Cause::Sequential(l, r) => {
                Cause::Sequential(Box::new((*l).map(f)), Box::new((*r).map(f)))
            }
            Cause::Parallel(l, r) => Cause::Parallel(Box::new((*l).map(f)), Box::new((*r).map(f))),
        }
    }

    /// The first typed failure, or the whole cause when there is none.
    pub fn failure_or_cause(self) -> Result<E, Cause<E>> {
        if !self.is_failure() {
            return Err(self);
        }
        match self {
            Cause::Fail(e) => Ok(e),
            Cause::Sequential(l, r) | Cause::Parallel(l, r) => {
                if l.is_failure() {
                    (*l).failure_or_cause()
                } else {
                    (*r).failure_or_cause()
                }
            }
            other => Err(other),
        }
    }

    fn walk<'a>(
        &'a self,
        f: &mut impl FnMut(&'a Cause<E>),
    ) {
        f(self);
        if let Cause::Sequential(l, r) | Cause::Parallel(l, r) = self {
            l.walk(f);
            r.walk(f);
        }
    }
}

impl<E> From<Interrupted> for Cause<E> {
    fn from(interrupted: Interrupted) -> Self {
        Cause::interrupt(interrupted.0)
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Cause::Empty => write!(f, "Empty"),
            Cause::Fail(e) => write!(f, "Fail({})", e),
            Cause::Die(d) => write!(f, "Die({})", d.message()),
            Cause::Interrupt(id) => write!(f, "Interrupt({})", id),
            Cause::Sequential(l, r) => write!(f, "Then({}, {})", l, r),
            Cause::Parallel(l, r) => write!(f, "Both({}, {})", l, r),
        }
    }
}
