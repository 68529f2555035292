//! Terminal results of fibers and deferreds.

use crate::runtime::cause::{Cause, Defect};
use crate::runtime::fiber::FiberId;

/// How a computation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit<E, A> {
    /// Completed with a value.
    Success(A),
    /// Failed, died or was interrupted.
    Failure(Cause<E>),
}

impl<E, A> Exit<E, A> {
    #[inline]
    pub fn succeed(value: A) -> Self {
        Exit::Success(value)
    }

    #[inline]
    pub fn fail(error: E) -> Self {
        Exit::Failure(Cause::fail(error))
    }

    #[inline]
    pub fn fail_cause(cause: Cause<E>) -> Self {
        Exit::Failure(cause)
    }

    #[inline]
    pub fn die(defect: Defect) -> Self {
        Exit::Failure(Cause::die(defect))
    }

    #[inline]
    pub fn interrupt(id: FiberId) -> Self {
        Exit::Failure(Cause::interrupt(id))
    }

    /// Lift a fiber's result.
    #[inline]
    pub fn from_result(result: Result<A, Cause<E>>) -> Self {
        match result {
            Ok(value) => Exit::Success(value),
            Err(cause) => Exit::Failure(cause),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Exit::Failure(_))
    }

    /// True when the failure was an interruption.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Exit::Success(_) => false,
            Exit::Failure(cause) => cause.is_interrupted(),
        }
    }

    /// The failure cause, if any.
    #[inline]
    pub fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Exit::Success(_) => None,
            Exit::Failure(cause) => Some(cause),
        }
    }

    /// The success value, if any.
    #[inline]
    pub fn value(&self) -> Option<&A> {
        match self {
            Exit::Success(value) => Some(value),
            Exit::Failure(_) => None,
        }
    }

    #[inline]
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Exit::Success(value) => Ok(value),
            Exit::Failure(cause) => Err(cause),
        }
    }

    pub fn map<B>(
        self,
        f: impl FnOnce(A) -> B,
    ) -> Exit<E, B> {
        match self {
            Exit::Success(value) => Exit::Success(f(value)),
            Exit::Failure(cause) => Exit::Failure(cause),
        }
    }
}

impl<E, A> From<Result<A, Cause<E>>> for Exit<E, A> {
    fn from(result: Result<A, Cause<E>>) -> Self {
        Exit::from_result(result)
    }
}
