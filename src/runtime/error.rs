//! Runtime bookkeeping errors
//!
//! These indicate a broken invariant of the runtime itself, not an expected
//! condition of a running program. Expected conditions (interruption, a shut
//! down queue) travel through [`Cause`](crate::runtime::cause::Cause) instead.

/// Fiber runtime errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FiberError {
    /// The process-wide root scope was initialized a second time.
    #[error("bug: global fiber scope initialized twice (maybe from a duplicated runtime)")]
    GlobalScopeInitialized,

    /// A message was sent to a fiber whose scheduler is gone.
    #[error("fiber {fiber} cannot receive messages: its scheduler has shut down")]
    SchedulerGone { fiber: String },

    /// `fork` was called outside of a fiber.
    #[error("no fiber is running on this thread; use Runtime::fork_daemon or Runtime::block_on")]
    NoCurrentFiber,
}
