//! Fibers
//!
//! A fiber is a lightweight logical thread driving one future to completion
//! on the scheduler's worker pool. Fibers form a tree through their scopes:
//! a fiber forked from another is registered as its child, is interrupted
//! when the parent is interrupted, and is awaited before the parent's exit is
//! published.

pub mod context;
pub mod flags;
pub mod handle;
pub mod id;
pub mod message;
pub mod runtime;
pub mod scope;


pub use context::{current_fiber, fiber_id, uninterruptible, yield_now, Uninterruptible, YieldNow};
pub use flags::RuntimeFlags;
pub use handle::{fork, fork_all, fork_daemon, fork_in, join_all, try_fork, Fiber};
pub use id::{FiberId, FiberIdGenerator};
pub use message::FiberMessage;
pub use runtime::{FiberRuntime, FiberStatus};
pub use scope::{global_scope, FiberScope, GlobalScope};
