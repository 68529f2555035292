//! YaoXiang fiber runtime
//!
//! Cooperative fibers driving Rust futures on a work-stealing worker pool,
//! organised in scopes so that interruption and completion follow the
//! parent/child tree, plus the primitives fibers synchronise with.
//!
//! # Example
//!
//! ```no_run
//! use yaoxiang_fiber::runtime::{fiber, sync::Queue, Cause, Runtime};
//!
//! let runtime = Runtime::new();
//! let sum = runtime.run(async {
//!     let queue = Queue::bounded(4);
//!     let producer = {
//!         let queue = queue.clone();
//!         fiber::fork(async move {
//!             for i in 1..=10u64 {
//!                 queue.offer(i).await?;
//!             }
//!             Ok::<_, Cause<()>>(())
//!         })
//!     };
//!     let items = queue.take_n(10).await?;
//!     producer.join().await?;
//!     Ok::<u64, Cause<()>>(items.into_iter().sum())
//! });
//! assert_eq!(sum, Ok(55));
//! ```

#![doc(html_root_url = "https://docs.rs/yaoxiang-fiber")]
#![warn(rust_2018_idioms)]

pub mod pipeline;
pub mod runtime;
pub mod util;

pub use runtime::{Cause, Exit, Fiber, FiberId, Interrupted, Runtime};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "YaoXiang fiber runtime (爻象)";
