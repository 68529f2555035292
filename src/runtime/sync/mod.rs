//! Synchronization primitives for fibers.

pub mod deferred;
pub mod queue;


pub use deferred::{Deferred, ObserverKey, Wait};
pub use queue::{Offer, Queue, Strategy, Take};
