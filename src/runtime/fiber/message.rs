//! Messages delivered to a fiber's mailbox.

use std::fmt;
use std::sync::Arc;

use super::{FiberId, FiberRuntime};

/// Work a fiber performs on its own turn.
pub enum FiberMessage {
    /// Mutate the fiber's own state; runs on the fiber's turn only.
    Stateful(Box<dyn FnOnce(&Arc<FiberRuntime>) + Send>),
    /// The fiber was interrupted by the given fiber.
    InterruptSignal(FiberId),
    /// Wake the fiber without other effect.
    Resume,
}

impl FiberMessage {
    /// Wrap a closure as a stateful message.
    pub fn stateful(f: impl FnOnce(&Arc<FiberRuntime>) + Send + 'static) -> Self {
        FiberMessage::Stateful(Box::new(f))
    }
}

impl fmt::Debug for FiberMessage {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            FiberMessage::Stateful(_) => f.write_str("Stateful(..)"),
            FiberMessage::InterruptSignal(by) => write!(f, "InterruptSignal({})", by),
            FiberMessage::Resume => f.write_str("Resume"),
        }
    }
}
