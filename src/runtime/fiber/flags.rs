//! Per-fiber runtime flags.

use std::fmt;
use std::ops::BitOr;

/// Bit set of behaviours a fiber runs with. Children inherit their parent's
/// flags when forked.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeFlags(u8);

impl RuntimeFlags {
    pub const NONE: RuntimeFlags = RuntimeFlags(0);
    /// Interruption requests are honoured at suspension points.
    pub const INTERRUPTION: RuntimeFlags = RuntimeFlags(1 << 0);
    /// The fiber yields its worker once its per-turn budget is spent.
    pub const COOPERATIVE_YIELDING: RuntimeFlags = RuntimeFlags(1 << 1);

    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        RuntimeFlags(bits & 0b11)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(
        self,
        other: RuntimeFlags,
    ) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn enable(
        self,
        other: RuntimeFlags,
    ) -> Self {
        RuntimeFlags(self.0 | other.0)
    }

    #[inline]
    pub const fn disable(
        self,
        other: RuntimeFlags,
    ) -> Self {
        RuntimeFlags(self.0 & !other.0)
    }

    #[inline]
    pub const fn interruptible(self) -> bool {
        self.contains(Self::INTERRUPTION)
    }

    #[inline]
    pub const fn cooperative_yielding(self) -> bool {
        self.contains(Self::COOPERATIVE_YIELDING)
    }
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self::INTERRUPTION | Self::COOPERATIVE_YIELDING
    }
}

impl BitOr for RuntimeFlags {
    type Output = RuntimeFlags;

    fn bitor(
        self,
        rhs: RuntimeFlags,
    ) -> RuntimeFlags {
        self.enable(rhs)
    }
}

impl fmt::Debug for RuntimeFlags {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut set = f.debug_set();
        if self.interruptible() {
            set.entry(&"Interruption");
        }
        if self.cooperative_yielding() {
            set.entry(&"CooperativeYielding");
        }
        set.finish()
    }
}
