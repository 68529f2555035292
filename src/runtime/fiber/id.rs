//! Fiber identity
//!
//! A [`FiberId`] names the fiber that started a computation, requested an
//! interruption, or is blocking on a primitive. Several concurrent sources
//! collapse into a [`FiberId::Composite`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::runtime::clock::ClockRef;

/// Identity of a fiber, or of a group of fibers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FiberId {
    /// No fiber (code running outside the runtime, the global scope).
    #[default]
    None,
    /// A single runtime fiber.
    Runtime {
        /// Sequence number, unique per process.
        id: u64,
        /// Creation time in milliseconds.
        start_time_millis: u64,
    },
    /// Several fibers at once. Never contains `None` or nested composites.
    Composite(BTreeSet<FiberId>),
}

impl FiberId {
    /// Create a runtime fiber id.
    #[inline]
    pub fn runtime(
        id: u64,
        start_time_millis: u64,
    ) -> Self {
        FiberId::Runtime {
            id,
            start_time_millis,
        }
    }

    /// Returns true for [`FiberId::None`].
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, FiberId::None)
    }

    /// Merge two ids. `None` is the identity and composites are flattened.
    pub fn combine(
        &self,
        that: &FiberId,
    ) -> FiberId {
        let mut set = BTreeSet::new();
        self.collect_into(&mut set);
        that.collect_into(&mut set);
        FiberId::from_set(set)
    }

    /// Merge any number of ids.
    pub fn combine_all<'a>(ids: impl IntoIterator<Item = &'a FiberId>) -> FiberId {
        let mut set = BTreeSet::new();
        for id in ids {
            id.collect_into(&mut set);
        }
        FiberId::from_set(set)
    }

    /// The single runtime ids contained in this id.
    pub fn to_set(&self) -> BTreeSet<FiberId> {
        let mut set = BTreeSet::new();
        self.collect_into(&mut set);
        set
    }

    /// Sequence numbers of every runtime id contained in this id.
    pub fn ids(&self) -> BTreeSet<u64> {
        self.to_set()
            .into_iter()
            .filter_map(|id| match id {
                FiberId::Runtime { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Sequence number of a single runtime id.
    #[inline]
    pub fn seq(&self) -> Option<u64> {
        match self {
            FiberId::Runtime { id, .. } => Some(*id),
            _ => None,
        }
    }

    fn collect_into(
        &self,
        set: &mut BTreeSet<FiberId>,
    ) {
        match self {
            FiberId::None => {}
            FiberId::Runtime { .. } => {
                set.insert(self.clone());
            }
            FiberId::Composite(ids) => {
                for id in ids {
                    id.collect_into(set);
                }
            }
        }
    }

    fn from_set(mut set: BTreeSet<FiberId>) -> FiberId {
        match set.len() {
            0 => FiberId::None,
            1 => set.pop_first().unwrap_or(FiberId::None),
            _ => FiberId::Composite(set),
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            FiberId::None => write!(f, "#none"),
            FiberId::Runtime { id, .. } => write!(f, "#{}", id),
            FiberId::Composite(ids) => {
                let parts: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                write!(f, "{}", parts.join("+"))
            }
        }
    }
}

/// Monotonic source of fiber ids.
///
/// Shared by every scheduler in the process so ids stay unique even when
/// several runtimes are alive.
#[derive(Debug)]
pub struct FiberIdGenerator {
    next_id: AtomicU64,
}

static PROCESS_IDS: FiberIdGenerator = FiberIdGenerator::new();

impl FiberIdGenerator {
    /// Create a new generator starting at zero.
    #[inline]
    pub const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
        }
    }

    /// The process-wide generator.
    #[inline]
    pub fn process() -> &'static FiberIdGenerator {
        &PROCESS_IDS
    }

    /// Allocate the next id, stamped with the clock's current time.
    #[inline]
    pub fn next(
        &self,
        clock: &ClockRef,
    ) -> FiberId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        FiberId::runtime(id, clock.now_millis())
    }
}

impl Default for FiberIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
