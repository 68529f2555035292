//! Fiber scopes
//!
//! Every fiber is registered into exactly one scope when it is forked: the
//! process-wide [`GlobalScope`] for daemons and roots, or the local scope of
//! its parent. The scope keeps the child reachable for interruption and
//! forgets it once it terminates.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use super::{FiberId, FiberMessage, FiberRuntime, RuntimeFlags};
use crate::runtime::error::FiberError;

static GLOBAL: OnceCell<GlobalScope> = OnceCell::new();

/// Root scope of the process; fibers forked as daemons live here.
#[derive(Debug)]
pub struct GlobalScope {
    roots: Mutex<IndexMap<FiberId, Arc<FiberRuntime>>>,
}

impl GlobalScope {
    fn new() -> Self {
        Self {
            roots: Mutex::new(IndexMap::new()),
        }
    }

    /// Initialize the global scope explicitly.
    ///
    /// Fails when it already exists, either from an earlier `init` or from
    /// implicit initialization by [`global_scope`].
    pub fn init() -> Result<&'static GlobalScope, FiberError> {
        let mut created = false;
        let scope = GLOBAL.get_or_init(|| {
            created = true;
            GlobalScope::new()
        });
        if created {
            Ok(scope)
        } else {
            Err(FiberError::GlobalScopeInitialized)
        }
    }

    /// Ids of the live root fibers, in registration order.
    pub fn roots(&self) -> Vec<FiberId> {
        self.roots.lock().keys().cloned().collect()
    }

    #[inline]
    pub fn contains(
        &self,
        id: &FiberId,
    ) -> bool {
        self.roots.lock().contains_key(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.roots.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.roots.lock().is_empty()
    }

    fn add(
        &'static self,
        child: &Arc<FiberRuntime>,
    ) {
        self.roots
            .lock()
            .insert(child.id().clone(), child.clone());
        let id = child.id().clone();
        child.add_observer(move || {
            self.roots.lock().shift_remove(&id);
        });
    }
}

/// The process-wide root scope, created on first use.
pub fn global_scope() -> &'static GlobalScope {
    GLOBAL.get_or_init(GlobalScope::new)
}

/// Where a forked fiber is registered.
#[derive(Clone)]
pub enum FiberScope {
    /// The process root; children have no parent.
    Global(&'static GlobalScope),
    /// The scope of a running fiber.
    Local {
        fiber_id: FiberId,
        parent: Arc<FiberRuntime>,
    },
}

impl FiberScope {
    #[inline]
    pub fn global() -> Self {
        FiberScope::Global(global_scope())
    }

    pub fn local(parent: &Arc<FiberRuntime>) -> Self {
        FiberScope::Local {
            fiber_id: parent.id().clone(),
            parent: parent.clone(),
        }
    }

    /// `FiberId::None` for the global scope, the owning fiber's id otherwise.
    pub fn fiber_id(&self) -> FiberId {
        match self {
            FiberScope::Global(_) => FiberId::None,
            FiberScope::Local { fiber_id, .. } => fiber_id.clone(),
        }
    }

    /// Register `child`; it is removed again when it terminates.
    ///
    /// A local scope defers the registration to its parent's mailbox, so the
    /// parent's children are only changed on the parent's own turn. A parent
    /// that already finished interrupts the child on registration.
    pub fn add(
        &self,
        _flags: RuntimeFlags,
        child: &Arc<FiberRuntime>,
    ) {
        match self {
            FiberScope::Global(scope) => scope.add(child),
            FiberScope::Local { parent, .. } => {
                let child = child.clone();
                parent.tell(FiberMessage::stateful(move |parent| {
                    parent.add_child(&child)
                }));
            }
        }
    }
}

impl fmt::Debug for FiberScope {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            FiberScope::Global(_) => f.write_str("FiberScope::Global"),
            FiberScope::Local { fiber_id, .. } => write!(f, "FiberScope::Local({})", fiber_id),
        }
    }
}
