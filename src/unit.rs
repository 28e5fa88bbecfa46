// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution-unit identity.
//!
//! Local values belong to exactly one *execution unit*: a thread, or an async
//! task wrapped in [`ApplyUnit`](crate::context::ApplyUnit). This module hands
//! out a [`UnitId`] for whichever unit is running right now.
//!
//! Identities come from native thread-local storage. No stack traces are
//! parsed and nothing is allocated on the lookup path.
//!
//! # Swapping the provider
//!
//! The [`UnitIdentity`] trait is the seam. Every context chain carries the
//! provider it was rooted with (see
//! [`Context::background_with_identity`](crate::Context::background_with_identity)),
//! and the `unchecked` cargo feature switches the default to
//! [`ConstantIdentity`], which removes every affinity check. That is a
//! performance trade-off for builds that have already been validated with
//! checks on; it is never the default.

use std::cell::Cell;
use std::fmt::{Debug, Display};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

static NEXT_UNIT: AtomicU64 = AtomicU64::new(1);

// 0 means "not assigned yet" / "no task scope active".
thread_local! {
    static THREAD_UNIT: Cell<u64> = const { Cell::new(0) };
    static TASK_UNIT: Cell<u64> = const { Cell::new(0) };
}

/// Identifies one execution unit.
///
/// Ids are unique for the life of the process, so two live units never
/// compare equal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct UnitId(u64);

impl UnitId {
    /// Allocates an id that no other unit has.
    pub(crate) fn fresh() -> UnitId {
        UnitId(NEXT_UNIT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw value, for logging.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// Answers "which execution unit is running?".
pub trait UnitIdentity: Debug + Send + Sync {
    /// The id of the calling unit. Must be stable for the unit's lifetime and
    /// cheap; it runs on every local read and write.
    fn current(&self) -> UnitId;

    /// Whether ids from this provider actually distinguish units.
    ///
    /// Providers that return `false` make every affinity check pass, and
    /// double localization goes undetected.
    fn is_checked(&self) -> bool {
        true
    }
}

/// The default provider: the active [`ApplyUnit`](crate::context::ApplyUnit)
/// task scope if there is one, otherwise the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadIdentity;

impl UnitIdentity for ThreadIdentity {
    #[inline]
    fn current(&self) -> UnitId {
        current_unit()
    }
}

/// A provider that considers every unit to be the same unit.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantIdentity;

impl UnitIdentity for ConstantIdentity {
    #[inline]
    fn current(&self) -> UnitId {
        UnitId(0)
    }

    fn is_checked(&self) -> bool {
        false
    }
}

/// Returns the [`ThreadIdentity`] answer for the calling unit.
///
/// ```
/// let here = localwise::current_unit();
/// assert_eq!(here, localwise::current_unit());
///
/// let there = std::thread::spawn(localwise::current_unit).join().unwrap();
/// assert_ne!(here, there);
/// ```
#[inline]
pub fn current_unit() -> UnitId {
    let task = TASK_UNIT.with(Cell::get);
    if task != 0 {
        return UnitId(task);
    }
    THREAD_UNIT.with(|cell| {
        let id = cell.get();
        if id != 0 {
            UnitId(id)
        } else {
            let fresh = UnitId::fresh();
            cell.set(fresh.0);
            fresh
        }
    })
}

/// The provider used by [`Context::background`](crate::Context::background).
pub(crate) fn default_identity() -> Arc<dyn UnitIdentity> {
    static DEFAULT: OnceLock<Arc<dyn UnitIdentity>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| {
            #[cfg(feature = "unchecked")]
            {
                Arc::new(ConstantIdentity)
            }
            #[cfg(not(feature = "unchecked"))]
            {
                Arc::new(ThreadIdentity)
            }
        })
        .clone()
}

/// Installs `unit` as the task scope of this thread until dropped.
pub(crate) struct TaskScope {
    previous: u64,
}

impl TaskScope {
    pub(crate) fn enter(unit: UnitId) -> TaskScope {
        let previous = TASK_UNIT.with(|cell| cell.replace(unit.0));
        TaskScope { previous }
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        TASK_UNIT.with(|cell| cell.set(self.previous));
    }
}
