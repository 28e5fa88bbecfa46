// SPDX-License-Identifier: MIT OR Apache-2.0

//! Context chains with execution-unit-local overlays.
//!
//! A [`Context`] has two layers:
//!
//! - an immutable chain of key/value pairs, cancellation, and deadlines that
//!   any number of threads and tasks can read at once, and
//! - local overlays: mutable key/value stores that each belong to exactly one
//!   execution unit.
//!
//! # Localizing
//!
//! A context that crosses into a new thread or task must be
//! [localized](Context::localize) there before local values are used. That is
//! the only boundary-crossing step: it binds a fresh overlay to the calling
//! unit and shadows every local key the context already had.
//!
//! ```rust
//! use localwise::Context;
//!
//! let parent = Context::local();
//! parent.with_local_value("dup", "P");
//!
//! let shared = parent.clone();
//! std::thread::spawn(move || {
//!     let child = shared.localize();
//!     // the parent's local is shadowed, not inherited
//!     assert!(child.value("dup").is_none());
//! })
//! .join()
//! .unwrap();
//!
//! assert_eq!(parent.value_as::<&str>("dup").as_deref(), Some(&"P"));
//! ```
//!
//! Types that are safe to hand to another unit can opt into propagation with
//! [`Snapshot`](crate::Snapshot) and [`Context::with_snapshot_value`].
//!
//! # Lookup order
//!
//! [`Context::value`] walks from the context toward the root. The first
//! overlay that holds the key answers, even if the entry is a shadow. Only if
//! no overlay holds the key does the immutable chain answer.
//!
//! # Affinity
//!
//! Reading or writing an overlay from a unit that does not own it panics with
//! a [`Violation`](crate::Violation), as does localizing the same context twice
//! on one unit. These are programmer errors and are never retried.
//!
//! # Async tasks
//!
//! Wrap a future in [`ApplyUnit`] to make it an execution unit of its own,
//! independent of which executor thread polls it.
//!
//! # Free functions
//!
//! The crate root also offers the same operations as free functions
//! ([`background`], [`with_value`], [`localize`], [`with_local_value`],
//! [`value`]) for callers that prefer that style.

mod apply_unit;
mod context_impl;
mod overlay;


// Re-export public types
pub use apply_unit::ApplyUnit;
pub use context_impl::Context;

use std::any::Any;

use crate::key::{Key, Value};

/// See [`Context::background`].
pub fn background() -> Context {
    Context::background()
}

/// See [`Context::with_value`].
pub fn with_value<T: Any + Send + Sync>(ctx: &Context, key: impl Into<Key>, value: T) -> Context {
    ctx.with_value(key, value)
}

/// See [`Context::localize`].
#[track_caller]
pub fn localize(ctx: &Context) -> Context {
    ctx.localize()
}

/// See [`Context::with_local_value`].
#[track_caller]
pub fn with_local_value<T: Any + Send + Sync>(ctx: &Context, key: impl Into<Key>, value: T) {
    ctx.with_local_value(key, value)
}

/// See [`Context::value`].
#[track_caller]
pub fn value(ctx: &Context, key: impl Into<Key>) -> Option<Value> {
    ctx.value(key)
}
