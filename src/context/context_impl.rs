// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core Context implementation.

use std::any::Any;
use std::hash::{Hash, Hasher};
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::sync::Arc;

use super::overlay::LocalOverlay;
use crate::cancel::{CancelHandle, CancelState, ContextError, Done};
use crate::deadline;
use crate::key::{Entry, Key, Snapshot, Value};
use crate::sys::{Duration, Instant};
use crate::unit::{UnitIdentity, default_identity};
use crate::violation::Violation;

/// What a single link of the chain contributes.
#[derive(Debug)]
pub(crate) enum Node {
    Root,
    Value { key: Key, value: Value },
    Cancel(Arc<CancelState>),
    Local(LocalOverlay),
}

/// Internal context data.
///
/// This structure holds the actual context state, wrapped in an Arc for cheap cloning.
#[derive(Debug)]
pub(crate) struct ContextInner {
    pub(crate) parent: Option<Context>,
    pub(crate) identity: Arc<dyn UnitIdentity>,
    pub(crate) node: Node,
}

/// A shareable context chain with optional execution-unit-local values.
///
/// A `Context` is a link in a parent-pointer chain. Every link is immutable
/// except for local overlays, which are mutable but only by the execution unit
/// that created them with [`localize`](Context::localize).
///
/// Contexts are cheap to clone (Arc-based), `Send`, and `Sync`. Hand a clone to
/// another thread and every immutable value, the deadline, and the
/// cancellation signal come with it. Local values do not: the other thread
/// must [`localize`](Context::localize) before it can read or write locals,
/// and any attempt to touch a foreign overlay panics with a [`Violation`].
///
/// # Examples
///
/// ```rust
/// use localwise::Context;
///
/// let ctx = Context::background().with_value("immutable", "X");
///
/// std::thread::spawn(move || {
///     let local = ctx.localize();
///     local.with_local_value("k", "Y");
///
///     assert_eq!(local.value_as::<&str>("k").as_deref(), Some(&"Y"));
///     assert_eq!(local.value_as::<&str>("immutable").as_deref(), Some(&"X"));
///     assert!(ctx.value("k").is_none());
/// })
/// .join()
/// .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    pub(crate) inner: Arc<ContextInner>,
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

impl Hash for Context {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.inner).hash(state);
    }
}

// Everything but overlays is immutable, and overlay locks are released on unwind.
impl UnwindSafe for Context {}
impl RefUnwindSafe for Context {}

impl Default for Context {
    fn default() -> Self {
        Context::background()
    }
}

impl Context {
    fn link(parent: &Context, node: Node) -> Context {
        Context {
            inner: Arc::new(ContextInner {
                parent: Some(parent.clone()),
                identity: parent.inner.identity.clone(),
                node,
            }),
        }
    }

    /// Walks from this context to the root.
    fn ancestors(&self) -> impl Iterator<Item = &Context> {
        std::iter::successors(Some(self), |c| c.inner.parent.as_ref())
    }

    pub(crate) fn nearest_overlay(&self) -> Option<&LocalOverlay> {
        self.ancestors().find_map(|c| match &c.inner.node {
            Node::Local(overlay) => Some(overlay),
            _ => None,
        })
    }

    fn nearest_cancel(&self) -> Option<&Arc<CancelState>> {
        self.ancestors().find_map(|c| match &c.inner.node {
            Node::Cancel(state) => Some(state),
            _ => None,
        })
    }

    /// An empty root context with no locals, no deadline, and no cancellation.
    ///
    /// Units are identified with the default provider: [`ThreadIdentity`](crate::ThreadIdentity),
    /// or [`ConstantIdentity`](crate::ConstantIdentity) when built with the `unchecked` feature.
    pub fn background() -> Context {
        Context::background_with_identity(default_identity())
    }

    /// An empty root context whose chain identifies units with `identity`.
    ///
    /// Every context derived from the returned one uses the same provider.
    pub fn background_with_identity(identity: Arc<dyn UnitIdentity>) -> Context {
        Context {
            inner: Arc::new(ContextInner {
                parent: None,
                identity,
                node: Node::Root,
            }),
        }
    }

    /// Shorthand for `Context::background().localize()`.
    #[track_caller]
    pub fn local() -> Context {
        Context::background().localize()
    }

    /// Returns a child context carrying an immutable `key`/`value` pair.
    ///
    /// Immutable values are visible from every unit and are never shadowed by
    /// [`localize`](Context::localize).
    pub fn with_value<T: Any + Send + Sync>(&self, key: impl Into<Key>, value: T) -> Context {
        Context::link(
            self,
            Node::Value {
                key: key.into(),
                value: Arc::new(value),
            },
        )
    }

    /// Looks up `key`, local values first.
    ///
    /// Walking toward the root, the first overlay that holds `key` decides the
    /// answer, even when that entry is a shadow (which yields `None`). Only
    /// when no overlay holds `key` does an immutable value answer.
    ///
    /// # Panics
    ///
    /// With [`Violation::ThreadAffinity`] if the deciding overlay belongs to a
    /// different execution unit.
    #[track_caller]
    pub fn value(&self, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        for ctx in self.ancestors() {
            match &ctx.inner.node {
                Node::Local(overlay) => {
                    if let Some(found) = overlay.get(&key) {
                        return found;
                    }
                }
                Node::Value { key: k, value } if *k == key => return Some(value.clone()),
                _ => {}
            }
        }
        None
    }

    /// Like [`value`](Context::value), downcast to `T`.
    ///
    /// Returns `None` if the value is absent or of another type.
    #[track_caller]
    pub fn value_as<T: Any + Send + Sync>(&self, key: impl Into<Key>) -> Option<Arc<T>> {
        self.value(key).and_then(|v| v.downcast::<T>().ok())
    }

    /// Binds a fresh local overlay to the calling execution unit.
    ///
    /// Every local key of the nearest ancestor overlay is carried into the new
    /// overlay as a shadow, so ancestor locals read as absent, unless the value
    /// was stored with [`with_snapshot_value`](Context::with_snapshot_value), in
    /// which case the new unit gets its own snapshot.
    ///
    /// Call this exactly once per execution unit, before any local read or write.
    ///
    /// # Panics
    ///
    /// With [`Violation::DoubleLocalization`] if the nearest overlay already
    /// belongs to the calling unit (unless the chain's identity provider is
    /// unchecked).
    #[track_caller]
    pub fn localize(&self) -> Context {
        let identity = self.inner.identity.clone();
        let ancestor = self.nearest_overlay();
        if let Some(ancestor) = ancestor {
            if identity.is_checked() && ancestor.is_owned_by_current() {
                Violation::DoubleLocalization {
                    unit: ancestor.owner(),
                }
                .raise();
            }
        }
        let overlay = LocalOverlay::create(identity, ancestor);
        logwise::trace_sync!(
            "localize to {unit} inheriting {inherited} keys",
            unit = overlay.owner().as_u64(),
            inherited = overlay.len()
        );
        Context::link(self, Node::Local(overlay))
    }

    /// Whether the nearest overlay exists and belongs to the calling unit.
    pub fn is_localized(&self) -> bool {
        self.nearest_overlay()
            .is_some_and(LocalOverlay::is_owned_by_current)
    }

    /// Sets a local value on the nearest overlay.
    ///
    /// The value is private to this unit: a context localized from this one
    /// sees the key as absent.
    ///
    /// # Panics
    ///
    /// With [`Violation::NotLocalized`] if the chain has no overlay, or
    /// [`Violation::ThreadAffinity`] if the nearest overlay belongs to another unit.
    #[track_caller]
    pub fn with_local_value<T: Any + Send + Sync>(&self, key: impl Into<Key>, value: T) {
        self.set_local(key.into(), Entry::private(value));
    }

    /// Sets a local value that follows the context into new units as a snapshot.
    ///
    /// Same ownership rules and panics as [`with_local_value`](Context::with_local_value).
    #[track_caller]
    pub fn with_snapshot_value<T: Snapshot>(&self, key: impl Into<Key>, value: T) {
        self.set_local(key.into(), Entry::shared(value));
    }

    #[track_caller]
    fn set_local(&self, key: Key, entry: Entry) {
        match self.nearest_overlay() {
            Some(overlay) => overlay.set(key, entry),
            None => Violation::NotLocalized.raise(),
        }
    }

    /// Returns a child context and a handle that cancels it.
    ///
    /// The child is also cancelled whenever this context is.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let parent = self.nearest_cancel();
        let state = Arc::new(CancelState::new(
            parent.and_then(|p| p.deadline()),
            None,
        ));
        if let Some(parent) = parent {
            parent.adopt(&state);
        }
        (
            Context::link(self, Node::Cancel(state.clone())),
            CancelHandle::new(state),
        )
    }

    /// Returns a child context cancelled at `deadline` at the latest.
    ///
    /// If this context already has an earlier deadline, that one is kept.
    /// A deadline in the past produces a context that is already done.
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancelHandle) {
        if self.deadline().is_some_and(|current| current <= deadline) {
            return self.with_cancel();
        }
        let parent = self.nearest_cancel();
        let watch_id = deadline::next_watch_id();
        let state = Arc::new(CancelState::new(Some(deadline), Some(watch_id)));
        if let Some(parent) = parent {
            parent.adopt(&state);
        }
        if Instant::now() >= deadline {
            state.cancel(ContextError::DeadlineExceeded);
        } else if state.err().is_none() {
            deadline::register(watch_id, deadline, &state);
        }
        (
            Context::link(self, Node::Cancel(state.clone())),
            CancelHandle::new(state),
        )
    }

    /// `with_deadline(now + timeout)`.
    ///
    /// A timeout too large to represent as an [`Instant`] adds no deadline,
    /// and behaves like [`with_cancel`](Context::with_cancel).
    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelHandle) {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.with_cancel(),
        }
    }

    /// The time at which this context will be cancelled, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.nearest_cancel().and_then(|s| s.deadline())
    }

    /// A future that resolves when this context is cancelled.
    pub fn done(&self) -> Done {
        Done::new(self.nearest_cancel().cloned())
    }

    /// Why this context was cancelled, or `None` while it is live.
    pub fn err(&self) -> Option<ContextError> {
        self.nearest_cancel().and_then(|s| s.err())
    }

    /// The identity provider this chain was rooted with.
    pub fn identity(&self) -> &Arc<dyn UnitIdentity> {
        &self.inner.identity
    }

    /// Number of links between this context and the root.
    pub fn depth(&self) -> usize {
        self.ancestors().count() - 1
    }
}
