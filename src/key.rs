// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keys, values, and the snapshot capability.

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;

/// A value stored in a context, either in the immutable chain or in a local overlay.
///
/// Use [`Context::value_as`](crate::Context::value_as) to get a typed `Arc<T>` back.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Identifies a value in a context.
///
/// Keys are either names or types. A type key made from a private marker type
/// cannot collide with keys from other crates:
///
/// ```
/// use localwise::Key;
///
/// struct RequestId;
///
/// assert_eq!(Key::of::<RequestId>(), Key::of::<RequestId>());
/// assert_ne!(Key::of::<RequestId>(), Key::name("RequestId"));
/// assert_eq!(Key::from("user"), Key::name(String::from("user")));
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key(Repr);

#[derive(Clone, PartialEq, Eq, Hash)]
enum Repr {
    Name(Cow<'static, str>),
    Type(TypeId, &'static str),
}

impl Key {
    pub fn name(name: impl Into<Cow<'static, str>>) -> Key {
        Key(Repr::Name(name.into()))
    }

    pub fn of<T: 'static>() -> Key {
        Key(Repr::Type(TypeId::of::<T>(), std::any::type_name::<T>()))
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Repr::Name(name) => write!(f, "Key({name:?})"),
            Repr::Type(_, type_name) => write!(f, "Key(<{type_name}>)"),
        }
    }
}

impl From<&'static str> for Key {
    fn from(name: &'static str) -> Self {
        Key::name(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::name(name)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

/// Opt-in capability for local values that may follow a context into a new
/// execution unit.
///
/// When a context is [localized](crate::Context::localize), every local value
/// inherited from the parent overlay is reset to absent, unless it was stored
/// with [`with_snapshot_value`](crate::Context::with_snapshot_value). Those
/// values are copied with [`Snapshot::snapshot`] instead, and the copy is what
/// the new unit sees.
///
/// The snapshot must be independent of the original: later changes on either
/// side must not be visible on the other.
///
/// ```
/// use localwise::Snapshot;
///
/// #[derive(Debug, PartialEq)]
/// struct Budget(u32);
///
/// impl Snapshot for Budget {
///     fn snapshot(&self) -> Self {
///         Budget(self.0)
///     }
/// }
/// ```
pub trait Snapshot: Any + Send + Sync {
    fn snapshot(&self) -> Self
    where
        Self: Sized;
}

type SnapshotFn = fn(&Value) -> Option<Value>;

fn snapshot_of<T: Snapshot>(value: &Value) -> Option<Value> {
    value
        .downcast_ref::<T>()
        .map(|v| Arc::new(v.snapshot()) as Value)
}

/// One slot of a local overlay.
#[derive(Clone)]
pub(crate) enum Entry {
    /// Present but hiding whatever an ancestor overlay held.
    Shadowed,
    Private(Value),
    Shared { value: Value, snapshot: SnapshotFn },
}

impl Entry {
    pub(crate) fn private<T: Any + Send + Sync>(value: T) -> Entry {
        Entry::Private(Arc::new(value))
    }

    pub(crate) fn shared<T: Snapshot>(value: T) -> Entry {
        Entry::Shared {
            value: Arc::new(value),
            snapshot: snapshot_of::<T>,
        }
    }

    /// What a child overlay stores for this slot.
    pub(crate) fn inherit(&self) -> Entry {
        match self {
            Entry::Shadowed | Entry::Private(_) => Entry::Shadowed,
            Entry::Shared { value, snapshot } => match snapshot(value) {
                Some(value) => Entry::Shared {
                    value,
                    snapshot: *snapshot,
                },
                None => Entry::Shadowed,
            },
        }
    }

    pub(crate) fn value(&self) -> Option<Value> {
        match self {
            Entry::Shadowed => None,
            Entry::Private(value) | Entry::Shared { value, .. } => Some(value.clone()),
        }
    }
}

impl Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entry::Shadowed => f.write_str("Shadowed"),
            Entry::Private(_) => f.write_str("Private(..)"),
            Entry::Shared { .. } => f.write_str("Shared(..)"),
        }
    }
}
