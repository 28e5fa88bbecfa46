// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-owner local value storage.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::key::{Entry, Key, Value};
use crate::spinlock::RwSpinlock;
use crate::unit::{UnitId, UnitIdentity};
use crate::violation::Violation;

/// Mutable key/value storage bound to one execution unit.
///
/// Only the owner may read or write entries. The lock exists so that other
/// units can safely do the two things they are allowed to do: check whether a
/// key is present (on their way up the chain to an immutable value) and walk
/// the entries while building their own overlay in [`LocalOverlay::create`].
pub(crate) struct LocalOverlay {
    owner: UnitId,
    identity: Arc<dyn UnitIdentity>,
    values: RwSpinlock<HashMap<Key, Entry>>,
}

impl LocalOverlay {
    /// Creates an overlay owned by the calling unit.
    ///
    /// Every key of `parent` is carried over, either as a snapshot (for
    /// values stored with the snapshot capability) or as a shadow entry that
    /// hides the parent's value.
    pub(crate) fn create(
        identity: Arc<dyn UnitIdentity>,
        parent: Option<&LocalOverlay>,
    ) -> LocalOverlay {
        let owner = identity.current();
        let values = match parent {
            Some(parent) => {
                let inherited = parent.values.read();
                let mut values = HashMap::with_capacity(inherited.len());
                for (key, entry) in inherited.iter() {
                    values.insert(key.clone(), entry.inherit());
                }
                values
            }
            None => HashMap::new(),
        };
        LocalOverlay {
            owner,
            identity,
            values: RwSpinlock::new(values),
        }
    }

    #[inline]
    pub(crate) fn owner(&self) -> UnitId {
        self.owner
    }

    #[inline]
    pub(crate) fn is_owned_by_current(&self) -> bool {
        self.identity.current() == self.owner
    }

    #[track_caller]
    #[inline]
    fn check_affinity(&self) {
        let current = self.identity.current();
        if current != self.owner {
            Violation::ThreadAffinity {
                owner: self.owner,
                current,
            }
            .raise();
        }
    }

    /// Looks up `key`.
    ///
    /// `None` means this overlay has no opinion and the caller should keep
    /// looking. `Some(None)` is a shadowed entry: the key is deliberately absent.
    /// Only absent keys may be probed by non-owners.
    #[track_caller]
    pub(crate) fn get(&self, key: &Key) -> Option<Option<Value>> {
        let values = self.values.read();
        let entry = values.get(key)?;
        self.check_affinity();
        Some(entry.value())
    }

    #[track_caller]
    pub(crate) fn set(&self, key: Key, entry: Entry) {
        self.check_affinity();
        self.values.write().insert(key, entry);
    }

    /// Number of entries, shadowed ones included.
    #[track_caller]
    pub(crate) fn len(&self) -> usize {
        self.check_affinity();
        self.values.read().len()
    }
}

impl Debug for LocalOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalOverlay")
            .field("owner", &self.owner)
            .field("values", &self.values)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Snapshot;
    use crate::unit::{ConstantIdentity, ThreadIdentity};

    #[cfg(target_arch = "wasm32")]
    use wasm_bindgen_test::*;

    #[derive(Debug, PartialEq)]
    struct Hits(u32);

    impl Snapshot for Hits {
        fn snapshot(&self) -> Self {
            Hits(self.0)
        }
    }

    fn thread_identity() -> Arc<dyn UnitIdentity> {
        Arc::new(ThreadIdentity)
    }

    fn get_str(overlay: &LocalOverlay, key: &'static str) -> Option<Option<&'static str>> {
        overlay
            .get(&Key::name(key))
            .map(|found| found.and_then(|v| v.downcast_ref::<&'static str>().copied()))
    }

    #[cfg_attr(not(target_arch = "wasm32"), test)]
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    fn owner_reads_own_writes() {
        let overlay = LocalOverlay::create(thread_identity(), None);
        assert_eq!(overlay.len(), 0);
        assert_eq!(get_str(&overlay, "k"), None);

        overlay.set(Key::name("k"), Entry::private("v"));
        assert_eq!(get_str(&overlay, "k"), Some(Some("v")));
        overlay.set(Key::name("k"), Entry::private("w"));
        assert_eq!(get_str(&overlay, "k"), Some(Some("w")));
        assert_eq!(overlay.len(), 1);
        assert!(overlay.is_owned_by_current());
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn create_shadows_and_snapshots_parent() {
        let parent = Arc::new(LocalOverlay::create(thread_identity(), None));
        parent.set(Key::name("scratch"), Entry::private("parent"));
        parent.set(Key::name("hits"), Entry::shared(Hits(3)));

        let shared_parent = parent.clone();
        std::thread::spawn(move || {
            let child = LocalOverlay::create(thread_identity(), Some(&shared_parent));
            assert_ne!(child.owner(), shared_parent.owner());
            assert_eq!(child.len(), 2);
            assert_eq!(get_str(&child, "scratch"), Some(None));
            let hits = child.get(&Key::name("hits")).unwrap().unwrap();
            assert_eq!(hits.downcast_ref::<Hits>(), Some(&Hits(3)));
        })
        .join()
        .unwrap();

        // parent is unaffected
        assert_eq!(get_str(&parent, "scratch"), Some(Some("parent")));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn non_owner_may_probe_absent_keys_only() {
        let overlay = Arc::new(LocalOverlay::create(thread_identity(), None));
        overlay.set(Key::name("mine"), Entry::private(1u8));

        let probe = overlay.clone();
        let result = std::thread::spawn(move || {
            assert!(probe.get(&Key::name("absent")).is_none());
            assert!(!probe.is_owned_by_current());
            probe.get(&Key::name("mine"));
        })
        .join();
        let payload = result.unwrap_err();
        assert!(matches!(
            payload.downcast_ref::<Violation>(),
            Some(Violation::ThreadAffinity { .. })
        ));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn non_owner_write_panics() {
        let overlay = Arc::new(LocalOverlay::create(thread_identity(), None));
        let other = overlay.clone();
        let payload = std::thread::spawn(move || {
            other.set(Key::name("k"), Entry::private(()));
        })
        .join()
        .unwrap_err();
        assert!(matches!(
            payload.downcast_ref::<Violation>(),
            Some(Violation::ThreadAffinity { .. })
        ));
        assert_eq!(overlay.len(), 0);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn constant_identity_skips_checks() {
        let overlay = Arc::new(LocalOverlay::create(Arc::new(ConstantIdentity), None));
        let other = overlay.clone();
        std::thread::spawn(move || {
            other.set(Key::name("k"), Entry::private("from elsewhere"));
        })
        .join()
        .unwrap();
        assert_eq!(get_str(&overlay, "k"), Some(Some("from elsewhere")));
    }
}
