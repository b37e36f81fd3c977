//! A thread-safe in-memory storage for the currently active [`Snapshot`]. [`SpecStore`] provides
//! concurrent access for readers (evaluation) and writers (the sync loops).
use std::sync::{Arc, PoisonError, RwLock};

use crate::snapshot::Snapshot;

/// `SpecStore` holds the current snapshot and allows concurrent access for readers and writers.
///
/// `Snapshot` itself is always immutable and can only be replaced completely. Readers clone the
/// `Arc` under a short read lock and evaluate against it without holding the lock.
#[derive(Default)]
pub struct SpecStore {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl SpecStore {
    /// Create a new store holding an uninitialized snapshot.
    pub fn new() -> Self {
        SpecStore::default()
    }

    /// Get the currently active snapshot.
    pub fn get_snapshot(&self) -> Arc<Snapshot> {
        // Writers never panic while holding the lock: the replacement is built before the lock is
        // taken. Recover from poisoning anyway since the slot always holds a complete snapshot.
        let snapshot = self
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&snapshot)
    }

    /// Replace the current snapshot.
    pub fn set_snapshot(&self, snapshot: Arc<Snapshot>) {
        let mut slot = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = snapshot;
    }

    /// Derive a new snapshot from the current one and install it.
    ///
    /// The specs loop and the ID-list loop each replace a different part of the snapshot. Going
    /// through `update` guarantees neither loses the other's update. `f` must be cheap: it runs
    /// under the write lock.
    pub fn update(&self, f: impl FnOnce(&Snapshot) -> Snapshot) {
        let mut slot = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Arc::new(f(&slot));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::SpecStore;
    use crate::snapshot::{IdLists, SpecSet, SyncSource};

    #[test]
    fn can_set_snapshot_from_another_thread() {
        let store = Arc::new(SpecStore::new());

        assert!(!store.get_snapshot().is_initialized());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.update(|snapshot| {
                    snapshot.with_specs(
                        SpecSet {
                            time: 42,
                            ..SpecSet::default()
                        },
                        SyncSource::Network,
                    )
                })
            })
            .join();
        }

        let snapshot = store.get_snapshot();
        assert!(snapshot.is_initialized());
        assert_eq!(snapshot.last_sync_time, 42);
    }

    #[test]
    fn readers_keep_their_snapshot_across_swaps() {
        let store = SpecStore::new();
        let before = store.get_snapshot();

        store.update(|snapshot| snapshot.with_id_lists(IdLists::new()));
        store.update(|snapshot| snapshot.with_specs(SpecSet::default(), SyncSource::Bootstrap));

        assert_eq!(before.source, SyncSource::Uninitialized);
        assert_eq!(store.get_snapshot().source, SyncSource::Bootstrap);
    }

    #[test]
    fn specs_and_id_list_updates_do_not_clobber_each_other() {
        let store = SpecStore::new();
        store.update(|snapshot| {
            snapshot.with_specs(
                SpecSet {
                    time: 7,
                    ..SpecSet::default()
                },
                SyncSource::Network,
            )
        });
        store.update(|snapshot| snapshot.with_id_lists(IdLists::new()));

        let snapshot = store.get_snapshot();
        assert_eq!(snapshot.last_sync_time, 7);
        assert_eq!(snapshot.source, SyncSource::Network);
    }
}
