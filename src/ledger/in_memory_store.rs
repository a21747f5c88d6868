use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use super::{Snapshot, SnapshotStore, StoreError};

/// Keeps the last saved snapshot in memory only.
///
/// Clones share the same storage, so a test can keep a handle and inspect
/// what the ledger wrote.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    stored: Arc<Mutex<Option<Snapshot>>>,
    saves: Arc<AtomicUsize>,
}

impl InMemorySnapshotStore {
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            stored: Arc::new(Mutex::new(Some(snapshot))),
            saves: Arc::default(),
        }
    }

    pub fn stored(&self) -> Option<Snapshot> {
        self.stored.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.stored())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        *self.stored.lock() = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
