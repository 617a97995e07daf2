//! Exclusion between normal traffic and maintenance.
//!
//! Indexing, deletion, question edits and retrieval hold the gate shared;
//! a rebuild holds it exclusively, so nobody observes the index while it is
//! being emptied and refilled. Edits to the same document are further
//! serialized by a per-document lock, since they read, modify and write
//! back the whole chunk collection.

use crate::types::DocumentId;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct MaintenanceGate {
    lock: RwLock<()>,
}

impl MaintenanceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks while a rebuild is running.
    pub fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    /// Blocks until all in-flight operations finish.
    pub fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }

    /// Whether a rebuild currently holds the gate.
    pub fn is_under_maintenance(&self) -> bool {
        self.lock.is_locked_exclusive()
    }
}

#[derive(Debug, Default)]
pub(crate) struct DocumentLocks {
    locks: DashMap<DocumentId, Arc<Mutex<()>>>,
}

impl DocumentLocks {
    /// The lock for one document. Callers hold the returned mutex for the
    /// whole read-modify-write.
    pub(crate) fn for_document(&self, document_id: &DocumentId) -> Arc<Mutex<()>> {
        self.locks
            .entry(document_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the entry for a document once nobody else holds its lock.
    /// Callers release their own handle first.
    pub(crate) fn release(&self, document_id: &DocumentId) {
        self.locks
            .remove_if(document_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
