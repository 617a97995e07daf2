use super::{ChunkCollection, ChunkStore, StorageError, StorageResult};
use crate::types::DocumentId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Chunk store kept entirely in memory. Clones share the same collections.
#[derive(Clone, Debug, Default)]
pub struct InMemoryChunkStore {
    collections: Arc<DashMap<DocumentId, ChunkCollection>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    pub fn clear(&self) {
        self.collections.clear();
    }
}

impl ChunkStore for InMemoryChunkStore {
    fn create_collection(&self, collection: ChunkCollection) -> StorageResult<()> {
        match self.collections.entry(collection.document_id.clone()) {
            Entry::Occupied(occupied) => Err(StorageError::AlreadyExists(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(collection);
                Ok(())
            }
        }
    }

    fn put_collection(&self, collection: ChunkCollection) -> StorageResult<()> {
        self.collections
            .insert(collection.document_id.clone(), collection);
        Ok(())
    }

    fn get_collection(&self, document_id: &DocumentId) -> StorageResult<Option<ChunkCollection>> {
        Ok(self
            .collections
            .get(document_id)
            .map(|entry| entry.value().clone()))
    }

    fn delete_collection(&self, document_id: &DocumentId) -> StorageResult<bool> {
        Ok(self.collections.remove(document_id).is_some())
    }

    fn document_ids(&self) -> StorageResult<Vec<DocumentId>> {
        let mut ids: Vec<DocumentId> = self
            .collections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn contains(&self, document_id: &DocumentId) -> StorageResult<bool> {
        Ok(self.collections.contains_key(document_id))
    }
}
