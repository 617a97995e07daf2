//! In-process vector index with exact cosine search.
//!
//! Entries live behind a single `RwLock`; searches take the read lock and
//! score every candidate in parallel. The index can be snapshotted to a
//! directory (`vectors.bin` plus `metadata.json`) and loaded back.

use crate::vector::{
    Distance, IndexSnapshotMetadata, MetadataFilter, SearchHit, VectorDimension, VectorEntry,
    VectorError, VectorId, VectorIndex, VectorMetadata, cosine_similarity,
};
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

const VECTORS_FILE: &str = "vectors.bin";

#[derive(Debug, Default)]
struct Inner {
    /// Insertion sequence → entry. Gives listings a stable order.
    entries: BTreeMap<u64, VectorEntry>,
    positions: HashMap<VectorId, u64>,
    next_seq: u64,
}

impl Inner {
    fn push(&mut self, entry: VectorEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.positions.insert(entry.id, seq);
        self.entries.insert(seq, entry);
    }

    fn remove(&mut self, id: &VectorId) -> bool {
        match self.positions.remove(id) {
            Some(seq) => self.entries.remove(&seq).is_some(),
            None => false,
        }
    }
}

/// On-disk form of one entry.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    id: u128,
    vector: Vec<f32>,
    metadata: VectorMetadata,
}

#[derive(Debug)]
pub struct InMemoryVectorIndex {
    dimension: VectorDimension,
    inner: RwLock<Inner>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Writes the snapshot into `dir`, replacing any previous one.
    pub fn save(&self, dir: &Path, model_name: &str) -> Result<(), VectorError> {
        std::fs::create_dir_all(dir)?;

        let stored: Vec<StoredEntry> = {
            let inner = self.inner.read();
            inner
                .entries
                .values()
                .map(|entry| StoredEntry {
                    id: entry.id.get().as_u128(),
                    vector: entry.vector.clone(),
                    metadata: entry.metadata.clone(),
                })
                .collect()
        };

        let bytes = bincode::serde::encode_to_vec(&stored, bincode::config::standard())
            .map_err(|e| VectorError::Serialization(e.to_string()))?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&bytes)?;
        file.persist(dir.join(VECTORS_FILE))
            .map_err(|e| VectorError::Storage(e.error))?;

        let mut metadata = match IndexSnapshotMetadata::load(dir) {
            Ok(existing) if existing.model_name == model_name => existing,
            _ => IndexSnapshotMetadata::new(model_name, self.dimension.get(), 0),
        };
        metadata.dimension = self.dimension.get();
        metadata.update(stored.len());
        metadata.save(dir)?;

        tracing::debug!(entries = stored.len(), dir = %dir.display(), "vector snapshot saved");
        Ok(())
    }

    /// Loads a snapshot written by [`save`](Self::save).
    ///
    /// A snapshot made with another model still loads, with a warning;
    /// its vectors only become comparable again after a rebuild.
    pub fn load(
        dir: &Path,
        dimension: VectorDimension,
        model_name: &str,
    ) -> Result<Self, VectorError> {
        let metadata = IndexSnapshotMetadata::load(dir)?;
        if metadata.dimension != dimension.get() {
            return Err(VectorError::DimensionMismatch {
                expected: dimension.get(),
                actual: metadata.dimension,
            });
        }
        if metadata.model_name != model_name {
            tracing::warn!(
                snapshot_model = %metadata.model_name,
                configured_model = model_name,
                "vector snapshot was built with another model, run a rebuild"
            );
        }

        let bytes = std::fs::read(dir.join(VECTORS_FILE))?;
        let (stored, _): (Vec<StoredEntry>, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| VectorError::Serialization(e.to_string()))?;

        let index = Self::new(dimension);
        {
            let mut inner = index.inner.write();
            for entry in stored {
                dimension.validate_vector(&entry.vector)?;
                inner.push(VectorEntry {
                    id: VectorId::from(Uuid::from_u128(entry.id)),
                    vector: entry.vector,
                    metadata: entry.metadata,
                });
            }
        }

        tracing::debug!(entries = index.len(), dir = %dir.display(), "vector snapshot loaded");
        Ok(index)
    }

    /// Loads the snapshot in `dir` if there is one, otherwise starts empty.
    pub fn open(
        dir: &Path,
        dimension: VectorDimension,
        model_name: &str,
    ) -> Result<Self, VectorError> {
        if IndexSnapshotMetadata::exists(dir) {
            Self::load(dir, dimension, model_name)
        } else {
            Ok(Self::new(dimension))
        }
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn insert(&self, vector: Vec<f32>, metadata: VectorMetadata) -> Result<VectorId, VectorError> {
        self.dimension.validate_vector(&vector)?;

        let mut inner = self.inner.write();
        let mut id = VectorId::generate();
        while inner.positions.contains_key(&id) {
            id = VectorId::generate();
        }
        inner.push(VectorEntry {
            id,
            vector,
            metadata,
        });
        Ok(id)
    }

    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>, VectorError> {
        self.dimension.validate_vector(query)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let inner = self.inner.read();
        let mut scored: Vec<(Distance, u64, &VectorEntry)> = inner
            .entries
            .par_iter()
            .filter(|(_, entry)| filter.matches(&entry.metadata))
            .map(|(seq, entry)| {
                let distance = Distance::from_similarity(cosine_similarity(query, &entry.vector));
                (distance, *seq, entry)
            })
            .collect();

        // Ties go to the older entry so results are reproducible
        scored.par_sort_unstable_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(distance, _, entry)| SearchHit {
                id: entry.id,
                metadata: entry.metadata.clone(),
                distance,
            })
            .collect())
    }

    fn delete(&self, ids: &[VectorId]) -> Result<usize, VectorError> {
        let mut inner = self.inner.write();
        Ok(ids.iter().filter(|id| inner.remove(id)).count())
    }

    fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<usize, VectorError> {
        let mut inner = self.inner.write();
        let matching: Vec<VectorId> = inner
            .entries
            .values()
            .filter(|entry| filter.matches(&entry.metadata))
            .map(|entry| entry.id)
            .collect();

        for id in &matching {
            inner.remove(id);
        }
        Ok(matching.len())
    }

    fn reset(&self) -> Result<(), VectorError> {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.positions.clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    fn list(&self, offset: usize, limit: usize) -> Result<Vec<VectorEntry>, VectorError> {
        let inner = self.inner.read();
        Ok(inner
            .entries
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
