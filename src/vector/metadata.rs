//! Snapshot metadata for the persisted vector index.
//!
//! Written next to the vector snapshot so a load can detect a model change
//! or a snapshot from a newer release before touching the entries.

use crate::types::get_utc_timestamp;
use crate::vector::VectorError;
use serde::{Deserialize, Serialize};
use std::path::Path;

const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshotMetadata {
    /// Embedding model that produced the stored vectors
    pub model_name: String,

    pub dimension: usize,

    /// Number of entries in the snapshot
    pub entry_count: usize,

    /// Unix timestamp when created
    pub created_at: u64,

    /// Unix timestamp when last updated
    pub updated_at: u64,

    /// Version of the snapshot format
    pub version: u32,
}

impl IndexSnapshotMetadata {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(model_name: impl Into<String>, dimension: usize, entry_count: usize) -> Self {
        let now = get_utc_timestamp();
        Self {
            model_name: model_name.into(),
            dimension,
            entry_count,
            created_at: now,
            updated_at: now,
            version: Self::CURRENT_VERSION,
        }
    }

    /// Record a new entry count, keeping the creation time.
    pub fn update(&mut self, entry_count: usize) {
        self.entry_count = entry_count;
        self.updated_at = get_utc_timestamp();
    }

    pub fn save(&self, dir: &Path) -> Result<(), VectorError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| VectorError::Serialization(format!("snapshot metadata: {e}")))?;
        std::fs::write(dir.join(METADATA_FILE), json)?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, VectorError> {
        let json = std::fs::read_to_string(dir.join(METADATA_FILE))?;
        let metadata: Self = serde_json::from_str(&json)
            .map_err(|e| VectorError::Serialization(format!("snapshot metadata: {e}")))?;

        if metadata.version > Self::CURRENT_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                actual: metadata.version,
            });
        }

        Ok(metadata)
    }

    pub fn exists(dir: &Path) -> bool {
        dir.join(METADATA_FILE).exists()
    }
}
