use super::{ChunkCollection, ChunkStore, StorageError, StorageResult};
use crate::types::DocumentId;
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};

const EXTENSION: &str = "json";

/// Chunk store with one JSON file per document.
///
/// Every write goes to a temporary file in the same directory which is then
/// renamed over the target, so readers see either the old collection or the
/// new one. File names are the hex-encoded document id.
#[derive(Debug)]
pub struct FileChunkStore {
    root: PathBuf,
    // Serializes check-then-write in create_collection
    create_lock: Mutex<()>,
}

impl FileChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            create_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, document_id: &DocumentId) -> PathBuf {
        self.root
            .join(format!("{}.{EXTENSION}", encode_name(document_id.as_str())))
    }

    fn write_atomic(&self, collection: &ChunkCollection) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(collection)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut file = tempfile::NamedTempFile::new_in(&self.root)?;
        file.write_all(&json)?;
        file.as_file().sync_all()?;
        file.persist(self.path_for(&collection.document_id))
            .map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    fn read(&self, path: &Path) -> StorageResult<Option<ChunkCollection>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

impl ChunkStore for FileChunkStore {
    fn create_collection(&self, collection: ChunkCollection) -> StorageResult<()> {
        let _guard = self.create_lock.lock();
        if self.path_for(&collection.document_id).exists() {
            return Err(StorageError::AlreadyExists(collection.document_id));
        }
        self.write_atomic(&collection)
    }

    fn put_collection(&self, collection: ChunkCollection) -> StorageResult<()> {
        self.write_atomic(&collection)
    }

    fn get_collection(&self, document_id: &DocumentId) -> StorageResult<Option<ChunkCollection>> {
        self.read(&self.path_for(document_id))
    }

    fn delete_collection(&self, document_id: &DocumentId) -> StorageResult<bool> {
        match std::fs::remove_file(self.path_for(document_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn document_ids(&self) -> StorageResult<Vec<DocumentId>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match decode_name(stem) {
                Some(id) => ids.push(DocumentId::new(id)),
                None => tracing::warn!(path = %path.display(), "skipping unrecognised file in chunk store"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn contains(&self, document_id: &DocumentId) -> StorageResult<bool> {
        Ok(self.path_for(document_id).exists())
    }
}

fn encode_name(id: &str) -> String {
    hex::encode(id)
}

fn decode_name(name: &str) -> Option<String> {
    String::from_utf8(hex::decode(name).ok()?).ok()
}
