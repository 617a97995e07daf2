//! Core identifiers shared by the chunk store, the vector index and the pipeline.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a chunk inside its document (0-based, dense).
pub type ChunkIndex = u32;

/// Identifier of a source document owned by the external document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Visibility tag of a document. The empty tag means globally visible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FacultyScope(String);

impl FacultyScope {
    /// The global (unscoped) tag.
    pub fn global() -> Self {
        Self(String::new())
    }

    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into().trim().to_string())
    }

    /// Maps a nullable scope from the document store; `None` is global.
    pub fn from_option(scope: Option<&str>) -> Self {
        scope.map(Self::new).unwrap_or_default()
    }

    pub fn is_global(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FacultyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            f.write_str("<global>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&str> for FacultyScope {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub total_pages: usize,
    /// 1-based page number.
    pub current_page: usize,
}

impl<T> Page<T> {
    /// Translates a 1-based page number and page size into `(offset, limit)`.
    pub fn window(page: usize, limit: usize) -> (usize, usize) {
        let page = page.max(1);
        ((page - 1).saturating_mul(limit), limit)
    }

    pub fn new(items: Vec<T>, total: usize, page: usize, limit: usize) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            items,
            total,
            total_pages,
            current_page: page.max(1),
        }
    }
}

/// Seconds since the Unix epoch.
pub fn get_utc_timestamp() -> u64 {
    Utc::now().timestamp() as u64
}
