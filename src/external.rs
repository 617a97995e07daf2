//! Collaborators the pipeline consumes but does not implement.
//!
//! The document catalogue, the LLM-backed question and answer generators
//! and the query translator all live outside this crate. They are reached
//! through the traits below and injected into the pipeline at startup.

use crate::types::{DocumentId, FacultyScope};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by an external collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ExternalError(pub String);

impl ExternalError {
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

pub type ExternalResult<T> = Result<T, ExternalError>;

/// Where a document can be cited from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLocator {
    pub name: String,
    pub url: String,
}

/// Catalogue of source documents.
pub trait DocumentStore: Send + Sync {
    /// `None` when the document is unknown.
    fn get_document_locator(&self, document_id: &DocumentId)
    -> ExternalResult<Option<DocumentLocator>>;

    /// `None` when the document is unknown. A document without a scope
    /// reports [`FacultyScope::global`].
    fn get_faculty_scope(&self, document_id: &DocumentId) -> ExternalResult<Option<FacultyScope>>;
}

/// Produces candidate questions for a chunk.
pub trait QuestionGenerator: Send + Sync {
    /// Must return exactly `count` questions; anything else fails the document.
    fn generate(&self, chunk_text: &str, count: usize) -> ExternalResult<Vec<String>>;
}

/// Writes the final answer from ranked contexts.
pub trait AnswerGenerator: Send + Sync {
    fn generate_answer(
        &self,
        contexts: &[String],
        question: &str,
        language: &str,
    ) -> ExternalResult<String>;
}

/// Translates a question into the language the index was built in.
pub trait QueryTranslator: Send + Sync {
    fn translate(&self, text: &str) -> ExternalResult<String>;
}

/// Catalogue entry kept by [`InMemoryDocumentStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faculty: Option<String>,
}

/// Document catalogue held in memory, optionally saved as one JSON file.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<DashMap<DocumentId, DocumentRecord>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document_id: DocumentId, record: DocumentRecord) -> Option<DocumentRecord> {
        self.documents.insert(document_id, record)
    }

    pub fn remove(&self, document_id: &DocumentId) -> Option<DocumentRecord> {
        self.documents.remove(document_id).map(|(_, record)| record)
    }

    pub fn get(&self, document_id: &DocumentId) -> Option<DocumentRecord> {
        self.documents.get(document_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let snapshot: BTreeMap<DocumentId, DocumentRecord> = self
            .documents
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let json = serde_json::to_vec_pretty(&snapshot).map_err(std::io::Error::other)?;

        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let dir = dir.unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&json)?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Loads a catalogue saved by [`save`](Self::save); a missing file gives an empty store.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let store = Self::new();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(store),
            Err(e) => return Err(e),
        };

        let snapshot: BTreeMap<DocumentId, DocumentRecord> =
            serde_json::from_slice(&bytes).map_err(std::io::Error::other)?;
        for (id, record) in snapshot {
            store.insert(id, record);
        }
        Ok(store)
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get_document_locator(
        &self,
        document_id: &DocumentId,
    ) -> ExternalResult<Option<DocumentLocator>> {
        Ok(self.get(document_id).map(|record| DocumentLocator {
            name: record.name,
            url: record.url,
        }))
    }

    fn get_faculty_scope(&self, document_id: &DocumentId) -> ExternalResult<Option<FacultyScope>> {
        Ok(self
            .get(document_id)
            .map(|record| FacultyScope::from_option(record.faculty.as_deref())))
    }
}

/// Extracts a list of questions from raw LLM output.
///
/// Accepts a JSON array or a Python-style list (single or double quotes),
/// optionally wrapped in a ``` fence with a `json` or `python` tag. Runs of
/// spaces and tabs inside each item collapse to one space. Non-string items
/// are dropped. Returns `None` when no list can be found.
pub fn parse_question_list(raw: &str) -> Option<Vec<String>> {
    let body = strip_fence(raw.trim());

    // Python-style lists are valid JSON5: single quotes, trailing commas, escapes
    let values = serde_json::from_str::<Vec<serde_json::Value>>(body)
        .or_else(|_| json5::from_str::<Vec<serde_json::Value>>(body))
        .ok()?;

    Some(
        values
            .into_iter()
            .filter_map(|value| match value {
                serde_json::Value::String(item) => Some(collapse_blanks(&item)),
                _ => None,
            })
            .filter(|item| !item.is_empty())
            .collect(),
    )
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);

    let tag_len = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    let tag = &rest[..tag_len];
    let rest = if tag.eq_ignore_ascii_case("json") || tag.eq_ignore_ascii_case("python") {
        &rest[tag_len..]
    } else {
        rest
    };
    rest.trim()
}

fn collapse_blanks(item: &str) -> String {
    let mut out = String::with_capacity(item.len());
    let mut in_blank = false;
    for c in item.chars() {
        if c == ' ' || c == '\t' {
            if !in_blank {
                out.push(' ');
            }
            in_blank = true;
        } else {
            out.push(c);
            in_blank = false;
        }
    }
    out.trim().to_string()
}
