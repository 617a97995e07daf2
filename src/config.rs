//! Configuration module for the retrieval pipeline.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `QARAG_` and use double underscores
//! to separate nested levels:
//! - `QARAG_RETRIEVAL__TOP_K_RERANK=10` sets `retrieval.top_k_rerank`
//! - `QARAG_EMBEDDING__MODEL=hashing` sets `embedding.model`
//! - `QARAG_REBUILD__ON_FAILURE=abort` sets `rebuild.on_failure`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_DIR: &str = ".qarag";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding the vector snapshot, chunk collections and document catalogue
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub segmentation: SegmentationConfig,

    #[serde(default)]
    pub rerank: RerankConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub rebuild: RebuildConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// fastembed model name, or "hashing" for the offline feature-hashing embedder
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Where downloaded models are cached
    #[serde(default = "default_models_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_false")]
    pub show_download_progress: bool,

    /// Per-call timeout in milliseconds. Unset means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Output dimension of the hashing embedder
    #[serde(default = "default_hashing_dimension")]
    pub hashing_dimension: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SegmentationConfig {
    /// Extra compound words, one per line, merged with the built-in list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dictionary_path: Option<PathBuf>,

    /// Longest compound (in syllables) the segmenter tries to join
    #[serde(default = "default_max_compound_len")]
    pub max_compound_len: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RerankConfig {
    /// fastembed reranker name, or "lexical" for the offline overlap scorer
    #[serde(default = "default_rerank_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Candidate questions generated per chunk
    #[serde(default = "default_questions_per_chunk")]
    pub questions_per_chunk: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    /// Nearest candidate-question vectors fetched per query
    #[serde(default = "default_top_k_search")]
    pub top_k_search: usize,

    /// Contexts kept after cross-encoder reranking
    #[serde(default = "default_top_k_rerank")]
    pub top_k_rerank: usize,

    /// Context layout; `{name}`, `{text}` and `{url}` are substituted
    #[serde(default = "default_context_template")]
    pub context_template: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RebuildFailurePolicy {
    /// Log the failed question and continue with the next one
    Skip,
    /// Stop the rebuild at the first failure
    Abort,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RebuildConfig {
    #[serde(default = "default_rebuild_policy")]
    pub on_failure: RebuildFailurePolicy,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".qarag/data")
}
fn default_false() -> bool {
    false
}
fn default_embedding_model() -> String {
    "ParaphraseMLMiniLML12V2".to_string()
}
fn default_models_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR).join("models"))
        .unwrap_or_else(|| PathBuf::from(".qarag/models"))
}
fn default_hashing_dimension() -> usize {
    384
}
fn default_max_compound_len() -> usize {
    4
}
fn default_rerank_model() -> String {
    "JINARerankerV2BaseMultiligual".to_string()
}
fn default_questions_per_chunk() -> usize {
    5
}
fn default_top_k_search() -> usize {
    100
}
fn default_top_k_rerank() -> usize {
    20
}
fn default_context_template() -> String {
    "Document: {name}. Content: {text}. URL: {url}".to_string()
}
fn default_rebuild_policy() -> RebuildFailurePolicy {
    RebuildFailurePolicy::Skip
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_dir: default_data_dir(),
            debug: false,
            embedding: EmbeddingConfig::default(),
            segmentation: SegmentationConfig::default(),
            rerank: RerankConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            rebuild: RebuildConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            cache_dir: default_models_dir(),
            show_download_progress: false,
            timeout_ms: None,
            hashing_dimension: default_hashing_dimension(),
        }
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            dictionary_path: None,
            max_compound_len: default_max_compound_len(),
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            model: default_rerank_model(),
            timeout_ms: None,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            questions_per_chunk: default_questions_per_chunk(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k_search: default_top_k_search(),
            top_k_rerank: default_top_k_rerank(),
            context_template: default_context_template(),
        }
    }
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            on_failure: default_rebuild_policy(),
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl RerankConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Self::figment(config_path).extract().map_err(Box::new)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref().to_path_buf())
            .extract()
            .map_err(Box::new)
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nesting, single underscores stay in field names
            .merge(Env::prefixed("QARAG_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find `.qarag/settings.toml` from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Write the default settings file under `.qarag/`
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        let header = "# qarag configuration\n\
                      # Environment overrides: QARAG_<SECTION>__<KEY>, e.g. QARAG_RETRIEVAL__TOP_K_RERANK=10\n\n";
        let body = toml::to_string_pretty(&Settings::default())?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, format!("{header}{body}"))?;

        Ok(config_path)
    }
}
