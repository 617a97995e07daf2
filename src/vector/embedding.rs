//! Embedding generation for candidate questions and incoming queries.
//!
//! `EmbeddingGenerator` is the raw model seam. `Embedder` wraps a generator
//! together with a `Segmenter` so that every text, at indexing time and at
//! query time, goes through the same normalize → segment → encode path.

use crate::config::EmbeddingConfig;
use crate::vector::{
    DictionarySegmenter, Segmenter, VectorDimension, VectorError, normalize_whitespace,
};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Name under which the offline hashing embedder is configured.
pub const HASHING_MODEL_NAME: &str = "hashing";

/// Trait for generating embeddings from prepared text.
///
/// Implementations should be thread-safe and capable of handling batch
/// processing efficiently.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts, one per input, in order.
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Get the dimension of embeddings produced by this generator.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Name recorded next to persisted vectors.
    fn model_name(&self) -> &str;
}

/// Local sentence-embedding model backed by fastembed.
pub struct FastEmbedGenerator {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
    model_name: String,
}

impl std::fmt::Debug for FastEmbedGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedGenerator")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .field("model", &"<TextEmbedding>")
            .finish()
    }
}

impl FastEmbedGenerator {
    /// Loads a fastembed model by name.
    ///
    /// # Errors
    /// Returns an error if the name is unknown or the model fails to load.
    /// Callers treat this as a startup failure.
    pub fn new(
        model_name: &str,
        cache_dir: &Path,
        show_download_progress: bool,
    ) -> Result<Self, VectorError> {
        let model = parse_embedding_model(model_name)?;

        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir.to_path_buf())
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| VectorError::ModelInit(format!("{model_name}: {e}")))?;

        // Measure the output size instead of keeping a per-model table
        let sample = text_model
            .embed(vec!["dimension check"], None)
            .map_err(|e| VectorError::ModelInit(format!("{model_name}: {e}")))?;
        let dimension = sample
            .first()
            .map(Vec::len)
            .ok_or_else(|| VectorError::ModelInit(format!("{model_name}: empty sample embedding")))?;

        tracing::info!(model = model_name, dimension, "embedding model loaded");

        Ok(Self {
            model: Mutex::new(text_model),
            dimension: VectorDimension::new(dimension)?,
            model_name: model_name.to_string(),
        })
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        let embeddings = self
            .model
            .lock()
            .map_err(|_| {
                VectorError::EmbeddingFailed(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(text_strings, None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })?;

        for embedding in &embeddings {
            self.dimension.validate_vector(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Offline embedder that hashes words and word pairs into a fixed-size vector.
///
/// Deterministic across runs and platforms. Texts sharing words land close
/// together; it has no notion of synonyms.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingGenerator {
    dimension: VectorDimension,
}

impl HashingEmbeddingGenerator {
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.get();
        let mut embedding = vec![0.0f32; dim];

        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect();

        let mut add = |feature: &str, weight: f32| {
            let hash = fnv1a(feature.as_bytes());
            let bucket = (hash % dim as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign * weight;
        };

        for word in &words {
            add(word, 1.0);
        }
        for pair in words.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }
}

impl EmbeddingGenerator for HashingEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        HASHING_MODEL_NAME
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}

/// Normalize → segment → encode, shared by indexing, retrieval and rebuild.
#[derive(Clone)]
pub struct Embedder {
    generator: Arc<dyn EmbeddingGenerator>,
    segmenter: Arc<dyn Segmenter>,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.generator.model_name())
            .field("dimension", &self.generator.dimension())
            .finish()
    }
}

impl Embedder {
    pub fn new(generator: Arc<dyn EmbeddingGenerator>, segmenter: Arc<dyn Segmenter>) -> Self {
        Self {
            generator,
            segmenter,
        }
    }

    /// Builds the embedder described by the settings.
    ///
    /// Model loading failures surface here, at startup, never per call.
    pub fn from_settings(settings: &crate::Settings) -> Result<Self, VectorError> {
        let generator = create_embedding_generator(&settings.embedding)?;

        let mut segmenter = DictionarySegmenter::new(settings.segmentation.max_compound_len);
        if let Some(path) = &settings.segmentation.dictionary_path {
            segmenter = segmenter.with_dictionary_file(path)?;
        }

        Ok(Self::new(generator, Arc::new(segmenter)))
    }

    /// The exact text handed to the model.
    pub fn prepare(&self, text: &str) -> String {
        self.segmenter.segment(&normalize_whitespace(text))
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| VectorError::EmbeddingFailed("model returned no embedding".into()))
    }

    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        let prepared: Vec<String> = texts.iter().map(|text| self.prepare(text)).collect();
        let refs: Vec<&str> = prepared.iter().map(String::as_str).collect();

        let embeddings = self.generator.generate_embeddings(&refs)?;
        if embeddings.len() != texts.len() {
            return Err(VectorError::EmbeddingFailed(format!(
                "expected {} embeddings, model returned {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }

    pub fn dimension(&self) -> VectorDimension {
        self.generator.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }
}

/// Creates the generator named in the configuration.
pub fn create_embedding_generator(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingGenerator>, VectorError> {
    if config.model.eq_ignore_ascii_case(HASHING_MODEL_NAME) {
        let dimension = VectorDimension::new(config.hashing_dimension)?;
        return Ok(Arc::new(HashingEmbeddingGenerator::new(dimension)));
    }

    Ok(Arc::new(FastEmbedGenerator::new(
        &config.model,
        &config.cache_dir,
        config.show_download_progress,
    )?))
}

/// Maps a configured model name to a fastembed model.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "ParaphraseMLMiniLML12V2" => Ok(EmbeddingModel::ParaphraseMLMiniLML12V2),
        "ParaphraseMLMpnetBaseV2" => Ok(EmbeddingModel::ParaphraseMLMpnetBaseV2),
        "MultilingualE5Small" => Ok(EmbeddingModel::MultilingualE5Small),
        "MultilingualE5Base" => Ok(EmbeddingModel::MultilingualE5Base),
        "MultilingualE5Large" => Ok(EmbeddingModel::MultilingualE5Large),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        other => Err(VectorError::ModelInit(format!(
            "unknown embedding model '{other}'. Use one of AllMiniLML6V2, AllMiniLML12V2, \
             ParaphraseMLMiniLML12V2, ParaphraseMLMpnetBaseV2, MultilingualE5Small, \
             MultilingualE5Base, MultilingualE5Large, BGESmallENV15, BGEBaseENV15 or '{HASHING_MODEL_NAME}'"
        ))),
    }
}
