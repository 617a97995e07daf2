//! Second-stage relevance scoring of (question, context) pairs.

use crate::config::RerankConfig;
use crate::vector::VectorError;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Name under which the offline overlap scorer is configured.
pub const LEXICAL_MODEL_NAME: &str = "lexical";

/// Pairwise relevance model. Higher scores mean more relevant.
pub trait CrossEncoder: Send + Sync {
    /// Scores every context against the question, one score per context, in input order.
    fn score(&self, question: &str, contexts: &[&str]) -> Result<Vec<f32>, VectorError>;

    fn model_name(&self) -> &str;
}

/// Cross-encoder reranker backed by fastembed.
pub struct FastEmbedCrossEncoder {
    model: Mutex<TextRerank>,
    model_name: String,
}

impl std::fmt::Debug for FastEmbedCrossEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedCrossEncoder")
            .field("model_name", &self.model_name)
            .field("model", &"<TextRerank>")
            .finish()
    }
}

impl FastEmbedCrossEncoder {
    pub fn new(
        model_name: &str,
        cache_dir: &Path,
        show_download_progress: bool,
    ) -> Result<Self, VectorError> {
        let model = parse_reranker_model(model_name)?;

        let reranker = TextRerank::try_new(
            RerankInitOptions::new(model)
                .with_cache_dir(cache_dir.to_path_buf())
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| VectorError::ModelInit(format!("{model_name}: {e}")))?;

        tracing::info!(model = model_name, "cross-encoder loaded");

        Ok(Self {
            model: Mutex::new(reranker),
            model_name: model_name.to_string(),
        })
    }
}

impl CrossEncoder for FastEmbedCrossEncoder {
    fn score(&self, question: &str, contexts: &[&str]) -> Result<Vec<f32>, VectorError> {
        if contexts.is_empty() {
            return Ok(Vec::new());
        }

        let results = self
            .model
            .lock()
            .map_err(|_| {
                VectorError::RerankFailed(
                    "Failed to acquire reranker lock - model may be poisoned".to_string(),
                )
            })?
            .rerank(question, contexts.to_vec(), false, None)
            .map_err(|e| VectorError::RerankFailed(e.to_string()))?;

        // fastembed returns results sorted by score; put them back in input order
        let mut scores = vec![f32::NEG_INFINITY; contexts.len()];
        for result in results {
            let slot = scores.get_mut(result.index).ok_or_else(|| {
                VectorError::RerankFailed(format!(
                    "reranker returned index {} for {} contexts",
                    result.index,
                    contexts.len()
                ))
            })?;
            *slot = result.score;
        }

        Ok(scores)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Offline scorer: cosine overlap of the lowercase word sets.
#[derive(Debug, Clone, Default)]
pub struct LexicalCrossEncoder;

impl LexicalCrossEncoder {
    fn words(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    }
}

impl CrossEncoder for LexicalCrossEncoder {
    fn score(&self, question: &str, contexts: &[&str]) -> Result<Vec<f32>, VectorError> {
        let question_words = Self::words(question);

        Ok(contexts
            .iter()
            .map(|context| {
                let context_words = Self::words(context);
                if question_words.is_empty() || context_words.is_empty() {
                    return 0.0;
                }
                let shared = question_words.intersection(&context_words).count() as f32;
                shared / ((question_words.len() * context_words.len()) as f32).sqrt()
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        LEXICAL_MODEL_NAME
    }
}

/// Creates the cross-encoder named in the configuration.
///
/// Reranker models share the embedding model cache directory.
pub fn create_cross_encoder(
    config: &RerankConfig,
    cache_dir: &Path,
    show_download_progress: bool,
) -> Result<Arc<dyn CrossEncoder>, VectorError> {
    if config.model.eq_ignore_ascii_case(LEXICAL_MODEL_NAME) {
        return Ok(Arc::new(LexicalCrossEncoder));
    }

    Ok(Arc::new(FastEmbedCrossEncoder::new(
        &config.model,
        cache_dir,
        show_download_progress,
    )?))
}

pub fn parse_reranker_model(name: &str) -> Result<RerankerModel, VectorError> {
    match name {
        "BGERerankerBase" => Ok(RerankerModel::BGERerankerBase),
        "BGERerankerV2M3" => Ok(RerankerModel::BGERerankerV2M3),
        "JINARerankerV1TurboEn" => Ok(RerankerModel::JINARerankerV1TurboEn),
        "JINARerankerV2BaseMultiligual" => Ok(RerankerModel::JINARerankerV2BaseMultiligual),
        other => Err(VectorError::ModelInit(format!(
            "unknown reranker model '{other}'. Use one of BGERerankerBase, BGERerankerV2M3, \
             JINARerankerV1TurboEn, JINARerankerV2BaseMultiligual or '{LEXICAL_MODEL_NAME}'"
        ))),
    }
}
