//! PredictionService - cache, inference and decoding behind one call.
//!
//! ```text
//! predict(text)
//!   │ blank? ─────────────────────────────────────────▶ []
//!   │ cache.get(text) hit? ───────────────────────────▶ cached entities
//!   ▼
//! tokenize ─▶ backend.infer(words) ─▶ clean_bio + decode ─▶ cache.put ─▶ entities
//! ```
//!
//! No lock is held while the backend runs, so a slow forward pass never
//! blocks cache reads for other requests. Failures are returned to the caller
//! unchanged and never cached.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use super::backend::InferenceBackend;
use super::cache::{CacheStats, ResponseCache};
use super::decoder::{self, DecodeMode};
use super::types::{Entity, InferenceError, InferenceResult};

/// Orchestrates a single prediction against the cache and the model backend.
pub struct PredictionService {
    backend: Arc<dyn InferenceBackend>,
    cache: Arc<ResponseCache>,
    decode_mode: DecodeMode,
}

impl std::fmt::Debug for PredictionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionService")
            .field("backend", &self.backend.name())
            .field("cache_capacity", &self.cache.capacity())
            .field("decode_mode", &self.decode_mode)
            .finish()
    }
}

impl PredictionService {
    pub fn new(backend: Arc<dyn InferenceBackend>, cache: Arc<ResponseCache>) -> Self {
        Self {
            backend,
            cache,
            decode_mode: DecodeMode::default(),
        }
    }

    pub fn with_decode_mode(mut self, mode: DecodeMode) -> Self {
        self.decode_mode = mode;
        self
    }

    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn decode_mode(&self) -> DecodeMode {
        self.decode_mode
    }

    /// Extract entities from `text`.
    ///
    /// Blank input returns an empty list without touching the cache or the
    /// model. Backend errors are returned unmodified.
    pub async fn predict(&self, text: &str) -> InferenceResult<Vec<Entity>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        if let Some(entities) = self.cache.get(text).await {
            tracing::debug!(
                "PredictionService: cache hit ({} entities)",
                entities.len()
            );
            return Ok(entities);
        }

        let entities = self.infer_uncached(text).await.map_err(|e| {
            tracing::error!(
                "PredictionService: prediction failed on backend '{}': {}",
                self.backend.name(),
                e
            );
            e
        })?;

        self.cache.put(text.to_string(), entities.clone()).await;
        Ok(entities)
    }

    async fn infer_uncached(&self, text: &str) -> InferenceResult<Vec<Entity>> {
        if !self.backend.is_available().await {
            return Err(InferenceError::ModelNotReady(format!(
                "Backend '{}' is not loaded",
                self.backend.name()
            )));
        }

        let tokens = decoder::tokenize(text);
        let words: Vec<String> = tokens.iter().map(|t| t.text.clone()).collect();

        let tags = self.backend.infer(&words).await?;

        if tags.len() != tokens.len() {
            return Err(InferenceError::TagCountMismatch {
                expected: tokens.len(),
                actual: tags.len(),
            });
        }

        Ok(decoder::decode(self.decode_mode, &tokens, &tags))
    }

    /// Run [`predict`](Self::predict) over each text in order.
    ///
    /// A failing item contributes an empty list in its slot; the batch as a
    /// whole never fails.
    pub async fn batch_predict(&self, texts: &[String]) -> Vec<Vec<Entity>> {
        stream::iter(texts.iter().cloned().enumerate())
            .then(|(index, text)| async move {
                match self.predict(&text).await {
                    Ok(entities) => entities,
                    Err(e) => {
                        tracing::warn!(
                            "PredictionService: batch item {} failed ({}), returning no entities",
                            index,
                            e.kind()
                        );
                        Vec::new()
                    }
                }
            })
            .collect()
            .await
    }

    pub async fn cache_clear(&self) {
        self.cache.clear().await;
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn is_ready(&self) -> bool {
        self.backend.is_available().await
    }
}
