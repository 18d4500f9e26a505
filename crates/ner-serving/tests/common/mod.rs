//! Shared test backends.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ner_serving::serving::{
    InferenceBackend, InferenceError, MetricsAggregator, PredictionService, RequestPipeline,
    ResponseCache,
};

/// Tags words from a small grocery lexicon. Unknown words are `O`; the word
/// `сбой` makes inference fail.
pub struct GroceryBackend {
    lexicon: HashMap<&'static str, &'static str>,
    calls: AtomicUsize,
    ready: AtomicBool,
    delay: Option<Duration>,
}

impl GroceryBackend {
    pub fn new() -> Self {
        Self {
            lexicon: HashMap::from([
                ("сгущенное", "B-TYPE"),
                ("молоко", "I-TYPE"),
                ("кефир", "B-TYPE"),
                ("простоквашино", "B-BRAND"),
                ("900", "B-VOLUME"),
                ("мл", "I-VOLUME"),
                ("2.5%", "B-PERCENT"),
            ]),
            calls: AtomicUsize::new(0),
            ready: AtomicBool::new(true),
            delay: None,
        }
    }

    pub fn not_ready() -> Self {
        let backend = Self::new();
        backend.ready.store(false, Ordering::SeqCst);
        backend
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for GroceryBackend {
    fn name(&self) -> &str {
        "grocery"
    }

    async fn initialize(&self) -> Result<(), InferenceError> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn device(&self) -> String {
        "cpu".to_string()
    }

    async fn infer(&self, tokens: &[String]) -> Result<Vec<String>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if tokens.iter().any(|t| t == "сбой") {
            return Err(InferenceError::InferenceFailed("device lost".to_string()));
        }
        Ok(tokens
            .iter()
            .map(|t| self.lexicon.get(t.as_str()).copied().unwrap_or("O").to_string())
            .collect())
    }

    async fn shutdown(&self) -> Result<(), InferenceError> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub fn pipeline_with(backend: Arc<GroceryBackend>, cache_capacity: usize) -> Arc<RequestPipeline> {
    let service = PredictionService::new(backend, Arc::new(ResponseCache::new(cache_capacity)));
    Arc::new(RequestPipeline::new(
        Arc::new(service),
        Arc::new(MetricsAggregator::new()),
    ))
}
