//! RequestPipeline - timing and metrics around every external call.
//!
//! The HTTP layer talks to this type only. Each call is timed and produces
//! exactly one metrics sample, recorded synchronously before the result is
//! handed back, so there is no background recorder that could drop samples.
//! Failed calls are recorded with the error's [`kind`](InferenceError::kind).

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use super::cache::CacheStats;
use super::metrics::{EndpointSnapshot, MetricsAggregator, MetricsSnapshot};
use super::service::PredictionService;
use super::types::{Entity, InferenceError, InferenceResult};

/// Metrics endpoint name for single predictions.
pub const PREDICT_ENDPOINT: &str = "/api/predict";

/// Metrics endpoint name for batch predictions.
pub const BATCH_PREDICT_ENDPOINT: &str = "/api/predict/batch";

/// External-facing wrapper pairing the prediction service with metrics.
#[derive(Debug, Clone)]
pub struct RequestPipeline {
    service: Arc<PredictionService>,
    metrics: Arc<MetricsAggregator>,
}

impl RequestPipeline {
    pub fn new(service: Arc<PredictionService>, metrics: Arc<MetricsAggregator>) -> Self {
        Self { service, metrics }
    }

    pub fn service(&self) -> &Arc<PredictionService> {
        &self.service
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// Await `operation`, then record one sample for `endpoint`.
    pub async fn observe<T, F>(&self, endpoint: &str, operation: F) -> InferenceResult<T>
    where
        F: Future<Output = InferenceResult<T>>,
    {
        let started = Instant::now();
        let result = operation.await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => self.metrics.record(endpoint, elapsed, true, None).await,
            Err(e) => {
                self.metrics
                    .record(endpoint, elapsed, false, Some(e.kind()))
                    .await
            }
        }

        result
    }

    /// Record a request that failed before any work was attempted,
    /// e.g. an unparseable body.
    pub async fn reject(&self, endpoint: &str, error: InferenceError) -> InferenceError {
        self.metrics
            .record(endpoint, std::time::Duration::ZERO, false, Some(error.kind()))
            .await;
        error
    }

    pub async fn predict(&self, text: &str) -> InferenceResult<Vec<Entity>> {
        self.observe(PREDICT_ENDPOINT, self.service.predict(text))
            .await
    }

    /// Batch prediction never fails as a whole; per-item failures come back
    /// as empty lists.
    pub async fn batch_predict(&self, texts: &[String]) -> Vec<Vec<Entity>> {
        let outcome = self
            .observe(BATCH_PREDICT_ENDPOINT, async {
                Ok::<_, InferenceError>(self.service.batch_predict(texts).await)
            })
            .await;

        outcome.unwrap_or_default()
    }

    pub async fn cache_clear(&self) {
        self.service.cache_clear().await;
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.service.cache_stats().await
    }

    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot().await
    }

    pub async fn endpoint_snapshot(&self, endpoint: &str) -> EndpointSnapshot {
        self.metrics.endpoint_snapshot(endpoint).await
    }

    pub async fn metrics_reset(&self) {
        self.metrics.reset().await;
    }
}
