//! Token-Classification Backend Trait
//!
//! This module defines **`InferenceBackend`**, the single seam between the
//! serving pipeline and the trained NER model. The pipeline never looks inside
//! the model: it hands over whitespace tokens and receives one BIO tag per
//! token back.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 PredictionService                            │
//! │     (tokenize → infer → clean_bio → decode → cache)          │
//! └────────────────────────────┬─────────────────────────────────┘
//!                              │  Arc<dyn InferenceBackend>
//! ┌────────────────────────────┴─────────────────────────────────┐
//! │                  InferenceBackend Trait                      │
//! │    ┌────────────────────────┐   ┌──────────────────────┐     │
//! │    │ CandleTokenClassifier  │   │ test doubles / mocks │     │
//! │    │  (feature = "candle")  │   │                      │     │
//! │    └────────────────────────┘   └──────────────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Object Safety & Concurrency
//!
//! The trait is object-safe and `Send + Sync`, so the service holds it as
//! `Arc<dyn InferenceBackend>` and calls it from any tokio task. Whether the
//! backend serializes forward passes internally is its own business; the
//! service never holds a lock across `infer()`.

use async_trait::async_trait;

use super::types::InferenceError;

/// The inference capability the serving pipeline consumes.
///
/// ## Lifecycle
///
/// ```text
/// ┌────────────┐     ┌──────────────┐     ┌──────────┐     ┌──────────┐
/// │  Construct  │ ──▶ │ initialize() │ ──▶ │ infer()  │ ──▶ │ shutdown │
/// │  (new)      │     │ (load model) │     │          │     │  ()      │
/// └────────────┘     └──────────────┘     └──────────┘     └──────────┘
/// ```
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use ner_serving::serving::InferenceBackend;
///
/// async fn tag(backend: Arc<dyn InferenceBackend>) {
///     backend.initialize().await.expect("model load failed");
///     let tags = backend
///         .infer(&["сгущенное".to_string(), "молоко".to_string()])
///         .await
///         .unwrap();
///     assert_eq!(tags.len(), 2);
/// }
/// ```
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Human-readable backend name for logs and the health endpoint.
    fn name(&self) -> &str;

    /// Load weights, tokenizer and tag vocabulary. Called once after construction.
    async fn initialize(&self) -> Result<(), InferenceError>;

    /// Lightweight readiness check; must not run a forward pass.
    async fn is_available(&self) -> bool;

    /// Device the model runs on (`"cpu"`, `"cuda:0"`, ...), or `"unknown"`
    /// before initialization.
    async fn device(&self) -> String {
        "unknown".to_string()
    }

    /// Predict one BIO tag per input token.
    ///
    /// Implementations must return exactly `tokens.len()` tags; the service
    /// rejects anything else as an inference failure.
    async fn infer(&self, tokens: &[String]) -> Result<Vec<String>, InferenceError>;

    /// Release model memory. After this `is_available()` returns `false`
    /// and `infer()` fails with `ModelNotReady`.
    async fn shutdown(&self) -> Result<(), InferenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// If this compiles, the trait can be used as `dyn InferenceBackend`.
    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn InferenceBackend) {}

    #[allow(dead_code)]
    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_trait_bounds() {
        assert_send_sync::<std::sync::Arc<dyn InferenceBackend>>();
    }
}
