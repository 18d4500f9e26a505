//! NER Serving Module
//!
//! The inference-serving stack around a token-classification model:
//!
//! - **[`InferenceBackend`]**: object-safe async seam to the trained model
//! - **[`decoder`]**: whitespace tokenization, BIO cleanup, span decoding
//! - **[`ResponseCache`]**: bounded input → entities cache, FIFO eviction
//! - **[`MetricsAggregator`]**: rolling-window latency/throughput statistics
//! - **[`PredictionService`]**: cache → inference → decode → cache
//! - **[`RequestPipeline`]**: timing + one metrics sample per call
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  HTTP handlers / callers                     │
//! └────────────────────────────┬─────────────────────────────────┘
//!                              │ text
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ RequestPipeline ──── record(endpoint, elapsed, ok, kind) ──▶ │──▶ MetricsAggregator
//! └────────────────────────────┬─────────────────────────────────┘
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ PredictionService                                            │
//! │   ResponseCache.get ──hit──▶ entities                        │
//! │        │ miss                                                │
//! │        ▼                                                     │
//! │   tokenize ─▶ InferenceBackend.infer ─▶ clean_bio ─▶ decode  │
//! │        ─▶ ResponseCache.put ─▶ entities                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Components are plain values built once at startup and shared as `Arc`s;
//! tests build fresh instances with mock backends.

/// Core types: Token, Entity, TagVocabulary, InferenceError.
pub mod types;

/// The `InferenceBackend` trait.
pub mod backend;

/// Pure tokenization and BIO decoding functions.
pub mod decoder;

/// Bounded FIFO response cache.
pub mod cache;

/// Rolling-window request metrics.
pub mod metrics;

/// Cache + inference + decoding orchestration.
pub mod service;

/// Timed, metered entry point for external callers.
pub mod pipeline;

/// Local BERT token classifier on Candle.
#[cfg(feature = "candle")]
pub mod local_candle;

pub use backend::InferenceBackend;
pub use cache::{CacheStats, ResponseCache};
pub use decoder::{clean_bio, decode, decode_spans, decode_tokens, tokenize, DecodeMode};
pub use metrics::{EndpointSnapshot, MetricsAggregator, MetricsSnapshot};
pub use pipeline::{RequestPipeline, BATCH_PREDICT_ENDPOINT, PREDICT_ENDPOINT};
pub use service::PredictionService;
pub use types::{Entity, InferenceError, InferenceResult, TagVocabulary, Token, OUTSIDE_TAG};

#[cfg(feature = "candle")]
pub use local_candle::{CandleTokenClassifier, CandleDeviceInfo};
