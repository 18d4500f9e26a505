//! Named-entity recognition serving: decoding, caching and metrics around a
//! token-classification model.

pub mod config;
pub mod serving;

#[cfg(feature = "server")]
pub mod server;

pub use config::{ModelConfig, ServiceConfig};
pub use serving::{
    Entity, InferenceBackend, InferenceError, MetricsAggregator, PredictionService,
    RequestPipeline, ResponseCache,
};
