//! NER prediction server
//!
//! Loads the token-classification model, then serves the prediction API
//! until Ctrl-C. Settings come from `config/ner.*` and `NER__*` variables.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ner_serving::config;
use ner_serving::server;
use ner_serving::serving::{
    CandleTokenClassifier, InferenceBackend, MetricsAggregator, PredictionService,
    RequestPipeline, ResponseCache,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = config::load().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tower_http=info", settings.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting NER server (model: {}, decode mode: {:?})",
        settings.model.model_path.display(),
        settings.decode_mode
    );

    let backend: Arc<dyn InferenceBackend> =
        Arc::new(CandleTokenClassifier::new(settings.model.clone()));
    backend
        .initialize()
        .await
        .with_context(|| format!("failed to load model from {}", settings.model.model_path.display()))?;
    tracing::info!("Model loaded on {}", backend.device().await);

    let cache = Arc::new(ResponseCache::new(settings.cache_capacity));
    let metrics = Arc::new(MetricsAggregator::with_windows(
        settings.metrics_window,
        settings.endpoint_window,
    ));
    let service = PredictionService::new(backend.clone(), cache).with_decode_mode(settings.decode_mode);
    let pipeline = Arc::new(RequestPipeline::new(Arc::new(service), metrics));

    let result = server::serve(&settings.listen_addr, server::build_router(pipeline)).await;

    if let Err(e) = backend.shutdown().await {
        tracing::warn!("Backend shutdown failed: {}", e);
    }
    result.context("server terminated with an error")
}
