//! HTTP surface for the prediction pipeline.
//!
//! Every route goes through [`RequestPipeline`], so each request produces
//! exactly one metrics sample. Prediction work runs on its own task and is
//! finished and recorded even when the client disconnects early.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::serving::metrics::MetricsSnapshot;
use crate::serving::pipeline::{RequestPipeline, BATCH_PREDICT_ENDPOINT, PREDICT_ENDPOINT};
use crate::serving::types::{Entity, InferenceError};

/// Header carrying the wall-clock handling time, e.g. `12.34ms`.
pub const RESPONSE_TIME_HEADER: &str = "x-response-time";

type SharedPipeline = Arc<RequestPipeline>;

// =============================================================================
// REQUEST / RESPONSE TYPES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub entities: Vec<Entity>,
}

#[derive(Debug, Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    device: String,
}

#[derive(Debug, Serialize)]
struct CacheStatsResponse {
    cache_size: usize,
    max_cache_size: usize,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: &'static str,
}

// =============================================================================
// ERRORS
// =============================================================================

/// An [`InferenceError`] rendered as `{"detail": "..."}` with a matching status.
#[derive(Debug)]
pub struct ApiError(InferenceError);

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            InferenceError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            InferenceError::ModelNotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            InferenceError::InferenceFailed(_)
            | InferenceError::TagCountMismatch { .. }
            | InferenceError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "detail": self.0.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

// =============================================================================
// ROUTER
// =============================================================================

pub fn build_router(pipeline: SharedPipeline) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/metrics/reset", post(metrics_reset))
        .route(PREDICT_ENDPOINT, post(predict))
        .route(BATCH_PREDICT_ENDPOINT, post(batch_predict))
        .route("/cache", delete(cache_clear))
        .route("/cache/stats", get(cache_stats))
        .with_state(pipeline)
        .layer(middleware::from_fn(response_time))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn response_time(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    if let Ok(value) = HeaderValue::from_str(&format!("{:.2}ms", elapsed_ms)) {
        response.headers_mut().insert(RESPONSE_TIME_HEADER, value);
    }
    response
}

/// Bind `addr` and serve `router` until Ctrl-C.
pub async fn serve(addr: &str, router: Router) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    tracing::info!("Server: listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Server: shutdown signal received"),
        Err(e) => {
            tracing::error!("Server: cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn root(State(pipeline): State<SharedPipeline>) -> Result<Json<ServiceInfo>, ApiError> {
    let info = pipeline
        .observe("/", async {
            Ok(ServiceInfo {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
                status: "running",
            })
        })
        .await?;
    Ok(Json(info))
}

async fn health(State(pipeline): State<SharedPipeline>) -> Result<Json<HealthResponse>, ApiError> {
    let report = pipeline
        .observe("/health", async {
            let service = pipeline.service();
            let model_loaded = service.is_ready().await;
            Ok(HealthResponse {
                status: if model_loaded { "healthy" } else { "unhealthy" },
                model_loaded,
                device: service.backend().device().await,
            })
        })
        .await?;
    Ok(Json(report))
}

async fn metrics(State(pipeline): State<SharedPipeline>) -> Result<Json<MetricsSnapshot>, ApiError> {
    let snapshot = pipeline
        .observe("/metrics", async { Ok(pipeline.metrics_snapshot().await) })
        .await?;
    Ok(Json(snapshot))
}

async fn metrics_reset(
    State(pipeline): State<SharedPipeline>,
) -> Result<Json<MessageResponse>, ApiError> {
    pipeline.metrics_reset().await;
    tracing::info!("Server: metrics reset");
    let body = pipeline
        .observe("/metrics/reset", async {
            Ok(MessageResponse {
                message: "Metrics reset",
            })
        })
        .await?;
    Ok(Json(body))
}

async fn predict(
    State(pipeline): State<SharedPipeline>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let err = InferenceError::InvalidInput(rejection.body_text());
            return Err(pipeline.reject(PREDICT_ENDPOINT, err).await.into());
        }
    };

    let worker = pipeline.clone();
    let entities = tokio::spawn(async move { worker.predict(&request.input).await })
        .await
        .map_err(|e| InferenceError::InferenceFailed(format!("prediction task failed: {}", e)))??;

    Ok(Json(PredictResponse { entities }))
}

async fn batch_predict(
    State(pipeline): State<SharedPipeline>,
    payload: Result<Json<Vec<PredictRequest>>, JsonRejection>,
) -> Result<Json<Vec<PredictResponse>>, ApiError> {
    let requests = match payload {
        Ok(Json(requests)) => requests,
        Err(rejection) => {
            let err = InferenceError::InvalidInput(rejection.body_text());
            return Err(pipeline.reject(BATCH_PREDICT_ENDPOINT, err).await.into());
        }
    };

    let texts: Vec<String> = requests.into_iter().map(|r| r.input).collect();
    let worker = pipeline.clone();
    let results = tokio::spawn(async move { worker.batch_predict(&texts).await })
        .await
        .map_err(|e| InferenceError::InferenceFailed(format!("batch task failed: {}", e)))?;

    Ok(Json(
        results
            .into_iter()
            .map(|entities| PredictResponse { entities })
            .collect(),
    ))
}

async fn cache_clear(
    State(pipeline): State<SharedPipeline>,
) -> Result<Json<MessageResponse>, ApiError> {
    let body = pipeline
        .observe("/cache", async {
            pipeline.cache_clear().await;
            Ok(MessageResponse {
                message: "Cache cleared",
            })
        })
        .await?;
    Ok(Json(body))
}

async fn cache_stats(
    State(pipeline): State<SharedPipeline>,
) -> Result<Json<CacheStatsResponse>, ApiError> {
    let body = pipeline
        .observe("/cache/stats", async {
            let stats = pipeline.cache_stats().await;
            Ok(CacheStatsResponse {
                cache_size: stats.size,
                max_cache_size: stats.capacity,
            })
        })
        .await?;
    Ok(Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                InferenceError::InvalidInput("bad".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                InferenceError::ModelNotReady("loading".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                InferenceError::InferenceFailed("oom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                InferenceError::TagCountMismatch {
                    expected: 2,
                    actual: 1,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[tokio::test]
    async fn test_error_body_has_detail() {
        let response =
            ApiError::from(InferenceError::ModelNotReady("still loading".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["detail"].as_str().unwrap().contains("still loading"));
    }

    #[test]
    fn test_predict_request_requires_input() {
        assert!(serde_json::from_str::<PredictRequest>(r#"{"text": "x"}"#).is_err());
        let request: PredictRequest = serde_json::from_str(r#"{"input": "молоко"}"#).unwrap();
        assert_eq!(request.input, "молоко");
    }
}
