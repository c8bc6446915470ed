use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::config::Config;
use crate::models::{QueryResponse, SetProviderConfigRequest};
use crate::query::Orchestrator;

/// Application state shared across handlers. The config and the orchestrator
/// built from it are behind independent locks so `/set-provider-config` can
/// rebuild the agent registry without blocking in-flight `/query` reads.
pub struct AppState {
    pub config: RwLock<Config>,
    pub orchestrator: RwLock<Arc<Orchestrator>>,
}

impl AppState {
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let orchestrator = Arc::new(Orchestrator::from_config(&config).await?);
        Ok(Self { config: RwLock::new(config), orchestrator: RwLock::new(orchestrator) })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/query", post(query))
        .route("/set-provider-config", post(set_provider_config))
        .with_state(state)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy".to_string(), version: env!("CARGO_PKG_VERSION").to_string() })
}

#[derive(Deserialize)]
struct QueryParams {
    original_query: String,
    #[serde(default)]
    max_iter: Option<usize>,
}

async fn query(State(state): State<Arc<AppState>>, Query(params): Query<QueryParams>) -> Result<Json<QueryResponse>, AppError> {
    info!("received query: {}", params.original_query);

    let orchestrator = state.orchestrator.read().await.clone();
    let (result, _citations, consume_token) = orchestrator
        .query(&params.original_query, params.max_iter)
        .await
        .map_err(|e| {
            error!("query failed: {}", e);
            AppError::InternalError(e.to_string())
        })?;

    Ok(Json(QueryResponse { result, consume_token }))
}

/// Swaps a collaborator implementation at runtime: mutates the shared config,
/// then rebuilds the agent registry from it. In-flight `/query` calls keep
/// using the orchestrator snapshot they already cloned.
async fn set_provider_config(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetProviderConfigRequest>,
) -> Result<Json<SetProviderConfigResponse>, AppError> {
    info!("swapping provider for feature '{}' to '{}'", request.feature, request.provider);

    let mut config = state.config.write().await;
    config.set_provider_config(&request.feature, &request.provider, request.config.clone());

    let rebuilt = Orchestrator::from_config(&config)
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to apply provider config: {e}")))?;

    *state.orchestrator.write().await = Arc::new(rebuilt);

    Ok(Json(SetProviderConfigResponse { success: true }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct SetProviderConfigResponse {
    success: bool,
}

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_reports_healthy() {
        let Json(body) = health_check().await;
        assert_eq!(body.status, "healthy");
    }
}
