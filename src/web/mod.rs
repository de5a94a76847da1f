pub mod handlers;

use crate::utils::error::ForgeryError;
use crate::{models::ScoreModel, Config, Result};
use axum::{
    extract::{DefaultBodyLimit, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

/// Shared by every handler. The model is loaded before the server starts.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub model: Arc<dyn ScoreModel>,
}

impl AppState {
    pub fn new(config: Config, model: Arc<dyn ScoreModel>) -> Self {
        Self {
            config: Arc::new(config),
            model,
        }
    }
}

pub async fn serve(config: Config, model: Arc<dyn ScoreModel>) -> Result<()> {
    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        ForgeryError::Config(format!("Invalid bind address {}: {}", config.bind_addr, e))
    })?;

    let app = create_app(AppState::new(config, model));

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  POST /classify        - Multipart upload, JSON results");
    tracing::info!("  POST /classify/json   - Base64 images, JSON results");
    tracing::info!("  POST /classify/report - Multipart upload, CSV report");
    tracing::info!("  GET  /health          - Health check");
    tracing::info!("  GET  /api/info        - Service information");

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        ForgeryError::Internal(format!("Failed to bind to address {}: {}", addr, e))
    })?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ForgeryError::Internal(format!("Server failed: {}", e)))?;

    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    let max_request_size = state.config.server_config.max_request_size;
    let request_timeout = state.config.server_config.request_timeout;

    Router::new()
        .route("/classify", post(handlers::classify_upload_handler))
        .route("/classify/json", post(handlers::classify_json_handler))
        .route("/classify/report", post(handlers::classify_report_handler))
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        // axum's own 2MB default would cut uploads short
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_request_size))
        .layer(TimeoutLayer::new(Duration::from_secs(request_timeout)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "model": state.model.describe(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = &state.config;
    Json(json!({
        "service": "Document Forgery Detection",
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "model": {
            "description": state.model.describe(),
            "path": config.model_file().display().to_string(),
            "device": config.execution.to_string(),
            "intra_threads": config.onnx_config.intra_threads,
            "optimization_level": config.onnx_config.optimization_level,
        },
        "limits": {
            "max_image_bytes": config.max_image_bytes,
            "max_request_size": config.server_config.max_request_size,
            "max_files_per_request": config.server_config.max_files_per_request,
        },
        "report_columns": crate::forgery::REPORT_COLUMNS,
        "supported_extensions": crate::forgery::SUPPORTED_EXTENSIONS,
    }))
}
