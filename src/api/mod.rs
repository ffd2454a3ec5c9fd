//! HTTP transport over the sync engine.
//!
//! Thin handlers: parse query parameters, call the engine, map
//! [`SyncError`] onto status codes.

mod home;
mod install;
mod search;

use crate::catalog::CatalogRepository;
use crate::error::SyncError;
use crate::oauth::OAuthAuthenticator;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use install::STATE_COOKIE;

/// Shared state for every route
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<OAuthAuthenticator>,
    pub catalog: Arc<dyn CatalogRepository>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Transport-level error wrapper
pub struct AppError(SyncError);

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SyncError::InvalidInput(_) | SyncError::StateMismatch => StatusCode::BAD_REQUEST,
            SyncError::TokenExchangeFailed(_) | SyncError::UpstreamFetchFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            SyncError::StorageFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Storage and upstream details stay in the logs.
        let message = match &self.0 {
            SyncError::StorageFailed(_) => "internal storage error".to_string(),
            SyncError::TokenExchangeFailed(_) => {
                "token exchange with the storefront failed".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Builds the full router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home::home))
        .route("/health", get(health))
        .route("/auth", get(install::begin))
        .route("/auth/callback", get(install::callback))
        .route("/search", get(search::search))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
