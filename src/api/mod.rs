use axum::{
    http::{HeaderMap, StatusCode},
    Router,
};
use std::sync::Arc;

use crate::models::User;
use crate::providers::ProviderError;
use crate::services::{auth, library::LibraryError};
use crate::AppState;

mod account;
mod activity;
mod providers;
mod stremio;
mod subtitles;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(stremio::routes()) // /manifest.json, /:token/...
        .nest("/api/auth", account::auth_routes())
        .nest("/api/account", account::routes())
        .nest("/api/languages", account::language_routes())
        .nest("/api/activity", activity::routes())
        .nest("/api/subtitles", subtitles::routes())
        .nest("/api/providers", providers::routes())
}

pub type ApiError = (StatusCode, String);

/// Session token from `Authorization: Bearer ...` or `X-Session-Token`
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    bearer
        .or_else(|| {
            headers
                .get("X-Session-Token")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

pub async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let token = session_token(headers)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "Missing session token".to_string()))?;

    auth::validate_session(&state.db, &token)
        .await
        .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))
}

/// Host the client used, for building absolute URLs
pub fn request_host(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("X-Forwarded-Host")
        .or_else(|| headers.get("Host"))
        .and_then(|v| v.to_str().ok())
}

pub fn internal(e: anyhow::Error) -> ApiError {
    tracing::error!("Request failed: {:#}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Map service errors onto statuses
pub fn service_error(e: anyhow::Error) -> ApiError {
    if let Some(err) = e.downcast_ref::<LibraryError>() {
        let status = match err {
            LibraryError::NotFound => StatusCode::NOT_FOUND,
            LibraryError::Forbidden(_) => StatusCode::FORBIDDEN,
            LibraryError::Invalid(_) => StatusCode::BAD_REQUEST,
        };
        return (status, err.to_string());
    }
    if let Some(err) = e.downcast_ref::<ProviderError>() {
        return provider_error(err);
    }
    let message = e.to_string();
    if message.ends_with("not found") {
        return (StatusCode::NOT_FOUND, message);
    }
    internal(e)
}

pub fn provider_error(e: &ProviderError) -> ApiError {
    let status = match e {
        ProviderError::Authentication(_) => StatusCode::UNAUTHORIZED,
        ProviderError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
        ProviderError::NotFound(_) => StatusCode::NOT_FOUND,
        ProviderError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, e.to_string())
}
