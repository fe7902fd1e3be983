use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{internal, provider_error, require_user, service_error, ApiError};
use crate::models::{Subtitle, User};
use crate::providers::{self, SubtitleProvider};
use crate::services::{activity, auth};
use crate::services::library::{self, LinkRequest};
use crate::services::selection::{self, ProviderChoice};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_providers))
        .route("/:name/connect", post(connect))
        .route("/:name/disconnect", post(disconnect))
        .route("/:name/settings", put(update_settings))
        .route("/:name/select/:activity_id", post(select))
        .route("/:name/link/:activity_id", post(link))
}

fn lookup(state: &AppState, name: &str) -> Result<Arc<dyn SubtitleProvider>, ApiError> {
    state
        .providers
        .get(name)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Unknown provider '{}'", name)))
}

#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub requires_auth: bool,
    pub supports_hash_matching: bool,
    pub can_return_ass: bool,
    pub connected: bool,
    pub active: bool,
    pub try_provide_ass: bool,
}

fn provider_info(provider: &dyn SubtitleProvider, user: &User) -> ProviderInfo {
    let credentials = providers::get_credentials(user, provider.name());
    let credentials = credentials.as_ref();
    ProviderInfo {
        name: provider.name(),
        display_name: provider.display_name(),
        requires_auth: provider.requires_auth(),
        supports_hash_matching: provider.supports_hash_matching(),
        can_return_ass: provider.can_return_ass(),
        connected: credentials.is_some() && provider.is_authenticated(credentials),
        active: providers::is_active(credentials),
        try_provide_ass: providers::try_provide_ass(credentials),
    }
}

async fn list_providers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ProviderInfo>>, ApiError> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(
        state
            .providers
            .all()
            .iter()
            .map(|p| provider_info(p.as_ref(), &user))
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub credentials: Value,
}

async fn connect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<ProviderInfo>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let provider = lookup(&state, &name)?;

    let mut stored = provider.authenticate(&req.credentials).await.map_err(|e| {
        tracing::warn!("{} rejected credentials for {}: {}", provider.name(), user.username, e);
        provider_error(&e)
    })?;

    // Reconnecting keeps the user's settings
    let previous = providers::get_credentials(&user, provider.name());
    if let (Value::Object(entry), true) = (&mut stored, providers::try_provide_ass(previous.as_ref())) {
        entry.insert("try_provide_ass".to_string(), Value::Bool(true));
    }

    providers::save_credentials(&state.db, &user.id, provider.name(), stored)
        .await
        .map_err(internal)?;
    tracing::info!("User {} connected {}", user.username, provider.display_name());

    let user = auth::get_user(&state.db, &user.id)
        .await
        .map_err(internal)?;
    Ok(Json(provider_info(provider.as_ref(), &user)))
}

async fn disconnect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&state, &headers).await?;
    let provider = lookup(&state, &name)?;

    if let Some(credentials) = providers::get_credentials(&user, provider.name()) {
        if let Err(e) = provider.logout(&credentials).await {
            tracing::warn!("{} logout failed for {}: {}", provider.name(), user.username, e);
        }
    }
    providers::remove_credentials(&state.db, &user.id, provider.name())
        .await
        .map_err(internal)?;
    tracing::info!("User {} disconnected {}", user.username, provider.display_name());
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SettingsRequest {
    pub try_provide_ass: bool,
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(req): Json<SettingsRequest>,
) -> Result<Json<ProviderInfo>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let provider = lookup(&state, &name)?;

    if req.try_provide_ass && !provider.can_return_ass() {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("{} cannot provide ASS subtitles", provider.display_name()),
        ));
    }
    let Some(Value::Object(mut entry)) = providers::get_credentials(&user, provider.name()) else {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("{} is not connected", provider.display_name()),
        ));
    };

    entry.insert("try_provide_ass".to_string(), Value::Bool(req.try_provide_ass));
    providers::save_credentials(&state.db, &user.id, provider.name(), Value::Object(entry))
        .await
        .map_err(internal)?;

    let user = auth::get_user(&state.db, &user.id)
        .await
        .map_err(internal)?;
    Ok(Json(provider_info(provider.as_ref(), &user)))
}

async fn select(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((name, activity_id)): Path<(String, String)>,
    Json(choice): Json<ProviderChoice>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&state, &headers).await?;
    let provider = lookup(&state, &name)?;
    let activity = activity::get_activity(&state.db, &user.id, &activity_id)
        .await
        .map_err(service_error)?;
    if choice.subtitle_id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Missing provider subtitle id".to_string()));
    }

    selection::select_provider(
        &state.db,
        &user.id,
        &activity.content_id,
        activity.video_hash.as_deref(),
        &user.preferred_language,
        provider.name(),
        &choice,
    )
    .await
    .map_err(internal)?;
    tracing::info!(
        "User {} selected {} subtitle {} for {}",
        user.username,
        provider.name(),
        choice.subtitle_id,
        activity.content_id
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn link(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((name, activity_id)): Path<(String, String)>,
    Json(mut req): Json<LinkRequest>,
) -> Result<(StatusCode, Json<Subtitle>), ApiError> {
    let user = require_user(&state, &headers).await?;
    let provider = lookup(&state, &name)?;
    let activity = activity::get_activity(&state.db, &user.id, &activity_id)
        .await
        .map_err(service_error)?;
    if req.language.trim().is_empty() {
        req.language = user.preferred_language.clone();
    }

    let subtitle = library::link_provider_subtitle(&state.db, &user, &activity, provider.name(), &req)
        .await
        .map_err(service_error)?;
    Ok((StatusCode::CREATED, Json(subtitle)))
}
