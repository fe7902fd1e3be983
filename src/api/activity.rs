use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::{internal, require_user, service_error, ApiError};
use crate::models::UserActivity;
use crate::providers::search::DEFAULT_SEARCH_TIMEOUT;
use crate::providers::{search_providers_parallel, SubtitleResult};
use crate::services::activity;
use crate::services::context::ContentId;
use crate::services::library::{self, HashGroups};
use crate::services::metadata::ContentMetadata;
use crate::services::pagination::Pagination;
use crate::services::selection::{self, ActiveSubtitle, ResolveRequest};
use crate::services::votes;
use crate::AppState;

const PER_PAGE: u32 = 10;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_activity))
        .route("/:id", get(activity_detail).delete(delete_activity))
        .route("/:id/providers", get(provider_results))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ActivityItem {
    #[serde(flatten)]
    pub activity: UserActivity,
    pub display_title: String,
    pub poster_url: Option<String>,
}

async fn list_activity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<Json<Pagination<ActivityItem>>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let page = activity::list_activities(&state.db, &user.id, query.page.unwrap_or(1), PER_PAGE)
        .await
        .map_err(internal)?;

    let mut items = Vec::with_capacity(page.items.len());
    for activity in &page.items {
        let metadata = state
            .metadata
            .get_metadata(&state.db, &activity.content_id, Some(&activity.content_type))
            .await;
        items.push(ActivityItem {
            activity: activity.clone(),
            display_title: metadata.display_title(),
            poster_url: metadata.poster_url,
        });
    }

    Ok(Json(Pagination::new(items, page.page, page.per_page, page.total)))
}

#[derive(Debug, Serialize)]
pub struct ActivityDetail {
    pub activity: UserActivity,
    pub metadata: ContentMetadata,
    pub display_title: String,
    pub language: String,
    pub active: ActiveSubtitle,
    pub active_label: String,
    pub subtitles: HashGroups,
    pub user_votes: HashMap<String, i64>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

async fn activity_detail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ActivityDetail>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let activity = activity::get_activity(&state.db, &user.id, &id)
        .await
        .map_err(service_error)?;

    let parsed = ContentId::parse(&activity.content_id);
    let lang = user.preferred_language.clone();
    let metadata = state
        .metadata
        .get_metadata(&state.db, &activity.content_id, Some(&activity.content_type))
        .await;

    let request = ResolveRequest {
        content_id: &activity.content_id,
        video_hash: activity.video_hash.as_deref(),
        content_type: Some(&activity.content_type),
        video_filename: activity.video_filename.as_deref(),
        lang: &lang,
        season: parsed.season,
        episode: parsed.episode,
    };
    let active = selection::get_active_subtitle_details(&state.db, &state.providers, &user, &request)
        .await
        .map_err(internal)?;

    let active_id = active.subtitle.as_ref().map(|s| s.id.clone());
    let others: Vec<_> = library::subtitles_for_content(&state.db, &activity.content_id, &lang)
        .await
        .map_err(internal)?
        .into_iter()
        .filter(|s| Some(&s.id) != active_id.as_ref())
        .collect();

    let mut ids: Vec<String> = others.iter().map(|s| s.id.clone()).collect();
    ids.extend(active_id);
    let user_votes = votes::user_votes(&state.db, &user.id, &ids)
        .await
        .map_err(internal)?;

    Ok(Json(ActivityDetail {
        display_title: metadata.display_title(),
        subtitles: library::group_by_hash(others, activity.video_hash.as_deref()),
        active_label: active.label(),
        season: parsed.season,
        episode: parsed.episode,
        language: lang,
        active,
        metadata,
        user_votes,
        activity,
    }))
}

async fn delete_activity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&state, &headers).await?;
    activity::delete_activity(&state.db, &user.id, &id)
        .await
        .map_err(service_error)?;
    tracing::info!("User {} deleted activity {}", user.username, id);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ProviderResults {
    pub language: String,
    pub results: HashMap<String, Vec<SubtitleResult>>,
}

async fn provider_results(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ProviderResults>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let activity = activity::get_activity(&state.db, &user.id, &id)
        .await
        .map_err(service_error)?;

    let providers = state.providers.active_for_user(&user);
    if providers.is_empty() {
        return Ok(Json(ProviderResults {
            language: user.preferred_language,
            results: HashMap::new(),
        }));
    }

    let parsed = ContentId::parse(&activity.content_id);
    let request = ResolveRequest {
        content_id: &activity.content_id,
        video_hash: activity.video_hash.as_deref(),
        content_type: Some(&activity.content_type),
        video_filename: activity.video_filename.as_deref(),
        lang: &user.preferred_language,
        season: parsed.season,
        episode: parsed.episode,
    };
    let mut params = selection::provider_params(&state.db, &user, &request).await;
    params.video_hash = activity.video_hash.clone();

    let results = search_providers_parallel(&providers, &params, DEFAULT_SEARCH_TIMEOUT).await;
    Ok(Json(ProviderResults {
        language: user.preferred_language.clone(),
        results,
    }))
}
