use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{internal, require_user, service_error, ApiError};
use crate::models::Subtitle;
use crate::services::activity;
use crate::services::library::{self, LibraryError, UploadRequest};
use crate::services::selection;
use crate::services::votes::{self, VoteOutcome};
use crate::AppState;

/// Transport cap for multipart bodies; the configured upload limit is checked per file
const MAX_MULTIPART_BYTES: usize = 16 * 1024 * 1024;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/upload/:activity_id",
            post(upload).layer(DefaultBodyLimit::max(MAX_MULTIPART_BYTES)),
        )
        .route("/reset/:activity_id", post(reset))
        .route("/:id", delete(delete_subtitle))
        .route("/:id/select/:activity_id", post(select))
        .route("/:id/vote", post(vote))
        .route("/:id/mark-compatible/:activity_id", post(mark_compatible))
        .route("/:id/download", get(download))
}

#[derive(Default)]
struct UploadForm {
    file_name: Option<String>,
    data: Vec<u8>,
    language: Option<String>,
    encoding: Option<String>,
    fps: Option<f64>,
    author: Option<String>,
    version_info: Option<String>,
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, message.into())
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            form.file_name = field.file_name().map(str::to_string);
            form.data = field
                .bytes()
                .await
                .map_err(|e| bad_request(e.to_string()))?
                .to_vec();
            continue;
        }

        let value = field.text().await.map_err(|e| bad_request(e.to_string()))?;
        let value = value.trim().to_string();
        if value.is_empty() {
            continue;
        }
        match name.as_str() {
            "language" => form.language = Some(value),
            "encoding" => form.encoding = Some(value),
            "fps" => {
                let fps = value
                    .parse::<f64>()
                    .map_err(|_| bad_request(format!("Invalid fps '{}'", value)))?;
                form.fps = Some(fps);
            }
            "author" => form.author = Some(value),
            "version_info" => form.version_info = Some(value),
            other => tracing::debug!("Ignoring upload field '{}'", other),
        }
    }
    Ok(form)
}

async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(activity_id): Path<String>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Subtitle>), ApiError> {
    let user = require_user(&state, &headers).await?;
    let activity = activity::get_activity(&state.db, &user.id, &activity_id)
        .await
        .map_err(service_error)?;

    let form = read_form(multipart).await?;
    let file_name = form
        .file_name
        .as_deref()
        .ok_or_else(|| bad_request("Missing subtitle file"))?;
    let language = form.language.as_deref().unwrap_or(&user.preferred_language);
    // "auto" in the upload form means detect
    let encoding = form.encoding.as_deref().filter(|e| !e.eq_ignore_ascii_case("auto"));

    let request = UploadRequest {
        filename: file_name,
        data: &form.data,
        language,
        encoding,
        fps: form.fps,
        author: form.author.as_deref(),
        version_info: form.version_info.as_deref(),
    };
    let subtitle = library::upload(
        &state.db,
        &state.storage,
        state.config.max_upload_bytes,
        &user,
        &activity,
        &request,
    )
    .await
    .map_err(service_error)?;

    Ok((StatusCode::CREATED, Json(subtitle)))
}

async fn select(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, activity_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&state, &headers).await?;
    let activity = activity::get_activity(&state.db, &user.id, &activity_id)
        .await
        .map_err(service_error)?;
    let subtitle = library::get_subtitle(&state.db, &id)
        .await
        .map_err(service_error)?;
    if subtitle.content_id != activity.content_id {
        return Err(service_error(
            LibraryError::Invalid("Subtitle belongs to different content".into()).into(),
        ));
    }

    selection::select_local(
        &state.db,
        &user.id,
        &activity.content_id,
        activity.video_hash.as_deref(),
        &subtitle.language,
        &subtitle.id,
    )
    .await
    .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub reset: bool,
}

async fn reset(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(activity_id): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let activity = activity::get_activity(&state.db, &user.id, &activity_id)
        .await
        .map_err(service_error)?;

    let reset = selection::reset_selection(
        &state.db,
        &user.id,
        &activity.content_id,
        activity.video_hash.as_deref(),
        &user.preferred_language,
    )
    .await
    .map_err(internal)?;
    if !reset {
        tracing::debug!("No selection to reset for activity {}", activity.id);
    }
    Ok(Json(ResetResponse { reset }))
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub value: i64,
}

async fn vote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<VoteOutcome>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let outcome = votes::vote(&state.db, &user.id, &id, req.value)
        .await
        .map_err(service_error)?;
    Ok(Json(outcome))
}

async fn mark_compatible(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, activity_id)): Path<(String, String)>,
) -> Result<Json<Subtitle>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let activity = activity::get_activity(&state.db, &user.id, &activity_id)
        .await
        .map_err(service_error)?;
    let subtitle = library::mark_compatible_hash(&state.db, &user, &id, &activity)
        .await
        .map_err(service_error)?;
    Ok(Json(subtitle))
}

async fn delete_subtitle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&state, &headers).await?;
    library::delete_subtitle(&state.db, &state.storage, &user, &id)
        .await
        .map_err(service_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn download(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let user = require_user(&state, &headers).await?;
    let subtitle = library::get_subtitle(&state.db, &id)
        .await
        .map_err(service_error)?;
    library::ensure_owner_or_admin(&state.db, &user, &subtitle)
        .await
        .map_err(service_error)?;

    let content = library::fetch_subtitle_content(&state.storage, &subtitle)
        .await
        .map_err(service_error)?;
    let filename = library::download_filename(&subtitle);

    Ok((
        [
            (header::CONTENT_TYPE, "text/vtt; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        content,
    )
        .into_response())
}
