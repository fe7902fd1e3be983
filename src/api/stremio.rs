// Stremio addon protocol: manifest, subtitle listing and downloads

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use super::request_host;
use crate::services::activity::{parse_extra_params, record_activity};
use crate::services::context::DownloadContext;
use crate::services::convert::{is_vtt, placeholder_vtt};
use crate::services::{auth, delivery};
use crate::AppState;

const ADDON_ID: &str = "com.community.stremio-subtitles";
const ADDON_NAME: &str = "Stremio Community Subtitles";
const ADDON_DESCRIPTION: &str =
    "Community-driven subtitle addon for Stremio with user accounts and uploading.";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/manifest.json", get(generic_manifest))
        .route("/:token/manifest.json", get(user_manifest))
        .route("/:token/subtitles/:content_type/:content_id", get(list_subtitles))
        .route(
            "/:token/subtitles/:content_type/:content_id/:extra",
            get(list_subtitles_with_extra),
        )
        .route("/:token/download/:identifier", get(download))
}

fn manifest(base_url: &str, configuration_required: bool) -> Value {
    let mut behavior_hints = json!({ "configurable": true });
    if configuration_required {
        behavior_hints["configurationRequired"] = json!(true);
    }

    json!({
        "id": ADDON_ID,
        "version": env!("CARGO_PKG_VERSION"),
        "name": ADDON_NAME,
        "description": ADDON_DESCRIPTION,
        "logo": format!("{}/static/logo.png", base_url),
        "types": ["movie", "series"],
        "catalogs": [],
        "resources": ["subtitles"],
        "idPrefixes": ["tt", "kitsu"],
        "behaviorHints": behavior_hints,
    })
}

async fn generic_manifest(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let base = state.config.base_url(request_host(&headers));
    with_cors(Json(manifest(&base, true)).into_response())
}

async fn user_manifest(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Response {
    match auth::user_by_manifest_token(&state.db, &token).await {
        Ok(Some(_)) => {}
        Ok(None) => tracing::warn!("Manifest requested with unknown token {}", token),
        Err(e) => tracing::error!("Failed to look up manifest token: {}", e),
    }
    let base = state.config.base_url(request_host(&headers));
    with_cors(Json(manifest(&base, false)).into_response())
}

async fn list_subtitles(
    State(state): State<Arc<AppState>>,
    Path((token, content_type, content_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    subtitles_response(&state, &headers, &token, &content_type, &content_id, None).await
}

async fn list_subtitles_with_extra(
    State(state): State<Arc<AppState>>,
    Path((token, content_type, content_id, extra)): Path<(String, String, String, String)>,
    headers: HeaderMap,
) -> Response {
    subtitles_response(&state, &headers, &token, &content_type, &content_id, Some(&extra)).await
}

fn empty_subtitles() -> Response {
    with_cors(Json(json!({ "subtitles": [] })).into_response())
}

async fn subtitles_response(
    state: &AppState,
    headers: &HeaderMap,
    token: &str,
    content_type: &str,
    raw_content_id: &str,
    raw_extra: Option<&str>,
) -> Response {
    let user = match auth::user_by_manifest_token(&state.db, token).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::warn!("Subtitle request with unknown token");
            return empty_subtitles();
        }
        Err(e) => {
            tracing::error!("Failed to look up manifest token: {}", e);
            return empty_subtitles();
        }
    };

    // Path segments arrive percent-decoded. Without an extra segment the id
    // carries the .json suffix.
    let content_id = raw_content_id
        .strip_suffix(".json")
        .unwrap_or(raw_content_id)
        .to_string();

    if !is_valid_content_id(&content_id) {
        tracing::warn!("Rejecting content id {:?} from {}", content_id, user.username);
        return empty_subtitles();
    }
    if content_id.starts_with("mal:") {
        tracing::debug!("Ignoring MAL content id {}", content_id);
        return empty_subtitles();
    }

    let extra = raw_extra
        .map(|e| parse_extra_params(e.strip_suffix(".json").unwrap_or(e)))
        .unwrap_or_default();

    tracing::info!(
        "Subtitle request from {} for {} {} (hash {:?}, size {:?})",
        user.username,
        content_type,
        content_id,
        extra.video_hash,
        extra.video_size
    );

    if let Err(e) = record_activity(
        &state.db,
        &user.id,
        &content_id,
        content_type,
        &extra,
        state.config.max_user_activities,
    )
    .await
    {
        tracing::error!("Failed to record activity for {}: {}", user.username, e);
    }

    let lang = user.preferred_language.clone();
    let context = DownloadContext {
        content_type: Some(content_type.to_string()),
        content_id,
        lang: Some(lang.clone()),
        v_hash: extra.video_hash,
        v_size: extra.video_size,
        v_fname: extra.filename,
    };
    let identifier = match context.encode() {
        Ok(identifier) => identifier,
        Err(e) => {
            tracing::error!("Failed to encode download context: {}", e);
            return empty_subtitles();
        }
    };

    let base = state.config.base_url(request_host(headers));
    with_cors(
        Json(json!({
            "subtitles": [{
                "id": format!("comm_{}", identifier),
                "url": format!("{}/{}/download/{}.vtt", base, token, identifier),
                "lang": lang,
            }]
        }))
        .into_response(),
    )
}

/// No path separators or parent references
fn is_valid_content_id(content_id: &str) -> bool {
    !content_id.is_empty()
        && !content_id.contains(['/', '\\'])
        && !content_id.contains("..")
}

async fn download(
    State(state): State<Arc<AppState>>,
    Path((token, identifier)): Path<(String, String)>,
) -> Response {
    let user = match auth::user_by_manifest_token(&state.db, &token).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::warn!("Download with unknown token");
            return vtt_response(StatusCode::FORBIDDEN, placeholder_vtt(delivery::INVALID_TOKEN));
        }
        Err(e) => {
            tracing::error!("Failed to look up manifest token: {}", e);
            return vtt_response(StatusCode::FORBIDDEN, placeholder_vtt(delivery::INVALID_TOKEN));
        }
    };

    let identifier = identifier.strip_suffix(".vtt").unwrap_or(&identifier);
    let context = match DownloadContext::decode(identifier) {
        Ok(context) => context,
        Err(e) => {
            tracing::warn!("Bad download identifier from {}: {}", user.username, e);
            return vtt_response(StatusCode::BAD_REQUEST, placeholder_vtt(delivery::INVALID_LINK));
        }
    };

    let body = delivery::subtitle_for_context(
        &state.db,
        &state.providers,
        &state.storage,
        &user,
        &context,
    )
    .await;
    vtt_response(StatusCode::OK, body)
}

fn vtt_response(status: StatusCode, body: String) -> Response {
    let content_type = if is_vtt(&body) {
        "text/vtt; charset=utf-8"
    } else {
        tracing::warn!("Serving a subtitle body without a WEBVTT header as text/plain");
        "text/plain; charset=utf-8"
    };
    let mut response = (status, [(header::CONTENT_TYPE, content_type)], body).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    with_cors(response)
}

fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{body_bytes, body_json, get, TestApp};
    use crate::providers::ProviderRegistry;
    use crate::services::activity::list_activities;

    #[tokio::test]
    async fn test_manifests() {
        let app = TestApp::new(ProviderRegistry::new()).await;

        let generic = body_json(app.send(get("/manifest.json", None)).await).await;
        assert_eq!(generic["id"], ADDON_ID);
        assert_eq!(generic["behaviorHints"]["configurationRequired"], true);
        assert_eq!(generic["idPrefixes"], json!(["tt", "kitsu"]));

        // Unknown tokens still get a manifest
        let response = app.send(get("/nope/manifest.json", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let user_manifest = body_json(response).await;
        assert!(user_manifest["behaviorHints"].get("configurationRequired").is_none());
        assert_eq!(user_manifest["behaviorHints"]["configurable"], true);
    }

    #[tokio::test]
    async fn test_subtitle_listing_records_activity() {
        let app = TestApp::new(ProviderRegistry::new()).await;
        let (user, _) = app.user("viewer").await;
        let token = user.manifest_token.clone().unwrap();

        let uri = format!(
            "/{}/subtitles/series/tt0944947%3A1%3A2/videoHash=abc&videoSize=42&filename=Show.S01E02.mkv.json",
            token
        );
        let response = app.send(get(&uri, None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        let body = body_json(response).await;
        let entry = &body["subtitles"][0];
        assert_eq!(entry["lang"], "eng");
        let id = entry["id"].as_str().unwrap();
        let identifier = id.strip_prefix("comm_").unwrap();
        assert!(entry["url"]
            .as_str()
            .unwrap()
            .ends_with(&format!("/{}/download/{}.vtt", token, identifier)));

        let context = DownloadContext::decode(identifier).unwrap();
        assert_eq!(context.content_id, "tt0944947:1:2");
        assert_eq!(context.v_hash.as_deref(), Some("abc"));
        assert_eq!(context.v_size, Some(42));
        assert_eq!(context.v_fname.as_deref(), Some("Show.S01E02.mkv"));

        let activities = list_activities(&app.state.db, &user.id, 1, 10).await.unwrap();
        assert_eq!(activities.total, 1);
        assert_eq!(activities.items[0].video_hash.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_listing_edge_cases() {
        let app = TestApp::new(ProviderRegistry::new()).await;
        let (user, _) = app.user("edge").await;
        let token = user.manifest_token.unwrap();

        let body = body_json(app.send(get("/bad/subtitles/movie/tt1.json", None)).await).await;
        assert_eq!(body, json!({"subtitles": []}));

        let uri = format!("/{}/subtitles/series/mal%3A5.json", token);
        let body = body_json(app.send(get(&uri, None)).await).await;
        assert_eq!(body, json!({"subtitles": []}));

        let uri = format!("/{}/subtitles/movie/tt1.json", token);
        let body = body_json(app.send(get(&uri, None)).await).await;
        assert_eq!(body["subtitles"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_listing_rejects_path_like_ids() {
        let app = TestApp::new(ProviderRegistry::new()).await;
        let (user, _) = app.user("sneaky").await;
        let token = user.manifest_token.clone().unwrap();

        for id in ["..%2F..%2Fescaped", "a%5Cb", "..", "..%252F"] {
            let uri = format!("/{}/subtitles/movie/{}/videoSize=1.json", token, id);
            let body = body_json(app.send(get(&uri, None)).await).await;
            assert_eq!(body, json!({"subtitles": []}), "{}", id);
        }
        let activities = list_activities(&app.state.db, &user.id, 1, 10).await.unwrap();
        assert_eq!(activities.total, 0);

        // Decoded once: a literal percent survives
        let uri = format!("/{}/subtitles/movie/tt1%2541.json", token);
        let body = body_json(app.send(get(&uri, None)).await).await;
        assert_eq!(body["subtitles"].as_array().unwrap().len(), 1);
        let activities = list_activities(&app.state.db, &user.id, 1, 10).await.unwrap();
        assert_eq!(activities.items[0].content_id, "tt1%41");
    }

    #[tokio::test]
    async fn test_download_placeholders() {
        let app = TestApp::new(ProviderRegistry::new()).await;
        let (user, _) = app.user("dl").await;
        let token = user.manifest_token.unwrap();

        let response = app.send(get("/bad/download/xyz.vtt", None)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()["content-type"], "text/vtt; charset=utf-8");
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.contains(delivery::INVALID_TOKEN));

        let response = app.send(get(&format!("/{}/download/!!!.vtt", token), None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let identifier = DownloadContext {
            content_type: Some("movie".into()),
            content_id: "tt1".into(),
            lang: Some("eng".into()),
            v_hash: None,
            v_size: None,
            v_fname: None,
        }
        .encode()
        .unwrap();
        let response = app
            .send(get(&format!("/{}/download/{}.vtt", token, identifier), None))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.starts_with("WEBVTT"));
        assert!(body.contains(delivery::NO_SUBS_FOUND));
    }
}
