use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{internal, request_host, require_user, session_token, ApiError};
use crate::models::{Role, User};
use crate::services::{auth, languages};
use crate::AppState;

pub fn auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_account))
        .route("/language", put(set_language))
        .route("/manifest-token", post(regenerate_token))
}

pub fn language_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_languages))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: Option<String>,
    pub user: User,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let (user, session) = auth::authenticate(&state.db, req.username.trim(), &req.password)
        .await
        .map_err(|e| {
            tracing::info!("Failed login for '{}': {}", req.username, e);
            (StatusCode::UNAUTHORIZED, "Invalid username or password".to_string())
        })?;

    tracing::info!("User {} logged in", user.username);
    Ok(Json(LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
        user,
    }))
}

async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let token = session_token(&headers)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "Missing session token".to_string()))?;
    auth::logout(&state.db, &token).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub user: User,
    pub preferred_language_name: String,
    pub manifest_url: Option<String>,
    pub roles: Vec<Role>,
    pub is_admin: bool,
}

async fn get_account(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AccountResponse>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let roles = auth::user_roles(&state.db, &user.id).await.map_err(internal)?;

    let base = state.config.base_url(request_host(&headers));
    let manifest_url = user
        .manifest_token
        .as_deref()
        .map(|token| format!("{}/{}/manifest.json", base, token));

    Ok(Json(AccountResponse {
        preferred_language_name: languages::language_name(&user.preferred_language),
        manifest_url,
        is_admin: roles.iter().any(|r| r.name == crate::models::ROLE_ADMIN),
        roles,
        user,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LanguageRequest {
    pub language: String,
}

async fn set_language(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<LanguageRequest>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&state, &headers).await?;
    let language = languages::normalize(&req.language);
    if !languages::is_supported(&language) {
        return Err((StatusCode::BAD_REQUEST, format!("Unsupported language '{}'", req.language)));
    }

    auth::set_preferred_language(&state.db, &user.id, &language)
        .await
        .map_err(internal)?;
    tracing::info!("User {} set preferred language to {}", user.username, language);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub manifest_token: String,
    pub manifest_url: String,
}

async fn regenerate_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let token = auth::regenerate_manifest_token(&state.db, &user.id)
        .await
        .map_err(internal)?;

    tracing::info!("User {} regenerated their manifest token", user.username);
    let base = state.config.base_url(request_host(&headers));
    Ok(Json(TokenResponse {
        manifest_url: format!("{}/{}/manifest.json", base, token),
        manifest_token: token,
    }))
}

async fn list_languages() -> Json<Vec<languages::Language>> {
    Json(languages::all())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{body_json, get, json_request, TestApp};
    use crate::providers::ProviderRegistry;
    use serde_json::json;

    #[tokio::test]
    async fn test_login_and_account() {
        let app = TestApp::new(ProviderRegistry::new()).await;
        let (user, _) = app.user("alice").await;

        let response = app
            .send(
                axum::http::Request::post("/api/auth/login")
                    .header("Content-Type", "application/json")
                    .body(axum::body::Body::from(
                        json!({"username": "alice", "password": "secret"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let token = body["token"].as_str().unwrap().to_string();
        assert!(body["user"].get("password_hash").is_none());

        let response = app.send(get("/api/account", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let account = body_json(response).await;
        assert_eq!(account["user"]["id"], user.id.as_str());
        let manifest_url = account["manifest_url"].as_str().unwrap();
        assert!(manifest_url.ends_with(&format!("/{}/manifest.json", user.manifest_token.unwrap())));

        let response = app.send(get("/api/account", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bad_password() {
        let app = TestApp::new(ProviderRegistry::new()).await;
        app.user("bob").await;
        let response = app
            .send(
                axum::http::Request::post("/api/auth/login")
                    .header("Content-Type", "application/json")
                    .body(axum::body::Body::from(
                        json!({"username": "bob", "password": "wrong"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_language_and_token_updates() {
        let app = TestApp::new(ProviderRegistry::new()).await;
        let (user, token) = app.user("carol").await;

        let response = app
            .send(json_request("PUT", "/api/account/language", &token, json!({"language": "pol"})))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let updated = auth::get_user(&app.state.db, &user.id).await.unwrap();
        assert_eq!(updated.preferred_language, "pol");

        let response = app
            .send(json_request("PUT", "/api/account/language", &token, json!({"language": "zz"})))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .send(json_request("POST", "/api/account/manifest-token", &token, json!({})))
            .await;
        let body = body_json(response).await;
        assert_ne!(body["manifest_token"].as_str(), user.manifest_token.as_deref());

        let response = app
            .send(json_request("POST", "/api/auth/logout", &token, json!({})))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app.send(get("/api/account", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_languages_listed() {
        let app = TestApp::new(ProviderRegistry::new()).await;
        let body = body_json(app.send(get("/api/languages", None)).await).await;
        assert!(body.as_array().unwrap().iter().any(|l| l["code"] == "eng"));
    }
}
