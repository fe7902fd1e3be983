// External subtitle providers
//
// Each provider wraps one third-party search API behind `SubtitleProvider`.
// Per-user credentials live in `users.provider_credentials` as a JSON object
// keyed by provider name.

pub mod opensubtitles;
pub mod registry;
pub mod search;
pub mod subdl;
pub mod subsource;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::models::User;

pub use registry::ProviderRegistry;
pub use search::{search_providers_parallel, search_providers_with_fallback};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Map a non-success HTTP status to an error
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = format!("{} ({})", message.into(), status);
        match status.as_u16() {
            401 | 403 => Self::Authentication(message),
            404 => Self::NotFound(message),
            429 => Self::RateLimit(message),
            500..=599 => Self::Unavailable(message),
            _ => Self::Other(message),
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Network(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status, e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Fail with a typed error unless the response succeeded
pub(crate) async fn check_response(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = body.chars().take(200).collect::<String>();
    Err(ProviderError::from_status(
        status,
        format!("{} failed: {}", what, detail.trim()),
    ))
}

/// Retry server errors and network failures with a fixed delay
pub(crate) async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                attempt += 1;
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    what,
                    attempt,
                    MAX_RETRIES + 1,
                    e,
                    RETRY_DELAY
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
            other => return other,
        }
    }
}

/// A subtitle found by a provider search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtitleResult {
    pub provider_name: String,
    pub subtitle_id: String,
    pub language: String,
    pub release_name: Option<String>,
    pub uploader: Option<String>,
    pub download_count: Option<i64>,
    pub rating: Option<f64>,
    pub hearing_impaired: bool,
    pub ai_translated: bool,
    pub fps: Option<f64>,
    pub forced: bool,
    /// Provider specific extras; `hash_match` and `url` are read by callers
    pub metadata: Value,
}

impl SubtitleResult {
    pub fn hash_match(&self) -> bool {
        self.metadata
            .get("hash_match")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn url(&self) -> Option<&str> {
        self.metadata.get("url").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub imdb_id: Option<String>,
    pub video_hash: Option<String>,
    /// 3-letter codes
    pub languages: Vec<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub content_type: Option<String>,
    pub query: Option<String>,
    /// The user's whole credentials object, keyed by provider name
    pub user_credentials: Value,
}

impl SearchParams {
    pub fn credentials_for(&self, provider: &str) -> Option<&Value> {
        self.user_credentials.get(provider)
    }
}

#[async_trait]
pub trait SubtitleProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn requires_auth(&self) -> bool {
        true
    }

    fn supports_hash_matching(&self) -> bool {
        false
    }

    /// Whether downloads may carry ASS styling when the user asks for it
    fn can_return_ass(&self) -> bool {
        false
    }

    /// Empty means every language
    fn supported_languages(&self) -> &'static [&'static str] {
        &[]
    }

    /// Validate the submitted credentials and return what should be stored
    async fn authenticate(&self, credentials: &Value) -> Result<Value, ProviderError>;

    async fn logout(&self, _credentials: &Value) -> Result<(), ProviderError> {
        Ok(())
    }

    fn is_authenticated(&self, credentials: Option<&Value>) -> bool;

    async fn search(&self, params: &SearchParams) -> Result<Vec<SubtitleResult>, ProviderError>;

    /// Direct link for a subtitle, when the provider exposes one
    async fn download_url(
        &self,
        credentials: Option<&Value>,
        subtitle_id: &str,
    ) -> Result<Option<String>, ProviderError>;

    async fn download_subtitle(
        &self,
        credentials: Option<&Value>,
        subtitle_id: &str,
    ) -> Result<Vec<u8>, ProviderError>;
}

/// Treat a missing, empty or JSON-null string field as absent
pub(crate) fn credential_str<'a>(credentials: Option<&'a Value>, key: &str) -> Option<&'a str> {
    credentials?
        .get(key)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn is_active(credentials: Option<&Value>) -> bool {
    credentials
        .and_then(|c| c.get("active"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub fn try_provide_ass(credentials: Option<&Value>) -> bool {
    credentials
        .and_then(|c| c.get("try_provide_ass"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// The user's credentials object; malformed JSON reads as empty
pub fn credentials_map(user: &User) -> Map<String, Value> {
    match user
        .provider_credentials
        .as_deref()
        .map(serde_json::from_str::<Value>)
    {
        Some(Ok(Value::Object(map))) => map,
        Some(Err(e)) => {
            tracing::warn!("Ignoring malformed provider credentials for user {}: {}", user.id, e);
            Map::new()
        }
        _ => Map::new(),
    }
}

pub fn get_credentials(user: &User, provider: &str) -> Option<Value> {
    credentials_map(user).remove(provider)
}

async fn load_map(pool: &SqlitePool, user_id: &str) -> Result<Map<String, Value>> {
    let (raw,): (Option<String>,) =
        sqlx::query_as("SELECT provider_credentials FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .context("User not found")?;
    Ok(match raw.as_deref().map(serde_json::from_str::<Value>) {
        Some(Ok(Value::Object(map))) => map,
        _ => Map::new(),
    })
}

async fn store_map(pool: &SqlitePool, user_id: &str, map: Map<String, Value>) -> Result<()> {
    let raw = serde_json::to_string(&Value::Object(map))?;
    sqlx::query("UPDATE users SET provider_credentials = ? WHERE id = ?")
        .bind(raw)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn save_credentials(
    pool: &SqlitePool,
    user_id: &str,
    provider: &str,
    credentials: Value,
) -> Result<()> {
    let mut map = load_map(pool, user_id).await?;
    map.insert(provider.to_string(), credentials);
    store_map(pool, user_id, map).await
}

pub async fn remove_credentials(pool: &SqlitePool, user_id: &str, provider: &str) -> Result<()> {
    let mut map = load_map(pool, user_id).await?;
    if map.remove(provider).is_some() {
        store_map(pool, user_id, map).await?;
    }
    Ok(())
}

/// Keep the stored entry but mark it inactive, e.g. after the provider rejected it
pub async fn deactivate(pool: &SqlitePool, user_id: &str, provider: &str) -> Result<()> {
    let mut map = load_map(pool, user_id).await?;
    if let Some(Value::Object(entry)) = map.get_mut(provider) {
        entry.insert("active".to_string(), Value::Bool(false));
        store_map(pool, user_id, map).await?;
        tracing::info!("Deactivated {} credentials for user {}", provider, user_id);
    }
    Ok(())
}

/// Shared HTTP client with a request timeout
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::services::auth::{get_user, test_user};
    use serde_json::json;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ProviderError::from_status(StatusCode::UNAUTHORIZED, "login"),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, "search"),
            ProviderError::RateLimit(_)
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::BAD_GATEWAY, "search"),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::NOT_FOUND, "download"),
            ProviderError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_client_errors() {
        let mut calls = 0;
        let result: Result<(), ProviderError> = with_retry("test", || {
            calls += 1;
            async { Err(ProviderError::Authentication("nope".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_credential_helpers() {
        let creds = json!({"api_key": "  ", "token": "abc", "active": true, "try_provide_ass": true});
        assert_eq!(credential_str(Some(&creds), "api_key"), None);
        assert_eq!(credential_str(Some(&creds), "token"), Some("abc"));
        assert!(is_active(Some(&creds)));
        assert!(try_provide_ass(Some(&creds)));
        assert!(!is_active(None));
    }

    #[tokio::test]
    async fn test_save_deactivate_remove() {
        let pool = db::test_pool().await;
        let user = test_user(&pool, "creds").await;

        save_credentials(&pool, &user.id, "subdl", json!({"api_key": "k", "active": true}))
            .await
            .unwrap();
        save_credentials(&pool, &user.id, "subsource", json!({"api_key": "s", "active": true}))
            .await
            .unwrap();

        let user = get_user(&pool, &user.id).await.unwrap();
        assert!(is_active(get_credentials(&user, "subdl").as_ref()));

        deactivate(&pool, &user.id, "subdl").await.unwrap();
        let user = get_user(&pool, &user.id).await.unwrap();
        assert!(!is_active(get_credentials(&user, "subdl").as_ref()));
        assert!(is_active(get_credentials(&user, "subsource").as_ref()));

        remove_credentials(&pool, &user.id, "subsource").await.unwrap();
        let user = get_user(&pool, &user.id).await.unwrap();
        assert!(get_credentials(&user, "subsource").is_none());
        assert_eq!(credentials_map(&user).len(), 1);
    }
}
