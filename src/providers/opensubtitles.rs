// OpenSubtitles.com REST API
// API Documentation: https://opensubtitles.stoplight.io/docs/opensubtitles-api

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    check_response, credential_str, http_client, is_active, with_retry, ProviderError,
    SearchParams, SubtitleProvider, SubtitleResult,
};
use crate::services::languages;

const OPENSUBTITLES_API_BASE: &str = "https://api.opensubtitles.com/api/v1";
const DEFAULT_API_HOST: &str = "api.opensubtitles.com";
const LOW_QUOTA_WARNING: i64 = 10;

pub struct OpenSubtitlesProvider {
    client: Client,
    api_key: Option<String>,
    user_agent: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub data: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
pub struct SearchItem {
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Attributes {
    pub language: Option<String>,
    pub download_count: Option<i64>,
    pub ratings: Option<f64>,
    pub hearing_impaired: bool,
    pub ai_translated: bool,
    pub machine_translated: bool,
    pub foreign_parts_only: bool,
    pub fps: Option<f64>,
    pub moviehash_match: bool,
    pub url: Option<String>,
    pub uploader: Option<Uploader>,
    pub files: Vec<FileInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Uploader {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileInfo {
    pub file_id: Option<i64>,
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    link: Option<String>,
    remaining: Option<i64>,
}

impl OpenSubtitlesProvider {
    pub fn new(api_key: Option<String>, user_agent: String) -> Self {
        Self {
            client: http_client(Duration::from_secs(15)),
            api_key,
            user_agent,
        }
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("OPENSUBTITLES_API_KEY is not configured".into()))
    }

    fn with_headers(&self, request: RequestBuilder, token: Option<&str>) -> Result<RequestBuilder, ProviderError> {
        let mut request = request
            .header("Api-Key", self.api_key()?)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json");
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }

    /// Authenticated requests go to the per-user host returned at login
    fn user_api(credentials: Option<&Value>) -> Result<(String, String), ProviderError> {
        let token = credential_str(credentials, "token")
            .ok_or_else(|| ProviderError::Authentication("Not authenticated with OpenSubtitles".into()))?;
        let host = credential_str(credentials, "base_url").unwrap_or(DEFAULT_API_HOST);
        Ok((format!("https://{}/api/v1", host), token.to_string()))
    }

    async fn request_download_link(
        &self,
        credentials: Option<&Value>,
        subtitle_id: &str,
    ) -> Result<String, ProviderError> {
        let file_id: i64 = subtitle_id
            .parse()
            .map_err(|_| ProviderError::Other(format!("Invalid OpenSubtitles file id: {}", subtitle_id)))?;
        let (base, token) = Self::user_api(credentials)?;
        let body = json!({"file_id": file_id, "sub_format": "webvtt"});

        tracing::info!("Requesting OpenSubtitles download link for file_id {}", file_id);
        let url = format!("{}/download", base);
        let (url, token, body) = (url.as_str(), token.as_str(), &body);
        let response: DownloadResponse = with_retry("OpenSubtitles download request", move || async move {
            let request = self.with_headers(self.client.post(url), Some(token))?;
            let response = check_response(request.json(body).send().await?, "OpenSubtitles download").await?;
            Ok(response.json::<DownloadResponse>().await?)
        })
        .await?;

        if let Some(remaining) = response.remaining {
            if remaining <= LOW_QUOTA_WARNING {
                tracing::warn!("OpenSubtitles download quota low: {} remaining", remaining);
            }
        }

        response
            .link
            .ok_or_else(|| ProviderError::Parse("OpenSubtitles download response has no link".into()))
    }

    /// Query parameters in the order the API documents them
    pub fn search_query(params: &SearchParams) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();

        if let Some(imdb) = params.imdb_id.as_deref() {
            let numeric = imdb.trim_start_matches("tt").trim_start_matches('0');
            if !numeric.is_empty() {
                query.push(("imdb_id", numeric.to_string()));
            }
        }
        if let Some(q) = params.query.as_deref().filter(|q| !q.is_empty()) {
            query.push(("query", q.to_string()));
        }
        if !params.languages.is_empty() {
            let mut codes: Vec<String> = params
                .languages
                .iter()
                .map(|code| match languages::to_alpha2(code) {
                    Some(a2) => a2.to_string(),
                    None => {
                        tracing::warn!("Could not convert language {} for OpenSubtitles", code);
                        code.to_lowercase()
                    }
                })
                .collect();
            codes.sort();
            codes.dedup();
            query.push(("languages", codes.join(",")));
        }
        if let Some(hash) = params.video_hash.as_deref().filter(|h| !h.is_empty()) {
            query.push(("moviehash", hash.to_string()));
            query.push(("moviehash_match", "include".to_string()));
        }
        if let Some(season) = params.season {
            query.push(("season_number", season.to_string()));
        }
        if let Some(episode) = params.episode {
            query.push(("episode_number", episode.to_string()));
        }
        if let Some(content_type) = params.content_type.as_deref() {
            let kind = if content_type == "series" { "episode" } else { content_type };
            query.push(("type", kind.to_string()));
        }

        query
    }
}

/// Convert a search response; items without a file are skipped
pub fn parse_results(response: SearchResponse) -> Vec<SubtitleResult> {
    response
        .data
        .into_iter()
        .filter_map(|item| {
            let attrs = item.attributes;
            let file = attrs.files.into_iter().next()?;
            let file_id = file.file_id?;
            let language = attrs
                .language
                .as_deref()
                .map(|code| {
                    languages::from_alpha2(code)
                        .map(str::to_string)
                        .unwrap_or_else(|| code.to_string())
                })
                .unwrap_or_default();

            Some(SubtitleResult {
                provider_name: "opensubtitles".to_string(),
                subtitle_id: file_id.to_string(),
                language,
                release_name: file.file_name,
                uploader: attrs.uploader.and_then(|u| u.name),
                download_count: attrs.download_count,
                rating: attrs.ratings,
                hearing_impaired: attrs.hearing_impaired,
                ai_translated: attrs.ai_translated || attrs.machine_translated,
                fps: attrs.fps,
                forced: attrs.foreign_parts_only,
                metadata: json!({
                    "hash_match": attrs.moviehash_match,
                    "url": attrs.url,
                    "original_file_id": file_id,
                }),
            })
        })
        .collect()
}

#[async_trait]
impl SubtitleProvider for OpenSubtitlesProvider {
    fn name(&self) -> &'static str {
        "opensubtitles"
    }

    fn display_name(&self) -> &'static str {
        "OpenSubtitles.com"
    }

    fn supports_hash_matching(&self) -> bool {
        true
    }

    async fn authenticate(&self, credentials: &Value) -> Result<Value, ProviderError> {
        let (Some(username), Some(password)) = (
            credential_str(Some(credentials), "username"),
            credential_str(Some(credentials), "password"),
        ) else {
            return Err(ProviderError::Authentication("Username and password required".into()));
        };

        let body = json!({"username": username, "password": password});
        tracing::info!("Attempting OpenSubtitles login for user: {}", username);

        let body = &body;
        let login: LoginResponse = with_retry("OpenSubtitles login", move || async move {
            let request = self.with_headers(
                self.client.post(format!("{}/login", OPENSUBTITLES_API_BASE)),
                None,
            )?;
            let response = check_response(request.json(body).send().await?, "OpenSubtitles login").await?;
            Ok(response.json::<LoginResponse>().await?)
        })
        .await?;

        let (Some(token), Some(base_url)) = (login.token, login.base_url) else {
            return Err(ProviderError::Parse(
                "Login failed: invalid response from OpenSubtitles".into(),
            ));
        };

        tracing::info!("OpenSubtitles login successful for {}, base URL {}", username, base_url);
        Ok(json!({
            "token": token,
            "base_url": base_url,
            "username": username,
            "active": true,
        }))
    }

    async fn logout(&self, credentials: &Value) -> Result<(), ProviderError> {
        let (base, token) = Self::user_api(Some(credentials))?;
        let request = self.with_headers(self.client.delete(format!("{}/logout", base)), Some(&token))?;
        check_response(request.send().await?, "OpenSubtitles logout").await?;
        tracing::info!("OpenSubtitles logout successful");
        Ok(())
    }

    fn is_authenticated(&self, credentials: Option<&Value>) -> bool {
        is_active(credentials)
            && credential_str(credentials, "token").is_some()
            && credential_str(credentials, "base_url").is_some()
    }

    async fn search(&self, params: &SearchParams) -> Result<Vec<SubtitleResult>, ProviderError> {
        let credentials = params.credentials_for(self.name());
        if !self.is_authenticated(credentials) {
            return Err(ProviderError::Authentication("Not authenticated with OpenSubtitles".into()));
        }
        let (base, token) = Self::user_api(credentials)?;

        let query = Self::search_query(params);
        if query.is_empty() {
            return Err(ProviderError::Other("No search criteria provided".into()));
        }

        tracing::info!("Searching OpenSubtitles with params: {:?}", query);
        let url = format!("{}/subtitles", base);
        let (url, token, query) = (url.as_str(), token.as_str(), &query);
        let response: SearchResponse = with_retry("OpenSubtitles search", move || async move {
            let request = self.with_headers(self.client.get(url), Some(token))?;
            let response = check_response(request.query(query).send().await?, "OpenSubtitles search").await?;
            Ok(response.json::<SearchResponse>().await?)
        })
        .await?;

        Ok(parse_results(response))
    }

    async fn download_url(
        &self,
        credentials: Option<&Value>,
        subtitle_id: &str,
    ) -> Result<Option<String>, ProviderError> {
        if !self.is_authenticated(credentials) {
            return Err(ProviderError::Authentication("Not authenticated with OpenSubtitles".into()));
        }
        self.request_download_link(credentials, subtitle_id).await.map(Some)
    }

    async fn download_subtitle(
        &self,
        credentials: Option<&Value>,
        subtitle_id: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let Some(link) = self.download_url(credentials, subtitle_id).await? else {
            return Err(ProviderError::NotFound(format!("No download link for {}", subtitle_id)));
        };
        let response = check_response(
            self.client
                .get(&link)
                .header("User-Agent", &self.user_agent)
                .send()
                .await?,
            "OpenSubtitles file download",
        )
        .await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_JSON: &str = r#"{
        "total_count": 3,
        "data": [
            {
                "id": "9000",
                "type": "subtitle",
                "attributes": {
                    "subtitle_id": "9000",
                    "language": "pt-BR",
                    "download_count": 1520,
                    "hearing_impaired": false,
                    "ai_translated": false,
                    "machine_translated": true,
                    "fps": 23.976,
                    "ratings": 7.5,
                    "moviehash_match": true,
                    "url": "https://www.opensubtitles.com/pt-BR/subtitles/legacy/9000",
                    "uploader": {"uploader_id": 1, "name": "someone", "rank": "gold member"},
                    "files": [{"file_id": 12345, "cd_number": 1, "file_name": "Movie.2020.1080p.WEB-DL.srt"}]
                }
            },
            {
                "id": "9001",
                "attributes": {"language": "en", "files": []}
            },
            {
                "id": "9002",
                "attributes": {
                    "language": "en",
                    "uploader": null,
                    "files": [{"file_id": 777, "file_name": null}]
                }
            }
        ]
    }"#;

    #[test]
    fn test_parse_results() {
        let response: SearchResponse = serde_json::from_str(SEARCH_JSON).unwrap();
        let results = parse_results(response);
        assert_eq!(results.len(), 2);

        let first = &results[0];
        assert_eq!(first.subtitle_id, "12345");
        assert_eq!(first.language, "pob");
        assert_eq!(first.release_name.as_deref(), Some("Movie.2020.1080p.WEB-DL.srt"));
        assert_eq!(first.uploader.as_deref(), Some("someone"));
        assert_eq!(first.download_count, Some(1520));
        assert!(first.ai_translated);
        assert!(first.hash_match());
        assert_eq!(first.metadata["original_file_id"], 12345);

        let second = &results[1];
        assert_eq!(second.subtitle_id, "777");
        assert_eq!(second.language, "eng");
        assert_eq!(second.uploader, None);
        assert!(!second.hash_match());
    }

    #[test]
    fn test_search_query() {
        let params = SearchParams {
            imdb_id: Some("tt0944947".into()),
            video_hash: Some("8e245d9679d31e12".into()),
            languages: vec!["pol".into(), "eng".into(), "pob".into()],
            season: Some(1),
            episode: Some(2),
            content_type: Some("series".into()),
            ..Default::default()
        };
        let query = OpenSubtitlesProvider::search_query(&params);
        assert_eq!(
            query,
            vec![
                ("imdb_id", "944947".to_string()),
                ("languages", "en,pl,pt-br".to_string()),
                ("moviehash", "8e245d9679d31e12".to_string()),
                ("moviehash_match", "include".to_string()),
                ("season_number", "1".to_string()),
                ("episode_number", "2".to_string()),
                ("type", "episode".to_string()),
            ]
        );
        assert!(OpenSubtitlesProvider::search_query(&SearchParams::default()).is_empty());
    }

    #[test]
    fn test_is_authenticated_requires_token_and_host() {
        let provider = OpenSubtitlesProvider::new(Some("key".into()), "test".into());
        assert!(provider.is_authenticated(Some(&json!({
            "token": "t", "base_url": "vip-api.opensubtitles.com", "active": true
        }))));
        assert!(!provider.is_authenticated(Some(&json!({"token": "t", "active": true}))));
        assert!(!provider.is_authenticated(Some(&json!({
            "token": "t", "base_url": "api.opensubtitles.com", "active": false
        }))));
        assert!(!provider.is_authenticated(None));
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_without_network() {
        let provider = OpenSubtitlesProvider::new(Some("key".into()), "test".into());
        let err = provider.authenticate(&json!({"username": "a"})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(_)));

        let err = provider.search(&SearchParams::default()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(_)));
    }
}
