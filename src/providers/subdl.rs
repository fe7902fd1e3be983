// SubDL API
// API Documentation: https://subdl.com/api-doc

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    check_response, credential_str, http_client, is_active, ProviderError, SearchParams,
    SubtitleProvider, SubtitleResult,
};
use crate::services::languages;

const SUBDL_API_BASE: &str = "https://api.subdl.com/api/v1";
const SUBDL_DOWNLOAD_BASE: &str = "https://dl.subdl.com";
const SUBS_PER_PAGE: u32 = 30;
const VALIDATION_IMDB_ID: &str = "tt0111161";

pub struct SubDlProvider {
    client: Client,
    user_agent: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchResponse {
    pub status: Option<bool>,
    pub error: Option<String>,
    pub subtitles: Vec<SubDlSubtitle>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubDlSubtitle {
    pub release_name: Option<String>,
    pub name: Option<String>,
    pub language: Option<String>,
    pub author: Option<String>,
    pub url: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub episode_from: Option<i64>,
    pub episode_end: Option<i64>,
    pub hi: Option<bool>,
    pub download_count: Option<i64>,
    pub rating: Option<f64>,
    pub fps: Option<f64>,
}

/// SubDL language codes: upper-case alpha-2, `BR_PT` for Brazilian Portuguese
pub fn to_subdl_language(code: &str) -> String {
    match languages::normalize(code).as_str() {
        "pob" => "BR_PT".to_string(),
        "por" => "PT".to_string(),
        other => languages::to_alpha2(other)
            .map(str::to_string)
            .unwrap_or_else(|| other.chars().take(2).collect())
            .to_uppercase(),
    }
}

fn from_subdl_language(code: &str) -> String {
    languages::from_alpha2(code)
        .map(str::to_string)
        .unwrap_or_else(|| code.to_lowercase())
}

/// Whether a result belongs to the requested season and episode.
/// Movies carry season 0; full season packs have no episode_from and episode_end 0.
fn matches_episode(item: &SubDlSubtitle, season: Option<u32>, episode: Option<u32>) -> bool {
    let item_season = item.season.unwrap_or(0);
    if item_season <= 0 {
        return true;
    }
    if let Some(season) = season {
        if item_season != season as i64 {
            return false;
        }
    }
    let Some(episode) = episode else {
        return true;
    };

    let full_season = item.episode_from.is_none() && item.episode_end == Some(0);
    if full_season {
        return true;
    }
    match (item.episode_from, item.episode_end) {
        (Some(from), Some(end)) => (from..=end).contains(&(episode as i64)),
        _ => true,
    }
}

pub fn parse_results(
    response: SearchResponse,
    season: Option<u32>,
    episode: Option<u32>,
) -> Vec<SubtitleResult> {
    response
        .subtitles
        .into_iter()
        .filter(|item| matches_episode(item, season, episode))
        .filter_map(|item| {
            let url = item.url.filter(|u| !u.is_empty())?;
            Some(SubtitleResult {
                provider_name: "subdl".to_string(),
                subtitle_id: url.clone(),
                language: from_subdl_language(item.language.as_deref().unwrap_or_default()),
                release_name: item.release_name.or(item.name),
                uploader: item.author,
                download_count: item.download_count,
                rating: item.rating,
                hearing_impaired: item.hi.unwrap_or(false),
                ai_translated: false,
                fps: item.fps,
                forced: false,
                metadata: json!({
                    "hash_match": false,
                    "url": url,
                    "season": item.season,
                    "episode": item.episode,
                    "episode_from": item.episode_from,
                    "episode_end": item.episode_end,
                }),
            })
        })
        .collect()
}

impl SubDlProvider {
    pub fn new(user_agent: String) -> Self {
        Self {
            client: http_client(Duration::from_secs(5)),
            user_agent,
        }
    }

    async fn query(
        &self,
        api_key: &str,
        params: &SearchParams,
    ) -> Result<SearchResponse, ProviderError> {
        let mut query: Vec<(&str, String)> = vec![
            ("api_key", api_key.to_string()),
            ("subs_per_page", SUBS_PER_PAGE.to_string()),
        ];
        if let Some(imdb) = params.imdb_id.as_deref() {
            query.push(("imdb_id", imdb.to_string()));
        }
        if !params.languages.is_empty() {
            let codes: Vec<String> = params.languages.iter().map(|l| to_subdl_language(l)).collect();
            query.push(("languages", codes.join(",")));
        }
        if let Some(season) = params.season {
            query.push(("season_number", season.to_string()));
        }
        if let Some(episode) = params.episode {
            query.push(("episode_number", episode.to_string()));
        }
        let kind = match params.content_type.as_deref() {
            Some("movie") => Some("movie"),
            Some("series") => Some("tv"),
            _ if params.season.is_some() || params.episode.is_some() => Some("tv"),
            _ => None,
        };
        if let Some(kind) = kind {
            query.push(("type", kind.to_string()));
        }

        tracing::info!(
            "SubDL search for {:?} (season {:?}, episode {:?})",
            params.imdb_id,
            params.season,
            params.episode
        );

        let response = self
            .client
            .get(format!("{}/subtitles", SUBDL_API_BASE))
            .header("User-Agent", &self.user_agent)
            .query(&query)
            .send()
            .await?;
        let response: SearchResponse = check_response(response, "SubDL search").await?.json().await?;

        if response.status == Some(false) {
            let message = response.error.clone().unwrap_or_default();
            if message.to_lowercase().contains("api key") {
                return Err(ProviderError::Authentication(message));
            }
            tracing::debug!("SubDL returned no subtitles: {}", message);
        }
        Ok(response)
    }

    fn resolve_url(subtitle_id: &str) -> String {
        if subtitle_id.starts_with("http") {
            subtitle_id.to_string()
        } else {
            format!("{}{}", SUBDL_DOWNLOAD_BASE, subtitle_id)
        }
    }
}

#[async_trait]
impl SubtitleProvider for SubDlProvider {
    fn name(&self) -> &'static str {
        "subdl"
    }

    fn display_name(&self) -> &'static str {
        "SubDL"
    }

    fn can_return_ass(&self) -> bool {
        true
    }

    async fn authenticate(&self, credentials: &Value) -> Result<Value, ProviderError> {
        let api_key = credential_str(Some(credentials), "api_key")
            .ok_or_else(|| ProviderError::Authentication("API key required".into()))?;

        let probe = SearchParams {
            imdb_id: Some(VALIDATION_IMDB_ID.to_string()),
            languages: vec!["eng".to_string()],
            ..Default::default()
        };
        self.query(api_key, &probe)
            .await
            .map_err(|e| ProviderError::Authentication(format!("Invalid API key: {}", e)))?;

        Ok(json!({"api_key": api_key, "active": true}))
    }

    fn is_authenticated(&self, credentials: Option<&Value>) -> bool {
        is_active(credentials) && credential_str(credentials, "api_key").is_some()
    }

    async fn search(&self, params: &SearchParams) -> Result<Vec<SubtitleResult>, ProviderError> {
        let credentials = params.credentials_for(self.name());
        if !self.is_authenticated(credentials) {
            return Err(ProviderError::Authentication("Not authenticated with SubDL".into()));
        }
        let Some(api_key) = credential_str(credentials, "api_key") else {
            return Err(ProviderError::Authentication("Not authenticated with SubDL".into()));
        };

        if params.imdb_id.is_none() {
            tracing::info!("SubDL needs an IMDb id, skipping search");
            return Ok(Vec::new());
        }

        let response = self.query(api_key, params).await?;
        Ok(parse_results(response, params.season, params.episode))
    }

    async fn download_url(
        &self,
        credentials: Option<&Value>,
        subtitle_id: &str,
    ) -> Result<Option<String>, ProviderError> {
        if !self.is_authenticated(credentials) {
            return Err(ProviderError::Authentication("Not authenticated with SubDL".into()));
        }
        Ok(Some(Self::resolve_url(subtitle_id)))
    }

    async fn download_subtitle(
        &self,
        credentials: Option<&Value>,
        subtitle_id: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let Some(url) = self.download_url(credentials, subtitle_id).await? else {
            return Err(ProviderError::NotFound(subtitle_id.to_string()));
        };
        tracing::info!("Downloading SubDL subtitle from {}", url);
        let response = self
            .client
            .get(&url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;
        let response = check_response(response, "SubDL download").await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_JSON: &str = r#"{
        "status": true,
        "results": [{"sd_id": 1, "type": "tv", "name": "Show", "imdb_id": "tt1"}],
        "subtitles": [
            {"release_name": "Show.S01E02.1080p.WEB", "name": "SUBDL::show.zip", "lang": "english",
             "language": "EN", "author": "alice", "url": "/subtitle/1-2.zip",
             "season": 1, "episode": 2, "episode_from": 2, "episode_end": 2, "hi": false},
            {"release_name": "Show.S01.Complete", "language": "EN", "url": "/subtitle/1-3.zip",
             "season": 1, "episode": null, "episode_from": null, "episode_end": 0, "hi": true},
            {"release_name": "Show.S01E05", "language": "EN", "url": "/subtitle/1-5.zip",
             "season": 1, "episode": 5, "episode_from": 5, "episode_end": 5},
            {"release_name": "Show.S02E02", "language": "EN", "url": "/subtitle/2-2.zip",
             "season": 2, "episode": 2, "episode_from": 2, "episode_end": 2},
            {"release_name": "No url", "language": "EN", "season": 1, "episode_from": 2, "episode_end": 2},
            {"release_name": "Show.S01E01-E04", "language": "BR_PT", "url": "/subtitle/1-x.zip",
             "season": 1, "episode_from": 1, "episode_end": 4}
        ]
    }"#;

    #[test]
    fn test_parse_filters_episodes() {
        let response: SearchResponse = serde_json::from_str(SEARCH_JSON).unwrap();
        let results = parse_results(response, Some(1), Some(2));
        let ids: Vec<&str> = results.iter().map(|r| r.subtitle_id.as_str()).collect();
        assert_eq!(ids, vec!["/subtitle/1-2.zip", "/subtitle/1-3.zip", "/subtitle/1-x.zip"]);

        assert_eq!(results[0].language, "eng");
        assert_eq!(results[0].uploader.as_deref(), Some("alice"));
        assert_eq!(results[0].url(), Some("/subtitle/1-2.zip"));
        assert!(results[1].hearing_impaired);
        assert_eq!(results[2].language, "pob");
    }

    #[test]
    fn test_movies_are_not_episode_filtered() {
        let response: SearchResponse = serde_json::from_str(
            r#"{"status": true, "subtitles": [{"name": "Movie.2020", "language": "PL", "url": "/s/m.zip", "season": 0}]}"#,
        )
        .unwrap();
        let results = parse_results(response, None, Some(3));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].release_name.as_deref(), Some("Movie.2020"));
        assert_eq!(results[0].language, "pol");
    }

    #[test]
    fn test_language_codes_and_urls() {
        assert_eq!(to_subdl_language("eng"), "EN");
        assert_eq!(to_subdl_language("pob"), "BR_PT");
        assert_eq!(to_subdl_language("por"), "PT");
        assert_eq!(to_subdl_language("ger"), "DE");
        assert_eq!(
            SubDlProvider::resolve_url("/subtitle/1-2.zip"),
            "https://dl.subdl.com/subtitle/1-2.zip"
        );
        assert_eq!(
            SubDlProvider::resolve_url("https://dl.subdl.com/x.zip"),
            "https://dl.subdl.com/x.zip"
        );
    }

    #[tokio::test]
    async fn test_search_without_imdb_is_empty() {
        let provider = SubDlProvider::new("test".into());
        let params = SearchParams {
            video_hash: Some("abc".into()),
            user_credentials: json!({"subdl": {"api_key": "k", "active": true}}),
            ..Default::default()
        };
        assert!(provider.search(&params).await.unwrap().is_empty());

        let unauthenticated = SearchParams::default();
        assert!(provider.search(&unauthenticated).await.is_err());
    }
}
