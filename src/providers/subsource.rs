// Subsource API

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    check_response, credential_str, http_client, is_active, ProviderError, SearchParams,
    SubtitleProvider, SubtitleResult,
};
use crate::services::languages;

const SUBSOURCE_API_BASE: &str = "https://api.subsource.net/api/v1";
const PAGE_LIMIT: u32 = 20;
const MAX_PAGES: u32 = 3;
const VALIDATION_IMDB_ID: &str = "tt0111161";

/// Subsource filters by English language name
const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("eng", "english"),
    ("pol", "polish"),
    ("spa", "spanish"),
    ("fre", "french"),
    ("ger", "german"),
    ("ita", "italian"),
    ("por", "portuguese"),
    ("pob", "brazilian_portuguese"),
    ("rus", "russian"),
    ("ara", "arabic"),
    ("chi", "chinese"),
    ("jpn", "japanese"),
    ("kor", "korean"),
    ("tur", "turkish"),
    ("dut", "dutch"),
    ("swe", "swedish"),
    ("nor", "norwegian"),
    ("dan", "danish"),
    ("fin", "finnish"),
    ("cze", "czech"),
    ("hun", "hungarian"),
    ("rum", "romanian"),
    ("gre", "greek"),
    ("heb", "hebrew"),
    ("tha", "thai"),
    ("vie", "vietnamese"),
];

pub struct SubSourceProvider {
    client: Client,
    user_agent: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MovieSearchResponse {
    success: bool,
    data: Vec<MovieEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovieEntry {
    movie_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubtitlesResponse {
    pub success: bool,
    pub data: Vec<SubSourceSubtitle>,
    pub pagination: Option<PageInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageInfo {
    #[serde(default)]
    pub pages: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubSourceSubtitle {
    pub subtitle_id: i64,
    pub release_info: Vec<String>,
    pub commentary: Option<String>,
    pub contributors: Vec<Contributor>,
    pub rating: Option<Rating>,
    pub downloads: Option<i64>,
    pub hearing_impaired: Option<bool>,
    pub files: Option<i64>,
    pub framerate: Option<Value>,
    pub production_type: Option<Value>,
    pub release_type: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Contributor {
    pub displayname: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Rating {
    pub good: i64,
    pub total: i64,
}

pub fn subsource_language(code: &str) -> Option<&'static str> {
    let code = languages::normalize(code);
    LANGUAGE_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Whether release text names the episode, directly or inside a range
pub fn mentions_episode(text: &str, episode: u32) -> bool {
    let text = text.to_lowercase();
    let exact = [
        format!(r"\bep{:03}\b", episode),
        format!(r"\bep{:02}\b", episode),
        format!(r"\bep{}\b", episode),
        format!(r"\bepisode\s+{}\b", episode),
        format!(r"\b-\s*{:03}\b", episode),
        format!(r"\b{:03}\b", episode),
        format!(r"\b{:02}\b", episode),
    ];
    if exact
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .any(|re| re.is_match(&text))
    {
        return true;
    }

    [r"ep?(\d+)-(\d+)", r"(\d+)\s*-\s*(\d+)"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .any(|re| {
            re.captures_iter(&text).any(|caps| {
                let start = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
                let end = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
                matches!((start, end), (Some(s), Some(e)) if s <= episode && episode <= e)
            })
        })
}

pub fn parse_subtitles(
    response: SubtitlesResponse,
    language: &str,
    movie_id: i64,
    episode: Option<u32>,
) -> Vec<SubtitleResult> {
    response
        .data
        .into_iter()
        .filter_map(|sub| {
            let release_info = sub.release_info.join(" ");
            if let Some(episode) = episode.filter(|e| *e > 0) {
                let text = format!("{} {}", release_info, sub.commentary.as_deref().unwrap_or(""));
                if !mentions_episode(&text, episode) {
                    return None;
                }
            }

            let rating = sub
                .rating
                .as_ref()
                .filter(|r| r.total > 0)
                .map(|r| r.good as f64 / r.total as f64)
                .unwrap_or(0.0);
            let release_name = if release_info.is_empty() {
                format!("SubSource {}", sub.subtitle_id)
            } else {
                release_info
            };

            Some(SubtitleResult {
                provider_name: "subsource".to_string(),
                subtitle_id: sub.subtitle_id.to_string(),
                language: language.to_string(),
                release_name: Some(release_name),
                uploader: sub.contributors.into_iter().next().and_then(|c| c.displayname),
                download_count: Some(sub.downloads.unwrap_or(0)),
                rating: Some(rating),
                hearing_impaired: sub.hearing_impaired.unwrap_or(false),
                ai_translated: false,
                fps: None,
                forced: false,
                metadata: json!({
                    "hash_match": false,
                    "movie_id": movie_id,
                    "files": sub.files.unwrap_or(1),
                    "framerate": sub.framerate,
                    "production_type": sub.production_type,
                    "release_type": sub.release_type,
                    "commentary": sub.commentary,
                }),
            })
        })
        .collect()
}

impl SubSourceProvider {
    pub fn new(user_agent: String) -> Self {
        Self {
            client: http_client(Duration::from_secs(5)),
            user_agent,
        }
    }

    fn get(&self, api_key: &str, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", SUBSOURCE_API_BASE, path))
            .header("X-API-Key", api_key)
            .header("User-Agent", &self.user_agent)
    }

    async fn find_movie(
        &self,
        api_key: &str,
        imdb_id: &str,
        season: Option<u32>,
    ) -> Result<Option<i64>, ProviderError> {
        let mut query = vec![("searchType", "imdb".to_string()), ("imdb", imdb_id.to_string())];
        if let Some(season) = season {
            query.push(("season", season.to_string()));
        }
        let response = self.get(api_key, "/movies/search").query(&query).send().await?;
        let body: MovieSearchResponse = check_response(response, "Subsource movie search").await?.json().await?;
        if !body.success {
            return Ok(None);
        }
        Ok(body.data.first().map(|m| m.movie_id))
    }

    async fn subtitles_page(
        &self,
        api_key: &str,
        movie_id: i64,
        language: &str,
        page: u32,
    ) -> Result<SubtitlesResponse, ProviderError> {
        let query = [
            ("movieId", movie_id.to_string()),
            ("language", language.to_string()),
            ("page", page.to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        let response = self.get(api_key, "/subtitles").query(&query).send().await?;
        Ok(check_response(response, "Subsource subtitles").await?.json().await?)
    }
}

#[async_trait]
impl SubtitleProvider for SubSourceProvider {
    fn name(&self) -> &'static str {
        "subsource"
    }

    fn display_name(&self) -> &'static str {
        "SubSource"
    }

    fn can_return_ass(&self) -> bool {
        true
    }

    fn supported_languages(&self) -> &'static [&'static str] {
        &[
            "eng", "pol", "spa", "fre", "ger", "ita", "por", "pob", "rus", "ara", "chi", "jpn",
            "kor", "tur", "dut", "swe", "nor", "dan", "fin", "cze", "hun", "rum", "gre", "heb",
            "tha", "vie",
        ]
    }

    async fn authenticate(&self, credentials: &Value) -> Result<Value, ProviderError> {
        let api_key = credential_str(Some(credentials), "api_key")
            .ok_or_else(|| ProviderError::Authentication("API key is required".into()))?;

        self.find_movie(api_key, VALIDATION_IMDB_ID, None)
            .await
            .map_err(|e| {
                tracing::error!("Subsource auth failed: {}", e);
                ProviderError::Authentication(format!("Invalid API key: {}", e))
            })?;

        Ok(json!({"api_key": api_key, "active": true}))
    }

    fn is_authenticated(&self, credentials: Option<&Value>) -> bool {
        is_active(credentials) && credential_str(credentials, "api_key").is_some()
    }

    async fn search(&self, params: &SearchParams) -> Result<Vec<SubtitleResult>, ProviderError> {
        let Some(imdb_id) = params.imdb_id.as_deref() else {
            return Ok(Vec::new());
        };
        let Some(api_key) = credential_str(params.credentials_for(self.name()), "api_key") else {
            return Err(ProviderError::Authentication("Not authenticated with Subsource".into()));
        };

        let Some(movie_id) = self.find_movie(api_key, imdb_id, params.season).await? else {
            tracing::debug!("Subsource has no entry for {}", imdb_id);
            return Ok(Vec::new());
        };

        let default_languages = vec!["eng".to_string()];
        let wanted = if params.languages.is_empty() {
            &default_languages
        } else {
            &params.languages
        };

        let mut results = Vec::new();
        for code in wanted {
            let Some(language) = subsource_language(code) else {
                continue;
            };

            for page in 1..=MAX_PAGES {
                let response = self.subtitles_page(api_key, movie_id, language, page).await?;
                if !response.success || response.data.is_empty() {
                    break;
                }
                let pages = response.pagination.as_ref().map(|p| p.pages).unwrap_or(1);
                results.extend(parse_subtitles(response, code, movie_id, params.episode));
                if page >= pages {
                    break;
                }
            }
        }

        tracing::info!("Subsource returned {} results for {}", results.len(), imdb_id);
        Ok(results)
    }

    /// Subsource has no public file links
    async fn download_url(
        &self,
        _credentials: Option<&Value>,
        _subtitle_id: &str,
    ) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }

    async fn download_subtitle(
        &self,
        credentials: Option<&Value>,
        subtitle_id: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let api_key = credential_str(credentials, "api_key")
            .ok_or_else(|| ProviderError::Authentication("Not authenticated with Subsource".into()))?;
        let id: i64 = subtitle_id
            .parse()
            .map_err(|_| ProviderError::Other(format!("Invalid Subsource id: {}", subtitle_id)))?;

        let response = self
            .get(api_key, &format!("/subtitles/{}/download", id))
            .send()
            .await?;
        let response = check_response(response, "Subsource download").await?;
        Ok(response.bytes().await?.to_vec())
    }
}
