// Display metadata for content ids
// IMDb ids resolve through TMDB, Kitsu ids through the Kitsu Stremio addon.
// Results are cached in memory; lookups never fail, they fall back to the raw id.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::anime_mapping;
use super::context::ContentId;
use super::tmdb::{poster_url, year_of, TmdbClient};
use crate::config::AppConfig;

const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContentMetadata {
    pub title: String,
    pub poster_url: Option<String>,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub episode_title: Option<String>,
    pub id: String,
    /// `imdb`, `kitsu` or `unknown`
    pub id_type: String,
}

impl ContentMetadata {
    fn fallback(content_id: &str) -> Self {
        let parsed = ContentId::parse(content_id);
        Self {
            title: content_id.to_string(),
            season: parsed.season,
            episode: parsed.episode,
            id: content_id.to_string(),
            id_type: "unknown".to_string(),
            ..Default::default()
        }
    }

    /// `Title S01E02 (2020)`, `Title E05 (2006)`, `Title (1999)` or `Title`
    pub fn display_title(&self) -> String {
        if self.id_type == "unknown" {
            return self.title.clone();
        }

        let mut title = self.title.clone();
        match (self.season, self.episode) {
            (Some(s), Some(e)) => title.push_str(&format!(" S{:02}E{:02}", s, e)),
            (None, Some(e)) => title.push_str(&format!(" E{:02}", e)),
            _ => {}
        }
        if let Some(year) = self.year {
            title.push_str(&format!(" ({})", year));
        }
        title
    }
}

#[derive(Debug, Deserialize)]
struct KitsuMetaResponse {
    meta: Option<KitsuMeta>,
}

#[derive(Debug, Deserialize)]
struct KitsuMeta {
    name: Option<String>,
    #[serde(default)]
    year: Option<Value>,
    #[serde(rename = "releaseInfo", default)]
    release_info: Option<String>,
    poster: Option<String>,
    #[serde(default)]
    videos: Vec<KitsuVideo>,
}

#[derive(Debug, Deserialize)]
struct KitsuVideo {
    episode: Option<u32>,
    title: Option<String>,
}

pub struct MetadataService {
    client: Client,
    tmdb: Option<TmdbClient>,
    kitsu_addon_url: String,
    cache: RwLock<HashMap<String, (Instant, ContentMetadata)>>,
}

impl MetadataService {
    pub fn new(tmdb_api_key: Option<String>, kitsu_addon_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        if tmdb_api_key.is_none() {
            tracing::warn!("TMDB API key not configured, IMDb titles will show as raw ids");
        }

        Self {
            client,
            tmdb: tmdb_api_key.map(TmdbClient::new),
            kitsu_addon_url: kitsu_addon_url.trim_end_matches('/').to_string(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.tmdb_api_key.clone(), config.kitsu_addon_url.clone())
    }

    pub fn has_tmdb(&self) -> bool {
        self.tmdb.is_some()
    }

    /// Metadata for a content id. Never fails; unknown content gets its id as title.
    pub async fn get_metadata(
        &self,
        pool: &SqlitePool,
        content_id: &str,
        content_type: Option<&str>,
    ) -> ContentMetadata {
        let key = format!("{}|{}", content_type.unwrap_or(""), content_id);
        {
            let cache = self.cache.read().await;
            if let Some((stored, metadata)) = cache.get(&key) {
                if stored.elapsed() < CACHE_TTL {
                    return metadata.clone();
                }
            }
        }

        match self.lookup(pool, content_id, content_type).await {
            Ok(Some(metadata)) => {
                let mut cache = self.cache.write().await;
                cache.retain(|_, (stored, _)| stored.elapsed() < CACHE_TTL);
                cache.insert(key, (Instant::now(), metadata.clone()));
                metadata
            }
            Ok(None) => {
                tracing::debug!("No metadata found for {}", content_id);
                ContentMetadata::fallback(content_id)
            }
            Err(e) => {
                tracing::warn!("Metadata lookup failed for {}: {:#}", content_id, e);
                ContentMetadata::fallback(content_id)
            }
        }
    }

    async fn lookup(
        &self,
        pool: &SqlitePool,
        content_id: &str,
        content_type: Option<&str>,
    ) -> Result<Option<ContentMetadata>> {
        let parsed = ContentId::parse(content_id);

        if let Some(imdb_id) = parsed.imdb_id.as_deref() {
            return self
                .tmdb_metadata(imdb_id, content_type, parsed.season, parsed.episode)
                .await;
        }

        let Some(kitsu_id) = parsed.kitsu_id else {
            tracing::info!("Unsupported content id format: {}", content_id);
            return Ok(None);
        };

        match self.kitsu_metadata(kitsu_id, parsed.episode).await {
            Ok(Some(metadata)) => return Ok(Some(metadata)),
            Ok(None) => tracing::debug!("Kitsu addon has no meta for kitsu:{}", kitsu_id),
            Err(e) => tracing::warn!("Kitsu addon lookup failed for kitsu:{}: {:#}", kitsu_id, e),
        }

        // Mapped anime can still be described by TMDB
        let Some(mapped) = anime_mapping::imdb_from_kitsu(pool, kitsu_id).await? else {
            return Ok(None);
        };
        let season = mapped.season.or(parsed.episode.map(|_| 1));
        Ok(self
            .tmdb_metadata(&mapped.imdb_id, Some("series"), season, parsed.episode)
            .await?
            .map(|m| ContentMetadata {
                id: kitsu_id.to_string(),
                id_type: "kitsu".to_string(),
                ..m
            }))
    }

    async fn tmdb_metadata(
        &self,
        imdb_id: &str,
        content_type: Option<&str>,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> Result<Option<ContentMetadata>> {
        let Some(tmdb) = &self.tmdb else {
            return Ok(None);
        };

        let found = tmdb.find_by_imdb(imdb_id).await?;
        let base = ContentMetadata {
            id: imdb_id.to_string(),
            id_type: "imdb".to_string(),
            ..Default::default()
        };

        let want_movie = content_type != Some("series");
        let want_series = content_type != Some("movie");

        if let (true, Some(movie)) = (want_movie, found.movie_results.first()) {
            return Ok(Some(ContentMetadata {
                title: movie.title.clone(),
                year: year_of(movie.release_date.as_deref()),
                poster_url: movie.poster_path.as_deref().map(poster_url),
                ..base
            }));
        }

        let Some(show) = found.tv_results.first().filter(|_| want_series) else {
            tracing::warn!("TMDB found nothing for {} ({:?})", imdb_id, content_type);
            return Ok(None);
        };

        let mut metadata = ContentMetadata {
            title: show.name.clone(),
            year: year_of(show.first_air_date.as_deref()),
            poster_url: show.poster_path.as_deref().map(poster_url),
            season,
            episode,
            ..base
        };

        if let (Some(s), Some(e)) = (season, episode) {
            match tmdb.get_episode(show.id, s, e).await {
                Ok(details) => metadata.episode_title = details.name.filter(|n| !n.is_empty()),
                Err(err) => tracing::warn!("No TMDB episode info for {} S{}E{}: {}", imdb_id, s, e, err),
            }
        }

        Ok(Some(metadata))
    }

    async fn kitsu_metadata(&self, kitsu_id: i64, episode: Option<u32>) -> Result<Option<ContentMetadata>> {
        let url = format!("{}/meta/series/kitsu:{}.json", self.kitsu_addon_url, kitsu_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to query Kitsu addon")?;
        if !response.status().is_success() {
            anyhow::bail!("Kitsu addon returned {}", response.status());
        }

        let body: KitsuMetaResponse = response
            .json()
            .await
            .context("Failed to parse Kitsu addon response")?;
        Ok(body.meta.and_then(|meta| kitsu_to_metadata(kitsu_id, episode, meta)))
    }
}

fn kitsu_to_metadata(kitsu_id: i64, episode: Option<u32>, meta: KitsuMeta) -> Option<ContentMetadata> {
    let title = meta.name.filter(|n| !n.is_empty())?;

    let year = match &meta.year {
        Some(Value::Number(n)) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Some(Value::String(s)) => year_of(Some(s)),
        _ => None,
    }
    .or_else(|| year_of(meta.release_info.as_deref()));

    let episode_title = episode.and_then(|ep| {
        meta.videos
            .iter()
            .find(|v| v.episode == Some(ep))
            .and_then(|v| v.title.clone())
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case(&title))
    });

    Some(ContentMetadata {
        title,
        poster_url: meta.poster,
        year,
        season: None,
        episode,
        episode_title,
        id: kitsu_id.to_string(),
        id_type: "kitsu".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_display_title() {
        let mut meta = ContentMetadata {
            title: "Show".into(),
            year: Some(2020),
            season: Some(1),
            episode: Some(2),
            id: "tt1".into(),
            id_type: "imdb".into(),
            ..Default::default()
        };
        assert_eq!(meta.display_title(), "Show S01E02 (2020)");

        meta.season = None;
        assert_eq!(meta.display_title(), "Show E02 (2020)");

        meta.episode = None;
        meta.year = None;
        assert_eq!(meta.display_title(), "Show");

        assert_eq!(ContentMetadata::fallback("tt9:1:2").display_title(), "tt9:1:2");
    }

    #[test]
    fn test_kitsu_meta_parsing() {
        let json = r#"{"meta": {
            "name": "Cowboy Bebop",
            "releaseInfo": "1998-1999",
            "poster": "https://example.com/p.jpg",
            "videos": [
                {"episode": 1, "title": "Asteroid Blues"},
                {"episode": 2, "title": "Episode 2"}
            ]
        }}"#;
        let body: KitsuMetaResponse = serde_json::from_str(json).unwrap();
        let meta = kitsu_to_metadata(1, Some(1), body.meta.unwrap()).unwrap();
        assert_eq!(meta.title, "Cowboy Bebop");
        assert_eq!(meta.year, Some(1998));
        assert_eq!(meta.episode_title.as_deref(), Some("Asteroid Blues"));
        assert_eq!(meta.display_title(), "Cowboy Bebop E01 (1998)");

        let body: KitsuMetaResponse = serde_json::from_str(r#"{"meta": {"name": "X", "year": 2001}}"#).unwrap();
        assert_eq!(kitsu_to_metadata(2, None, body.meta.unwrap()).unwrap().year, Some(2001));

        let body: KitsuMetaResponse = serde_json::from_str(r#"{"meta": {"name": ""}}"#).unwrap();
        assert!(kitsu_to_metadata(3, None, body.meta.unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_lookup_failures_degrade_to_id() {
        let pool = db::test_pool().await;
        // Nothing listens on the discard port
        let service = MetadataService::new(None, "http://127.0.0.1:9".to_string());

        let meta = service.get_metadata(&pool, "kitsu:1:3", Some("series")).await;
        assert_eq!(meta.title, "kitsu:1:3");
        assert_eq!(meta.episode, Some(3));

        let meta = service.get_metadata(&pool, "tt0133093", Some("movie")).await;
        assert_eq!(meta.display_title(), "tt0133093");

        assert_eq!(service.get_metadata(&pool, "mal:5", None).await.title, "mal:5");
        assert!(service.cache.read().await.is_empty());
    }
}
