// TMDB lookups by IMDb id
// API Documentation: https://developer.themoviedb.org/reference/find-by-id

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";
const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p";

/// TMDB API client
pub struct TmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FindResults {
    #[serde(default)]
    pub movie_results: Vec<FindMovie>,
    #[serde(default)]
    pub tv_results: Vec<FindTv>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindMovie {
    pub id: i64,
    pub title: String,
    pub release_date: Option<String>,
    pub poster_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindTv {
    pub id: i64,
    pub name: String,
    pub first_air_date: Option<String>,
    pub poster_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EpisodeDetails {
    pub name: Option<String>,
    pub episode_number: Option<i32>,
    pub season_number: Option<i32>,
}

impl TmdbClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, TMDB_API_BASE.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url,
        }
    }

    /// Movies and shows carrying this IMDb id
    pub async fn find_by_imdb(&self, imdb_id: &str) -> Result<FindResults> {
        let url = format!(
            "{}/find/{}?api_key={}&external_source=imdb_id&language=en",
            self.base_url,
            urlencoding::encode(imdb_id),
            self.api_key
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to query TMDB find")?;
        if !response.status().is_success() {
            anyhow::bail!("TMDB find returned {}", response.status());
        }

        response
            .json()
            .await
            .context("Failed to parse TMDB find response")
    }

    pub async fn get_episode(&self, tv_id: i64, season: u32, episode: u32) -> Result<EpisodeDetails> {
        let url = format!(
            "{}/tv/{}/season/{}/episode/{}?api_key={}&language=en",
            self.base_url, tv_id, season, episode, self.api_key
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to get TMDB episode")?;
        if !response.status().is_success() {
            anyhow::bail!("TMDB episode lookup returned {}", response.status());
        }

        response
            .json()
            .await
            .context("Failed to parse TMDB episode response")
    }
}

/// Full poster URL for a TMDB image path
pub fn poster_url(path: &str) -> String {
    format!("{}/w500{}", TMDB_IMAGE_BASE, path)
}

/// Year from a `YYYY-MM-DD` date
pub fn year_of(date: Option<&str>) -> Option<i32> {
    date?.get(..4)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_find_results() {
        let json = r#"{
            "movie_results": [{"id": 603, "title": "The Matrix", "release_date": "1999-03-30", "poster_path": "/m.jpg"}],
            "tv_results": [],
            "person_results": []
        }"#;
        let results: FindResults = serde_json::from_str(json).unwrap();
        assert_eq!(results.movie_results[0].title, "The Matrix");
        assert!(results.tv_results.is_empty());

        let empty: FindResults = serde_json::from_str("{}").unwrap();
        assert!(empty.movie_results.is_empty());
    }

    #[test]
    fn test_helpers() {
        assert_eq!(poster_url("/m.jpg"), "https://image.tmdb.org/t/p/w500/m.jpg");
        assert_eq!(year_of(Some("1999-03-30")), Some(1999));
        assert_eq!(year_of(Some("")), None);
        assert_eq!(year_of(None), None);
    }
}
