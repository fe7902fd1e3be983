// Kitsu/MAL to IMDb mapping
// Built from Fribb/anime-lists (anime-list-full.json) and kept in the anime_mapping table.
// The download is hashed so an unchanged list is not re-imported.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::time::Duration;

use crate::db;

const HASH_KEY: &str = "anime_mapping_hash";

#[derive(Debug, Clone, Deserialize)]
struct MappingEntry {
    #[serde(default)]
    kitsu_id: Option<i64>,
    #[serde(default)]
    mal_id: Option<i64>,
    #[serde(default)]
    imdb_id: Option<String>,
    #[serde(default)]
    season: Option<SeasonInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct SeasonInfo {
    #[serde(default)]
    tvdb: Option<i64>,
}

/// IMDb id and TVDB season for an anime entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImdbMapping {
    pub imdb_id: String,
    pub season: Option<u32>,
}

/// Download the list and import it when it changed. Returns whether the table was rebuilt.
pub async fn update_mapping(pool: &SqlitePool, url: &str) -> Result<bool> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()?;

    tracing::info!("Downloading anime mapping from {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to download anime mapping")?;

    if !response.status().is_success() {
        anyhow::bail!("Anime mapping download failed with status: {}", response.status());
    }

    let body = response.bytes().await?;
    import_mapping(pool, &body).await
}

/// Replace the mapping table with `body` unless its hash is already stored
pub async fn import_mapping(pool: &SqlitePool, body: &[u8]) -> Result<bool> {
    let hash = hex::encode(Sha256::digest(body));
    if db::get_metadata(pool, HASH_KEY).await?.as_deref() == Some(hash.as_str()) {
        tracing::info!("Anime mapping unchanged, skipping import");
        return Ok(false);
    }

    let entries: Vec<MappingEntry> =
        serde_json::from_slice(body).context("Failed to parse anime mapping")?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM anime_mapping").execute(&mut *tx).await?;

    let mut imported = 0usize;
    for entry in entries
        .iter()
        .filter(|e| e.kitsu_id.is_some() || e.mal_id.is_some())
    {
        sqlx::query(
            "INSERT INTO anime_mapping (kitsu_id, mal_id, imdb_id, tvdb_season) VALUES (?, ?, ?, ?)",
        )
        .bind(entry.kitsu_id)
        .bind(entry.mal_id)
        .bind(entry.imdb_id.as_deref().filter(|id| !id.is_empty()))
        .bind(entry.season.as_ref().and_then(|s| s.tvdb))
        .execute(&mut *tx)
        .await?;
        imported += 1;
    }

    db::set_metadata(&mut *tx, HASH_KEY, &hash).await?;
    tx.commit().await?;

    tracing::info!("Imported {} anime mapping entries", imported);
    Ok(true)
}

pub async fn imdb_from_kitsu(pool: &SqlitePool, kitsu_id: i64) -> Result<Option<ImdbMapping>> {
    lookup(pool, "kitsu_id", kitsu_id).await
}

pub async fn imdb_from_mal(pool: &SqlitePool, mal_id: i64) -> Result<Option<ImdbMapping>> {
    lookup(pool, "mal_id", mal_id).await
}

async fn lookup(pool: &SqlitePool, column: &'static str, id: i64) -> Result<Option<ImdbMapping>> {
    let sql = format!(
        "SELECT imdb_id, tvdb_season FROM anime_mapping
         WHERE {} = ? AND imdb_id IS NOT NULL AND imdb_id != ''
         LIMIT 1",
        column
    );
    let row: Option<(String, Option<i64>)> = sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?;

    Ok(row.map(|(imdb_id, season)| ImdbMapping {
        imdb_id,
        season: season.and_then(|s| u32::try_from(s).ok()),
    }))
}
