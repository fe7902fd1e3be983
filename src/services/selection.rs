// Active subtitle resolution and per-user selections
//
// For a (user, content, video hash, language) the active subtitle is, in order:
// the user's explicit selection, the best local upload for the hash, a provider
// hash match, the closest release name, then any fallback.

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::db;
use crate::models::{json_id_to_string, Subtitle, User, UserSubtitleSelection};
use crate::providers::search::DEFAULT_SEARCH_TIMEOUT;
use crate::providers::{
    credentials_map, search_providers_parallel, search_providers_with_fallback, ProviderRegistry,
    SearchParams, SubtitleResult,
};
use crate::services::context::ContentId;
use crate::services::matching::{
    calculate_filename_similarity, extract_release_components, format_season_episode,
};
use crate::services::{anime_mapping, library, votes};

const AI_TRANSLATION_PENALTY: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveKind {
    None,
    Local,
    /// The user picked a provider result
    Selection,
    /// A provider result chosen automatically
    Auto,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveSubtitle {
    pub kind: ActiveKind,
    pub subtitle: Option<Subtitle>,
    pub provider_name: Option<String>,
    pub provider_subtitle_id: Option<String>,
    pub provider_metadata: Option<Value>,
    pub auto: bool,
    pub user_vote_value: Option<i64>,
    pub selection: Option<UserSubtitleSelection>,
    pub release_name: Option<String>,
    pub uploader: Option<String>,
    pub rating: Option<f64>,
    pub download_count: Option<i64>,
    pub hearing_impaired: bool,
    pub ai_translated: bool,
    pub hash_match: bool,
    pub url: Option<String>,
}

impl ActiveSubtitle {
    fn none(selection: Option<UserSubtitleSelection>) -> Self {
        Self {
            kind: ActiveKind::None,
            subtitle: None,
            provider_name: None,
            provider_subtitle_id: None,
            provider_metadata: None,
            auto: false,
            user_vote_value: None,
            selection,
            release_name: None,
            uploader: None,
            rating: None,
            download_count: None,
            hearing_impaired: false,
            ai_translated: false,
            hash_match: false,
            url: None,
        }
    }

    fn local(subtitle: Subtitle, user_vote_value: Option<i64>, auto: bool) -> Self {
        Self {
            kind: ActiveKind::Local,
            release_name: subtitle.version_info.clone(),
            uploader: subtitle.author.clone(),
            subtitle: Some(subtitle),
            user_vote_value,
            auto,
            ..Self::none(None)
        }
    }

    fn provider_auto(result: &SubtitleResult, provider_metadata: Value) -> Self {
        Self {
            kind: ActiveKind::Auto,
            provider_name: Some(result.provider_name.clone()),
            provider_subtitle_id: Some(result.subtitle_id.clone()),
            provider_metadata: Some(provider_metadata),
            auto: true,
            release_name: result.release_name.clone(),
            uploader: result.uploader.clone(),
            rating: result.rating,
            download_count: result.download_count,
            hearing_impaired: result.hearing_impaired,
            ai_translated: result.ai_translated,
            hash_match: result.hash_match(),
            url: result.url().map(str::to_string),
            ..Self::none(None)
        }
    }

    /// `none`, `local`, `{provider}_selection` or `{provider}_auto`
    pub fn label(&self) -> String {
        let provider = self.provider_name.as_deref().unwrap_or("provider");
        match self.kind {
            ActiveKind::None => "none".to_string(),
            ActiveKind::Local => "local".to_string(),
            ActiveKind::Selection => format!("{}_selection", provider),
            ActiveKind::Auto => format!("{}_auto", provider),
        }
    }

    pub fn is_provider(&self) -> bool {
        matches!(self.kind, ActiveKind::Selection | ActiveKind::Auto)
    }
}

/// Everything known about the video being played
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest<'a> {
    pub content_id: &'a str,
    pub video_hash: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub video_filename: Option<&'a str>,
    pub lang: &'a str,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

pub async fn get_active_subtitle_details(
    pool: &SqlitePool,
    registry: &ProviderRegistry,
    user: &User,
    request: &ResolveRequest<'_>,
) -> Result<ActiveSubtitle> {
    let video_hash = request.video_hash.filter(|h| !h.is_empty());

    // 1. Explicit selection
    let selection = get_user_selection(pool, &user.id, request.content_id, video_hash, request.lang).await?;
    if let Some(sel) = &selection {
        if let Some(subtitle_id) = sel.selected_subtitle_id.as_deref() {
            match library::find_subtitle(pool, subtitle_id).await? {
                Some(subtitle) => {
                    let vote = votes::user_vote(pool, &user.id, &subtitle.id).await?;
                    let mut active = ActiveSubtitle::local(subtitle, vote, false);
                    active.selection = selection.clone();
                    return Ok(active);
                }
                None => tracing::warn!("Selection {} points at missing subtitle {}", sel.id, subtitle_id),
            }
        }

        if let Some(active) = selection_from_details(sel) {
            return Ok(active);
        }
    }

    // 2. Local upload for this exact video
    if let Some(hash) = video_hash {
        if let Some(subtitle) = library::top_for_hash(pool, request.content_id, hash, request.lang).await? {
            let vote = votes::user_vote(pool, &user.id, &subtitle.id).await?;
            let mut active = ActiveSubtitle::local(subtitle, vote, true);
            active.selection = selection;
            return Ok(active);
        }
    }

    let active_providers = registry.active_for_user(user);
    let base_params = provider_params(pool, user, request).await;

    // 3. Provider hash match
    if let Some(hash) = video_hash {
        let hash_providers: Vec<_> = active_providers
            .iter()
            .filter(|p| p.supports_hash_matching())
            .cloned()
            .collect();
        if !hash_providers.is_empty() {
            let params = SearchParams {
                video_hash: Some(hash.to_string()),
                ..base_params.clone()
            };
            let results = search_providers_parallel(&hash_providers, &params, DEFAULT_SEARCH_TIMEOUT).await;
            for provider in &hash_providers {
                let found = results
                    .get(provider.name())
                    .and_then(|list| list.iter().find(|r| r.hash_match()));
                if let Some(result) = found {
                    tracing::info!("Hash match from {}: {}", provider.name(), result.subtitle_id);
                    let metadata = json!({
                        "release_name": result.release_name,
                        "uploader": result.uploader,
                        "hash_match": true,
                    });
                    let mut active = ActiveSubtitle::provider_auto(result, metadata);
                    active.selection = selection;
                    return Ok(active);
                }
            }
        }
    }

    let local_subs = library::subtitles_for_content(pool, request.content_id, request.lang).await?;
    let mut provider_results: Option<HashMap<String, Vec<SubtitleResult>>> = None;

    // 4. Closest release name
    if let Some(filename) = request.video_filename.filter(|f| !f.is_empty()) {
        let results = search_providers_parallel(&active_providers, &base_params, DEFAULT_SEARCH_TIMEOUT).await;

        let mut best: Option<(f64, Candidate)> = None;
        for sub in &local_subs {
            let score = calculate_filename_similarity(filename, sub.version_info.as_deref().unwrap_or(""));
            consider(&mut best, score, Candidate::Local(sub));
        }
        for provider in &active_providers {
            for result in results.get(provider.name()).into_iter().flatten() {
                let mut score = calculate_filename_similarity(filename, result.release_name.as_deref().unwrap_or(""));
                if result.ai_translated {
                    score -= AI_TRANSLATION_PENALTY;
                }
                consider(&mut best, score, Candidate::Provider(result));
            }
        }

        if let Some((score, candidate)) = best {
            tracing::debug!("Best filename match scored {:.3}", score);
            let mut active = match candidate {
                Candidate::Local(sub) => {
                    let vote = votes::user_vote(pool, &user.id, &sub.id).await?;
                    ActiveSubtitle::local(sub.clone(), vote, true)
                }
                Candidate::Provider(result) => {
                    ActiveSubtitle::provider_auto(result, json!({"release_name": result.release_name}))
                }
            };
            active.selection = selection;
            return Ok(active);
        }

        provider_results = Some(results);
    }

    // 5. Fallback: best voted upload, else any provider result
    if let Some(sub) = local_subs.into_iter().next() {
        let vote = votes::user_vote(pool, &user.id, &sub.id).await?;
        let mut active = ActiveSubtitle::local(sub, vote, true);
        active.selection = selection;
        return Ok(active);
    }

    let fallback = match provider_results {
        Some(results) => active_providers.iter().find_map(|provider| {
            results
                .get(provider.name())
                .filter(|list| !list.is_empty())
                .map(|list| (provider.name().to_string(), list.clone()))
        }),
        None => search_providers_with_fallback(&active_providers, &base_params, DEFAULT_SEARCH_TIMEOUT).await,
    };
    if let Some((provider_name, list)) = fallback {
        if let Some(chosen) = choose_fallback(&list, request.season, request.episode) {
            tracing::debug!("Falling back to {} result {}", provider_name, chosen.subtitle_id);
            let mut active = ActiveSubtitle::provider_auto(chosen, json!({"release_name": chosen.release_name}));
            active.selection = selection;
            return Ok(active);
        }
    }

    // 6. Nothing
    Ok(ActiveSubtitle::none(selection))
}

enum Candidate<'a> {
    Local(&'a Subtitle),
    Provider(&'a SubtitleResult),
}

/// Keep the first candidate with the highest positive score
fn consider<'a>(best: &mut Option<(f64, Candidate<'a>)>, score: f64, candidate: Candidate<'a>) {
    if score <= 0.0 {
        return;
    }
    if best.as_ref().map_or(true, |(s, _)| score > *s) {
        *best = Some((score, candidate));
    }
}

fn selection_from_details(selection: &UserSubtitleSelection) -> Option<ActiveSubtitle> {
    let details = selection.external_details()?;
    let provider = details.get("provider").and_then(Value::as_str)?.to_string();
    let subtitle_id = details
        .get("subtitle_id")
        .and_then(json_id_to_string)
        .or_else(|| details.get("file_id").and_then(json_id_to_string))?;

    let text = |key: &str| details.get(key).and_then(Value::as_str).map(str::to_string);
    let flag = |key: &str| details.get(key).and_then(Value::as_bool).unwrap_or(false);

    Some(ActiveSubtitle {
        kind: ActiveKind::Selection,
        provider_name: Some(provider),
        provider_subtitle_id: Some(subtitle_id),
        release_name: text("release_name"),
        uploader: text("uploader"),
        rating: details.get("rating").and_then(Value::as_f64),
        download_count: details.get("download_count").and_then(Value::as_i64),
        hearing_impaired: flag("hearing_impaired"),
        ai_translated: flag("ai_translated"),
        hash_match: flag("hash_match"),
        url: text("url"),
        selection: Some(selection.clone()),
        provider_metadata: Some(details),
        ..ActiveSubtitle::none(None)
    })
}

/// Pick a provider result for the episode, preferring human translations
fn choose_fallback(results: &[SubtitleResult], season: Option<u32>, episode: Option<u32>) -> Option<&SubtitleResult> {
    let prefer_human = |list: &[&'_ SubtitleResult]| -> Option<usize> {
        list.iter().position(|r| !r.ai_translated).or(if list.is_empty() { None } else { Some(0) })
    };

    let all: Vec<&SubtitleResult> = results.iter().collect();
    let Some(episode) = episode.filter(|e| *e > 0) else {
        return prefer_human(&all).map(|i| all[i]);
    };

    let wanted_se = season.filter(|s| *s > 0).map(|s| format_season_episode(s, episode));
    let episode_patterns = [
        format!(" {:03}", episode),
        format!("-{:03}", episode),
        format!(" {:02} ", episode),
        format!("-{:02}-", episode),
    ];

    let mut by_se = Vec::new();
    let mut by_episode = Vec::new();
    for result in results {
        let release = result.release_name.as_deref().unwrap_or("");
        let components = extract_release_components(release);
        if wanted_se.as_deref().is_some_and(|se| components.season_episode == se) {
            by_se.push(result);
        } else {
            let lowered = release.to_lowercase();
            if episode_patterns.iter().any(|p| lowered.contains(p.as_str())) {
                by_episode.push(result);
            }
        }
    }

    let candidates = if by_se.is_empty() { by_episode } else { by_se };
    if candidates.is_empty() {
        return prefer_human(&all).map(|i| all[i]);
    }
    prefer_human(&candidates).map(|i| candidates[i])
}

/// Search parameters shared by every provider lookup for this video.
/// Kitsu ids are translated through the anime mapping when possible.
pub(crate) async fn provider_params(pool: &SqlitePool, user: &User, request: &ResolveRequest<'_>) -> SearchParams {
    let parsed = ContentId::parse(request.content_id);
    let mut imdb_id = parsed.imdb_id;
    let mut season = request.season;

    if imdb_id.is_none() {
        if let Some(kitsu_id) = parsed.kitsu_id {
            match anime_mapping::imdb_from_kitsu(pool, kitsu_id).await {
                Ok(Some(mapped)) => {
                    tracing::debug!("Mapped kitsu:{} to {}", kitsu_id, mapped.imdb_id);
                    imdb_id = Some(mapped.imdb_id);
                    season = season.or(mapped.season);
                }
                Ok(None) => tracing::debug!("No IMDb mapping for kitsu:{}", kitsu_id),
                Err(e) => tracing::warn!("Anime mapping lookup failed for kitsu:{}: {}", kitsu_id, e),
            }
        }
    }

    SearchParams {
        imdb_id,
        video_hash: None,
        languages: vec![request.lang.to_string()],
        season,
        episode: request.episode,
        content_type: request.content_type.map(str::to_string),
        query: None,
        user_credentials: Value::Object(credentials_map(user)),
    }
}

pub async fn get_user_selection(
    pool: &SqlitePool,
    user_id: &str,
    content_id: &str,
    video_hash: Option<&str>,
    lang: &str,
) -> Result<Option<UserSubtitleSelection>> {
    let selection = sqlx::query_as(
        "SELECT * FROM user_subtitle_selection
         WHERE user_id = ? AND content_id = ? AND video_hash IS ? AND language = ?
         LIMIT 1",
    )
    .bind(user_id)
    .bind(content_id)
    .bind(video_hash)
    .bind(lang)
    .fetch_optional(pool)
    .await?;
    Ok(selection)
}

/// What a selection points at
#[derive(Debug, Clone)]
pub enum SelectionTarget {
    Local(String),
    External(Value),
}

pub async fn upsert_selection(
    pool: &SqlitePool,
    user_id: &str,
    content_id: &str,
    video_hash: Option<&str>,
    lang: &str,
    target: SelectionTarget,
) -> Result<()> {
    let (subtitle_id, details) = match target {
        SelectionTarget::Local(id) => (Some(id), None),
        SelectionTarget::External(details) => (None, Some(serde_json::to_string(&details)?)),
    };
    let now = db::now();

    let mut tx = pool.begin().await?;
    let existing: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM user_subtitle_selection
         WHERE user_id = ? AND content_id = ? AND video_hash IS ? AND language = ?",
    )
    .bind(user_id)
    .bind(content_id)
    .bind(video_hash)
    .bind(lang)
    .fetch_optional(&mut *tx)
    .await?;

    match existing {
        Some((id,)) => {
            sqlx::query(
                "UPDATE user_subtitle_selection
                 SET selected_subtitle_id = ?, external_details_json = ?, timestamp = ?
                 WHERE id = ?",
            )
            .bind(&subtitle_id)
            .bind(&details)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO user_subtitle_selection
                 (user_id, content_id, video_hash, language, selected_subtitle_id, external_details_json, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(user_id)
            .bind(content_id)
            .bind(video_hash)
            .bind(lang)
            .bind(&subtitle_id)
            .bind(&details)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
    }
    tx.commit().await?;

    tracing::info!(
        "Selection for user {} on {} ({:?}, {}) set to {:?}",
        user_id,
        content_id,
        video_hash,
        lang,
        subtitle_id.as_deref().unwrap_or("external")
    );
    Ok(())
}

pub async fn select_local(
    pool: &SqlitePool,
    user_id: &str,
    content_id: &str,
    video_hash: Option<&str>,
    lang: &str,
    subtitle_id: &str,
) -> Result<()> {
    upsert_selection(
        pool,
        user_id,
        content_id,
        video_hash,
        lang,
        SelectionTarget::Local(subtitle_id.to_string()),
    )
    .await
}

/// A provider result the user picked in the web interface
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ProviderChoice {
    pub subtitle_id: String,
    #[serde(default)]
    pub release_name: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub ai_translated: bool,
    #[serde(default)]
    pub hash_match: bool,
}

pub async fn select_provider(
    pool: &SqlitePool,
    user_id: &str,
    content_id: &str,
    video_hash: Option<&str>,
    lang: &str,
    provider: &str,
    choice: &ProviderChoice,
) -> Result<()> {
    let details = json!({
        "provider": provider,
        "subtitle_id": choice.subtitle_id,
        "release_name": choice.release_name,
        "uploader": choice.uploader,
        "ai_translated": choice.ai_translated,
        "hash_match": choice.hash_match,
    });
    upsert_selection(pool, user_id, content_id, video_hash, lang, SelectionTarget::External(details)).await
}

/// Returns whether a selection existed
pub async fn reset_selection(
    pool: &SqlitePool,
    user_id: &str,
    content_id: &str,
    video_hash: Option<&str>,
    lang: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "DELETE FROM user_subtitle_selection
         WHERE user_id = ? AND content_id = ? AND video_hash IS ? AND language = ?",
    )
    .bind(user_id)
    .bind(content_id)
    .bind(video_hash)
    .bind(lang)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
