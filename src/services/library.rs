// Community subtitle library: uploads, provider links, compatibility copies

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::db;
use crate::models::{link_source_type, Subtitle, User, UserActivity, ROLE_ADMIN, SOURCE_COMMUNITY};
use crate::services::selection::{self, SelectionTarget};
use crate::services::storage::Storage;
use crate::services::{auth, convert, languages, votes};

pub const ALLOWED_EXTENSIONS: &[&str] = &["srt", "sub", "txt", "ass", "ssa", "vtt"];

/// Failures the web API reports with a specific status
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Subtitle not found")]
    NotFound,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Invalid(String),
}

pub async fn find_subtitle(pool: &SqlitePool, subtitle_id: &str) -> Result<Option<Subtitle>> {
    let subtitle = sqlx::query_as("SELECT * FROM subtitles WHERE id = ?")
        .bind(subtitle_id)
        .fetch_optional(pool)
        .await?;
    Ok(subtitle)
}

pub async fn get_subtitle(pool: &SqlitePool, subtitle_id: &str) -> Result<Subtitle> {
    find_subtitle(pool, subtitle_id)
        .await?
        .ok_or_else(|| LibraryError::NotFound.into())
}

/// Local subtitles for content in a language, best voted first
pub async fn subtitles_for_content(pool: &SqlitePool, content_id: &str, lang: &str) -> Result<Vec<Subtitle>> {
    let subtitles = sqlx::query_as(
        "SELECT * FROM subtitles WHERE content_id = ? AND language = ?
         ORDER BY votes DESC, upload_timestamp DESC",
    )
    .bind(content_id)
    .bind(lang)
    .fetch_all(pool)
    .await?;
    Ok(subtitles)
}

pub async fn top_for_hash(
    pool: &SqlitePool,
    content_id: &str,
    video_hash: &str,
    lang: &str,
) -> Result<Option<Subtitle>> {
    let subtitle = sqlx::query_as(
        "SELECT * FROM subtitles WHERE content_id = ? AND video_hash = ? AND language = ?
         ORDER BY votes DESC, upload_timestamp DESC LIMIT 1",
    )
    .bind(content_id)
    .bind(video_hash)
    .bind(lang)
    .fetch_optional(pool)
    .await?;
    Ok(subtitle)
}

pub struct NewSubtitle<'a> {
    pub content_id: &'a str,
    pub content_type: &'a str,
    pub video_hash: Option<&'a str>,
    pub language: &'a str,
    pub file_path: Option<&'a str>,
    pub uploader_id: &'a str,
    pub votes: i64,
    pub author: Option<&'a str>,
    pub version_info: Option<&'a str>,
    pub source_type: &'a str,
    pub source_metadata: Option<String>,
}

pub async fn insert_subtitle<'e, E>(executor: E, new: &NewSubtitle<'_>) -> Result<Subtitle>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let subtitle = sqlx::query_as(
        "INSERT INTO subtitles
         (id, content_id, content_type, video_hash, language, file_path, uploader_id,
          upload_timestamp, votes, author, version_info, source_type, source_metadata)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(new.content_id)
    .bind(new.content_type)
    .bind(new.video_hash)
    .bind(new.language)
    .bind(new.file_path)
    .bind(new.uploader_id)
    .bind(db::now())
    .bind(new.votes)
    .bind(new.author)
    .bind(new.version_info)
    .bind(new.source_type)
    .bind(&new.source_metadata)
    .fetch_one(executor)
    .await
    .context("Failed to insert subtitle")?;
    Ok(subtitle)
}

/// A subtitle file submitted from the web interface
#[derive(Debug, Default)]
pub struct UploadRequest<'a> {
    pub filename: &'a str,
    pub data: &'a [u8],
    pub language: &'a str,
    pub encoding: Option<&'a str>,
    pub fps: Option<f64>,
    pub author: Option<&'a str>,
    pub version_info: Option<&'a str>,
}

pub async fn upload(
    pool: &SqlitePool,
    storage: &Storage,
    max_upload_bytes: usize,
    user: &User,
    activity: &UserActivity,
    request: &UploadRequest<'_>,
) -> Result<Subtitle> {
    let extension = convert::extension_of(request.filename)
        .map_err(|e| LibraryError::Invalid(e.to_string()))?;
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(LibraryError::Invalid(format!(
            "Unsupported file type '.{}'. Allowed: {}",
            extension,
            ALLOWED_EXTENSIONS.join(", ")
        ))
        .into());
    }
    if request.data.is_empty() {
        return Err(LibraryError::Invalid("Uploaded file is empty".into()).into());
    }
    if request.data.len() > max_upload_bytes {
        return Err(LibraryError::Invalid(format!(
            "File is too large ({} bytes, limit {})",
            request.data.len(),
            max_upload_bytes
        ))
        .into());
    }
    let language = languages::normalize(request.language);
    if !languages::is_supported(&language) {
        return Err(LibraryError::Invalid(format!("Unsupported language '{}'", request.language)).into());
    }

    let vtt = convert::convert_to_vtt(request.data, &extension, request.encoding, request.fps)
        .map_err(|e| LibraryError::Invalid(format!("Could not convert subtitle: {}", e)))?;

    let file_path = storage.save(&activity.content_id, &vtt).await?;

    let inserted = insert_subtitle(
        pool,
        &NewSubtitle {
            content_id: &activity.content_id,
            content_type: &activity.content_type,
            video_hash: activity.video_hash.as_deref(),
            language: &language,
            file_path: Some(&file_path),
            uploader_id: &user.id,
            votes: 0,
            author: non_empty(request.author),
            version_info: non_empty(request.version_info),
            source_type: SOURCE_COMMUNITY,
            source_metadata: None,
        },
    )
    .await;

    let subtitle = match inserted {
        Ok(subtitle) => subtitle,
        Err(e) => {
            if let Err(cleanup) = storage.delete(&file_path).await {
                tracing::warn!("Failed to remove orphaned upload {}: {}", file_path, cleanup);
            }
            return Err(e);
        }
    };

    tracing::info!(
        "User {} uploaded {} subtitle {} for {} ({} bytes via {})",
        user.username,
        language,
        subtitle.id,
        subtitle.content_id,
        request.data.len(),
        storage.backend_name()
    );

    selection::select_local(
        pool,
        &user.id,
        &activity.content_id,
        activity.video_hash.as_deref(),
        &language,
        &subtitle.id,
    )
    .await?;

    Ok(subtitle)
}

/// Record that a subtitle also fits the video in `activity`.
///
/// Returns the subtitle that now serves the activity's hash.
pub async fn mark_compatible_hash(
    pool: &SqlitePool,
    user: &User,
    subtitle_id: &str,
    activity: &UserActivity,
) -> Result<Subtitle> {
    let original = get_subtitle(pool, subtitle_id).await?;

    if original.content_id != activity.content_id {
        return Err(LibraryError::Invalid("Subtitle belongs to different content".into()).into());
    }
    if original.link_provider().is_some() {
        return Err(LibraryError::Invalid(
            "Provider links cannot be marked compatible; link the provider subtitle instead".into(),
        )
        .into());
    }
    let Some(file_path) = original.file_path.as_deref() else {
        return Err(LibraryError::Invalid("Subtitle has no stored file".into()).into());
    };
    let target_hash = activity.video_hash.as_deref();
    if target_hash.is_some() && target_hash == original.video_hash.as_deref() {
        return Err(LibraryError::Invalid("Subtitle already matches this video".into()).into());
    }

    let existing: Option<Subtitle> = sqlx::query_as(
        "SELECT * FROM subtitles
         WHERE content_id = ? AND language = ? AND video_hash IS ? AND file_path = ? AND source_type = ?
         LIMIT 1",
    )
    .bind(&original.content_id)
    .bind(&original.language)
    .bind(target_hash)
    .bind(file_path)
    .bind(&original.source_type)
    .fetch_optional(pool)
    .await?;

    let subtitle = match existing {
        Some(subtitle) => {
            tracing::debug!("Reusing compatible copy {} of {}", subtitle.id, original.id);
            subtitle
        }
        None => {
            let mut tx = pool.begin().await?;
            let copy = insert_subtitle(
                &mut *tx,
                &NewSubtitle {
                    content_id: &original.content_id,
                    content_type: &original.content_type,
                    video_hash: target_hash,
                    language: &original.language,
                    file_path: Some(file_path),
                    uploader_id: &original.uploader_id,
                    votes: 1,
                    author: original.author.as_deref(),
                    version_info: original.version_info.as_deref(),
                    source_type: &original.source_type,
                    source_metadata: original.source_metadata.clone(),
                },
            )
            .await?;
            votes::insert_vote(&mut *tx, &user.id, &copy.id, 1).await?;
            tx.commit().await?;

            tracing::info!(
                "User {} marked subtitle {} compatible with hash {:?} as {}",
                user.username,
                original.id,
                target_hash,
                copy.id
            );
            copy
        }
    };

    selection::upsert_selection(
        pool,
        &user.id,
        &activity.content_id,
        target_hash,
        &subtitle.language,
        SelectionTarget::Local(subtitle.id.clone()),
    )
    .await?;

    Ok(subtitle)
}

/// A provider result the user shares with the community
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct LinkRequest {
    pub subtitle_id: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub release_name: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ai_translated: bool,
}

pub async fn link_provider_subtitle(
    pool: &SqlitePool,
    user: &User,
    activity: &UserActivity,
    provider: &str,
    link: &LinkRequest,
) -> Result<Subtitle> {
    let Some(video_hash) = activity.video_hash.as_deref() else {
        return Err(LibraryError::Invalid("Linking requires a video hash".into()).into());
    };
    if link.subtitle_id.is_empty() {
        return Err(LibraryError::Invalid("Missing provider subtitle id".into()).into());
    }
    let language = languages::normalize(&link.language);
    let source_type = link_source_type(provider);

    let existing: Option<Subtitle> = sqlx::query_as(
        "SELECT * FROM subtitles
         WHERE content_id = ? AND video_hash = ? AND source_type = ? AND language = ?
           AND json_extract(source_metadata, '$.provider_subtitle_id') = ?
         LIMIT 1",
    )
    .bind(&activity.content_id)
    .bind(video_hash)
    .bind(&source_type)
    .bind(&language)
    .bind(&link.subtitle_id)
    .fetch_optional(pool)
    .await?;

    let subtitle = match existing {
        Some(subtitle) => {
            tracing::debug!("Provider subtitle {} already linked as {}", link.subtitle_id, subtitle.id);
            subtitle
        }
        None => {
            let author = match link.uploader.as_deref().map(str::trim) {
                Some(u) if !u.is_empty() && !u.eq_ignore_ascii_case("n/a") => u.to_string(),
                _ => title_case(provider),
            };
            let metadata = json!({
                "provider": provider,
                "provider_subtitle_id": link.subtitle_id,
                "original_uploader": link.uploader,
                "original_release_name": link.release_name,
                "original_url": link.url,
                "ai_translated": link.ai_translated,
                "linked_by_user_id": user.id,
            });

            let mut tx = pool.begin().await?;
            let subtitle = insert_subtitle(
                &mut *tx,
                &NewSubtitle {
                    content_id: &activity.content_id,
                    content_type: &activity.content_type,
                    video_hash: Some(video_hash),
                    language: &language,
                    file_path: None,
                    uploader_id: &user.id,
                    votes: 1,
                    author: Some(&author),
                    version_info: link.release_name.as_deref(),
                    source_type: &source_type,
                    source_metadata: Some(metadata.to_string()),
                },
            )
            .await?;
            votes::insert_vote(&mut *tx, &user.id, &subtitle.id, 1).await?;
            tx.commit().await?;

            tracing::info!(
                "User {} linked {} subtitle {} to {} as {}",
                user.username,
                provider,
                link.subtitle_id,
                activity.content_id,
                subtitle.id
            );
            subtitle
        }
    };

    selection::select_local(pool, &user.id, &activity.content_id, Some(video_hash), &language, &subtitle.id).await?;
    Ok(subtitle)
}

pub async fn delete_subtitle(pool: &SqlitePool, storage: &Storage, user: &User, subtitle_id: &str) -> Result<()> {
    let subtitle = get_subtitle(pool, subtitle_id).await?;
    ensure_owner_or_admin(pool, user, &subtitle).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM user_subtitle_selection WHERE selected_subtitle_id = ?")
        .bind(&subtitle.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM subtitle_votes WHERE subtitle_id = ?")
        .bind(&subtitle.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM subtitles WHERE id = ?")
        .bind(&subtitle.id)
        .execute(&mut *tx)
        .await?;

    // Compatibility copies share the stored file
    let shared = match subtitle.file_path.as_deref() {
        Some(path) => {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subtitles WHERE file_path = ?")
                .bind(path)
                .fetch_one(&mut *tx)
                .await?;
            count > 0
        }
        None => false,
    };
    tx.commit().await?;

    if let (true, Some(path), false) = (subtitle.is_community(), subtitle.file_path.as_deref(), shared) {
        if let Err(e) = storage.delete(path).await {
            tracing::warn!("Failed to delete stored file {} for subtitle {}: {}", path, subtitle.id, e);
        }
    }

    tracing::info!("User {} deleted subtitle {}", user.username, subtitle.id);
    Ok(())
}

pub async fn ensure_owner_or_admin(pool: &SqlitePool, user: &User, subtitle: &Subtitle) -> Result<()> {
    if subtitle.uploader_id == user.id || auth::has_role(pool, &user.id, ROLE_ADMIN).await? {
        return Ok(());
    }
    Err(LibraryError::Forbidden("Only the uploader or an administrator can do that".into()).into())
}

pub async fn fetch_subtitle_content(storage: &Storage, subtitle: &Subtitle) -> Result<String> {
    let path = subtitle
        .file_path
        .as_deref()
        .ok_or_else(|| LibraryError::Invalid(format!("Subtitle {} has no stored file", subtitle.id)))?;
    storage.read(path).await
}

/// `{content}_{lang}_{id prefix}.vtt`
pub fn download_filename(subtitle: &Subtitle) -> String {
    let prefix: String = subtitle.id.chars().take(8).collect();
    format!(
        "{}_{}_{}.vtt",
        subtitle.content_id.replace(':', "_"),
        subtitle.language,
        prefix
    )
}

/// Subtitles split by how their hash relates to the video being played
#[derive(Debug, Default, Serialize)]
pub struct HashGroups {
    pub matching_hash: Vec<Subtitle>,
    pub no_hash: Vec<Subtitle>,
    pub other_hash: Vec<Subtitle>,
}

pub fn group_by_hash(subtitles: Vec<Subtitle>, video_hash: Option<&str>) -> HashGroups {
    let mut groups = HashGroups::default();
    for subtitle in subtitles {
        match (subtitle.video_hash.as_deref(), video_hash) {
            (None, _) | (Some(""), _) => groups.no_hash.push(subtitle),
            (Some(h), Some(v)) if h == v => groups.matching_hash.push(subtitle),
            _ => groups.other_hash.push(subtitle),
        }
    }
    groups
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
pub async fn test_subtitle(
    pool: &SqlitePool,
    uploader_id: &str,
    content_id: &str,
    video_hash: Option<&str>,
    source_type: &str,
) -> Subtitle {
    let file_path = format!("{}/{}.vtt", content_id.replace(':', "_"), Uuid::new_v4());
    insert_subtitle(
        pool,
        &NewSubtitle {
            content_id,
            content_type: "movie",
            video_hash,
            language: "eng",
            file_path: (source_type == SOURCE_COMMUNITY).then_some(file_path.as_str()),
            uploader_id,
            votes: 0,
            author: None,
            version_info: None,
            source_type,
            source_metadata: None,
        },
    )
    .await
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::activity::{record_activity, ExtraParams};
    use crate::services::auth::test_user;
    use crate::services::selection::get_user_selection;

    const SRT: &[u8] = b"1\n00:00:01,000 --> 00:00:02,000\nHello\n";

    async fn activity_for(pool: &SqlitePool, user: &User, content_id: &str, hash: Option<&str>) -> UserActivity {
        let extra = ExtraParams {
            video_hash: hash.map(str::to_string),
            video_size: Some(1000),
            filename: None,
        };
        record_activity(pool, &user.id, content_id, "movie", &extra, 10).await.unwrap()
    }

    fn srt_upload() -> UploadRequest<'static> {
        UploadRequest {
            filename: "movie.srt",
            data: SRT,
            language: "eng",
            version_info: Some("Movie.2020.1080p"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upload_stores_and_selects() {
        let pool = db::test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::local(dir.path().to_path_buf());
        let user = test_user(&pool, "uploader").await;
        let activity = activity_for(&pool, &user, "tt1:1:2", Some("abc")).await;

        let sub = upload(&pool, &storage, 1024, &user, &activity, &srt_upload()).await.unwrap();
        assert_eq!(sub.video_hash.as_deref(), Some("abc"));
        assert_eq!(sub.votes, 0);
        assert!(sub.file_path.as_deref().unwrap().starts_with("tt1_1_2/"));

        let content = fetch_subtitle_content(&storage, &sub).await.unwrap();
        assert!(content.starts_with("WEBVTT"));

        let selection = get_user_selection(&pool, &user.id, "tt1:1:2", Some("abc"), "eng")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selection.selected_subtitle_id.as_deref(), Some(sub.id.as_str()));
    }

    #[tokio::test]
    async fn test_upload_rejections() {
        let pool = db::test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::local(dir.path().to_path_buf());
        let user = test_user(&pool, "rejected").await;
        let activity = activity_for(&pool, &user, "tt1", None).await;

        let exe = UploadRequest { filename: "movie.exe", ..srt_upload() };
        let err = upload(&pool, &storage, 1024, &user, &activity, &exe).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<LibraryError>(), Some(LibraryError::Invalid(_))));

        assert!(upload(&pool, &storage, 4, &user, &activity, &srt_upload()).await.is_err());

        let bad_lang = UploadRequest { language: "xx", ..srt_upload() };
        assert!(upload(&pool, &storage, 1024, &user, &activity, &bad_lang).await.is_err());
    }

    #[tokio::test]
    async fn test_mark_compatible_copies_once() {
        let pool = db::test_pool().await;
        let uploader = test_user(&pool, "orig").await;
        let helper = test_user(&pool, "helper").await;
        let original = test_subtitle(&pool, &uploader.id, "tt1", Some("aaa"), "community").await;
        let activity = activity_for(&pool, &helper, "tt1", Some("bbb")).await;

        let copy = mark_compatible_hash(&pool, &helper, &original.id, &activity).await.unwrap();
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.video_hash.as_deref(), Some("bbb"));
        assert_eq!(copy.file_path, original.file_path);
        assert_eq!(copy.uploader_id, uploader.id);
        assert_eq!(copy.votes, 1);
        assert_eq!(votes::user_vote(&pool, &helper.id, &copy.id).await.unwrap(), Some(1));

        let again = mark_compatible_hash(&pool, &helper, &original.id, &activity).await.unwrap();
        assert_eq!(again.id, copy.id);

        let elsewhere = activity_for(&pool, &helper, "tt2", Some("bbb")).await;
        assert!(mark_compatible_hash(&pool, &helper, &original.id, &elsewhere).await.is_err());
    }

    #[tokio::test]
    async fn test_link_provider_subtitle() {
        let pool = db::test_pool().await;
        let user = test_user(&pool, "linker").await;
        let activity = activity_for(&pool, &user, "tt1", Some("hash")).await;
        let link = LinkRequest {
            subtitle_id: "777".into(),
            language: "eng".into(),
            release_name: Some("Movie.WEB".into()),
            uploader: Some("N/A".into()),
            ..Default::default()
        };

        let sub = link_provider_subtitle(&pool, &user, &activity, "opensubtitles", &link).await.unwrap();
        assert_eq!(sub.source_type, "opensubtitles_community_link");
        assert_eq!(sub.author.as_deref(), Some("Opensubtitles"));
        assert_eq!(sub.provider_subtitle_id().as_deref(), Some("777"));
        assert!(sub.file_path.is_none());
        assert_eq!(sub.votes, 1);

        let again = link_provider_subtitle(&pool, &user, &activity, "opensubtitles", &link).await.unwrap();
        assert_eq!(again.id, sub.id);

        // Links cannot be copied to other hashes
        let other = activity_for(&pool, &user, "tt1", Some("other")).await;
        assert!(mark_compatible_hash(&pool, &user, &sub.id, &other).await.is_err());

        let no_hash = activity_for(&pool, &user, "tt1", None).await;
        assert!(link_provider_subtitle(&pool, &user, &no_hash, "opensubtitles", &link).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_permissions_and_shared_files() {
        let pool = db::test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::local(dir.path().to_path_buf());
        let owner = test_user(&pool, "owner").await;
        let stranger = test_user(&pool, "stranger").await;
        let activity = activity_for(&pool, &owner, "tt1", Some("one")).await;
        let sub = upload(&pool, &storage, 1024, &owner, &activity, &srt_upload()).await.unwrap();

        let other = activity_for(&pool, &stranger, "tt1", Some("two")).await;
        let copy = mark_compatible_hash(&pool, &stranger, &sub.id, &other).await.unwrap();

        let err = delete_subtitle(&pool, &storage, &stranger, &sub.id).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<LibraryError>(), Some(LibraryError::Forbidden(_))));

        delete_subtitle(&pool, &storage, &owner, &sub.id).await.unwrap();
        assert!(find_subtitle(&pool, &sub.id).await.unwrap().is_none());
        assert!(get_user_selection(&pool, &owner.id, "tt1", Some("one"), "eng").await.unwrap().is_none());
        // The copy still reads the shared file
        assert!(fetch_subtitle_content(&storage, &copy).await.is_ok());
    }

    #[test]
    fn test_download_filename_and_groups() {
        let sub = |id: &str, hash: Option<&str>| Subtitle {
            id: id.to_string(),
            content_id: "tt1:2:3".to_string(),
            content_type: "series".to_string(),
            video_hash: hash.map(str::to_string),
            language: "eng".to_string(),
            file_path: None,
            uploader_id: "u".to_string(),
            upload_timestamp: String::new(),
            votes: 0,
            author: None,
            version_info: None,
            source_type: SOURCE_COMMUNITY.to_string(),
            source_metadata: None,
        };

        assert_eq!(
            download_filename(&sub("0123456789abcdef", None)),
            "tt1_2_3_eng_01234567.vtt"
        );

        let all = vec![sub("a", Some("h")), sub("b", None), sub("c", Some("x"))];
        let groups = group_by_hash(all.clone(), Some("h"));
        assert_eq!(groups.matching_hash.len(), 1);
        assert_eq!(groups.no_hash.len(), 1);
        assert_eq!(groups.other_hash.len(), 1);

        let groups = group_by_hash(all, None);
        assert!(groups.matching_hash.is_empty());
        assert_eq!(groups.other_hash.len(), 2);
    }
}
