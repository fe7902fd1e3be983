// Viewing history recorded from Stremio subtitle requests

use anyhow::{anyhow, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::models::UserActivity;
use crate::services::pagination::Pagination;

/// Player-supplied details from the `extra` path segment or query string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraParams {
    pub video_hash: Option<String>,
    pub video_size: Option<i64>,
    pub filename: Option<String>,
}

/// Parse `videoHash=..&videoSize=..&filename=..`. The first value of a key wins.
pub fn parse_extra_params(raw: &str) -> ExtraParams {
    let mut params = ExtraParams::default();
    let mut raw_size: Option<String> = None;

    for pair in raw.trim_start_matches('?').split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = decode_component(value);
        if value.is_empty() {
            continue;
        }
        match key {
            "videoHash" if params.video_hash.is_none() => params.video_hash = Some(value),
            "videoSize" if raw_size.is_none() => raw_size = Some(value),
            "filename" if params.filename.is_none() => params.filename = Some(value),
            _ => {}
        }
    }

    if let Some(size) = raw_size {
        match size.parse::<i64>() {
            Ok(size) => params.video_size = Some(size),
            Err(_) => tracing::warn!("Could not convert videoSize '{}' to integer", size),
        }
    }

    params
}

fn decode_component(value: &str) -> String {
    let spaced = value.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|v| v.into_owned())
        .unwrap_or(spaced)
}

/// Record that the user's player asked for subtitles, reusing a matching row
pub async fn record_activity(
    pool: &SqlitePool,
    user_id: &str,
    content_id: &str,
    content_type: &str,
    extra: &ExtraParams,
    max_activities: i64,
) -> Result<UserActivity> {
    let now = db::now();

    let existing: Option<UserActivity> = match (&extra.video_hash, extra.video_size) {
        (Some(hash), Some(size)) => {
            sqlx::query_as(
                "SELECT * FROM user_activity
                 WHERE user_id = ? AND content_id = ? AND video_hash = ? AND video_size = ?
                 LIMIT 1",
            )
            .bind(user_id)
            .bind(content_id)
            .bind(hash)
            .bind(size)
            .fetch_optional(pool)
            .await?
        }
        (None, size) => {
            sqlx::query_as(
                "SELECT * FROM user_activity
                 WHERE user_id = ? AND content_id = ? AND video_hash IS NULL
                   AND video_size IS ? AND video_filename IS ?
                 LIMIT 1",
            )
            .bind(user_id)
            .bind(content_id)
            .bind(size)
            .bind(&extra.filename)
            .fetch_optional(pool)
            .await?
        }
        // A hash without a size never matches an existing row
        (Some(_), None) => None,
    };

    let activity_id = match existing {
        Some(activity) => {
            sqlx::query(
                "UPDATE user_activity
                 SET timestamp = ?, video_filename = COALESCE(?, video_filename)
                 WHERE id = ?",
            )
            .bind(&now)
            .bind(&extra.filename)
            .bind(&activity.id)
            .execute(pool)
            .await?;
            tracing::info!("Updated existing activity {} for user {}", activity.id, user_id);
            activity.id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO user_activity
                 (id, user_id, content_id, content_type, timestamp, video_hash, video_size, video_filename)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(user_id)
            .bind(content_id)
            .bind(content_type)
            .bind(&now)
            .bind(&extra.video_hash)
            .bind(extra.video_size)
            .bind(&extra.filename)
            .execute(pool)
            .await?;
            tracing::info!(
                "Created activity {} for user {}, content {}, hash {:?}",
                id,
                user_id,
                content_id,
                extra.video_hash
            );
            id
        }
    };

    trim_activities(pool, user_id, max_activities + 1).await?;

    get_activity(pool, user_id, &activity_id).await
}

/// Keep only the newest `keep` rows for a user
async fn trim_activities(pool: &SqlitePool, user_id: &str, keep: i64) -> Result<()> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_activity WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    let excess = count - keep;
    if excess <= 0 {
        return Ok(());
    }

    let deleted = sqlx::query(
        "DELETE FROM user_activity WHERE id IN (
             SELECT id FROM user_activity WHERE user_id = ?
             ORDER BY timestamp ASC, rowid ASC LIMIT ?
         )",
    )
    .bind(user_id)
    .bind(excess)
    .execute(pool)
    .await?;

    tracing::info!(
        "Deleted {} oldest activities for user {} to keep {}",
        deleted.rows_affected(),
        user_id,
        keep
    );
    Ok(())
}

pub async fn list_activities(
    pool: &SqlitePool,
    user_id: &str,
    page: u32,
    per_page: u32,
) -> Result<Pagination<UserActivity>> {
    let page = page.max(1);
    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_activity WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    let items: Vec<UserActivity> = sqlx::query_as(
        "SELECT * FROM user_activity WHERE user_id = ?
         ORDER BY timestamp DESC, rowid DESC LIMIT ? OFFSET ?",
    )
    .bind(user_id)
    .bind(per_page as i64)
    .bind(Pagination::<UserActivity>::offset(page, per_page))
    .fetch_all(pool)
    .await?;

    Ok(Pagination::new(items, page, per_page, total.max(0) as u64))
}

pub async fn get_activity(pool: &SqlitePool, user_id: &str, activity_id: &str) -> Result<UserActivity> {
    sqlx::query_as("SELECT * FROM user_activity WHERE id = ? AND user_id = ?")
        .bind(activity_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| anyhow!("Activity not found"))
}

pub async fn delete_activity(pool: &SqlitePool, user_id: &str, activity_id: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM user_activity WHERE id = ? AND user_id = ?")
        .bind(activity_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(anyhow!("Activity not found"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::test_user;

    fn extra(hash: Option<&str>, size: Option<i64>, filename: Option<&str>) -> ExtraParams {
        ExtraParams {
            video_hash: hash.map(str::to_string),
            video_size: size,
            filename: filename.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_extra_params() {
        let parsed = parse_extra_params("videoHash=abc123&videoSize=1048576&filename=Show%20S01E01.mkv");
        assert_eq!(parsed, extra(Some("abc123"), Some(1048576), Some("Show S01E01.mkv")));

        let parsed = parse_extra_params("?filename=a+b.mkv&videoSize=big&other=1");
        assert_eq!(parsed, extra(None, None, Some("a b.mkv")));

        assert_eq!(parse_extra_params(""), ExtraParams::default());
    }

    #[tokio::test]
    async fn test_record_reuses_hash_and_size() {
        let pool = db::test_pool().await;
        let user = test_user(&pool, "alice").await;

        let first = record_activity(&pool, &user.id, "tt1", "movie", &extra(Some("h"), Some(10), None), 15)
            .await
            .unwrap();
        let second = record_activity(
            &pool,
            &user.id,
            "tt1",
            "movie",
            &extra(Some("h"), Some(10), Some("movie.mkv")),
            15,
        )
        .await
        .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.video_filename.as_deref(), Some("movie.mkv"));
        assert!(second.timestamp >= first.timestamp);

        let other = record_activity(&pool, &user.id, "tt1", "movie", &extra(Some("h2"), Some(10), None), 15)
            .await
            .unwrap();
        assert_ne!(other.id, first.id);
    }

    #[tokio::test]
    async fn test_record_without_hash_matches_filename() {
        let pool = db::test_pool().await;
        let user = test_user(&pool, "bob").await;

        let a = record_activity(&pool, &user.id, "tt2", "movie", &extra(None, None, Some("x.mkv")), 15)
            .await
            .unwrap();
        let b = record_activity(&pool, &user.id, "tt2", "movie", &extra(None, None, Some("x.mkv")), 15)
            .await
            .unwrap();
        let c = record_activity(&pool, &user.id, "tt2", "movie", &extra(None, None, Some("y.mkv")), 15)
            .await
            .unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn test_record_trims_to_limit_plus_one() {
        let pool = db::test_pool().await;
        let user = test_user(&pool, "carol").await;

        for i in 0..6 {
            record_activity(&pool, &user.id, &format!("tt{}", i), "movie", &ExtraParams::default(), 3)
                .await
                .unwrap();
        }

        let page = list_activities(&pool, &user.id, 1, 20).await.unwrap();
        assert_eq!(page.total, 4);
        let ids: Vec<&str> = page.items.iter().map(|a| a.content_id.as_str()).collect();
        assert_eq!(ids, vec!["tt5", "tt4", "tt3", "tt2"]);
    }

    #[tokio::test]
    async fn test_get_and_delete_are_scoped_to_user() {
        let pool = db::test_pool().await;
        let owner = test_user(&pool, "dave").await;
        let stranger = test_user(&pool, "erin").await;

        let activity = record_activity(&pool, &owner.id, "tt9", "movie", &ExtraParams::default(), 15)
            .await
            .unwrap();

        assert!(get_activity(&pool, &stranger.id, &activity.id).await.is_err());
        assert!(delete_activity(&pool, &stranger.id, &activity.id).await.is_err());

        delete_activity(&pool, &owner.id, &activity.id).await.unwrap();
        assert!(get_activity(&pool, &owner.id, &activity.id).await.is_err());
    }
}
