// Up/down votes on community subtitles

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::db;
use crate::services::library::{self, LibraryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    pub votes: i64,
    /// The caller's vote after the change, 0 when it was withdrawn
    pub user_vote: i64,
}

/// Cast, change or withdraw a vote. Repeating the current vote withdraws it.
pub async fn vote(pool: &SqlitePool, user_id: &str, subtitle_id: &str, value: i64) -> Result<VoteOutcome> {
    if value != 1 && value != -1 {
        return Err(LibraryError::Invalid("Vote value must be 1 or -1".into()).into());
    }

    let subtitle = library::get_subtitle(pool, subtitle_id).await?;
    if !subtitle.is_votable() {
        return Err(LibraryError::Invalid("Voting is not available for this type of subtitle".into()).into());
    }

    let mut tx = pool.begin().await?;

    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT vote_value FROM subtitle_votes WHERE user_id = ? AND subtitle_id = ?")
            .bind(user_id)
            .bind(subtitle_id)
            .fetch_optional(&mut *tx)
            .await?;

    let (delta, user_vote) = match existing {
        Some((old,)) if old == value => {
            sqlx::query("DELETE FROM subtitle_votes WHERE user_id = ? AND subtitle_id = ?")
                .bind(user_id)
                .bind(subtitle_id)
                .execute(&mut *tx)
                .await?;
            (-old, 0)
        }
        Some((old,)) => {
            sqlx::query(
                "UPDATE subtitle_votes SET vote_value = ?, timestamp = ? WHERE user_id = ? AND subtitle_id = ?",
            )
            .bind(value)
            .bind(db::now())
            .bind(user_id)
            .bind(subtitle_id)
            .execute(&mut *tx)
            .await?;
            (value - old, value)
        }
        None => {
            insert_vote(&mut *tx, user_id, subtitle_id, value).await?;
            (value, value)
        }
    };

    let (votes,): (i64,) =
        sqlx::query_as("UPDATE subtitles SET votes = votes + ? WHERE id = ? RETURNING votes")
            .bind(delta)
            .bind(subtitle_id)
            .fetch_one(&mut *tx)
            .await?;

    tx.commit().await?;

    tracing::debug!(
        "User {} voted {} on subtitle {}, total now {}",
        user_id,
        user_vote,
        subtitle_id,
        votes
    );

    Ok(VoteOutcome { votes, user_vote })
}

/// Record a vote row without touching the subtitle's tally
pub async fn insert_vote<'e, E>(executor: E, user_id: &str, subtitle_id: &str, value: i64) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO subtitle_votes (user_id, subtitle_id, vote_value, timestamp) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(subtitle_id)
    .bind(value)
    .bind(db::now())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn user_vote(pool: &SqlitePool, user_id: &str, subtitle_id: &str) -> Result<Option<i64>> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT vote_value FROM subtitle_votes WHERE user_id = ? AND subtitle_id = ?")
            .bind(user_id)
            .bind(subtitle_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(v,)| v))
}

/// The user's votes for a set of subtitles, keyed by subtitle id
pub async fn user_votes(
    pool: &SqlitePool,
    user_id: &str,
    subtitle_ids: &[String],
) -> Result<HashMap<String, i64>> {
    if subtitle_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
        "SELECT subtitle_id, vote_value FROM subtitle_votes WHERE user_id = ",
    );
    qb.push_bind(user_id.to_string());
    qb.push(" AND subtitle_id IN (");
    let mut separated = qb.separated(", ");
    for id in subtitle_ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");

    let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows.into_iter().collect())
}
