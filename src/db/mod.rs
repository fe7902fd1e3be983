use anyhow::{Context, Result};
use sqlx::SqlitePool;

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            preferred_language TEXT NOT NULL DEFAULT 'eng',
            active INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            manifest_token TEXT UNIQUE,
            -- JSON map: provider name -> credentials blob
            provider_credentials TEXT
        );

        CREATE TABLE IF NOT EXISTS roles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT
        );

        CREATE TABLE IF NOT EXISTS roles_users (
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
            PRIMARY KEY (user_id, role_id)
        );

        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            expires_at TEXT
        );

        CREATE TABLE IF NOT EXISTS subtitles (
            id TEXT PRIMARY KEY,
            content_id TEXT NOT NULL,
            content_type TEXT NOT NULL,
            video_hash TEXT,
            language TEXT NOT NULL,
            -- NULL for subtitles linked from a provider
            file_path TEXT,
            uploader_id TEXT NOT NULL REFERENCES users(id),
            upload_timestamp TEXT NOT NULL,
            votes INTEGER NOT NULL DEFAULT 0,
            author TEXT,
            version_info TEXT,
            -- 'community' or '{provider}_community_link'
            source_type TEXT NOT NULL DEFAULT 'community',
            source_metadata TEXT
        );

        CREATE TABLE IF NOT EXISTS user_activity (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content_id TEXT NOT NULL,
            content_type TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            video_hash TEXT,
            video_size INTEGER,
            video_filename TEXT
        );

        CREATE TABLE IF NOT EXISTS user_subtitle_selection (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content_id TEXT NOT NULL,
            video_hash TEXT,
            language TEXT NOT NULL,
            selected_subtitle_id TEXT REFERENCES subtitles(id) ON DELETE SET NULL,
            external_details_json TEXT,
            timestamp TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subtitle_votes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            subtitle_id TEXT NOT NULL REFERENCES subtitles(id) ON DELETE CASCADE,
            vote_value INTEGER NOT NULL CHECK (vote_value IN (-1, 1)),
            timestamp TEXT NOT NULL,
            UNIQUE (user_id, subtitle_id)
        );

        -- Kitsu/MAL ids to IMDb ids, rebuilt from the anime-lists dataset
        CREATE TABLE IF NOT EXISTS anime_mapping (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kitsu_id INTEGER,
            mal_id INTEGER,
            imdb_id TEXT,
            tvdb_season INTEGER
        );

        CREATE TABLE IF NOT EXISTS app_metadata (
            key TEXT PRIMARY KEY,
            value TEXT
        );
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create tables")?;

    create_indexes(pool).await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    let indexes = [
        // Stremio lookups by token
        "CREATE INDEX IF NOT EXISTS idx_users_manifest_token ON users(manifest_token)",
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",

        // Candidate subtitles for a piece of content
        "CREATE INDEX IF NOT EXISTS idx_subtitles_content_lang ON subtitles(content_id, language)",
        "CREATE INDEX IF NOT EXISTS idx_subtitles_hash ON subtitles(video_hash) WHERE video_hash IS NOT NULL",
        "CREATE INDEX IF NOT EXISTS idx_subtitles_votes ON subtitles(votes)",
        "CREATE INDEX IF NOT EXISTS idx_subtitles_source ON subtitles(source_type)",
        "CREATE INDEX IF NOT EXISTS idx_subtitles_uploader ON subtitles(uploader_id)",

        // Recent activity per user
        "CREATE INDEX IF NOT EXISTS idx_activity_user_time ON user_activity(user_id, timestamp)",
        "CREATE INDEX IF NOT EXISTS idx_activity_content ON user_activity(content_id)",

        // One selection per user, content, video and language
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_selection_user_content_hash_lang ON user_subtitle_selection(user_id, content_id, COALESCE(video_hash, ''), language)",
        "CREATE INDEX IF NOT EXISTS idx_selection_subtitle ON user_subtitle_selection(selected_subtitle_id)",

        "CREATE INDEX IF NOT EXISTS idx_votes_subtitle ON subtitle_votes(subtitle_id)",

        "CREATE INDEX IF NOT EXISTS idx_anime_mapping_kitsu ON anime_mapping(kitsu_id) WHERE kitsu_id IS NOT NULL",
        "CREATE INDEX IF NOT EXISTS idx_anime_mapping_mal ON anime_mapping(mal_id) WHERE mal_id IS NOT NULL",
    ];

    for index_sql in indexes {
        if let Err(e) = sqlx::query(index_sql).execute(pool).await {
            // Selection upserts depend on the unique index
            if index_sql.starts_with("CREATE UNIQUE") {
                return Err(e).with_context(|| format!("Failed to create unique index: {}", index_sql));
            }
            tracing::warn!("Failed to create index: {} - {}", index_sql, e);
        }
    }

    tracing::debug!("Database indexes created/verified");

    Ok(())
}

/// Read a value from the key/value metadata table
pub async fn get_metadata(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT value FROM app_metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(value,)| value))
}

pub async fn set_metadata<'e, E>(executor: E, key: &str, value: &str) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO app_metadata (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(executor)
    .await?;
    Ok(())
}

/// Current time as stored in timestamp columns
pub fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Single-connection in-memory database with the schema applied
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let pool = test_pool().await;
        migrate(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        for expected in [
            "anime_mapping",
            "app_metadata",
            "roles",
            "roles_users",
            "sessions",
            "subtitle_votes",
            "subtitles",
            "user_activity",
            "user_subtitle_selection",
            "users",
        ] {
            assert!(names.contains(&expected), "missing table {}", expected);
        }
    }

    #[tokio::test]
    async fn test_unique_index_failure_is_an_error() {
        let pool = test_pool().await;
        sqlx::query("DROP INDEX uq_selection_user_content_hash_lang")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO users (id, username, email, password_hash) VALUES ('u1', 'dup', 'dup@example.com', 'x')")
            .execute(&pool)
            .await
            .unwrap();
        for _ in 0..2 {
            sqlx::query(
                "INSERT INTO user_subtitle_selection (user_id, content_id, video_hash, language, timestamp)
                 VALUES ('u1', 'tt1', NULL, 'eng', '2024-01-01T00:00:00Z')",
            )
            .execute(&pool)
            .await
            .unwrap();
        }

        let err = migrate(&pool).await.unwrap_err();
        assert!(format!("{:#}", err).contains("uq_selection_user_content_hash_lang"));
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let pool = test_pool().await;
        assert_eq!(get_metadata(&pool, "anime_mapping_hash").await.unwrap(), None);

        set_metadata(&pool, "anime_mapping_hash", "abc").await.unwrap();
        set_metadata(&pool, "anime_mapping_hash", "def").await.unwrap();
        assert_eq!(
            get_metadata(&pool, "anime_mapping_hash").await.unwrap().as_deref(),
            Some("def")
        );
    }
}
