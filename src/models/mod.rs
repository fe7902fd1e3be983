use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ROLE_ADMIN: &str = "Admin";
pub const ROLE_USER: &str = "User";

pub const SOURCE_COMMUNITY: &str = "community";
pub const LINK_SUFFIX: &str = "_community_link";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub preferred_language: String,
    pub active: bool,
    pub created_at: String,
    #[serde(skip_serializing)]
    pub manifest_token: Option<String>,
    #[serde(skip_serializing)]
    pub provider_credentials: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: String,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subtitle {
    pub id: String,
    pub content_id: String,
    pub content_type: String,
    pub video_hash: Option<String>,
    pub language: String,
    pub file_path: Option<String>,
    pub uploader_id: String,
    pub upload_timestamp: String,
    pub votes: i64,
    pub author: Option<String>,
    pub version_info: Option<String>,
    pub source_type: String,
    pub source_metadata: Option<String>,
}

impl Subtitle {
    pub fn metadata(&self) -> Option<Value> {
        self.source_metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub fn is_community(&self) -> bool {
        self.source_type == SOURCE_COMMUNITY
    }

    /// Provider name for a `{provider}_community_link` row
    pub fn link_provider(&self) -> Option<&str> {
        self.source_type.strip_suffix(LINK_SUFFIX)
    }

    /// Only community uploads and community links carry votes
    pub fn is_votable(&self) -> bool {
        self.is_community() || self.link_provider().is_some()
    }

    /// Provider-side id recorded when the row was linked
    pub fn provider_subtitle_id(&self) -> Option<String> {
        self.metadata()?
            .get("provider_subtitle_id")
            .and_then(json_id_to_string)
    }
}

pub fn link_source_type(provider: &str) -> String {
    format!("{}{}", provider, LINK_SUFFIX)
}

/// Provider ids arrive as either JSON strings or numbers
pub fn json_id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserActivity {
    pub id: String,
    pub user_id: String,
    pub content_id: String,
    pub content_type: String,
    pub timestamp: String,
    pub video_hash: Option<String>,
    pub video_size: Option<i64>,
    pub video_filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSubtitleSelection {
    pub id: i64,
    pub user_id: String,
    pub content_id: String,
    pub video_hash: Option<String>,
    pub language: String,
    pub selected_subtitle_id: Option<String>,
    pub external_details_json: Option<String>,
    pub timestamp: String,
}

impl UserSubtitleSelection {
    pub fn external_details(&self) -> Option<Value> {
        self.external_details_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubtitleVote {
    pub id: i64,
    pub user_id: String,
    pub subtitle_id: String,
    pub vote_value: i64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AnimeMapping {
    pub kitsu_id: Option<i64>,
    pub mal_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub tvdb_season: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtitle(source_type: &str, metadata: Option<&str>) -> Subtitle {
        Subtitle {
            id: "id".to_string(),
            content_id: "tt1".to_string(),
            content_type: "movie".to_string(),
            video_hash: None,
            language: "eng".to_string(),
            file_path: None,
            uploader_id: "u".to_string(),
            upload_timestamp: String::new(),
            votes: 0,
            author: None,
            version_info: None,
            source_type: source_type.to_string(),
            source_metadata: metadata.map(str::to_string),
        }
    }

    #[test]
    fn test_link_provider() {
        assert_eq!(
            subtitle("opensubtitles_community_link", None).link_provider(),
            Some("opensubtitles")
        );
        assert_eq!(subtitle("community", None).link_provider(), None);
        assert!(subtitle("subdl_community_link", None).is_votable());
        assert!(!subtitle("opensubtitles_auto", None).is_votable());
    }

    #[test]
    fn test_provider_subtitle_id_accepts_numbers() {
        let sub = subtitle(
            "opensubtitles_community_link",
            Some(r#"{"provider_subtitle_id": 12345}"#),
        );
        assert_eq!(sub.provider_subtitle_id().as_deref(), Some("12345"));

        let sub = subtitle("subdl_community_link", Some(r#"{"provider_subtitle_id": "/s/1.zip"}"#));
        assert_eq!(sub.provider_subtitle_id().as_deref(), Some("/s/1.zip"));
    }
}
