// Content ids and the opaque download identifier handed to Stremio

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

/// A Stremio content id split into its parts.
///
/// Accepted forms: `tt123`, `tt123:S:E`, `tt123:E` (season 1), `kitsu:ID`,
/// `kitsu:ID:EP`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentId {
    pub imdb_id: Option<String>,
    pub kitsu_id: Option<i64>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl ContentId {
    pub fn parse(content_id: &str) -> Self {
        let parts: Vec<&str> = content_id.split(':').collect();

        match parts.as_slice() {
            ["kitsu", id, rest @ ..] => Self {
                kitsu_id: id.parse().ok(),
                episode: rest.first().and_then(|e| e.parse().ok()),
                ..Default::default()
            },
            [imdb, rest @ ..] if imdb.starts_with("tt") => {
                let (season, episode) = match rest {
                    [s, e] => match (s.parse().ok(), e.parse().ok()) {
                        (Some(s), Some(e)) => (Some(s), Some(e)),
                        _ => {
                            tracing::warn!("Could not parse season/episode from content_id: {}", content_id);
                            (None, None)
                        }
                    },
                    [e] => match e.parse().ok() {
                        Some(e) => (Some(1), Some(e)),
                        None => (None, None),
                    },
                    _ => (None, None),
                };
                Self {
                    imdb_id: Some(imdb.to_string()),
                    season,
                    episode,
                    ..Default::default()
                }
            }
            _ => Self::default(),
        }
    }

    pub fn is_kitsu(&self) -> bool {
        self.kitsu_id.is_some()
    }
}

/// Everything the download endpoint needs to resolve a subtitle later
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadContext {
    #[serde(default)]
    pub content_type: Option<String>,
    pub content_id: String,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub v_hash: Option<String>,
    #[serde(default)]
    pub v_size: Option<i64>,
    #[serde(default)]
    pub v_fname: Option<String>,
}

impl DownloadContext {
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_string(self).context("Failed to encode download context")?;
        Ok(URL_SAFE_NO_PAD.encode(json.as_bytes()))
    }

    /// Accepts identifiers with or without `=` padding
    pub fn decode(identifier: &str) -> Result<Self> {
        let trimmed = identifier.trim_end_matches('=');
        let bytes = URL_SAFE_NO_PAD
            .decode(trimmed)
            .map_err(|e| anyhow!("Invalid download identifier: {}", e))?;
        let context: Self =
            serde_json::from_slice(&bytes).context("Download identifier is not a valid context")?;
        if context.content_id.is_empty() {
            return Err(anyhow!("Missing content_id in decoded context"));
        }
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_imdb_forms() {
        assert_eq!(
            ContentId::parse("tt0111161"),
            ContentId {
                imdb_id: Some("tt0111161".into()),
                ..Default::default()
            }
        );

        let episode = ContentId::parse("tt0944947:3:9");
        assert_eq!(episode.imdb_id.as_deref(), Some("tt0944947"));
        assert_eq!((episode.season, episode.episode), (Some(3), Some(9)));

        let bare = ContentId::parse("tt0944947:9");
        assert_eq!((bare.season, bare.episode), (Some(1), Some(9)));

        let junk = ContentId::parse("tt0944947:x:y");
        assert_eq!((junk.season, junk.episode), (None, None));
    }

    #[test]
    fn test_parse_kitsu() {
        let parsed = ContentId::parse("kitsu:7442:12");
        assert!(parsed.is_kitsu());
        assert_eq!(parsed.kitsu_id, Some(7442));
        assert_eq!(parsed.episode, Some(12));
        assert_eq!(parsed.season, None);
        assert_eq!(parsed.imdb_id, None);

        assert_eq!(ContentId::parse("mal:1"), ContentId::default());
    }

    #[test]
    fn test_download_context_roundtrip_and_padding() {
        let context = DownloadContext {
            content_type: Some("series".into()),
            content_id: "tt0944947:1:2".into(),
            lang: Some("pol".into()),
            v_hash: Some("8e245d9679d31e12".into()),
            v_size: Some(1234),
            v_fname: None,
        };
        let encoded = context.encode().unwrap();
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+') && !encoded.contains('/'));

        let json = String::from_utf8(URL_SAFE_NO_PAD.decode(&encoded).unwrap()).unwrap();
        assert!(json.starts_with(r#"{"content_type":"series","content_id":"tt0944947:1:2""#));

        let padded = format!("{}{}", encoded, "=".repeat((4 - encoded.len() % 4) % 4));
        assert_eq!(DownloadContext::decode(&padded).unwrap(), context);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(DownloadContext::decode("!!!").is_err());
        let no_content = URL_SAFE_NO_PAD.encode(br#"{"content_id":""}"#);
        assert!(DownloadContext::decode(&no_content).is_err());
    }
}
