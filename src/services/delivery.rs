// Serving the active subtitle to the player
//
// The player only understands WebVTT, so every failure turns into a one-cue
// placeholder file telling the user what to do next.

use anyhow::anyhow;
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::models::User;
use crate::providers::{
    deactivate, get_credentials, is_active, ProviderError, ProviderRegistry, SubtitleProvider,
};
use crate::services::archive::{extract_subtitle_from_zip, looks_like_zip, MAX_ENTRY_BYTES};
use crate::services::context::{ContentId, DownloadContext};
use crate::services::convert::{convert_to_vtt, decode_text, extension_of, is_vtt, placeholder_vtt};
use crate::services::library;
use crate::services::selection::{self, ActiveKind, ResolveRequest};
use crate::services::storage::Storage;

pub const INVALID_TOKEN: &str = "Invalid Access Token";
pub const INVALID_LINK: &str = "Invalid download link.";
pub const NO_SUBS_FOUND: &str = "SCS: No Subtitles Found: Upload or select from the web interface.";
pub const SELECT_WEB: &str =
    "SCS: No automatic match found. Please select subtitles from the web interface.";
pub const OS_INTEGRATION_INACTIVE: &str = "SCS: OpenSubtitles integration is inactive. Please activate it in account settings to use this feature.";
pub const OS_ERROR_CONTACT_SUPPORT: &str = "SCS: Error fetching from OpenSubtitles. Please try again later or check your account on OpenSubtitles.com.";

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("{0} integration is inactive")]
    Inactive(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeliveryError {
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Inactive(_) => OS_INTEGRATION_INACTIVE,
            Self::Provider(_) => OS_ERROR_CONTACT_SUPPORT,
            Self::Other(_) => SELECT_WEB,
        }
    }
}

/// Resolve and load the subtitle for a download link. Always yields a body.
pub async fn subtitle_for_context(
    pool: &SqlitePool,
    registry: &ProviderRegistry,
    storage: &Storage,
    user: &User,
    context: &DownloadContext,
) -> String {
    match load_active(pool, registry, storage, user, context).await {
        Ok(Some(body)) => body,
        Ok(None) if context.v_hash.as_deref().is_some_and(|h| !h.is_empty()) => placeholder_vtt(SELECT_WEB),
        Ok(None) => placeholder_vtt(NO_SUBS_FOUND),
        Err(e) => {
            tracing::warn!("Failed to deliver subtitle for {}: {}", context.content_id, e);
            placeholder_vtt(e.placeholder())
        }
    }
}

async fn load_active(
    pool: &SqlitePool,
    registry: &ProviderRegistry,
    storage: &Storage,
    user: &User,
    context: &DownloadContext,
) -> Result<Option<String>, DeliveryError> {
    let parsed = ContentId::parse(&context.content_id);
    let lang = context.lang.as_deref().unwrap_or(&user.preferred_language);

    let request = ResolveRequest {
        content_id: &context.content_id,
        video_hash: context.v_hash.as_deref(),
        content_type: context.content_type.as_deref(),
        video_filename: context.v_fname.as_deref(),
        lang,
        season: parsed.season,
        episode: parsed.episode,
    };
    let active = selection::get_active_subtitle_details(pool, registry, user, &request).await?;
    tracing::debug!("Active subtitle for {} ({}): {}", context.content_id, lang, active.label());

    match active.kind {
        ActiveKind::None => Ok(None),
        ActiveKind::Local => {
            let subtitle = active
                .subtitle
                .ok_or_else(|| anyhow!("Local result without a subtitle"))?;

            if let Some(provider_name) = subtitle.link_provider() {
                let subtitle_id = subtitle
                    .provider_subtitle_id()
                    .ok_or_else(|| anyhow!("Link {} has no provider subtitle id", subtitle.id))?;
                return fetch_from_provider(pool, registry, user, provider_name, &subtitle_id, parsed.episode)
                    .await
                    .map(Some);
            }

            let content = library::fetch_subtitle_content(storage, &subtitle).await?;
            tracing::info!("Serving local subtitle {} to {}", subtitle.id, user.username);
            Ok(Some(content))
        }
        ActiveKind::Selection | ActiveKind::Auto => {
            let (Some(provider_name), Some(subtitle_id)) =
                (active.provider_name.as_deref(), active.provider_subtitle_id.as_deref())
            else {
                return Err(anyhow!("Provider result without provider details").into());
            };
            fetch_from_provider(pool, registry, user, provider_name, subtitle_id, parsed.episode)
                .await
                .map(Some)
        }
    }
}

async fn fetch_from_provider(
    pool: &SqlitePool,
    registry: &ProviderRegistry,
    user: &User,
    provider_name: &str,
    subtitle_id: &str,
    episode: Option<u32>,
) -> Result<String, DeliveryError> {
    let provider = registry
        .get(provider_name)
        .ok_or_else(|| anyhow!("Unknown provider '{}'", provider_name))?;
    let credentials = get_credentials(user, provider_name);
    if provider.requires_auth() && !is_active(credentials.as_ref()) {
        return Err(DeliveryError::Inactive(provider_name.to_string()));
    }

    let vtt = match provider_vtt(provider.as_ref(), credentials.as_ref(), subtitle_id, episode).await {
        Ok(vtt) => vtt,
        Err(e @ DeliveryError::Provider(ProviderError::Authentication(_))) => {
            // Stored login no longer works; the user has to reconnect
            if let Err(err) = deactivate(pool, &user.id, provider_name).await {
                tracing::error!("Failed to deactivate {} for {}: {}", provider_name, user.username, err);
            }
            return Err(e);
        }
        Err(e) => return Err(e),
    };
    tracing::info!("Serving {} subtitle {} to {}", provider_name, subtitle_id, user.username);
    Ok(vtt)
}

/// Download a provider subtitle and turn it into WebVTT
pub async fn provider_vtt(
    provider: &dyn SubtitleProvider,
    credentials: Option<&Value>,
    subtitle_id: &str,
    episode: Option<u32>,
) -> Result<String, DeliveryError> {
    let data = provider.download_subtitle(credentials, subtitle_id).await?;

    let (name, data) = if looks_like_zip(&data) {
        extract_subtitle_from_zip(&data, episode, MAX_ENTRY_BYTES)?
    } else {
        (String::new(), data)
    };

    let extension = extension_of(&name).unwrap_or_else(|_| sniff_extension(&data).to_string());
    if extension == "vtt" {
        let text = decode_text(&data, None)?;
        if is_vtt(&text) {
            return Ok(text);
        }
    }

    Ok(convert_to_vtt(&data, &extension, None, None)?)
}

/// Guess the format of a bare download
fn sniff_extension(data: &[u8]) -> &'static str {
    let head = String::from_utf8_lossy(&data[..data.len().min(512)]);
    let head = head.trim_start_matches('\u{feff}').trim_start();
    if head.starts_with("WEBVTT") {
        "vtt"
    } else if head.starts_with("[Script Info]") {
        "ass"
    } else if head.starts_with('{') {
        "sub"
    } else {
        "srt"
    }
}
