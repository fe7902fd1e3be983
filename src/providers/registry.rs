use anyhow::{bail, Result};
use std::sync::Arc;

use super::opensubtitles::OpenSubtitlesProvider;
use super::subdl::SubDlProvider;
use super::subsource::SubSourceProvider;
use super::{credentials_map, is_active, SubtitleProvider};
use crate::config::AppConfig;
use crate::models::User;

/// Registered providers in registration order
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn SubtitleProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// OpenSubtitles, SubDL and Subsource
    pub fn with_defaults(config: &AppConfig) -> Self {
        let mut registry = Self::new();
        let defaults: Vec<Arc<dyn SubtitleProvider>> = vec![
            Arc::new(OpenSubtitlesProvider::new(
                config.opensubtitles_api_key.clone(),
                config.opensubtitles_user_agent.clone(),
            )),
            Arc::new(SubDlProvider::new(config.opensubtitles_user_agent.clone())),
            Arc::new(SubSourceProvider::new(config.opensubtitles_user_agent.clone())),
        ];
        for provider in defaults {
            if let Err(e) = registry.register(provider) {
                tracing::error!("Failed to register provider: {}", e);
            }
        }
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn SubtitleProvider>) -> Result<()> {
        if self.get(provider.name()).is_some() {
            bail!("Provider '{}' is already registered", provider.name());
        }
        tracing::debug!("Registered subtitle provider: {}", provider.name());
        self.providers.push(provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SubtitleProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn all(&self) -> &[Arc<dyn SubtitleProvider>] {
        &self.providers
    }

    pub fn by_auth_requirement(&self, requires_auth: bool) -> Vec<Arc<dyn SubtitleProvider>> {
        self.providers
            .iter()
            .filter(|p| p.requires_auth() == requires_auth)
            .cloned()
            .collect()
    }

    /// Providers needing no login, plus those the user has an active entry for
    pub fn active_for_user(&self, user: &User) -> Vec<Arc<dyn SubtitleProvider>> {
        let credentials = credentials_map(user);
        self.providers
            .iter()
            .filter(|p| !p.requires_auth() || is_active(credentials.get(p.name())))
            .cloned()
            .collect()
    }
}
