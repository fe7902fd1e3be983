// Fan-out search across providers

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{SearchParams, SubtitleProvider, SubtitleResult};

pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Query every provider at once. Failures and timeouts yield an empty list.
pub async fn search_providers_parallel(
    providers: &[Arc<dyn SubtitleProvider>],
    params: &SearchParams,
    timeout: Duration,
) -> HashMap<String, Vec<SubtitleResult>> {
    let started = Instant::now();

    let searches = providers.iter().map(|provider| async move {
        let name = provider.name();
        let begin = Instant::now();
        let results = match tokio::time::timeout(timeout, provider.search(params)).await {
            Ok(Ok(results)) => {
                tracing::debug!(
                    "{} returned {} results in {:?}",
                    name,
                    results.len(),
                    begin.elapsed()
                );
                results
            }
            Ok(Err(e)) => {
                tracing::warn!("{} search failed after {:?}: {}", name, begin.elapsed(), e);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("{} search timed out after {:?}", name, timeout);
                Vec::new()
            }
        };
        (name.to_string(), results)
    });

    let results: HashMap<String, Vec<SubtitleResult>> = join_all(searches).await.into_iter().collect();

    tracing::info!(
        "Searched {} providers in {:?} ({} results)",
        providers.len(),
        started.elapsed(),
        results.values().map(Vec::len).sum::<usize>()
    );
    results
}

/// Try providers in order and return the first non-empty result set
pub async fn search_providers_with_fallback(
    providers: &[Arc<dyn SubtitleProvider>],
    params: &SearchParams,
    timeout: Duration,
) -> Option<(String, Vec<SubtitleResult>)> {
    for provider in providers {
        match tokio::time::timeout(timeout, provider.search(params)).await {
            Ok(Ok(results)) if !results.is_empty() => {
                return Some((provider.name().to_string(), results));
            }
            Ok(Ok(_)) => tracing::debug!("{} had no results, trying next", provider.name()),
            Ok(Err(e)) => tracing::warn!("{} search failed: {}", provider.name(), e),
            Err(_) => tracing::warn!("{} search timed out", provider.name()),
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    pub(crate) enum Behaviour {
        Results(Vec<SubtitleResult>),
        Fail,
        Hang,
        /// The stored login is rejected
        Expired,
    }

    pub(crate) struct FakeProvider {
        pub name: &'static str,
        pub hash: bool,
        pub behaviour: Behaviour,
    }

    #[async_trait]
    impl SubtitleProvider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }
        fn display_name(&self) -> &'static str {
            self.name
        }
        fn supports_hash_matching(&self) -> bool {
            self.hash
        }
        async fn authenticate(&self, _: &Value) -> Result<Value, ProviderError> {
            Ok(json!({"active": true}))
        }
        fn is_authenticated(&self, _: Option<&Value>) -> bool {
            true
        }
        async fn search(&self, _: &SearchParams) -> Result<Vec<SubtitleResult>, ProviderError> {
            match &self.behaviour {
                Behaviour::Results(r) => Ok(r.clone()),
                Behaviour::Fail => Err(ProviderError::Unavailable("down".into())),
                Behaviour::Expired => Err(ProviderError::Authentication("expired".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Vec::new())
                }
            }
        }
        async fn download_url(&self, _: Option<&Value>, id: &str) -> Result<Option<String>, ProviderError> {
            Ok(Some(format!("https://example.com/{}", id)))
        }
        async fn download_subtitle(&self, _: Option<&Value>, _: &str) -> Result<Vec<u8>, ProviderError> {
            if let Behaviour::Expired = self.behaviour {
                return Err(ProviderError::Authentication("expired".into()));
            }
            Ok(b"WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nfake\n".to_vec())
        }
    }

    pub(crate) fn result(provider: &str, id: &str, release: &str) -> SubtitleResult {
        SubtitleResult {
            provider_name: provider.to_string(),
            subtitle_id: id.to_string(),
            language: "eng".to_string(),
            release_name: Some(release.to_string()),
            metadata: json!({"hash_match": false}),
            ..Default::default()
        }
    }

    fn fake(name: &'static str, behaviour: Behaviour) -> Arc<dyn SubtitleProvider> {
        Arc::new(FakeProvider {
            name,
            hash: false,
            behaviour,
        })
    }

    #[tokio::test]
    async fn test_parallel_isolates_failures() {
        let providers = vec![
            fake("ok", Behaviour::Results(vec![result("ok", "1", "a")])),
            fake("broken", Behaviour::Fail),
            fake("slow", Behaviour::Hang),
        ];
        let results =
            search_providers_parallel(&providers, &SearchParams::default(), Duration::from_millis(50)).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results["ok"].len(), 1);
        assert!(results["broken"].is_empty());
        assert!(results["slow"].is_empty());
    }

    #[tokio::test]
    async fn test_fallback_returns_first_non_empty() {
        let providers = vec![
            fake("empty", Behaviour::Results(Vec::new())),
            fake("broken", Behaviour::Fail),
            fake("second", Behaviour::Results(vec![result("second", "2", "b")])),
            fake("third", Behaviour::Results(vec![result("third", "3", "c")])),
        ];
        let (name, results) =
            search_providers_with_fallback(&providers, &SearchParams::default(), Duration::from_millis(50))
                .await
                .unwrap();
        assert_eq!(name, "second");
        assert_eq!(results[0].subtitle_id, "2");

        let none = search_providers_with_fallback(&providers[..2], &SearchParams::default(), Duration::from_millis(50)).await;
        assert!(none.is_none());
    }
}
