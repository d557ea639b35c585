use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const DEFAULT_USER_AGENT: &str = concat!("m3u-relay/", env!("CARGO_PKG_VERSION"));
pub const PLAYLIST_ACCEPT: &str = "audio/x-mpegurl, application/x-mpegurl, text/plain, */*";

/// One upstream playlist source. `params` usually carries the account
/// credentials and is appended to `url` as query parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new(providers: BTreeMap<String, ProviderConfig>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Result<&ProviderConfig> {
        self.providers
            .get(id)
            .ok_or_else(|| Error::UnknownProvider(id.to_string()))
    }

    /// Full upstream URL for `id`, credentials included.
    pub fn resolve(&self, id: &str) -> Result<Url> {
        let provider = self.get(id)?;
        build_provider_url(provider).map_err(|e| {
            warn!("Provider {} has an invalid url {}: {}", id, provider.url, e);
            Error::UnknownProvider(id.to_string())
        })
    }

    pub fn list(&self) -> Vec<ProviderInfo> {
        self.providers
            .iter()
            .map(|(id, p)| ProviderInfo {
                id: id.clone(),
                name: p.name.clone(),
            })
            .collect()
    }
}

pub fn build_provider_url(provider: &ProviderConfig) -> anyhow::Result<Url> {
    let url = if provider.params.is_empty() {
        Url::parse(&provider.url)?
    } else {
        Url::parse_with_params(&provider.url, provider.params.iter())?
    };
    Ok(url)
}

/// Fetches raw playlist text from upstream. Knows nothing about M3U; an
/// HTML error page with a 200 status comes back as `Ok`.
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    timeout: Duration,
    user_agent: String,
}

impl RelayClient {
    pub fn new(timeout: Duration, user_agent: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            timeout,
            user_agent: user_agent.into(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn fetch_provider(&self, registry: &ProviderRegistry, provider_id: &str) -> Result<String> {
        let url = registry.resolve(provider_id)?;
        self.fetch_playlist(url.as_str()).await
    }

    pub async fn fetch_playlist(&self, url: &str) -> Result<String> {
        let timeout_ms = self.timeout.as_millis() as u64;
        let request = async {
            let resp = self
                .client
                .get(url)
                .header(USER_AGENT, &self.user_agent)
                .header(ACCEPT, PLAYLIST_ACCEPT)
                .send()
                .await
                .map_err(|e| classify(e, timeout_ms))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(Error::HttpError(status.as_u16()));
            }

            resp.text().await.map_err(|e| classify(e, timeout_ms))
        };

        // Dropping the future on expiry cancels the request and its timer.
        let text = match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout(timeout_ms)),
        };

        if text.trim().is_empty() {
            return Err(Error::EmptyBody);
        }

        debug!("Fetched {} bytes from {}", text.len(), redact(url));
        Ok(text)
    }
}

/// One-shot fetch with a fresh client.
pub async fn fetch_playlist(url: &str, timeout: Duration) -> Result<String> {
    let client = RelayClient::new(timeout, DEFAULT_USER_AGENT)
        .map_err(|e| Error::NetworkError(e.to_string()))?;
    client.fetch_playlist(url).await
}

fn classify(err: reqwest::Error, timeout_ms: u64) -> Error {
    if err.is_timeout() {
        Error::Timeout(timeout_ms)
    } else if let Some(status) = err.status() {
        Error::HttpError(status.as_u16())
    } else {
        Error::NetworkError(err.without_url().to_string())
    }
}

/// Strips the query string so upstream credentials stay out of the logs.
pub fn redact(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ProviderRegistry {
        let mut providers = BTreeMap::new();
        providers.insert(
            "provider1".to_string(),
            ProviderConfig {
                name: "Main".to_string(),
                url: "http://upstream.test/get.php".to_string(),
                params: BTreeMap::from([
                    ("username".to_string(), "user".to_string()),
                    ("password".to_string(), "p@ss word".to_string()),
                    ("type".to_string(), "m3u_plus".to_string()),
                ]),
            },
        );
        providers.insert(
            "plain".to_string(),
            ProviderConfig {
                name: "Plain".to_string(),
                url: "http://plain.test/list.m3u?token=abc".to_string(),
                params: BTreeMap::new(),
            },
        );
        ProviderRegistry::new(providers)
    }

    #[test]
    fn test_resolve_appends_params() {
        let url = registry().resolve("provider1").unwrap();
        assert_eq!(url.host_str(), Some("upstream.test"));
        let pairs: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["username"], "user");
        assert_eq!(pairs["password"], "p@ss word");
        assert_eq!(pairs["type"], "m3u_plus");
    }

    #[test]
    fn test_resolve_without_params_keeps_url() {
        let url = registry().resolve("plain").unwrap();
        assert_eq!(url.as_str(), "http://plain.test/list.m3u?token=abc");
    }

    #[test]
    fn test_unknown_provider() {
        match registry().resolve("nope") {
            Err(Error::UnknownProvider(id)) => assert_eq!(id, "nope"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_provider_fails_before_network() {
        let client = RelayClient::new(Duration::from_millis(10), DEFAULT_USER_AGENT).unwrap();
        let err = client.fetch_provider(&registry(), "missing").await.unwrap_err();
        assert!(matches!(err, Error::UnknownProvider(_)));
    }

    #[test]
    fn test_list_is_sorted_by_id() {
        let ids: Vec<String> = registry().list().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["plain", "provider1"]);
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("http://a.test/get.php?username=u&password=p"), "http://a.test/get.php");
        assert_eq!(redact("http://a.test/list.m3u"), "http://a.test/list.m3u");
    }
}
