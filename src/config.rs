use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::de::Deserializer;
use serde::Deserialize;

use crate::relay::{build_provider_url, ProviderConfig, DEFAULT_USER_AGENT};

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub api_key: String,
    #[serde(
        default = "default_allowed_origins",
        alias = "allowed_origin",
        deserialize_with = "deserialize_one_or_many"
    )]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_provider")]
    pub default_provider: String,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10000
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_provider() -> String {
    "provider1".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("catalog.json")
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            default_provider: default_provider(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn deserialize_one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(s.split(',').map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect()),
        OneOrMany::Many(v) => Ok(v),
    }
}

impl Settings {
    /// Reads `path` (any format the `config` crate knows, usually TOML) and
    /// then `RELAY__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("RELAY").separator("__"))
            .build()
            .with_context(|| format!("failed to read configuration from {path}"))?;
        let settings: Settings = settings.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        let settings: Settings = settings.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.api_key.trim().is_empty() {
            bail!("server.api_key must not be empty");
        }
        if self.providers.is_empty() {
            bail!("no providers configured");
        }
        if !self.providers.contains_key(&self.relay.default_provider) {
            bail!(
                "relay.default_provider '{}' is not a configured provider",
                self.relay.default_provider
            );
        }
        for (id, provider) in &self.providers {
            build_provider_url(provider).with_context(|| format!("provider '{id}' has an invalid url"))?;
        }
        Ok(())
    }
}
