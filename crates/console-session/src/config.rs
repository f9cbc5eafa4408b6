//! Configuration types and loading
//!
//! Precedence: env vars > config file > defaults. The config path comes from
//! `CONSOLE_CONFIG`, falling back to `console-client.toml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use console_api::PipelineConfig;
use console_auth::{BlobStore, FileBlobStore, MemoryBlobStore};
use console_notify::{StreamConfig, stream_url_from_api_base};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: PipelineConfig,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Notification stream settings
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSettings {
    /// Push endpoint; derived from `api.base_url` when absent
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

/// Credential persistence settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Credential file; credentials stay in memory when absent
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl StorageConfig {
    /// Open the configured backing store.
    pub fn open(&self) -> Arc<dyn BlobStore> {
        match &self.path {
            Some(path) => Arc::new(FileBlobStore::open(path)),
            None => Arc::new(MemoryBlobStore::new()),
        }
    }
}

impl Config {
    /// Defaults for everything but the API root.
    pub fn for_api(base_url: impl Into<String>) -> Self {
        Self {
            api: PipelineConfig::new(base_url),
            stream: StreamSettings::default(),
            storage: StorageConfig::default(),
        }
    }

    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse TOML text, overlay environment variables and validate.
    pub fn parse(contents: &str) -> common::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;

        if let Ok(base_url) = std::env::var("CONSOLE_API_BASE_URL") {
            config.api.base_url = base_url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> common::Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "api.base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.stream.reconnect_delay_ms == 0 {
            return Err(common::Error::Config(
                "stream.reconnect_delay_ms must be greater than 0".into(),
            ));
        }

        if let Some(url) = &self.stream.url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(common::Error::Config(format!(
                    "stream.url must start with ws:// or wss://, got: {url}"
                )));
            }
        }

        self.stream_url().map(|_| ())
    }

    /// Push endpoint, configured or derived from the API root.
    pub fn stream_url(&self) -> common::Result<String> {
        match &self.stream.url {
            Some(url) => Ok(url.clone()),
            None => stream_url_from_api_base(&self.api.base_url)
                .map_err(|e| common::Error::Config(format!("stream.url: {e}"))),
        }
    }

    pub fn stream_config(&self) -> common::Result<StreamConfig> {
        Ok(StreamConfig::new(self.stream_url()?)
            .with_reconnect_delay(Duration::from_millis(self.stream.reconnect_delay_ms)))
    }

    /// Resolve config file path from the CONSOLE_CONFIG env var.
    pub fn resolve_path() -> PathBuf {
        std::env::var("CONSOLE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("console-client.toml"))
    }
}
