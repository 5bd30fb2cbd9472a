//! Resolver configuration
//!
//! Loaded from `BINCACHE_*` environment variables or a JSON file.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOCK_STRIPES: usize = 64;
const DEFAULT_INDEX_CAPACITY: u64 = 100_000;

fn default_base_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("binary-cache")
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_lock_stripes() -> usize {
    DEFAULT_LOCK_STRIPES
}

fn default_index_capacity() -> u64 {
    DEFAULT_INDEX_CAPACITY
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverConfig {
    /// Cache root; binaries live under `<base_path>/BinaryData`
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    /// GraphQL endpoint of the content service
    pub endpoint: String,
    /// Bearer token sent with every request
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Number of refresh lock stripes
    #[serde(default = "default_lock_stripes")]
    pub lock_stripes: usize,
    /// Maximum number of id index entries
    #[serde(default = "default_index_capacity")]
    pub index_capacity: u64,
}

impl ResolverConfig {
    /// Defaults for everything but the endpoint
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            base_path: default_base_path(),
            endpoint: endpoint.into(),
            access_token: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            lock_stripes: DEFAULT_LOCK_STRIPES,
            index_capacity: DEFAULT_INDEX_CAPACITY,
        }
    }

    /// Read configuration from `BINCACHE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup("BINCACHE_ENDPOINT")
            .ok_or_else(|| anyhow!("BINCACHE_ENDPOINT is not set"))?;
        let mut config = Self::for_endpoint(endpoint);

        if let Some(base) = lookup("BINCACHE_BASE_PATH") {
            config.base_path = PathBuf::from(base);
        }
        config.access_token = lookup("BINCACHE_ACCESS_TOKEN").filter(|t| !t.is_empty());
        if let Some(raw) = lookup("BINCACHE_TIMEOUT_SECS") {
            config.request_timeout_secs = raw
                .parse()
                .with_context(|| format!("Invalid BINCACHE_TIMEOUT_SECS: {}", raw))?;
        }
        if let Some(raw) = lookup("BINCACHE_LOCK_STRIPES") {
            config.lock_stripes = raw
                .parse()
                .with_context(|| format!("Invalid BINCACHE_LOCK_STRIPES: {}", raw))?;
        }
        if let Some(raw) = lookup("BINCACHE_INDEX_CAPACITY") {
            config.index_capacity = raw
                .parse()
                .with_context(|| format!("Invalid BINCACHE_INDEX_CAPACITY: {}", raw))?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(anyhow!("Content service endpoint must not be empty"));
        }
        if self.lock_stripes == 0 {
            return Err(anyhow!("lock_stripes must be at least 1"));
        }
        Ok(())
    }
}
