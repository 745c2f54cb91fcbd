//! Esplora endpoint configuration.

use std::time::Duration;

use satchel_core::constants::Network;
use thiserror::Error;

pub const DEFAULT_MAINNET_URL: &str = "https://mempool.space/api";
pub const DEFAULT_TESTNET_URL: &str = "https://mempool.space/testnet/api";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub const ENV_MAINNET_URL: &str = "SATCHEL_ESPLORA_MAINNET";
pub const ENV_TESTNET_URL: &str = "SATCHEL_ESPLORA_TESTNET";
pub const ENV_TIMEOUT_SECS: &str = "SATCHEL_HTTP_TIMEOUT_SECS";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive number of seconds, got {value:?}")]
    InvalidTimeout { var: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Esplora base URL for mainnet, without trailing slash.
    pub mainnet_url: String,
    /// Esplora base URL for testnet, without trailing slash.
    pub testnet_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            mainnet_url: DEFAULT_MAINNET_URL.to_string(),
            testnet_url: DEFAULT_TESTNET_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ProviderConfig {
    /// Defaults overridden by `SATCHEL_ESPLORA_MAINNET`,
    /// `SATCHEL_ESPLORA_TESTNET` and `SATCHEL_HTTP_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_MAINNET_URL) {
            config.mainnet_url = url;
        }
        if let Some(url) = lookup(ENV_TESTNET_URL) {
            config.testnet_url = url;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = value
                .trim()
                .parse()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| ConfigError::InvalidTimeout { var: ENV_TIMEOUT_SECS, value: value.clone() })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Base URL serving `network`, trailing slashes removed.
    pub fn url_for(&self, network: Network) -> &str {
        let url = match network {
            Network::Bitcoin => &self.mainnet_url,
            Network::Testnet => &self.testnet_url,
        };
        url.trim_end_matches('/')
    }

    /// Point `network` at a different server.
    pub fn set_url(&mut self, network: Network, url: impl Into<String>) {
        match network {
            Network::Bitcoin => self.mainnet_url = url.into(),
            Network::Testnet => self.testnet_url = url.into(),
        }
    }
}
