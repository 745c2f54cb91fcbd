//! Wallet engine configuration.

use std::path::PathBuf;

use satchel_core::constants::GAP_LIMIT;
use thiserror::Error;

use crate::coin_selection::SelectionPolicy;
use crate::encryption::KdfParams;
use crate::retry::RetryPolicy;

/// Environment variable overriding the wallet file path.
pub const ENV_WALLET: &str = "SATCHEL_WALLET";
/// Environment variable overriding the gap limit.
pub const ENV_GAP_LIMIT: &str = "SATCHEL_GAP_LIMIT";
/// Environment variable overriding the input cap.
pub const ENV_MAX_INPUTS: &str = "SATCHEL_MAX_INPUTS";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct WalletConfig {
    /// Encrypted wallet file.
    pub wallet_path: PathBuf,
    /// Unused addresses kept derived past the last used one, per chain.
    pub gap_limit: u32,
    /// Coin selection limits.
    pub policy: SelectionPolicy,
    /// Argon2id cost for newly written wallet files.
    pub kdf: KdfParams,
    /// Backoff for provider reads.
    pub retry: RetryPolicy,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            wallet_path: default_wallet_path(),
            gap_limit: GAP_LIMIT,
            policy: SelectionPolicy::default(),
            kdf: KdfParams::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl WalletConfig {
    /// Defaults overridden by `SATCHEL_WALLET`, `SATCHEL_GAP_LIMIT` and
    /// `SATCHEL_MAX_INPUTS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = lookup(ENV_WALLET) {
            config.wallet_path = PathBuf::from(path);
        }
        if let Some(value) = lookup(ENV_GAP_LIMIT) {
            config.gap_limit = parse_positive(ENV_GAP_LIMIT, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_INPUTS) {
            config.policy.max_inputs = parse_positive(ENV_MAX_INPUTS, &value)?;
        }
        Ok(config)
    }

    pub fn with_wallet_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.wallet_path = path.into();
        self
    }
}

/// `~/.satchel/wallet.dat`, or `./.satchel/wallet.dat` without a home directory.
pub fn default_wallet_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".satchel")
        .join("wallet.dat")
}

fn parse_positive<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let invalid = || ConfigError::InvalidNumber { var, value: value.to_string() };
    let parsed: T = value.trim().parse().map_err(|_| invalid())?;
    if parsed == T::default() {
        return Err(invalid());
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_gap_limit_is_bip44() {
        assert_eq!(WalletConfig::default().gap_limit, 20);
    }

    #[test]
    fn default_wallet_path_under_satchel_dir() {
        let path = WalletConfig::default().wallet_path;
        assert!(path.ends_with(".satchel/wallet.dat"));
    }

    #[test]
    fn default_policy_matches_constants() {
        let config = WalletConfig::default();
        assert_eq!(config.policy.max_inputs, 500);
        assert_eq!(config.policy.dust_threshold, 546);
    }

    #[test]
    fn lookup_overrides() {
        let config = WalletConfig::from_lookup(lookup(&[
            (ENV_WALLET, "/tmp/w.dat"),
            (ENV_GAP_LIMIT, "5"),
            (ENV_MAX_INPUTS, " 42 "),
        ]))
        .unwrap();
        assert_eq!(config.wallet_path, PathBuf::from("/tmp/w.dat"));
        assert_eq!(config.gap_limit, 5);
        assert_eq!(config.policy.max_inputs, 42);
    }

    #[test]
    fn empty_lookup_is_default() {
        let config = WalletConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.gap_limit, GAP_LIMIT);
        assert_eq!(config.wallet_path, default_wallet_path());
    }

    #[test]
    fn rejects_bad_numbers() {
        for bad in ["0", "-1", "twenty", ""] {
            let err = WalletConfig::from_lookup(lookup(&[(ENV_GAP_LIMIT, bad)])).unwrap_err();
            assert_eq!(err, ConfigError::InvalidNumber { var: ENV_GAP_LIMIT, value: bad.to_string() });
        }
    }

    #[test]
    fn config_is_clone_and_debug() {
        let config = WalletConfig::default().with_wallet_path("/x/y.dat");
        let cloned = config.clone();
        assert_eq!(cloned.wallet_path, PathBuf::from("/x/y.dat"));
        let debug = format!("{config:?}");
        assert!(debug.contains("WalletConfig"));
    }
}
