//! Dispatch configuration loaded from `farmout.toml`.
//!
//! Values missing from the file use defaults. `FARMOUT_OFFER_TTL_SECS` in the
//! environment takes precedence over the file's offer TTL.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::logging::LogFormat;

pub const CONFIG_FILE: &str = "farmout.toml";
pub const OFFER_TTL_ENV: &str = "FARMOUT_OFFER_TTL_SECS";

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Offer lifetime used when a caller has no TTL of its own.
    #[serde(default = "default_offer_ttl_secs")]
    pub offer_ttl_secs: u64,

    /// Delay before retrying an offer expiry whose write failed.
    #[serde(default = "default_expiry_retry_ms")]
    pub expiry_retry_ms: u64,

    /// How many activity entries dispatcher views show.
    #[serde(default = "default_activity_display_limit")]
    pub activity_display_limit: usize,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_offer_ttl_secs() -> u64 {
    120
}

fn default_expiry_retry_ms() -> u64 {
    2000
}

fn default_activity_display_limit() -> usize {
    50
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            offer_ttl_secs: default_offer_ttl_secs(),
            expiry_retry_ms: default_expiry_retry_ms(),
            activity_display_limit: default_activity_display_limit(),
            log_format: LogFormat::default(),
        }
    }
}

impl DispatchConfig {
    /// Loads `farmout.toml` from the current directory, falling back to
    /// defaults when it does not exist.
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::from_path(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str::<DispatchConfig>(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var(OFFER_TTL_ENV)
            && !raw.trim().is_empty()
        {
            self.offer_ttl_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("{OFFER_TTL_ENV} must be a whole number of seconds"))?;
        }
        Ok(())
    }

    pub fn offer_ttl(&self) -> Duration {
        Duration::from_secs(self.offer_ttl_secs)
    }

    pub fn expiry_retry(&self) -> Duration {
        Duration::from_millis(self.expiry_retry_ms)
    }
}
