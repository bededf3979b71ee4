//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use wt_core::RetryPolicy;

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Whose sessions are tracked.
    pub owner: String,
    /// Redraw interval for `wt watch`.
    pub tick_interval_ms: u64,
    /// Background write retry settings.
    pub persistence: PersistenceConfig,
}

/// Retry settings for the background store writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Attempts per command before it is abandoned; `0` retries forever.
    pub max_attempts: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            max_attempts: 8,
        }
    }
}

impl PersistenceConfig {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("owner", &self.owner)
            .field("tick_interval_ms", &self.tick_interval_ms)
            .field("persistence", &self.persistence)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("wt.db"),
            owner: default_owner(),
            tick_interval_ms: 1_000,
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // WT_OWNER, WT_PERSISTENCE__MAX_ATTEMPTS, ...
        figment = figment.merge(Env::prefixed("WT_").split("__"));

        figment.extract()
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn default_owner() -> String {
    std::env::var("USER")
        .ok()
        .filter(|user| !user.trim().is_empty())
        .unwrap_or_else(|| "default".to_string())
}

/// Returns the platform-specific config directory for wt.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("wt"))
}

/// Returns the platform-specific data directory for wt.
///
/// On Linux: `~/.local/share/wt`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("wt"))
}
