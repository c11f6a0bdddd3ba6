//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::ensure;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use fl_core::{DEFAULT_PRODUCTIVE_KEYWORDS, MonitorConfig};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the FocusLens backend.
    pub backend_url: String,
    /// Bearer token sent with every backend request.
    pub api_token: Option<String>,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// How long before a due date an alert fires.
    pub lead_time_minutes: i64,
    /// Pause between alert checks in `fl watch`.
    pub poll_interval_secs: u64,
    /// Backend path of the productive-key allow-list, if the backend has one.
    pub productive_keys_path: Option<String>,
    /// Keywords used to classify subjects when the backend provides no categories.
    pub productive_keywords: Vec<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("backend_url", &self.backend_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("lead_time_minutes", &self.lead_time_minutes)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("productive_keys_path", &self.productive_keys_path)
            .field("productive_keywords", &self.productive_keywords.len())
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5001".to_string(),
            api_token: None,
            request_timeout_secs: 10,
            lead_time_minutes: 15,
            poll_interval_secs: 60,
            productive_keys_path: None,
            productive_keywords: DEFAULT_PRODUCTIVE_KEYWORDS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl Config {
    /// Loads configuration from the default locations, then `config_path`,
    /// then `FL_*` environment variables.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (FL_*)
        figment = figment.merge(Env::prefixed("FL_"));

        figment.extract()
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Alert monitor timing, validated.
    pub fn monitor_config(&self) -> anyhow::Result<MonitorConfig> {
        ensure!(
            self.lead_time_minutes > 0,
            "lead_time_minutes must be positive, got {}",
            self.lead_time_minutes
        );
        ensure!(
            self.poll_interval_secs > 0,
            "poll_interval_secs must be positive"
        );
        ensure!(
            self.request_timeout_secs > 0,
            "request_timeout_secs must be positive"
        );
        let lead_time = chrono::Duration::try_minutes(self.lead_time_minutes).ok_or_else(|| {
            anyhow::anyhow!("lead_time_minutes is out of range: {}", self.lead_time_minutes)
        })?;

        Ok(MonitorConfig {
            lead_time,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            fetch_timeout: self.request_timeout(),
        })
    }
}

/// Returns the platform-specific config directory for fl.
///
/// On Linux: `~/.config/fl`
pub fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("fl"))
}
