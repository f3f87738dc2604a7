//! Runtime settings.
//!
//! Resolution order: built-in defaults, then an optional JSON file, then CLI flags
//! and `PLAYLOG_*` environment variables (see [`ConfigOverrides`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::persistence;
use crate::sync::runtime::SchedulerConfig;
use crate::sync::source::portal::{self, PortalConfig};

pub const TOKEN_FILE_NAME: &str = "token.json";
pub const HISTORY_FILE_NAME: &str = "play_history.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/token.json`.
    pub token_file: Option<PathBuf>,
    /// Defaults to `<data_dir>/play_history.json`.
    pub history_file: Option<PathBuf>,
    pub interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub backoff_initial_secs: u64,
    pub backoff_max_secs: u64,
    pub portal_base_url: String,
    pub portal_record_path: String,
    pub user_agent: String,
    pub error_markers: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            token_file: None,
            history_file: None,
            interval_secs: 60 * 60,
            fetch_timeout_secs: 30,
            backoff_initial_secs: 30,
            backoff_max_secs: 30 * 60,
            portal_base_url: portal::DEFAULT_BASE_URL.to_string(),
            portal_record_path: portal::DEFAULT_RECORD_PATH.to_string(),
            user_agent: portal::DEFAULT_USER_AGENT.to_string(),
            error_markers: portal::default_error_markers(),
        }
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub token_file: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    pub interval_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    pub portal_base_url: Option<String>,
}

impl SyncConfig {
    /// Defaults, optionally overlaid by a JSON file. An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let config: SyncConfig = persistence::load_json(path)?.ok_or_else(|| {
            SyncError::Config(format!("config file {} not found", path.display()))
        })?;
        log::info!("[CONFIG] loaded {}", path.display());
        Ok(config)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(dir) = overrides.data_dir {
            self.data_dir = dir;
        }
        if overrides.token_file.is_some() {
            self.token_file = overrides.token_file;
        }
        if overrides.history_file.is_some() {
            self.history_file = overrides.history_file;
        }
        if let Some(secs) = overrides.interval_secs {
            self.interval_secs = secs;
        }
        if let Some(secs) = overrides.fetch_timeout_secs {
            self.fetch_timeout_secs = secs;
        }
        if let Some(url) = overrides.portal_base_url {
            self.portal_base_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(SyncError::Config("interval must be at least one second".into()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(SyncError::Config("fetch timeout must be at least one second".into()));
        }
        if self.backoff_initial_secs == 0 {
            return Err(SyncError::Config("initial backoff must be at least one second".into()));
        }
        if self.backoff_max_secs < self.backoff_initial_secs {
            return Err(SyncError::Config(format!(
                "backoff_max_secs ({}) is below backoff_initial_secs ({})",
                self.backoff_max_secs, self.backoff_initial_secs
            )));
        }
        portal::record_url(&self.portal_base_url, &self.portal_record_path)?;
        Ok(())
    }

    pub fn token_path(&self) -> PathBuf {
        self.token_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(TOKEN_FILE_NAME))
    }

    pub fn history_path(&self) -> PathBuf {
        self.history_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(HISTORY_FILE_NAME))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.interval_secs),
            backoff_initial: Duration::from_secs(self.backoff_initial_secs),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
        }
    }

    pub fn portal(&self) -> PortalConfig {
        PortalConfig {
            base_url: self.portal_base_url.clone(),
            record_path: self.portal_record_path.clone(),
            user_agent: self.user_agent.clone(),
            request_timeout: self.fetch_timeout(),
            error_markers: self.error_markers.clone(),
            use_system_proxy: true,
        }
    }
}
