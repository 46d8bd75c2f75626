use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "helpdesk.toml";

/// Discord returns at most this many messages per history request.
pub(crate) const HISTORY_PAGE_LIMIT: usize = 100;

/// Operator settings read from `helpdesk.toml`. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Settings {
    #[serde(default)]
    pub state: StateSettings,
    #[serde(default)]
    pub transcripts: TranscriptSettings,
    #[serde(default)]
    pub tickets: TicketSettings,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub health: HealthSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StateSettings {
    /// JSON document holding categories, log channel, staff role and counter.
    #[serde(default = "default_state_path")]
    pub path: String,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TranscriptSettings {
    #[serde(default = "default_transcripts_dir")]
    pub dir: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for TranscriptSettings {
    fn default() -> Self {
        Self {
            dir: default_transcripts_dir(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TicketSettings {
    /// Delay between the closure notice and channel deletion.
    #[serde(default = "default_close_grace_secs")]
    pub close_grace_secs: u64,
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
}

impl TicketSettings {
    pub(crate) fn close_grace(&self) -> Duration {
        Duration::from_secs(self.close_grace_secs)
    }

    pub(crate) fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }
}

impl Default for TicketSettings {
    fn default() -> Self {
        Self {
            close_grace_secs: default_close_grace_secs(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SupervisorSettings {
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_status_log_secs")]
    pub status_log_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            restart_delay_secs: default_restart_delay_secs(),
            max_restarts: default_max_restarts(),
            status_log_secs: default_status_log_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct HealthSettings {
    #[serde(default = "default_health_bind")]
    pub bind: String,
}

impl HealthSettings {
    pub(crate) fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("invalid health bind address: {}", self.bind))
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            bind: default_health_bind(),
        }
    }
}

fn default_state_path() -> String {
    "./data/state.json".to_owned()
}

fn default_transcripts_dir() -> String {
    "./transcripts".to_owned()
}

fn default_history_limit() -> usize {
    100
}

fn default_close_grace_secs() -> u64 {
    3
}

fn default_confirm_timeout_secs() -> u64 {
    30
}

fn default_restart_delay_secs() -> u64 {
    30
}

fn default_max_restarts() -> u32 {
    10
}

fn default_status_log_secs() -> u64 {
    60
}

fn default_health_bind() -> String {
    "0.0.0.0:5000".to_owned()
}

impl Settings {
    /// Load settings from a TOML file; a missing file yields defaults.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.transcripts.history_limit > 0,
            "transcripts.history_limit must be at least 1"
        );
        Ok(())
    }

    /// Resolve config path: check arg, then default locations.
    pub(crate) fn find_config_path(explicit: Option<&str>) -> PathBuf {
        if let Some(p) = explicit {
            return PathBuf::from(p);
        }

        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return local;
        }

        if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
            let xdg = PathBuf::from(config_dir).join("helpdesk").join(CONFIG_FILE);
            if xdg.exists() {
                return xdg;
            }
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config/helpdesk")
                .join(CONFIG_FILE);
            if home_config.exists() {
                return home_config;
            }
        }

        local
    }
}

/// Relative paths in settings are resolved against the config file's directory.
pub(crate) fn resolve_path(config_dir: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        config_dir.join(path)
    }
}
