use anyhow::{Context, Result};
use helpdesk_core::{ChannelId, RoleId, TicketKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Guild-level ticket configuration, persisted as one flat JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub products_category_id: Option<ChannelId>,
    pub partnerships_category_id: Option<ChannelId>,
    pub log_channel_id: Option<ChannelId>,
    pub staff_role_id: Option<RoleId>,
    /// Next ticket number to hand out.
    pub ticket_counter: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            products_category_id: None,
            partnerships_category_id: None,
            log_channel_id: None,
            staff_role_id: None,
            ticket_counter: 1,
        }
    }
}

impl Config {
    pub(crate) fn category_for(&self, kind: TicketKind) -> Option<ChannelId> {
        match kind {
            TicketKind::Product => self.products_category_id,
            TicketKind::Partnership => self.partnerships_category_id,
        }
    }
}

/// Owns the config document and serializes every mutation of it.
#[derive(Debug)]
pub(crate) struct ConfigStore {
    path: PathBuf,
    state: Mutex<Config>,
}

impl ConfigStore {
    pub(crate) fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = Self::load(&path);
        Self {
            path,
            state: Mutex::new(config),
        }
    }

    /// Read the document; absent, unreadable or malformed files yield defaults.
    pub(crate) fn load(path: &Path) -> Config {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no stored config, using defaults");
                return Config::default();
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to read stored config, using defaults");
                return Config::default();
            }
        };

        match serde_json::from_str::<Config>(&content) {
            Ok(mut config) => {
                config.ticket_counter = config.ticket_counter.max(1);
                config
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "malformed stored config, using defaults");
                Config::default()
            }
        }
    }

    /// Overwrite the whole document via a temp file and rename.
    pub(crate) fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(config)?;
        atomic_write(&self.path, &content)
            .with_context(|| format!("failed to write config: {}", self.path.display()))
    }

    /// Claim the next ticket number. The increment is persisted before the
    /// number is returned.
    pub(crate) fn next_ticket_number(&self) -> u64 {
        let mut state = self.lock();
        let number = state.ticket_counter;
        state.ticket_counter += 1;
        if let Err(error) = self.save(&state) {
            warn!(error = %error, ticket = number, "failed to persist ticket counter");
        }
        number
    }

    /// Apply `change` and persist, returning the updated config.
    pub(crate) fn update(&self, change: impl FnOnce(&mut Config)) -> Config {
        let mut state = self.lock();
        change(&mut state);
        if let Err(error) = self.save(&state) {
            warn!(error = %error, "failed to persist config update");
        }
        state.clone()
    }

    pub(crate) fn snapshot(&self) -> Config {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Config> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::load(&dir.path().join("state.json"));
        assert_eq!(config, Config::default());
        assert_eq!(config.ticket_counter, 1);
    }

    #[test]
    fn malformed_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(ConfigStore::load(&path), Config::default());
    }

    #[test]
    fn zero_counter_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"ticket_counter": 0}"#).unwrap();
        assert_eq!(ConfigStore::load(&path).ticket_counter, 1);
    }

    #[test]
    fn unknown_fields_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"log_channel_id": 42, "ticket_counter": 7, "legacy": true}"#,
        )
        .unwrap();
        let config = ConfigStore::load(&path);
        assert_eq!(config.log_channel_id, Some(ChannelId(42)));
        assert_eq!(config.ticket_counter, 7);
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = ConfigStore::open(&path);

        let updated = store.update(|config| {
            config.products_category_id = Some(ChannelId(11));
            config.staff_role_id = Some(RoleId(22));
        });
        assert_eq!(updated.products_category_id, Some(ChannelId(11)));

        let reloaded = ConfigStore::open(&path).snapshot();
        assert_eq!(reloaded, updated);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn ticket_numbers_are_persisted_before_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = ConfigStore::open(&path);

        assert_eq!(store.next_ticket_number(), 1);
        assert_eq!(store.next_ticket_number(), 2);
        assert_eq!(ConfigStore::load(&path).ticket_counter, 3);
    }

    #[test]
    fn concurrent_ticket_numbers_are_unique_and_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::open(dir.path().join("state.json")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..5).map(|_| store.next_ticket_number()).collect::<Vec<_>>()
                })
            })
            .collect();

        let numbers: HashSet<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(numbers, (1..=40).collect());
        assert_eq!(store.snapshot().ticket_counter, 41);
    }

    #[test]
    fn category_lookup_by_kind() {
        let config = Config {
            products_category_id: Some(ChannelId(1)),
            ..Config::default()
        };
        assert_eq!(config.category_for(TicketKind::Product), Some(ChannelId(1)));
        assert_eq!(config.category_for(TicketKind::Partnership), None);
    }
}
