use std::{path::Path, time::Duration};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_LISTEN_PORT: u16 = 42617;

/// Service configuration. Loaded from `<app_dir>/config.json`, every field
/// optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Seconds between foreground probes.
    pub update_interval_secs: u64,
    /// Seconds to wait after a probe failure before retrying.
    pub error_backoff_secs: u64,
    /// Port of the local subscriber endpoint.
    pub listen_port: u16,
    pub pomodoro: PomodoroConfig,
    pub auto_cycle: bool,
    pub notifications_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_interval_secs: 1,
            error_backoff_secs: 5,
            listen_port: DEFAULT_LISTEN_PORT,
            pomodoro: PomodoroConfig::default(),
            auto_cycle: true,
            notifications_enabled: true,
        }
    }
}

impl Config {
    /// Reads configuration from `dir/config.json`. A missing file means
    /// defaults; a file that doesn't parse is a user error and reported.
    pub fn load(dir: &Path) -> Result<Config> {
        let path = dir.join("config.json");
        let content = match std::fs::read_to_string(&path) {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("No config file at {path:?}, using defaults");
                return Ok(Config::default());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

/// Durations of the pomodoro phases and the long break cadence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PomodoroConfig {
    pub focus_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    /// Every n-th completed focus phase is followed by a long break.
    pub long_break_cycle: u32,
}

impl Default for PomodoroConfig {
    fn default() -> Self {
        Self {
            focus_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            long_break_cycle: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.pomodoro.focus_minutes, 25);
        assert_eq!(config.pomodoro.long_break_cycle, 4);
    }

    #[test]
    fn test_partial_file_overrides_some_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"update_interval_secs": 3, "pomodoro": {"focus_minutes": 50}}"#,
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.update_interval_secs, 3);
        assert_eq!(config.pomodoro.focus_minutes, 50);
        assert_eq!(config.pomodoro.short_break_minutes, 5);
        assert!(config.auto_cycle);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{not json").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }
}
