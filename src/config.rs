//! Persisted settings and the shared store that serializes updates.
//!
//! The record is YAML. Missing fields take their defaults. A field with the
//! wrong type or an out-of-range value is replaced on its own, keeping the
//! rest of the file. Only a document that is not YAML at all yields the full
//! default record. Loading never fails.

use crate::error::{MonitorError, Result};
use crate::theme::Theme;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml_ng::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "MEMSWEEP_CONFIG";

/// Shortest accepted sampling interval, in seconds.
pub const MIN_UPDATE_INTERVAL_SECONDS: f64 = 0.01;

/// Longest accepted sampling interval, in seconds.
pub const MAX_UPDATE_INTERVAL_SECONDS: f64 = 3600.0;

/// Longest accepted history window, in seconds.
pub const MAX_HISTORY_SECONDS: u64 = 86_400;

/// Flat settings record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Start with the user session (registration itself is external).
    #[serde(default)]
    pub autostart: bool,

    /// Accent theme.
    #[serde(default)]
    pub theme: Theme,

    /// Seconds between samples, within
    /// [`MIN_UPDATE_INTERVAL_SECONDS`, `MAX_UPDATE_INTERVAL_SECONDS`].
    #[serde(default = "default_update_interval")]
    pub update_interval_seconds: f64,

    /// Length of the history window in seconds, at most
    /// [`MAX_HISTORY_SECONDS`].
    #[serde(default = "default_history_seconds")]
    pub history_seconds: u64,

    /// Number of processes kept in the ranking.
    #[serde(default = "default_top_n")]
    pub top_n_processes: usize,

    /// Reclaim when RAM usage reaches the threshold.
    #[serde(default)]
    pub auto_clean_enabled: bool,

    /// Threshold percentage, 0 - 100.
    #[serde(default = "default_threshold")]
    pub auto_clean_threshold_percent: u32,

    /// Reclaim on a fixed period.
    #[serde(default)]
    pub auto_clean_period_enabled: bool,

    /// Period in minutes.
    #[serde(default = "default_period_minutes")]
    pub auto_clean_period_minutes: u64,

    /// Forward reclaim results to notification observers.
    #[serde(default = "default_notify")]
    pub notify_on_cleanup: bool,

    /// Upper bound on one reclaim operation.
    #[serde(default = "default_reclaim_timeout")]
    pub reclaim_timeout_seconds: u64,

    /// Program and arguments run by the default reclaimer.
    #[serde(default = "default_reclaim_command")]
    pub reclaim_command: Vec<String>,
}

fn default_update_interval() -> f64 {
    1.0
}
fn default_history_seconds() -> u64 {
    60
}
fn default_top_n() -> usize {
    5
}
fn default_threshold() -> u32 {
    80
}
fn default_period_minutes() -> u64 {
    30
}
fn default_notify() -> bool {
    true
}
fn default_reclaim_timeout() -> u64 {
    30
}

#[cfg(windows)]
fn default_reclaim_command() -> Vec<String> {
    ["powershell", "-NoProfile", "-Command", "[System.GC]::Collect(); Clear-DnsClientCache"]
        .map(String::from)
        .to_vec()
}

#[cfg(not(windows))]
fn default_reclaim_command() -> Vec<String> {
    vec!["sync".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            autostart: false,
            theme: Theme::default(),
            update_interval_seconds: default_update_interval(),
            history_seconds: default_history_seconds(),
            top_n_processes: default_top_n(),
            auto_clean_enabled: false,
            auto_clean_threshold_percent: default_threshold(),
            auto_clean_period_enabled: false,
            auto_clean_period_minutes: default_period_minutes(),
            notify_on_cleanup: default_notify(),
            reclaim_timeout_seconds: default_reclaim_timeout(),
            reclaim_command: default_reclaim_command(),
        }
    }
}

impl Config {
    /// Default location: `<config dir>/memsweep/config.yaml`, or the
    /// `MEMSWEEP_CONFIG` override.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("memsweep").join("config.yaml"))
    }

    /// Parses a YAML document strictly, without sanitizing it.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigParse`] with the failing line, including
    /// for a single field of the wrong type.
    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml_ng::from_str(yaml).map_err(|e| parse_error(&e))
    }

    /// Parses a YAML document field by field.
    ///
    /// A field that does not deserialize keeps its default and its key is
    /// returned. The threshold is read as a signed integer and clamped.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigParse`] if the text is not YAML or the
    /// document is not a mapping.
    pub fn parse_lenient(yaml: &str) -> Result<(Self, Vec<&'static str>)> {
        let doc: Value = serde_yaml_ng::from_str(yaml).map_err(|e| parse_error(&e))?;
        let mut config = Self::default();
        let mut replaced = Vec::new();

        match &doc {
            Value::Null => return Ok((config, replaced)),
            Value::Mapping(_) => {}
            _ => {
                return Err(MonitorError::ConfigParse {
                    line: 1,
                    message: "expected a mapping of settings".to_string(),
                })
            }
        }

        let mut fields = Fields { doc: &doc, replaced: &mut replaced };
        fields.take("autostart", &mut config.autostart);
        fields.take("theme", &mut config.theme);
        fields.take("update_interval_seconds", &mut config.update_interval_seconds);
        fields.take("history_seconds", &mut config.history_seconds);
        fields.take("top_n_processes", &mut config.top_n_processes);
        fields.take("auto_clean_enabled", &mut config.auto_clean_enabled);
        fields.take("auto_clean_period_enabled", &mut config.auto_clean_period_enabled);
        fields.take("auto_clean_period_minutes", &mut config.auto_clean_period_minutes);
        fields.take("notify_on_cleanup", &mut config.notify_on_cleanup);
        fields.take("reclaim_timeout_seconds", &mut config.reclaim_timeout_seconds);
        fields.take("reclaim_command", &mut config.reclaim_command);

        let mut threshold = i64::from(config.auto_clean_threshold_percent);
        fields.take("auto_clean_threshold_percent", &mut threshold);
        if !(0..=100).contains(&threshold) {
            replaced.push("auto_clean_threshold_percent");
        }
        config.auto_clean_threshold_percent = threshold.clamp(0, 100) as u32;

        Ok((config, replaced))
    }

    /// Reads and sanitizes the file at `path`.
    ///
    /// Fields that fail to deserialize or fall out of range are replaced
    /// with defaults and logged.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigIo`] if the file cannot be read and
    /// [`MonitorError::ConfigParse`] if it is not a YAML mapping.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|source| MonitorError::ConfigIo { path: path.to_path_buf(), source })?;

        let (mut config, mut replaced) = Self::parse_lenient(&content)?;
        replaced.extend(config.sanitize());
        replaced.sort_unstable();
        replaced.dedup();
        for key in replaced {
            warn!(key, path = %path.display(), "invalid config value replaced with default");
        }
        Ok(config)
    }

    /// Loads `path`, falling back to defaults on any failure.
    #[must_use]
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::read(path) {
            Ok(config) => {
                debug!(path = %path.display(), "config loaded");
                config
            }
            Err(MonitorError::ConfigIo { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "config unreadable, using defaults");
                Self::default()
            }
        }
    }

    /// Serializes to YAML.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigInvalid`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self)
            .map_err(|e| MonitorError::ConfigInvalid { key: "config", message: e.to_string() })
    }

    /// Writes the full record to `path` through a temporary sibling file.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigIo`] on any filesystem failure.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = self.to_yaml()?;
        let io_err = |source| MonitorError::ConfigIo { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("yaml.tmp");
        fs::write(&tmp, yaml).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    /// Replaces out-of-range values with defaults and clamps the threshold
    /// and the history window.
    ///
    /// Returns the keys that were changed.
    pub fn sanitize(&mut self) -> Vec<&'static str> {
        let mut fixed = Vec::new();

        if !is_valid_interval(self.update_interval_seconds) {
            self.update_interval_seconds = default_update_interval();
            fixed.push("update_interval_seconds");
        }
        if self.history_seconds == 0 {
            self.history_seconds = default_history_seconds();
            fixed.push("history_seconds");
        } else if self.history_seconds > MAX_HISTORY_SECONDS {
            self.history_seconds = MAX_HISTORY_SECONDS;
            fixed.push("history_seconds");
        }
        if self.top_n_processes == 0 {
            self.top_n_processes = default_top_n();
            fixed.push("top_n_processes");
        }
        if self.auto_clean_threshold_percent > 100 {
            self.auto_clean_threshold_percent = 100;
            fixed.push("auto_clean_threshold_percent");
        }
        if self.auto_clean_period_minutes == 0 {
            self.auto_clean_period_minutes = default_period_minutes();
            fixed.push("auto_clean_period_minutes");
        }
        if self.reclaim_timeout_seconds == 0 {
            self.reclaim_timeout_seconds = default_reclaim_timeout();
            fixed.push("reclaim_timeout_seconds");
        }
        if self.reclaim_command.first().map_or(true, |p| p.trim().is_empty()) {
            self.reclaim_command = default_reclaim_command();
            fixed.push("reclaim_command");
        }

        fixed
    }

    /// Sampling interval.
    #[must_use]
    pub fn update_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.update_interval_seconds)
            .ok()
            .filter(|_| is_valid_interval(self.update_interval_seconds))
            .unwrap_or_else(|| Duration::from_secs_f64(default_update_interval()))
    }

    /// Periodic reclaim interval.
    #[must_use]
    pub fn clean_period(&self) -> Duration {
        Duration::from_secs(self.auto_clean_period_minutes.saturating_mul(60))
    }

    /// Reclaim timeout.
    #[must_use]
    pub fn reclaim_timeout(&self) -> Duration {
        Duration::from_secs(self.reclaim_timeout_seconds)
    }
}

/// Returns true if `seconds` is an accepted sampling interval.
#[must_use]
pub fn is_valid_interval(seconds: f64) -> bool {
    (MIN_UPDATE_INTERVAL_SECONDS..=MAX_UPDATE_INTERVAL_SECONDS).contains(&seconds)
}

fn parse_error(e: &serde_yaml_ng::Error) -> MonitorError {
    let line = e.location().map(|l| l.line()).unwrap_or(0);
    MonitorError::ConfigParse { line, message: e.to_string() }
}

/// Per-key reader over a parsed document.
struct Fields<'a> {
    doc: &'a Value,
    replaced: &'a mut Vec<&'static str>,
}

impl Fields<'_> {
    /// Overwrites `slot` if `key` is present and deserializes; records the
    /// key otherwise. A missing key leaves the default in place.
    fn take<T: DeserializeOwned>(&mut self, key: &'static str, slot: &mut T) {
        let Some(value) = self.doc.get(key) else {
            return;
        };
        match serde_yaml_ng::from_value(value.clone()) {
            Ok(parsed) => *slot = parsed,
            Err(err) => {
                debug!(key, error = %err, "config field not understood");
                self.replaced.push(key);
            }
        }
    }
}

/// The single shared [`Config`], with one writer at a time.
///
/// Readers take a [`snapshot`](Self::snapshot); writers go through
/// [`update`](Self::update), which persists the result while still holding
/// the lock so file writes land in update order.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    current: Mutex<Config>,
}

impl ConfigStore {
    /// Loads the record at `path`; never fails.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = Config::load(&path);
        Self { path: Some(path), current: Mutex::new(config) }
    }

    /// A store with no backing file.
    #[must_use]
    pub fn in_memory(mut config: Config) -> Self {
        config.sanitize();
        Self { path: None, current: Mutex::new(config) }
    }

    /// Backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// A consistent copy of the current record.
    #[must_use]
    pub fn snapshot(&self) -> Config {
        self.current.lock().clone()
    }

    /// Read-modify-write under the store lock.
    ///
    /// The result is sanitized and, if it differs from the current record,
    /// persisted. A failed save is logged, not returned; the in-memory record
    /// still changes.
    pub fn update<F>(&self, mutator: F) -> Config
    where
        F: FnOnce(&mut Config),
    {
        let mut guard = self.current.lock();
        let mut next = guard.clone();
        mutator(&mut next);
        for key in next.sanitize() {
            warn!(key, "invalid config value replaced with default");
        }

        if next != *guard {
            *guard = next;
            if let Err(err) = self.persist(&guard) {
                warn!(error = %err, "failed to save config");
            }
        }
        guard.clone()
    }

    /// Writes the current record to the backing file.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ConfigIo`] on filesystem failure.
    pub fn save(&self) -> Result<()> {
        let guard = self.current.lock();
        self.persist(&guard)
    }

    fn persist(&self, config: &Config) -> Result<()> {
        match &self.path {
            Some(path) => {
                config.save(path)?;
                debug!(path = %path.display(), "config saved");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert!(!config.autostart);
        assert_eq!(config.theme, Theme::Green);
        assert_eq!(config.update_interval_seconds, 1.0);
        assert_eq!(config.history_seconds, 60);
        assert_eq!(config.top_n_processes, 5);
        assert_eq!(config.auto_clean_threshold_percent, 80);
        assert_eq!(config.auto_clean_period_minutes, 30);
        assert!(config.notify_on_cleanup);
        assert_eq!(config.reclaim_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_partial_fills_defaults() {
        let config = Config::parse("theme: purple\nauto_clean_enabled: true\n").unwrap();

        assert_eq!(config.theme, Theme::Purple);
        assert!(config.auto_clean_enabled);
        assert_eq!(config.history_seconds, 60);
        assert_eq!(config.top_n_processes, 5);
    }

    #[test]
    fn test_parse_error_includes_line() {
        let yaml = "theme: green\nhistory_seconds: 60\ntop_n_processes: lots\n";
        let err = Config::parse(yaml).unwrap_err();

        assert!(matches!(err, MonitorError::ConfigParse { line: 3, .. }), "{err}");
    }

    #[test]
    fn test_sanitize_replaces_invalid_fields() {
        let mut config = Config {
            update_interval_seconds: -1.0,
            history_seconds: 0,
            top_n_processes: 0,
            auto_clean_threshold_percent: 150,
            auto_clean_period_minutes: 0,
            ..Config::default()
        };

        let fixed = config.sanitize();

        assert_eq!(config.update_interval_seconds, 1.0);
        assert_eq!(config.history_seconds, 60);
        assert_eq!(config.top_n_processes, 5);
        assert_eq!(config.auto_clean_threshold_percent, 100);
        assert_eq!(config.auto_clean_period_minutes, 30);
        assert_eq!(fixed.len(), 5);
    }

    #[test]
    fn test_sanitize_bounds_interval_and_history() {
        let mut config = Config {
            update_interval_seconds: 1e30,
            history_seconds: u64::MAX / 2,
            ..Config::default()
        };
        let fixed = config.sanitize();

        assert_eq!(config.update_interval_seconds, 1.0);
        assert_eq!(config.history_seconds, MAX_HISTORY_SECONDS);
        assert_eq!(fixed, vec!["update_interval_seconds", "history_seconds"]);

        let mut config = Config { update_interval_seconds: 1e-6, ..Config::default() };
        assert_eq!(config.sanitize(), vec!["update_interval_seconds"]);
    }

    #[test]
    fn test_update_interval_never_panics() {
        for seconds in [1e30, f64::INFINITY, f64::NAN, -3.0, 0.0, 1e-12] {
            let config = Config { update_interval_seconds: seconds, ..Config::default() };
            assert_eq!(config.update_interval(), Duration::from_secs(1), "{seconds}");
        }
        let config = Config { update_interval_seconds: 0.25, ..Config::default() };
        assert_eq!(config.update_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_lenient_replaces_only_bad_fields() {
        let yaml = "\
auto_clean_enabled: true
auto_clean_threshold_percent: 72
top_n_processes: 9
theme: red
history_seconds: lots
";
        let (config, replaced) = Config::parse_lenient(yaml).unwrap();

        assert!(config.auto_clean_enabled);
        assert_eq!(config.auto_clean_threshold_percent, 72);
        assert_eq!(config.top_n_processes, 9);
        assert_eq!(config.theme, Theme::Green);
        assert_eq!(config.history_seconds, 60);
        assert_eq!(replaced, vec!["theme", "history_seconds"]);
    }

    #[test]
    fn test_parse_lenient_clamps_signed_threshold() {
        let (config, replaced) =
            Config::parse_lenient("auto_clean_threshold_percent: -5\ntop_n_processes: 3\n").unwrap();
        assert_eq!(config.auto_clean_threshold_percent, 0);
        assert_eq!(config.top_n_processes, 3);
        assert_eq!(replaced, vec!["auto_clean_threshold_percent"]);

        let (config, _) = Config::parse_lenient("auto_clean_threshold_percent: 250\n").unwrap();
        assert_eq!(config.auto_clean_threshold_percent, 100);
    }

    #[test]
    fn test_parse_lenient_empty_and_non_mapping() {
        assert_eq!(Config::parse_lenient("").unwrap().0, Config::default());
        assert!(matches!(
            Config::parse_lenient("- green\n- purple\n"),
            Err(MonitorError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_load_keeps_valid_fields_beside_a_bad_one() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "auto_clean_enabled: true\nauto_clean_threshold_percent: 72\ntop_n_processes: 9\ntheme: red\n",
        )
        .unwrap();

        let config = Config::load(&path);
        assert!(config.auto_clean_enabled);
        assert_eq!(config.auto_clean_threshold_percent, 72);
        assert_eq!(config.top_n_processes, 9);
        assert_eq!(config.theme, Theme::Green);
    }

    #[test]
    fn test_load_oversized_window_is_clamped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "history_seconds: 9223372036854775807\nupdate_interval_seconds: 1.0e30\n").unwrap();

        let config = Config::load(&path);
        assert_eq!(config.history_seconds, MAX_HISTORY_SECONDS);
        assert_eq!(config.update_interval_seconds, 1.0);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path().join("absent.yaml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_malformed_file_is_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "theme: [green\nhistory_seconds: {").unwrap();

        assert_eq!(Config::load(&path), Config::default());
    }

    #[test]
    fn test_load_truncated_file_is_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let full = Config::default().to_yaml().unwrap();
        fs::write(&path, &full[..full.len() / 2 + 3]).unwrap();

        let loaded = Config::load(&path);
        assert!(loaded.update_interval_seconds > 0.0);
        assert!(loaded.auto_clean_threshold_percent <= 100);
    }

    #[test]
    fn test_save_load_save_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let original = Config {
            theme: Theme::Blue,
            auto_clean_enabled: true,
            auto_clean_threshold_percent: 72,
            update_interval_seconds: 2.5,
            ..Config::default()
        };
        original.save(&path).unwrap();
        let first = fs::read(&path).unwrap();

        Config::load(&path).save(&path).unwrap();
        let second = fs::read(&path).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("memsweep").join("config.yaml");

        Config::default().save(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("yaml.tmp").exists());
    }

    #[test]
    fn test_store_update_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let store = ConfigStore::open(&path);

        let updated = store.update(|c| c.top_n_processes = 9);

        assert_eq!(updated.top_n_processes, 9);
        assert_eq!(store.snapshot().top_n_processes, 9);
        assert_eq!(Config::load(&path).top_n_processes, 9);
    }

    #[test]
    fn test_store_update_sanitizes() {
        let store = ConfigStore::in_memory(Config::default());
        let updated = store.update(|c| c.auto_clean_threshold_percent = 400);
        assert_eq!(updated.auto_clean_threshold_percent, 100);
    }

    #[test]
    fn test_store_concurrent_updates_do_not_lose_writes() {
        let store = std::sync::Arc::new(ConfigStore::in_memory(Config::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.update(|c| c.history_seconds += 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.snapshot().history_seconds, 60 + 800);
    }
}
