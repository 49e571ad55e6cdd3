//! Configuration loading and management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::audio::GateConfig;
use crate::session::SessionConfig;

/// Wake token used when `VANS_WAKE_WORD` is unset
const DEFAULT_WAKE_WORD: &str = "hey vans";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Wake token, `None` when wake-word mode is disabled
    pub wake_word: Option<String>,

    /// Finalization window after a final transcript
    pub debounce: Duration,

    /// Base delay before restarting the speech engine
    pub restart_backoff: Duration,

    /// Upper bound for the error-driven restart delay
    pub restart_backoff_max: Duration,

    /// Noise gate threshold in dBFS
    pub gate_threshold_db: f32,

    /// Gate attack time constant
    pub gate_attack: Duration,

    /// Gate release time constant
    pub gate_release: Duration,

    /// Samples per audio block
    pub block_size: usize,

    /// Named input device, system default when `None`
    pub input_device: Option<String>,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("vans");

        let socket_path = lookup("VANS_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let wake_word = match lookup("VANS_WAKE_WORD") {
            Some(word) if word.trim().is_empty() => None,
            Some(word) => Some(word.trim().to_lowercase()),
            None => Some(DEFAULT_WAKE_WORD.to_string()),
        };

        let block_size: usize = parse_or(&lookup, "VANS_BLOCK_SIZE", 2048)?;
        if block_size == 0 {
            anyhow::bail!("VANS_BLOCK_SIZE must be greater than zero");
        }

        Ok(Self {
            socket_path,
            data_dir,
            wake_word,
            debounce: millis(&lookup, "VANS_DEBOUNCE_MS", 1500)?,
            restart_backoff: millis(&lookup, "VANS_RESTART_BACKOFF_MS", 500)?,
            restart_backoff_max: millis(&lookup, "VANS_RESTART_BACKOFF_MAX_MS", 8000)?,
            gate_threshold_db: parse_or(&lookup, "VANS_GATE_THRESHOLD_DB", -50.0)?,
            gate_attack: millis(&lookup, "VANS_GATE_ATTACK_MS", 20)?,
            gate_release: millis(&lookup, "VANS_GATE_RELEASE_MS", 50)?,
            block_size,
            input_device: lookup("VANS_INPUT_DEVICE").filter(|name| !name.is_empty()),
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    /// Recognition session settings
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            wake_word: self.wake_word.clone(),
            debounce: self.debounce,
            restart_backoff: self.restart_backoff,
            restart_backoff_max: self.restart_backoff_max.max(self.restart_backoff),
            ..SessionConfig::default()
        }
    }

    /// Noise gate settings
    pub fn gate(&self) -> GateConfig {
        GateConfig {
            threshold_db: self.gate_threshold_db,
            attack: self.gate_attack,
            release: self.gate_release,
            ..GateConfig::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

fn millis<F>(lookup: &F, key: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load_with(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load_with(&[("HOME", "/home/tester")]).unwrap();
        assert!(config.socket_path.to_string_lossy().contains("vans"));
        assert_eq!(config.wake_word.as_deref(), Some("hey vans"));
        assert_eq!(config.debounce, Duration::from_millis(1500));
        assert_eq!(config.block_size, 2048);
        assert_eq!(config.gate_threshold_db, -50.0);
    }

    #[test]
    fn test_empty_wake_word_disables_wake_mode() {
        let config = load_with(&[("HOME", "/h"), ("VANS_WAKE_WORD", "  ")]).unwrap();
        assert!(config.wake_word.is_none());
        assert!(config.session().wake_word.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load_with(&[
            ("HOME", "/h"),
            ("VANS_WAKE_WORD", "Computer"),
            ("VANS_DEBOUNCE_MS", "2000"),
            ("VANS_GATE_THRESHOLD_DB", "-42.5"),
            ("VANS_SOCKET", "/tmp/vans.sock"),
        ])
        .unwrap();
        assert_eq!(config.wake_word.as_deref(), Some("computer"));
        assert_eq!(config.debounce, Duration::from_secs(2));
        assert_eq!(config.gate().threshold_db, -42.5);
        assert_eq!(config.socket_path, PathBuf::from("/tmp/vans.sock"));
    }

    #[test]
    fn test_invalid_value_names_variable() {
        let err = load_with(&[("HOME", "/h"), ("VANS_DEBOUNCE_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("VANS_DEBOUNCE_MS"));
    }

    #[test]
    fn test_missing_home_is_error() {
        assert!(load_with(&[]).is_err());
    }
}
