//! Host configuration
//!
//! JSON file under the platform config dir. Every field has a default so
//! an empty object is a valid config; out-of-range values are corrected on
//! load with a warning instead of refusing to start.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::constants::{config as names, engine, retry};
use crate::retry::RetryPolicy;
use crate::types::DisplayConfig;

/// Top-level host configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Override for the IPC socket location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,

    /// Override for the persisted display state file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// Display preparation applied for every session unless a request overrides it
    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub retry: RetryPolicy,
}

/// External settings engine helper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_helper")]
    pub helper: PathBuf,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_log_level() -> String {
    names::DEFAULT_LOG_LEVEL.to_string()
}

fn default_helper() -> PathBuf {
    PathBuf::from(engine::DEFAULT_HELPER)
}

fn default_timeout_ms() -> u64 {
    engine::DEFAULT_TIMEOUT_MS
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            helper: default_helper(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl EngineSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            socket_path: None,
            state_file: None,
            display: DisplayConfig::default(),
            engine: EngineSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl HostConfig {
    pub fn path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(names::APP_DIR);
        path.push(names::FILENAME);
        path
    }

    /// Load configuration from the default path, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    /// Load configuration from `path`, writing defaults there if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, creating default config");
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse JSON from {}", path.display()))?;
        config.validate_and_clamp();

        info!(path = %path.display(), "Loaded host config");
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config to JSON")?;
        fs::write(path, json).with_context(|| format!("Failed to write config to {}", path.display()))?;
        info!(path = %path.display(), "Saved config");
        Ok(())
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(crate::persistence::FileStore::default_path)
    }

    /// Correct values that would make the host misbehave
    fn validate_and_clamp(&mut self) {
        let level = self.log_level.to_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            self.log_level = level;
        } else {
            warn!(log_level = %self.log_level, using = names::DEFAULT_LOG_LEVEL, "Unknown log_level, using default");
            self.log_level = default_log_level();
        }

        if self.engine.timeout_ms == 0 {
            warn!(using = engine::DEFAULT_TIMEOUT_MS, "engine.timeout_ms must be positive, using default");
            self.engine.timeout_ms = engine::DEFAULT_TIMEOUT_MS;
        }

        let policy = &mut self.retry;
        if policy.interval_ms < retry::MIN_INTERVAL_MS {
            warn!(interval_ms = policy.interval_ms, min = retry::MIN_INTERVAL_MS, "retry.interval_ms below minimum, clamping");
            policy.interval_ms = retry::MIN_INTERVAL_MS;
        }
        if !policy.backoff.is_finite() || policy.backoff < 1.0 {
            warn!(backoff = policy.backoff, "retry.backoff must be a number >= 1.0, using 1.0");
            policy.backoff = 1.0;
        }
        if policy.max_interval_ms < policy.interval_ms {
            warn!(max_interval_ms = policy.max_interval_ms, interval_ms = policy.interval_ms, "retry.max_interval_ms below interval, raising it");
            policy.max_interval_ms = policy.interval_ms;
        }
        if policy.max_attempts == 0 {
            warn!(using = retry::DEFAULT_MAX_ATTEMPTS, "retry.max_attempts must be positive, using default");
            policy.max_attempts = retry::DEFAULT_MAX_ATTEMPTS;
        } else if policy.max_attempts > retry::MAX_ATTEMPTS_LIMIT {
            warn!(max_attempts = policy.max_attempts, max = retry::MAX_ATTEMPTS_LIMIT, "retry.max_attempts exceeds maximum, clamping");
            policy.max_attempts = retry::MAX_ATTEMPTS_LIMIT;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DevicePrep;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: HostConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, HostConfig::default());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.engine.helper, PathBuf::from(engine::DEFAULT_HELPER));
    }

    #[test]
    fn test_load_missing_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("display-session").join("config.json");

        let config = HostConfig::load_from(&path).unwrap();

        assert_eq!(config, HostConfig::default());
        assert!(path.exists());
        assert_eq!(HostConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_load_parses_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "log_level": "DEBUG",
                "display": {"output_name": "HDMI-1", "device_prep": "ensure_only_display"},
                "retry": {"interval_ms": 2000, "max_attempts": 5}
            }"#,
        )
        .unwrap();

        let config = HostConfig::load_from(&path).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.display.output_name, "HDMI-1");
        assert_eq!(config.display.device_prep, DevicePrep::EnsureOnlyDisplay);
        assert_eq!(config.retry.interval_ms, 2000);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff, retry::DEFAULT_BACKOFF);
    }

    #[test]
    fn test_validate_and_clamp_fixes_bad_values() {
        let mut config = HostConfig {
            log_level: "loud".to_string(),
            engine: EngineSettings {
                helper: default_helper(),
                timeout_ms: 0,
            },
            retry: RetryPolicy {
                interval_ms: 1,
                backoff: 0.5,
                max_interval_ms: 10,
                max_attempts: 0,
            },
            ..HostConfig::default()
        };

        config.validate_and_clamp();

        assert_eq!(config.log_level, names::DEFAULT_LOG_LEVEL);
        assert_eq!(config.engine.timeout_ms, engine::DEFAULT_TIMEOUT_MS);
        assert_eq!(config.retry.interval_ms, retry::MIN_INTERVAL_MS);
        assert_eq!(config.retry.backoff, 1.0);
        assert_eq!(config.retry.max_interval_ms, retry::MIN_INTERVAL_MS);
        assert_eq!(config.retry.max_attempts, retry::DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_max_attempts_is_capped() {
        let mut config = HostConfig::default();
        config.retry.max_attempts = u32::MAX;
        config.validate_and_clamp();
        assert_eq!(config.retry.max_attempts, retry::MAX_ATTEMPTS_LIMIT);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(HostConfig::load_from(&path).is_err());
    }
}
