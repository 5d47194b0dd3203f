//! Application configuration management.
//!
//! Configuration covers the backend endpoints, which store holds the session,
//! and the session/payment timing knobs. It is read from
//! `~/.config/dashbite/config.json` and then overridden by `DASHBITE_*`
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::session::{
    SessionPolicy, DEFAULT_REFRESH_THRESHOLD_MINUTES, DEFAULT_TOKEN_LIFETIME_MINUTES,
};
use crate::payment::PollConfig;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "dashbite";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default seconds between periodic session validations
const DEFAULT_VALIDATION_INTERVAL_SECS: u64 = 60;

pub const ENV_BACKEND_URL: &str = "DASHBITE_BACKEND_URL";
pub const ENV_API_KEY: &str = "DASHBITE_API_KEY";
pub const ENV_PAYMENT_URL: &str = "DASHBITE_PAYMENT_URL";
pub const ENV_STORE: &str = "DASHBITE_STORE";
pub const ENV_STORE_PASSPHRASE: &str = "DASHBITE_STORE_PASSPHRASE";

/// Where sessions and preferences are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Keyring,
    File,
    Memory,
}

impl std::str::FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" | "keychain" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!("Unknown store kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub refresh_threshold_minutes: i64,
    pub token_lifetime_minutes: i64,
    pub idle_timeout_minutes: Option<i64>,
    pub validation_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_threshold_minutes: DEFAULT_REFRESH_THRESHOLD_MINUTES,
            token_lifetime_minutes: DEFAULT_TOKEN_LIFETIME_MINUTES,
            idle_timeout_minutes: None,
            validation_interval_secs: DEFAULT_VALIDATION_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentPollSettings {
    pub interval_secs: u64,
    pub max_interval_secs: u64,
    pub backoff_factor: f64,
    pub max_attempts: u32,
}

impl Default for PaymentPollSettings {
    fn default() -> Self {
        let poll = PollConfig::default();
        Self {
            interval_secs: poll.initial_interval.as_secs(),
            max_interval_secs: poll.max_interval.as_secs(),
            backoff_factor: poll.backoff_factor,
            max_attempts: poll.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend_url: Option<String>,
    pub api_key: Option<String>,
    pub payment_url: Option<String>,
    pub last_email: Option<String>,
    pub store: StoreKind,
    pub session: SessionSettings,
    pub payment_poll: PaymentPollSettings,
}

impl Config {
    /// Load from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Change the config file without applying environment overrides
    pub fn update_file<F>(change: F) -> Result<()>
    where
        F: FnOnce(&mut Config),
    {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        change(&mut config);
        config.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Override file settings with values from `lookup` (normally the environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(ENV_BACKEND_URL) {
            self.backend_url = Some(url);
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_PAYMENT_URL) {
            self.payment_url = Some(url);
        }
        if let Some(kind) = lookup(ENV_STORE) {
            self.store = kind
                .parse()
                .with_context(|| format!("Invalid {}", ENV_STORE))?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn backend_url(&self) -> Result<&str> {
        self.backend_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Backend URL not configured; set {}", ENV_BACKEND_URL))
    }

    /// Payment gateway base URL, defaulting to the backend
    pub fn payment_url(&self) -> Result<&str> {
        match self.payment_url.as_deref() {
            Some(url) => Ok(url),
            None => self.backend_url(),
        }
    }

    pub fn session_policy(&self) -> SessionPolicy {
        let settings = &self.session;
        SessionPolicy {
            refresh_threshold: chrono::Duration::minutes(settings.refresh_threshold_minutes.max(0)),
            default_token_lifetime: chrono::Duration::minutes(
                settings.token_lifetime_minutes.max(1),
            ),
            idle_timeout: settings
                .idle_timeout_minutes
                .filter(|m| *m > 0)
                .map(chrono::Duration::minutes),
        }
    }

    pub fn validation_interval(&self) -> Duration {
        Duration::from_secs(self.session.validation_interval_secs.max(1))
    }

    pub fn poll_config(&self) -> PollConfig {
        let settings = &self.payment_poll;
        PollConfig {
            initial_interval: Duration::from_secs(settings.interval_secs.max(1)),
            max_interval: Duration::from_secs(settings.max_interval_secs.max(settings.interval_secs).max(1)),
            backoff_factor: settings.backoff_factor.max(1.0),
            max_attempts: settings.max_attempts.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults_match_session_policy() {
        let config = Config::default();
        assert_eq!(config.session_policy(), SessionPolicy::default());
        assert_eq!(config.poll_config(), PollConfig::default());
        assert_eq!(config.store, StoreKind::Keyring);
        assert!(config.backend_url().is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = Config::default();
        config.backend_url = Some("https://project.example.co".to_string());
        config.session.idle_timeout_minutes = Some(120);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.session_policy().idle_timeout,
            Some(chrono::Duration::minutes(120))
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"session":{"refresh_threshold_minutes":5}}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(
            config.session_policy().refresh_threshold,
            chrono::Duration::minutes(5)
        );
        assert_eq!(config.session.token_lifetime_minutes, DEFAULT_TOKEN_LIFETIME_MINUTES);
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_BACKEND_URL, "https://project.example.co"),
            (ENV_STORE, "file"),
            (ENV_PAYMENT_URL, ""),
        ]);
        let mut config = Config::default();
        config.payment_url = Some("https://pay.example.com".to_string());
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.backend_url().unwrap(), "https://project.example.co");
        assert_eq!(config.store, StoreKind::File);
        // Empty values do not override
        assert_eq!(config.payment_url().unwrap(), "https://pay.example.com");

        let bad: HashMap<&str, &str> = HashMap::from([(ENV_STORE, "floppy")]);
        assert!(config
            .apply_overrides(|name| bad.get(name).map(|v| v.to_string()))
            .is_err());
    }
}
