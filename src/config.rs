//! Configuration management for cobra
//!
//! Stores settings in ~/.config/cobra/config.json

use crate::keyring::{CredentialStore, API_KEY};
use crate::pipeline::StalePolicy;
use crate::present::RetryPolicy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const MIN_DEBOUNCE_MS: u64 = 250;
const MAX_DEBOUNCE_MS: u64 = 10_000;
const MIN_POLL_MS: u64 = 50;
const MAX_POLL_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Legacy plaintext key; moved into the keychain on first use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// OpenAI-compatible chat-completion endpoint
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    /// Quiet window before an edit burst is analyzed
    pub debounce_ms: u64,
    /// How often the solution file is checked for changes
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub highlight_retry: RetryConfig,
    pub stale_responses: StalePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.2,
            debounce_ms: 1500,
            poll_interval_ms: 250,
            request_timeout_secs: 60,
            highlight_retry: RetryConfig::default(),
            stale_responses: StalePolicy::default(),
        }
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var("COBRA_CONFIG_DIR") {
            return Some(PathBuf::from(dir));
        }
        dirs::config_dir().map(|p| p.join("cobra"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from a specific file. Missing files give defaults; corrupt files
    /// are set aside as `*.corrupt` and defaults are used.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str::<Config>(&content) {
            Ok(mut config) => {
                config.sanitize();
                config
            }
            Err(err) => {
                preserve_corrupt_config(path, &content);
                warn!(
                    error = %err,
                    path = %path.display(),
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path().context("Could not determine config directory")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    warn!(error = %e, "failed to set config directory permissions");
                }
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        write_config_atomic(path, &content).context("Failed to write config")
    }

    /// Clamp values that would make the pipeline misbehave.
    pub fn sanitize(&mut self) {
        self.debounce_ms = self.debounce_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
        self.poll_interval_ms = self.poll_interval_ms.clamp(MIN_POLL_MS, MAX_POLL_MS);
        self.request_timeout_secs = self.request_timeout_secs.clamp(5, 300);
        if !self.temperature.is_finite() {
            self.temperature = Config::default().temperature;
        }
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.highlight_retry.max_retries = self.highlight_retry.max_retries.min(10);
        self.highlight_retry.multiplier = self.highlight_retry.multiplier.clamp(1, 10);
        if self.endpoint.trim().is_empty() {
            self.endpoint = DEFAULT_ENDPOINT.to_string();
        }
        if self.model.trim().is_empty() {
            self.model = DEFAULT_MODEL.to_string();
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.highlight_retry.max_retries,
            base_delay: Duration::from_millis(self.highlight_retry.base_delay_ms),
            multiplier: self.highlight_retry.multiplier,
        }
    }

    /// Move a legacy plaintext key into the credential store. Returns true if
    /// the config changed and should be saved.
    pub fn migrate_legacy_key(&mut self, store: &dyn CredentialStore) -> bool {
        let Some(key) = self.api_key.clone() else {
            return false;
        };
        match store.set(API_KEY, &key) {
            Ok(()) if store.get(API_KEY).as_deref() == Some(key.as_str()) => {
                self.api_key = None;
                true
            }
            Ok(()) => {
                warn!("API key migration could not be verified; keeping config copy");
                false
            }
            Err(err) => {
                warn!(error = %err, "failed to migrate API key to keychain");
                false
            }
        }
    }

    /// Validate API key format (should start with sk-)
    pub fn validate_api_key_format(key: &str) -> bool {
        key.starts_with("sk-")
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/cobra/config.json".to_string())
    }
}

/// Interactive prompt to set up the API key
pub fn setup_api_key_interactive(store: &dyn CredentialStore) -> anyhow::Result<()> {
    use std::io;

    println!();
    println!("  ┌─────────────────────────────────────────────────────────┐");
    println!("  │  COBRA SETUP                                            │");
    println!("  └─────────────────────────────────────────────────────────┘");
    println!();
    println!("  cobra sends your solution to a chat-completion API for review.");
    println!("  Paste an API key below (saved in your system keychain).");
    println!();
    print!("  API Key: ");
    io::stdout().flush()?;

    let mut key = String::new();
    io::stdin().read_line(&mut key)?;
    let key = key.trim().to_string();

    if key.is_empty() {
        anyhow::bail!("No API key provided");
    }

    if !Config::validate_api_key_format(&key) {
        println!();
        println!("  Warning: Key doesn't look like an OpenAI key (should start with sk-)");
        println!("     Saving anyway...");
    }

    store.set(API_KEY, &key).map_err(|e| {
        anyhow::anyhow!(
            "Failed to store API key in system keychain: {}. \
             You can set the OPENAI_API_KEY environment variable instead.",
            e
        )
    })?;

    println!();
    println!("  + API key saved to the system keychain");
    println!("  Settings live in {}", Config::config_location());
    println!();
    Ok(())
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    use std::fs::OpenOptions;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            warn!(error = %e, "failed to set temp config file permissions");
        }
    }

    file.write_all(content.as_bytes())?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::MemoryStore;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.api_key.is_none());
        assert_eq!(config.debounce(), Duration::from_millis(1500));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.stale_responses, StalePolicy::LatestOnly);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cobra").join("config.json");
        let config = Config {
            model: "gpt-4o".to_string(),
            debounce_ms: 2000,
            stale_responses: StalePolicy::NewerThanPresented,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn test_partial_file_fills_defaults_and_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"debounce_ms": 5, "highlight_retry": {"max_retries": 50}}"#).unwrap();
        let config = Config::load_from(&path);
        assert_eq!(config.debounce_ms, MIN_DEBOUNCE_MS);
        assert_eq!(config.highlight_retry.max_retries, 10);
        assert_eq!(config.highlight_retry.base_delay_ms, 500);
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_corrupt_file_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let config = Config::load_from(&path);
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.json.corrupt").exists());
    }

    #[test]
    fn test_legacy_key_migrates() {
        let store = MemoryStore::new();
        let mut config = Config {
            api_key: Some("sk-legacy".to_string()),
            ..Config::default()
        };
        assert!(config.migrate_legacy_key(&store));
        assert!(config.api_key.is_none());
        assert_eq!(store.get(API_KEY).as_deref(), Some("sk-legacy"));
        assert!(!config.migrate_legacy_key(&store));
    }

    #[test]
    fn test_stale_policy_serde_names() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains(r#""stale_responses":"latest_only""#));
    }
}
