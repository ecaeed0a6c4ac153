//! Configuration management for the StayFit client.
//!
//! Loads configuration from ${STAYFIT_HOME}/config.toml with sensible defaults.
//! Environment variables take precedence over the config file for the backend
//! endpoint and anon key so device builds can be pointed at another project
//! without editing the file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the Supabase project URL.
pub const URL_ENV_VAR: &str = "STAYFIT_SUPABASE_URL";
/// Environment variable overriding the Supabase anon key.
pub const ANON_KEY_ENV_VAR: &str = "STAYFIT_SUPABASE_ANON_KEY";

const DEFAULT_SUPABASE_URL: &str = "https://example.supabase.co";
const DEFAULT_ANON_KEY: &str = "your_supabase_anon_key";

/// Deep link opened by the password-reset email.
pub const RESET_REDIRECT: &str = "stayfit://reset-password";

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Supabase project URL.
    pub supabase_url: String,
    /// Supabase anon (public) key sent as the `apikey` header.
    pub supabase_anon_key: String,
    /// Per-request timeout for identity and data calls, in seconds.
    pub request_timeout_secs: u64,
    /// Timeout for the startup reachability probe, in seconds.
    pub probe_timeout_secs: u64,
    /// Client-side cooldown between password-reset dispatches, in seconds.
    pub reset_resend_cooldown_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            supabase_url: DEFAULT_SUPABASE_URL.to_string(),
            supabase_anon_key: DEFAULT_ANON_KEY.to_string(),
            request_timeout_secs: 15,
            probe_timeout_secs: 10,
            reset_resend_cooldown_secs: 60,
        }
    }
}

impl Config {
    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if the file doesn't exist. Environment overrides are
    /// applied after the file in either case.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        } else {
            Config::default()
        };

        if let Some(url) = non_empty_env(URL_ENV_VAR) {
            validate_url(&url)?;
            config.supabase_url = url;
        }
        if let Some(key) = non_empty_env(ANON_KEY_ENV_VAR) {
            config.supabase_anon_key = key;
        }

        Ok(config)
    }

    /// Per-request timeout for identity and data calls.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Timeout for the startup reachability probe.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Client-side cooldown between password-reset dispatches.
    pub fn reset_resend_cooldown(&self) -> Duration {
        Duration::from_secs(self.reset_resend_cooldown_secs)
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validates that a URL is well-formed.
fn validate_url(url: &str) -> Result<()> {
    url::Url::parse(url).with_context(|| format!("Invalid Supabase URL: {url}"))?;
    Ok(())
}

pub mod paths {
    //! Path resolution for StayFit configuration and data directories.
    //!
    //! STAYFIT_HOME resolution order:
    //! 1. STAYFIT_HOME environment variable (if set)
    //! 2. ~/.config/stayfit (default)

    use std::path::PathBuf;

    /// Returns the StayFit home directory.
    ///
    /// Checks STAYFIT_HOME env var first, falls back to ~/.config/stayfit
    pub fn stayfit_home() -> PathBuf {
        if let Ok(home) = std::env::var("STAYFIT_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("stayfit"))
            .expect("Could not determine home directory")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        stayfit_home().join("config.toml")
    }

    /// Returns the path to the persisted session file.
    pub fn session_path() -> PathBuf {
        stayfit_home().join("session.json")
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    /// Test: missing config file yields defaults.
    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.supabase_url, DEFAULT_SUPABASE_URL);
        assert_eq!(config.request_timeout_secs, 15);
        assert_eq!(config.probe_timeout_secs, 10);
        assert_eq!(config.reset_resend_cooldown_secs, 60);
    }

    /// Test: partial config file keeps defaults for omitted fields.
    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "supabase_url = \"https://myproj.supabase.co\"").unwrap();
        writeln!(file, "request_timeout_secs = 5").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.supabase_url, "https://myproj.supabase.co");
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.reset_resend_cooldown_secs, 60);
    }

    /// Test: malformed config file is an error, not a silent default.
    #[test]
    fn test_load_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "supabase_url = [not toml").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
