//! Shared configuration for the panwatch daemon.
//!
//! TOML file plus `PANWATCH_` environment overrides, appliance profiles,
//! credential resolution (env + keyring + plaintext) and translation into
//! core types (`PollingConfig`, `ApplianceCredentials`, `TlsMode`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use panwatch_api::TlsMode;
use panwatch_core::{ApplianceCredentials, DevicePreference, PollingConfig};

/// Keyring service under which appliance secrets are stored.
pub const KEYRING_SERVICE: &str = "panwatch";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for appliance '{appliance}'")]
    NoCredentials { appliance: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Scheduler and polling tunables.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Appliances onboarded at startup.
    #[serde(default)]
    pub appliances: Vec<ApplianceProfile>,
}

/// One `[[appliances]]` entry.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApplianceProfile {
    /// Management base URL (e.g., "https://fw1.example.com").
    pub url: String,

    /// Username for key exchange.
    pub username: Option<String>,

    /// Password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// API key (plaintext, prefer keyring or env var).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    /// Accept any certificate. Defaults to on when no CA is configured.
    pub insecure: Option<bool>,

    /// Path to a custom CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,

    /// Optional poller catalog ids enabled for this appliance.
    #[serde(default)]
    pub optional_pollers: Vec<Uuid>,
}

impl ApplianceProfile {
    pub fn parsed_url(&self) -> Result<Url, ConfigError> {
        let url: Url = self.url.parse().map_err(|_| ConfigError::Validation {
            field: "url".into(),
            reason: format!("invalid URL: {}", self.url),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation {
                field: "url".into(),
                reason: format!("expected http or https, got '{}'", url.scheme()),
            });
        }
        Ok(url)
    }

    /// TLS mode for this appliance's client.
    pub fn tls_mode(&self) -> TlsMode {
        match (self.insecure, &self.ca_cert) {
            // management interfaces are typically self-signed
            (Some(true), _) | (None, None) => TlsMode::DangerAcceptInvalid,
            (_, Some(ca)) => TlsMode::CustomCa(ca.clone()),
            (Some(false), None) => TlsMode::System,
        }
    }

    /// Optional poller preferences once the serial is known.
    pub fn device_preference(&self, serial: &str) -> DevicePreference {
        DevicePreference {
            serial: serial.to_owned(),
            enabled_optional_pollers: self.optional_pollers.clone(),
        }
    }

    /// Keyring entry name for one secret of this appliance.
    fn keyring_entry(&self, secret: &str) -> String {
        format!("{}/{secret}", self.url.trim_end_matches('/'))
    }
}

impl Config {
    /// Check every appliance URL and reject duplicates.
    ///
    /// Polling knobs are not rejected here: `request_timeout_secs = 0`
    /// disables the per-call deadline, and zero concurrency or intervals
    /// are clamped to their minimum by `PollingConfig`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for profile in &self.appliances {
            let url = profile.parsed_url()?;
            let key = url.as_str().trim_end_matches('/').to_owned();
            if !seen.insert(key) {
                return Err(ConfigError::Validation {
                    field: "appliances".into(),
                    reason: format!("duplicate appliance URL: {}", profile.url),
                });
            }
        }
        Ok(())
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "panwatch", "panwatch").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("panwatch");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config: defaults, then the TOML file, then environment.
///
/// `path` overrides the platform config path and must exist. Environment
/// keys nest with a double underscore, e.g.
/// `PANWATCH_POLLING__MAX_RUNNING_REQUESTS=4`.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(explicit) => {
            if !explicit.is_file() {
                return Err(ConfigError::Validation {
                    field: "config".into(),
                    reason: format!("file not found: {}", explicit.display()),
                });
            }
            explicit.to_path_buf()
        }
        None => config_path(),
    };
    debug!(path = %path.display(), "loading configuration");

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("PANWATCH_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve how to authenticate against an appliance.
///
/// An API key wins when one is found; otherwise a username plus password
/// is used for key exchange.
pub fn resolve_credentials(
    profile: &ApplianceProfile,
) -> Result<ApplianceCredentials, ConfigError> {
    if let Some(key) = resolve_api_key(profile) {
        return Ok(ApplianceCredentials::ApiKey(key));
    }

    if let Some(username) = profile.username.clone() {
        if let Some(password) = resolve_password(profile) {
            return Ok(ApplianceCredentials::Password { username, password });
        }
    }

    Err(ConfigError::NoCredentials {
        appliance: profile.url.clone(),
    })
}

/// API key: env var, then keyring, then plaintext.
fn resolve_api_key(profile: &ApplianceProfile) -> Option<SecretString> {
    secret_chain(
        profile.api_key_env.as_deref(),
        &profile.keyring_entry("api-key"),
        profile.api_key.as_deref(),
    )
}

/// Password: env var, then keyring, then plaintext.
fn resolve_password(profile: &ApplianceProfile) -> Option<SecretString> {
    secret_chain(
        profile.password_env.as_deref(),
        &profile.keyring_entry("password"),
        profile.password.as_deref(),
    )
}

fn secret_chain(
    env_name: Option<&str>,
    keyring_entry: &str,
    plaintext: Option<&str>,
) -> Option<SecretString> {
    // 1. Env var named by the profile
    if let Some(env_name) = env_name {
        if let Ok(val) = std::env::var(env_name) {
            debug!(source = "env", entry = keyring_entry, "credential resolved");
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, keyring_entry) {
        if let Ok(secret) = entry.get_password() {
            debug!(source = "keyring", entry = keyring_entry, "credential resolved");
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    plaintext.map(|s| SecretString::from(s.to_owned()))
}
