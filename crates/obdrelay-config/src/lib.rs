//! Configuration for obdrelay.
//!
//! TOML profiles, token resolution (env + keyring + plaintext), and
//! translation to `obdrelay_core::RelayConfig`. The binary adds
//! flag-aware wrappers on top.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use obdrelay_core::{EndpointConfig, RelayConfig, TlsVerification, TransmissionMode};

/// Keyring service name; entries are keyed `<profile>/token`.
pub const KEYRING_SERVICE: &str = "obdrelay";

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "OBDRELAY_CONFIG";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no access token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("keyring error: {0}")]
    Keyring(String),

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

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Values shared by every profile.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named Home Assistant profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Name of the profile to use: explicit choice, then `default_profile`,
    /// then `"default"`.
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }

    /// Merge runtime-observed keys into a profile's `known_keys`.
    ///
    /// Returns `true` if anything was added.
    pub fn merge_known_keys<'a>(
        &mut self,
        profile_name: &str,
        keys: impl IntoIterator<Item = &'a String>,
    ) -> bool {
        let Some(profile) = self.profiles.get_mut(profile_name) else {
            return false;
        };
        let mut known: BTreeSet<String> = profile.known_keys.drain(..).collect();
        let before = known.len();
        known.extend(keys.into_iter().cloned());
        let added = known.len() != before;
        profile.known_keys = known.into_iter().collect();
        added
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// Transmission mode when a profile doesn't set one.
    #[serde(default = "default_mode")]
    pub mode: String,

    #[serde(default = "default_update_interval")]
    pub update_interval_seconds: u64,

    #[serde(default = "default_monitor_period")]
    pub monitor_period_seconds: u64,

    #[serde(default)]
    pub insecure: bool,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_retention_days")]
    pub ledger_retention_days: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            mode: default_mode(),
            update_interval_seconds: default_update_interval(),
            monitor_period_seconds: default_monitor_period(),
            insecure: false,
            timeout: default_timeout(),
            ledger_retention_days: default_retention_days(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_mode() -> String {
    "realtime".into()
}
fn default_update_interval() -> u64 {
    5
}
fn default_monitor_period() -> u64 {
    30
}
fn default_timeout() -> u64 {
    30
}
fn default_retention_days() -> u64 {
    7
}

/// A named Home Assistant profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Home Assistant base URL (e.g., "http://homeassistant.local:8123").
    pub url: String,

    /// Long-lived access token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,

    /// Entity id prefix, e.g. "sensor.androbd_".
    pub entity_prefix: Option<String>,

    /// Value for `attributes.source`.
    pub source_name: Option<String>,

    /// "realtime", "ssid_connected" or "ssid_in_range".
    pub mode: Option<String>,

    /// Network to publish from.
    pub target_ssid: Option<String>,

    /// Network the vehicle adapter lives on.
    pub source_ssid: Option<String>,

    #[serde(default)]
    pub auto_switch: bool,

    pub update_interval_seconds: Option<u64>,
    pub monitor_period_seconds: Option<u64>,
    pub switch_stabilize_seconds: Option<u64>,
    /// Bound for each NetworkManager query.
    pub network_timeout_seconds: Option<u64>,
    pub await_transmission_seconds: Option<u64>,

    /// Keys to publish; empty publishes everything.
    #[serde(default)]
    pub selected_keys: Vec<String>,

    /// Keys seen so far (maintained by `obdrelay run`).
    #[serde(default)]
    pub known_keys: Vec<String>,

    /// Ledger database; defaults to the platform data directory.
    pub ledger_path: Option<PathBuf>,
    pub ledger_retention_days: Option<u64>,

    pub failure_alert_threshold: Option<u32>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout.
    pub timeout: Option<u64>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "obdrelay", "obdrelay")
}

/// Resolve the config file path: `$OBDRELAY_CONFIG`, else XDG / platform
/// conventions.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    project_dirs().map_or_else(
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
    p.push("obdrelay");
    p
}

/// Default ledger database location for a profile.
pub fn default_ledger_path(profile_name: &str) -> PathBuf {
    let file = format!("ledger-{profile_name}.db");
    project_dirs().map_or_else(
        || dirs_fallback().join(&file),
        |dirs| dirs.data_dir().join(&file),
    )
}

/// The ledger path a profile uses.
pub fn ledger_path(profile: &Profile, profile_name: &str) -> PathBuf {
    profile
        .ledger_path
        .clone()
        .unwrap_or_else(|| default_ledger_path(profile_name))
}

// ── Loading & saving ────────────────────────────────────────────────

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from a specific file, overlaid with `OBDRELAY_*` variables
/// (`__` separates nesting, e.g. `OBDRELAY_DEFAULTS__MODE`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("OBDRELAY_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Token resolution ────────────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

/// Resolve the access token: `token_env` variable, then the system
/// keyring, then the plaintext `token` field.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store a token in the system keyring for `profile_name`.
pub fn store_token(profile_name: &str, token: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?
        .set_password(token)
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `RelayConfig` from a profile plus the shared defaults.
///
/// The token is resolved through [`resolve_token`]; a profile without
/// one is rejected here rather than failing every flush later.
pub fn profile_to_relay_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<RelayConfig, ConfigError> {
    url::Url::parse(&profile.url).map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {}", profile.url),
    })?;

    let token = resolve_token(profile, profile_name)?;

    let mode_str = profile.mode.clone().unwrap_or_else(|| defaults.mode.clone());
    let mode = mode_str
        .parse()
        .unwrap_or_else(|_| TransmissionMode::Unknown(mode_str.clone()));

    let update_interval = profile
        .update_interval_seconds
        .unwrap_or(defaults.update_interval_seconds);
    if update_interval == 0 {
        return Err(ConfigError::Validation {
            field: "update_interval_seconds".into(),
            reason: "must be at least 1".into(),
        });
    }
    let monitor_period = profile
        .monitor_period_seconds
        .unwrap_or(defaults.monitor_period_seconds);
    if monitor_period == 0 {
        return Err(ConfigError::Validation {
            field: "monitor_period_seconds".into(),
            reason: "must be at least 1".into(),
        });
    }

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let base = RelayConfig::default();
    let endpoint = EndpointConfig {
        base_url: profile.url.clone(),
        token,
        entity_prefix: profile
            .entity_prefix
            .clone()
            .unwrap_or_else(|| base.endpoint.entity_prefix.clone()),
        source_name: profile
            .source_name
            .clone()
            .unwrap_or_else(|| base.endpoint.source_name.clone()),
        tls,
        connect_timeout: base.endpoint.connect_timeout,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
    };

    Ok(RelayConfig {
        mode,
        target_ssid: profile.target_ssid.clone().unwrap_or_default(),
        source_ssid: profile.source_ssid.clone().unwrap_or_default(),
        auto_switch: profile.auto_switch,
        flush_interval: Duration::from_secs(update_interval),
        monitor_period: Duration::from_secs(monitor_period),
        switch_stabilize_delay: profile
            .switch_stabilize_seconds
            .map_or(base.switch_stabilize_delay, Duration::from_secs),
        await_transmission_timeout: profile
            .await_transmission_seconds
            .map_or(base.await_transmission_timeout, Duration::from_secs),
        network_timeout: profile
            .network_timeout_seconds
            .map_or(base.network_timeout, Duration::from_secs),
        selected_keys: profile.selected_keys.iter().cloned().collect(),
        known_keys: profile.known_keys.iter().cloned().collect(),
        endpoint,
        ledger_retention: Duration::from_secs(
            profile
                .ledger_retention_days
                .unwrap_or(defaults.ledger_retention_days)
                .saturating_mul(24 * 60 * 60),
        ),
        failure_alert_threshold: profile
            .failure_alert_threshold
            .unwrap_or(base.failure_alert_threshold),
    })
}
