//! CLI configuration: thin wrapper around `obdrelay_config`.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--url, --token, --insecure, --timeout, --ledger).

use std::path::PathBuf;

use secrecy::SecretString;

use obdrelay_core::RelayConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use obdrelay_config::{
    Config, Profile, config_path, load_config_or_default, save_config,
};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.active_profile_name(global.profile.as_deref())
}

/// Everything `run` needs, resolved from the config file and flags.
#[derive(Debug)]
pub struct Resolved {
    pub profile_name: String,
    pub relay: RelayConfig,
    pub ledger_path: PathBuf,
    /// `true` if the profile exists in the config file.
    pub persisted: bool,
}

/// Build a `RelayConfig` from the active profile with flag overrides.
///
/// Without a profile, `--url` and `--token` alone are enough.
pub fn resolve(global: &GlobalOpts, config: &Config) -> Result<Resolved, CliError> {
    let profile_name = active_profile_name(global, config);

    let (mut profile, persisted) = match config.profiles.get(&profile_name) {
        Some(profile) => (profile.clone(), true),
        None if global.url.is_some() => (Profile::default(), false),
        None if global.profile.is_some() => {
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: available_profiles(config),
            });
        }
        None => {
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        }
    };

    if let Some(ref url) = global.url {
        profile.url.clone_from(url);
    }
    if let Some(ref token) = global.token {
        profile.token = Some(token.clone());
        profile.token_env = None;
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }

    let mut relay =
        obdrelay_config::profile_to_relay_config(&profile, &profile_name, &config.defaults)?;

    // The keyring wins over a plaintext token in the profile; the flag
    // must win over both.
    if let Some(ref token) = global.token {
        relay.endpoint.token = SecretString::from(token.clone());
    }

    Ok(Resolved {
        ledger_path: resolve_ledger_path(global, config, &profile_name),
        profile_name,
        relay,
        persisted,
    })
}

/// Ledger location: `--ledger`, else the profile's `ledger_path`, else the
/// per-profile default under the data directory.
pub fn resolve_ledger_path(global: &GlobalOpts, config: &Config, profile_name: &str) -> PathBuf {
    if let Some(ref path) = global.ledger {
        return path.clone();
    }
    config.profiles.get(profile_name).map_or_else(
        || obdrelay_config::default_ledger_path(profile_name),
        |profile| obdrelay_config::ledger_path(profile, profile_name),
    )
}

/// Comma-separated profile names for error help text.
pub fn available_profiles(config: &Config) -> String {
    if config.profiles.is_empty() {
        "(none)".into()
    } else {
        config.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}
