//! Config subcommand handlers.

use std::collections::BTreeSet;

use dialoguer::{Confirm, Input, MultiSelect, Select};

use obdrelay_core::TransmissionMode;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

const MODES: [&str; 3] = ["realtime", "ssid_connected", "ssid_in_range"];

// ── Helpers ─────────────────────────────────────────────────────────

/// Copy of `cfg` with every plaintext token masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.token.is_some() {
            profile.token = Some("****".into());
        }
    }
    cfg
}

fn format_config(cfg: &Config) -> String {
    toml::to_string_pretty(cfg).unwrap_or_else(|e| format!("# failed to render config: {e}"))
}

fn save_config(cfg: &Config) -> Result<(), CliError> {
    config::save_config(cfg)?;
    Ok(())
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Offer to store the token in the system keyring, or return it for the
/// plaintext config.
///
/// Returns `Some(token)` if the user chose plaintext, `None` if stored in
/// the keyring.
fn prompt_token_storage(profile_name: &str, token: &str) -> Result<Option<String>, CliError> {
    let choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let selection = Select::new()
        .with_prompt("Where to store the token?")
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        obdrelay_config::store_token(profile_name, token)?;
        eprintln!("   ✓ Token stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(token.to_owned()))
    }
}

fn prompt_text(prompt: &str, default: Option<&str>) -> Result<String, CliError> {
    let mut input = Input::<String>::new().with_prompt(prompt);
    if let Some(default) = default {
        input = input.default(default.to_owned());
    }
    input.interact_text().map_err(prompt_err)
}

fn profile_mut<'a>(cfg: &'a mut Config, name: &str) -> Result<&'a mut Profile, CliError> {
    let available = config::available_profiles(cfg);
    cfg.profiles
        .get_mut(name)
        .ok_or_else(|| CliError::ProfileNotFound {
            name: name.into(),
            available,
        })
}

/// Keys to publish from a `--keys` list; `""` alone means all keys.
fn keys_from_flag(keys: Vec<String>) -> Vec<String> {
    keys.into_iter()
        .map(|k| k.trim().to_owned())
        .filter(|k| !k.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(global),

        ConfigCommand::Show => {
            let cfg = redacted(&config::load_config_or_default());
            let out = output::render_single(&global.output, &cfg, format_config, |c| {
                c.profiles.keys().cloned().collect::<Vec<_>>().join("\n")
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::SetToken => {
            let cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            let token = match global.token {
                Some(ref token) => token.clone(),
                None => rpassword::prompt_password(format!("Access token for '{profile_name}': "))
                    .map_err(prompt_err)?,
            };
            if token.trim().is_empty() {
                return Err(CliError::Validation {
                    field: "token".into(),
                    reason: "token cannot be empty".into(),
                });
            }
            obdrelay_config::store_token(&profile_name, token.trim())?;
            if !cfg.profiles.contains_key(&profile_name) {
                tracing::warn!(profile = %profile_name, "token stored for a profile that is not configured yet");
            }
            eprintln!("✓ Token for profile '{profile_name}' stored in system keyring");
            Ok(())
        }

        ConfigCommand::Select { keys } => {
            let mut cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            let profile = profile_mut(&mut cfg, &profile_name)?;

            profile.selected_keys = match keys {
                Some(keys) => keys_from_flag(keys),
                None => pick_keys(profile)?,
            };

            let summary = if profile.selected_keys.is_empty() {
                "all keys".to_owned()
            } else {
                format!("{} key(s)", profile.selected_keys.len())
            };
            save_config(&cfg)?;
            eprintln!("✓ Profile '{profile_name}' publishes {summary}");
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: config::available_profiles(&cfg),
                    name,
                });
            }
            cfg.default_profile = Some(name.clone());
            save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: obdrelay config init");
            } else {
                for name in cfg.profiles.keys() {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }
    }
}

/// Interactive choice among the keys seen so far.
fn pick_keys(profile: &Profile) -> Result<Vec<String>, CliError> {
    let candidates: Vec<String> = profile
        .known_keys
        .iter()
        .chain(&profile.selected_keys)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if candidates.is_empty() {
        return Err(CliError::Validation {
            field: "keys".into(),
            reason: "no keys known yet; run `obdrelay run` first or pass --keys".into(),
        });
    }

    let checked: Vec<bool> = candidates
        .iter()
        .map(|k| profile.selected_keys.contains(k))
        .collect();
    let picked = MultiSelect::new()
        .with_prompt("Keys to publish (none selected = all)")
        .items(&candidates)
        .defaults(&checked)
        .interact()
        .map_err(prompt_err)?;

    Ok(picked
        .into_iter()
        .filter_map(|i| candidates.get(i).cloned())
        .collect())
}

// ── Init: interactive wizard ────────────────────────────────────────

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    let config_path = config::config_path();
    eprintln!("obdrelay configuration wizard");
    eprintln!("   Config path: {}\n", config_path.display());

    let mut cfg = config::load_config_or_default();

    // 1. Profile name
    let default_name = global.profile.clone().unwrap_or_else(|| "default".into());
    let profile_name = prompt_text("Profile name", Some(&default_name))?;
    let mut profile = cfg.profiles.get(&profile_name).cloned().unwrap_or_default();

    // 2. Home Assistant URL
    let current_url = if profile.url.is_empty() {
        "http://homeassistant.local:8123".to_owned()
    } else {
        profile.url.clone()
    };
    let url = prompt_text("Home Assistant URL", Some(&current_url))?;
    url::Url::parse(&url).map_err(|e| CliError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {e}"),
    })?;
    profile.url = url;

    // 3. Token
    let token = rpassword::prompt_password("Long-lived access token (empty keeps current): ")
        .map_err(prompt_err)?;
    if !token.trim().is_empty() {
        profile.token = prompt_token_storage(&profile_name, token.trim())?;
    }

    // 4. Transmission mode
    let current_mode = profile
        .mode
        .as_deref()
        .and_then(|m| MODES.iter().position(|candidate| *candidate == m))
        .unwrap_or(0);
    let mode_idx = Select::new()
        .with_prompt("Transmission mode")
        .items(&[
            "realtime: send whenever any network is up",
            "ssid_connected: send only on the target WiFi",
            "ssid_in_range: also switch to the target WiFi when it is visible",
        ])
        .default(current_mode)
        .interact()
        .map_err(prompt_err)?;
    let mode: TransmissionMode = MODES
        .get(mode_idx)
        .copied()
        .unwrap_or("realtime")
        .parse()
        .unwrap_or_default();
    profile.mode = Some(mode.to_string());

    // 5. Networks
    if mode.requires_target() {
        let target = prompt_text(
            "Target WiFi (publishing network)",
            profile.target_ssid.as_deref(),
        )?;
        profile.target_ssid = Some(target);
    }
    if mode == TransmissionMode::SsidInRange {
        profile.auto_switch = Confirm::new()
            .with_prompt("Switch networks automatically?")
            .default(profile.auto_switch)
            .interact()
            .map_err(prompt_err)?;
        if profile.auto_switch {
            let source = prompt_text(
                "Source WiFi (OBD adapter network)",
                profile.source_ssid.as_deref(),
            )?;
            profile.source_ssid = Some(source);
        }
    }

    // 6. Write config
    cfg.profiles.insert(profile_name.clone(), profile);
    if cfg.profiles.len() == 1 || cfg.default_profile.is_none() {
        cfg.default_profile = Some(profile_name.clone());
    }
    save_config(&cfg)?;

    eprintln!("\n✓ Configuration written to {}", config_path.display());
    eprintln!("  Profile: {profile_name}");
    eprintln!("\n  Test it: obdrelay probe --profile {profile_name}");
    Ok(())
}
