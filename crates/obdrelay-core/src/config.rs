// ── Runtime relay configuration ──
//
// These types describe *how* the relay behaves and where it publishes.
// They never touch disk: `obdrelay-config` builds a `RelayConfig` from
// TOML profiles and hands it in, and pushes later edits through
// `Relay::update_config`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::CoreError;
use crate::filter::KeySelection;

/// When buffered samples may leave the device.
#[derive(Debug, Clone, PartialEq, Eq, Default, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TransmissionMode {
    /// Send whenever any network connection is up.
    #[default]
    Realtime,
    /// Send only while associated with the target network.
    SsidConnected,
    /// Like `SsidConnected`, but also scan for the target so the switch
    /// controller can move over to it.
    SsidInRange,
    /// Unrecognised setting value. Gated like `Realtime`.
    #[strum(default)]
    Unknown(String),
}

impl TransmissionMode {
    /// The setting string for this mode.
    pub fn as_setting(&self) -> &str {
        match self {
            Self::Realtime => "realtime",
            Self::SsidConnected => "ssid_connected",
            Self::SsidInRange => "ssid_in_range",
            Self::Unknown(raw) => raw,
        }
    }

    /// Whether this mode needs a target network to be configured.
    pub fn requires_target(&self) -> bool {
        matches!(self, Self::SsidConnected | Self::SsidInRange)
    }
}

impl fmt::Display for TransmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_setting())
    }
}

/// TLS verification strategy for the Home Assistant endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed installs).
    DangerAcceptInvalid,
}

/// Where and how samples are published.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Home Assistant base URL, e.g. `http://homeassistant.local:8123`.
    pub base_url: String,
    /// Long-lived access token.
    pub token: SecretString,
    /// Prepended to every sanitized key.
    pub entity_prefix: String,
    /// Value of `attributes.source`.
    pub source_name: String,
    pub tls: TlsVerification,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: SecretString::from(String::new()),
            entity_prefix: obdrelay_api::DEFAULT_ENTITY_PREFIX.into(),
            source_name: obdrelay_api::DEFAULT_SOURCE_NAME.into(),
            tls: TlsVerification::default(),
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }
}

impl EndpointConfig {
    /// `true` when both a URL and a token are present.
    pub fn is_complete(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.token.expose_secret().is_empty()
    }
}

/// Full relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub mode: TransmissionMode,
    /// Network used for publishing.
    pub target_ssid: String,
    /// Network used for data collection, switched back to afterwards.
    pub source_ssid: String,
    pub auto_switch: bool,
    /// Debounce window between the first buffered sample and the flush.
    pub flush_interval: Duration,
    pub monitor_period: Duration,
    /// Also bounds how long a switch request may take to issue.
    pub switch_stabilize_delay: Duration,
    pub await_transmission_timeout: Duration,
    /// Upper bound for each connectivity read (current network, internet
    /// state, scan). A read that takes longer counts as failed.
    pub network_timeout: Duration,
    /// Empty means every key is published.
    pub selected_keys: BTreeSet<String>,
    pub known_keys: BTreeSet<String>,
    pub endpoint: EndpointConfig,
    /// Sent ledger records older than this are purged.
    pub ledger_retention: Duration,
    /// Consecutive configuration or switch failures before they are
    /// reported at error level.
    pub failure_alert_threshold: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mode: TransmissionMode::default(),
            target_ssid: String::new(),
            source_ssid: String::new(),
            auto_switch: false,
            flush_interval: Duration::from_secs(5),
            monitor_period: Duration::from_secs(30),
            switch_stabilize_delay: Duration::from_secs(5),
            await_transmission_timeout: Duration::from_secs(10),
            network_timeout: Duration::from_secs(10),
            selected_keys: BTreeSet::new(),
            known_keys: BTreeSet::new(),
            endpoint: EndpointConfig::default(),
            ledger_retention: Duration::from_secs(7 * 24 * 60 * 60),
            failure_alert_threshold: 3,
        }
    }
}

impl RelayConfig {
    /// Selection filter derived from `selected_keys`.
    pub fn selection(&self) -> KeySelection {
        KeySelection::new(self.selected_keys.iter().cloned())
    }

    /// Check that everything a flush needs is configured.
    pub fn check_ready(&self) -> Result<(), CoreError> {
        if self.endpoint.base_url.trim().is_empty() {
            return Err(CoreError::Config {
                message: "Home Assistant URL not configured".into(),
            });
        }
        if self.endpoint.token.expose_secret().is_empty() {
            return Err(CoreError::Config {
                message: "Home Assistant token not configured".into(),
            });
        }
        if self.mode.requires_target() && normalize_ssid(&self.target_ssid).is_empty() {
            return Err(CoreError::Config {
                message: format!("target SSID not configured for {} mode", self.mode),
            });
        }
        Ok(())
    }
}

/// Strip the double quotes some platforms wrap SSIDs in.
pub fn normalize_ssid(ssid: &str) -> String {
    ssid.replace('"', "")
}
