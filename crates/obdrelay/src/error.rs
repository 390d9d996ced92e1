//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with actionable
//! help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use obdrelay_config::ConfigError;
use obdrelay_core::{CoreError, NetworkError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach Home Assistant at {url}")]
    #[diagnostic(
        code(obdrelay::connection_failed),
        help(
            "Check that Home Assistant is running and reachable from this device.\n\
             URL: {url}\n\
             Try: obdrelay probe --insecure"
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Home Assistant rejected the access token")]
    #[diagnostic(
        code(obdrelay::auth_failed),
        help(
            "Create a long-lived access token under your Home Assistant user profile.\n\
             Run: obdrelay config set-token --profile {profile}"
        )
    )]
    AuthFailed { profile: String },

    #[error("No access token configured for profile '{profile}'")]
    #[diagnostic(
        code(obdrelay::no_credentials),
        help(
            "Configure a token with: obdrelay config set-token\n\
             Or set the OBDRELAY_TOKEN environment variable."
        )
    )]
    NoCredentials { profile: String },

    // ── Publishing ───────────────────────────────────────────────────

    #[error("Publish failed: {message}")]
    #[diagnostic(code(obdrelay::publish))]
    Publish { message: String },

    // ── Network control ──────────────────────────────────────────────

    #[error("Network control failed: {message}")]
    #[diagnostic(
        code(obdrelay::network),
        help("Network switching uses NetworkManager; check that `nmcli` is installed and permitted.")
    )]
    Network { message: String },

    #[error("Not permitted to change the network association: {message}")]
    #[diagnostic(
        code(obdrelay::network_permission),
        help("Run as a user allowed to manage NetworkManager connections.")
    )]
    NetworkPermission { message: String },

    // ── Ledger ───────────────────────────────────────────────────────

    #[error("Ledger error: {message}")]
    #[diagnostic(code(obdrelay::ledger))]
    Ledger { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(obdrelay::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(obdrelay::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: obdrelay config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No configuration found")]
    #[diagnostic(
        code(obdrelay::no_config),
        help(
            "Create one with: obdrelay config init\n\
             Or pass --url and --token.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(obdrelay::config))]
    Config(Box<figment::Error>),

    #[error("Keyring error: {0}")]
    #[diagnostic(
        code(obdrelay::keyring),
        help("Use `token_env` or a plaintext `token` in the profile when no keyring is available.")
    )]
    Keyring(String),

    // ── Interactive ──────────────────────────────────────────────────

    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(obdrelay::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO / Internal ────────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(obdrelay::internal))]
    Internal(String),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::ProfileNotFound { .. } | Self::NoConfig { .. } => exit_code::NOT_FOUND,
            Self::NetworkPermission { .. } => exit_code::PERMISSION,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config { message } => CliError::Validation {
                field: "configuration".into(),
                reason: message,
            },

            CoreError::Publish {
                status: Some(401 | 403),
                ..
            } => CliError::AuthFailed {
                profile: "current".into(),
            },

            CoreError::Publish {
                message,
                status: None,
                transient: true,
            } => CliError::ConnectionFailed {
                url: "(configured endpoint)".into(),
                source: message.into(),
            },

            CoreError::Publish { message, .. } => CliError::Publish { message },

            CoreError::Ledger(e) => CliError::Ledger {
                message: e.to_string(),
            },

            CoreError::Network(NetworkError::PermissionDenied(message)) => {
                CliError::NetworkPermission { message }
            }

            CoreError::Network(e) => CliError::Network {
                message: e.to_string(),
            },

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
                name,
                available: "(see: obdrelay config profiles)".into(),
            },
            ConfigError::Keyring(message) => CliError::Keyring(message),
            ConfigError::Serialization(e) => CliError::Internal(e.to_string()),
            ConfigError::Figment(e) => CliError::Config(e),
            ConfigError::Io(e) => CliError::Io(e),
        }
    }
}
