// ── Core error types ──
//
// User-facing errors from obdrelay-core. Transport details from the
// HTTP client are folded into `Publish` / `Config`; network
// collaborator failures keep their own enum so the switch controller
// can log what went wrong.

use std::time::Duration;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Publish errors ───────────────────────────────────────────────
    #[error("Publish failed: {message}")]
    Publish {
        message: String,
        /// HTTP status code (if the sink answered).
        status: Option<u16>,
        /// Worth retrying on a later flush.
        transient: bool,
    },

    // ── Storage errors ───────────────────────────────────────────────
    #[error("Ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),

    // ── Network collaborator errors ──────────────────────────────────
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures reported by a [`NetworkControl`](crate::NetworkControl)
/// implementation or by the switch procedure built on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("network '{ssid}' is not a configured network")]
    NotFound { ssid: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to enable network '{ssid}': {reason}")]
    EnableFailed { ssid: String, reason: String },

    #[error("failed to reconnect: {0}")]
    ReconnectFailed(String),

    #[error("network command failed: {0}")]
    Command(String),

    #[error("network control unavailable: {0}")]
    Unavailable(String),

    #[error("no {role} network configured")]
    NotConfigured { role: &'static str },

    #[error("{operation} did not finish within {after:?}")]
    TimedOut {
        operation: &'static str,
        after: Duration,
    },

    #[error("network request aborted: {0}")]
    Aborted(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<obdrelay_api::Error> for CoreError {
    fn from(err: obdrelay_api::Error) -> Self {
        let status = err.status();
        let transient = err.is_transient();
        match err {
            obdrelay_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid Home Assistant URL: {e}"),
            },
            obdrelay_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS setup failed: {msg}"),
            },
            obdrelay_api::Error::Unauthorized => CoreError::Publish {
                message: "access token rejected".into(),
                status,
                transient,
            },
            other => CoreError::Publish {
                message: other.to_string(),
                status,
                transient,
            },
        }
    }
}
