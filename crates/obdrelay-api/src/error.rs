use thiserror::Error;

/// Top-level error type for the `obdrelay-api` crate.
///
/// `obdrelay-core` maps these into its own publish/configuration errors;
/// nothing here is retried automatically.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Remote ──────────────────────────────────────────────────────
    /// The server answered with a non-success status.
    #[error("Home Assistant returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Token rejected (HTTP 401).
    #[error("Access token rejected by Home Assistant")]
    Unauthorized,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns `true` if the token was rejected.
    pub fn is_auth_error(&self) -> bool {
        match self {
            Self::Unauthorized => true,
            Self::Status { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }

    /// HTTP status code, when the failure came from a server response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Unauthorized => Some(401),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
