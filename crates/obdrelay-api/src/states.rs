// Home Assistant states API client
//
// Wraps `reqwest::Client` with bearer-token auth and the
// `/api/states/{entity_id}` URL layout. One call per sample; callers
// decide whether to await or fire-and-forget.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Value of `attributes.source` unless the caller overrides it.
pub const DEFAULT_SOURCE_NAME: &str = "AndrOBD";

/// Request body for `POST /api/states/{entity_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub state: String,
    pub attributes: StateAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAttributes {
    pub friendly_name: String,
    pub source: String,
}

impl StateUpdate {
    /// Build the body for one sample: the raw key is the friendly name.
    pub fn for_sample(key: &str, value: &str, source: &str) -> Self {
        Self {
            state: value.to_owned(),
            attributes: StateAttributes {
                friendly_name: key.to_owned(),
                source: source.to_owned(),
            },
        }
    }
}

/// The entity as echoed back by Home Assistant.
///
/// Only the fields the relay logs are modelled; everything else is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct StateResponse {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// Response of `GET /api/`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiStatus {
    pub message: String,
}

/// HTTP client for the Home Assistant REST API.
#[derive(Debug, Clone)]
pub struct StatesClient {
    http: reqwest::Client,
    base_url: Url,
}

impl StatesClient {
    /// Create a client that authenticates every request with `token`.
    pub fn new(
        base_url: &str,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|e| Error::Tls(format!("invalid token header: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = transport.build_client_with_headers(headers)?;
        Self::from_reqwest(base_url, http)
    }

    /// Create a client around a pre-built `reqwest::Client`.
    ///
    /// The caller is responsible for the auth header; used by tests.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let trimmed = base_url.trim_end_matches('/');
        let base_url = Url::parse(&format!("{trimmed}/"))?;
        Ok(Self { http, base_url })
    }

    /// The Home Assistant base URL (always ends with `/`).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(&format!("api/{path}"))?)
    }

    /// Publish one state: `POST {base}/api/states/{entity_id}`.
    pub async fn post_state(
        &self,
        entity_id: &str,
        update: &StateUpdate,
    ) -> Result<StateResponse, Error> {
        let url = self.api_url(&format!("states/{entity_id}"))?;
        debug!(%entity_id, "POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(update)
            .send()
            .await
            .map_err(Error::Transport)?;

        self.handle_response(resp).await
    }

    /// Reachability and token check: `GET {base}/api/`.
    pub async fn check_api(&self) -> Result<ApiStatus, Error> {
        let url = self.api_url("")?;
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        self.handle_response(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized);
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        trace!(status = status.as_u16(), body_len = body.len(), "response");

        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}
