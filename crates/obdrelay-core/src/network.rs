// ── Network collaborator ──
//
// The relay never talks to the OS directly. Everything it needs to know
// or change about the active network association goes through
// `NetworkControl`; the binary supplies an nmcli-backed implementation
// and the tests supply an in-memory one.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::normalize_ssid;
use crate::error::NetworkError;

/// A network profile the device already has credentials for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownNetwork {
    /// Platform identifier (connection UUID, profile name, ...).
    pub id: String,
    pub ssid: String,
}

/// Read and change the device's network association.
pub trait NetworkControl: Send + Sync + 'static {
    /// SSID of the active wireless association, if any.
    fn current_ssid(&self) -> impl Future<Output = Result<Option<String>, NetworkError>> + Send;

    /// Whether an active, available connection exists.
    fn has_internet(&self) -> impl Future<Output = Result<bool, NetworkError>> + Send;

    /// Trigger a scan and return the SSIDs currently visible.
    fn scan(&self) -> impl Future<Output = Result<Vec<String>, NetworkError>> + Send;

    /// Configured network profiles.
    fn known_networks(&self) -> impl Future<Output = Result<Vec<KnownNetwork>, NetworkError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), NetworkError>> + Send;

    /// Make `network` the preferred association.
    fn enable(&self, network: &KnownNetwork) -> impl Future<Output = Result<(), NetworkError>> + Send;

    fn reconnect(&self) -> impl Future<Output = Result<(), NetworkError>> + Send;
}

/// Run one collaborator call, failing with `TimedOut` after `limit`.
pub(crate) async fn bounded<T>(
    limit: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T, NetworkError>>,
) -> Result<T, NetworkError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(NetworkError::TimedOut {
            operation,
            after: limit,
        }))
}

/// Associate with `ssid`: look it up among the known networks, drop the
/// current association, enable the new one and reconnect.
///
/// Returns once the request has been issued. Whether the association
/// actually came up is for the caller to check after a settling delay.
pub async fn perform_switch<N: NetworkControl>(
    network: &N,
    ssid: &str,
) -> Result<(), NetworkError> {
    let wanted = normalize_ssid(ssid);
    if wanted.is_empty() {
        return Err(NetworkError::NotFound { ssid: wanted });
    }

    let known = network.known_networks().await?;
    let Some(target) = known
        .into_iter()
        .find(|n| normalize_ssid(&n.ssid) == wanted)
    else {
        return Err(NetworkError::NotFound { ssid: wanted });
    };
    debug!(ssid = %wanted, id = %target.id, "switching network");

    network.disconnect().await?;
    network.enable(&target).await?;
    network.reconnect().await?;

    info!(ssid = %wanted, "network switch requested");
    Ok(())
}
