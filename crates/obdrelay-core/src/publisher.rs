// ── Publisher ──
//
// The sink the relay hands drained samples to. `HomeAssistantPublisher`
// is the production implementation on top of `obdrelay_api`; tests plug
// in recording fakes.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, info};

use obdrelay_api::transport::{TlsMode, TransportConfig};
use obdrelay_api::{StateUpdate, StatesClient, entity_id};

use crate::config::{EndpointConfig, TlsVerification};
use crate::error::CoreError;
use crate::model::Sample;

/// Destination for drained samples. One call per sample.
pub trait Publisher: Send + Sync + 'static {
    fn publish(&self, sample: &Sample) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// Apply a new endpoint configuration. Called from the relay loop on
    /// every configuration change.
    fn reconfigure(&self, _endpoint: &EndpointConfig) -> Result<(), CoreError> {
        Ok(())
    }
}

struct Target {
    client: StatesClient,
    entity_prefix: String,
    source_name: String,
}

/// Publishes each sample as a Home Assistant sensor state.
///
/// The HTTP client is rebuilt whenever the endpoint changes; in-flight
/// requests keep the client they started with.
pub struct HomeAssistantPublisher {
    target: ArcSwapOption<Target>,
}

impl HomeAssistantPublisher {
    /// Build a publisher. An incomplete endpoint yields a publisher that
    /// rejects every sample until reconfigured.
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, CoreError> {
        let publisher = Self {
            target: ArcSwapOption::empty(),
        };
        publisher.reconfigure(endpoint)?;
        Ok(publisher)
    }

    /// Wrap an existing client. Used by tests and by `probe`.
    pub fn from_client(client: StatesClient, entity_prefix: &str, source_name: &str) -> Self {
        Self {
            target: ArcSwapOption::from_pointee(Target {
                client,
                entity_prefix: entity_prefix.to_owned(),
                source_name: source_name.to_owned(),
            }),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.target.load().is_some()
    }
}

impl Publisher for HomeAssistantPublisher {
    async fn publish(&self, sample: &Sample) -> Result<(), CoreError> {
        let Some(target) = self.target.load_full() else {
            return Err(CoreError::Config {
                message: "Home Assistant endpoint not configured".into(),
            });
        };

        let id = entity_id(&target.entity_prefix, &sample.key);
        let update = StateUpdate::for_sample(&sample.key, &sample.value, &target.source_name);
        let resp = target.client.post_state(&id, &update).await?;
        debug!(entity_id = %resp.entity_id, state = %resp.state, "state accepted");
        Ok(())
    }

    fn reconfigure(&self, endpoint: &EndpointConfig) -> Result<(), CoreError> {
        if !endpoint.is_complete() {
            self.target.store(None);
            return Ok(());
        }

        let client = StatesClient::new(
            &endpoint.base_url,
            &endpoint.token,
            &build_transport(endpoint),
        )?;
        info!(url = %client.base_url(), "publisher configured");
        self.target.store(Some(Arc::new(Target {
            client,
            entity_prefix: endpoint.entity_prefix.clone(),
            source_name: endpoint.source_name.clone(),
        })));
        Ok(())
    }
}

/// Build a [`TransportConfig`] from the endpoint configuration.
pub fn build_transport(endpoint: &EndpointConfig) -> TransportConfig {
    TransportConfig {
        tls: tls_to_transport(&endpoint.tls),
        connect_timeout: endpoint.connect_timeout,
        timeout: endpoint.timeout,
    }
}

fn tls_to_transport(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    }
}
