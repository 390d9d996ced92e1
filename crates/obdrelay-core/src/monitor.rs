// ── Network monitor ──
//
// Builds a complete `ConnectivityFacts` snapshot per check. Read
// failures degrade the affected facts to `false` for this check and are
// logged; they never abort the relay.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{RelayConfig, TransmissionMode, normalize_ssid};
use crate::model::ConnectivityFacts;
use crate::network::{NetworkControl, bounded};

pub struct NetworkMonitor<N> {
    network: Arc<N>,
}

impl<N: NetworkControl> NetworkMonitor<N> {
    pub fn new(network: Arc<N>) -> Self {
        Self { network }
    }

    /// Recompute every fact for the given configuration.
    ///
    /// Scans only happen in `ssid_in_range` mode; the source network is
    /// only looked for when auto-switching is enabled. Each read is bounded
    /// by `config.network_timeout`.
    pub async fn check(&self, config: &RelayConfig) -> ConnectivityFacts {
        let target = normalize_ssid(&config.target_ssid);
        let source = normalize_ssid(&config.source_ssid);
        let limit = config.network_timeout;

        let current = bounded(limit, "current network read", self.network.current_ssid()).await;
        let current = match current {
            Ok(ssid) => ssid.map(|s| normalize_ssid(&s)),
            Err(e) => {
                warn!(error = %e, "failed to read current network");
                None
            }
        };

        let has_internet = bounded(limit, "connectivity read", self.network.has_internet())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to read connectivity");
                false
            });

        let mut facts = ConnectivityFacts {
            connected_to_target: matches_ssid(current.as_deref(), &target),
            connected_to_source: matches_ssid(current.as_deref(), &source),
            has_internet,
            ..ConnectivityFacts::default()
        };

        if config.mode == TransmissionMode::SsidInRange {
            match bounded(limit, "network scan", self.network.scan()).await {
                Ok(visible) => {
                    let visible: Vec<String> = visible.iter().map(|s| normalize_ssid(s)).collect();
                    facts.target_in_range = in_range(&visible, &target);
                    if config.auto_switch {
                        facts.source_in_range = in_range(&visible, &source);
                    }
                }
                Err(e) => warn!(error = %e, "network scan failed"),
            }
        }

        debug!(?facts, current = ?current, "connectivity checked");
        facts
    }
}

fn matches_ssid(current: Option<&str>, wanted: &str) -> bool {
    !wanted.is_empty() && current == Some(wanted)
}

fn in_range(visible: &[String], wanted: &str) -> bool {
    !wanted.is_empty() && visible.iter().any(|s| s == wanted)
}
