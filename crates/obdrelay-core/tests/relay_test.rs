// Event-loop tests for `Relay` with in-memory network and publisher fakes.
//
// All tests run on a paused clock: sleeping in the test auto-advances
// time to the next pending timer, so flush/monitor/switch timelines are
// deterministic.
#![allow(clippy::unwrap_used)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use tokio::time::{Instant, sleep};

use obdrelay_core::{
    CoreError, KnownNetwork, Ledger, NetworkControl, NetworkError, Publisher, Relay, RelayConfig,
    Sample, SwitchState, TransmissionMode,
};

// ── Fakes ───────────────────────────────────────────────────────────

#[derive(Default)]
struct NetState {
    current: Option<String>,
    internet: bool,
    visible: Vec<String>,
    known: Vec<KnownNetwork>,
    log: Vec<String>,
}

/// How the next switch steps misbehave.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Fault {
    #[default]
    None,
    DisconnectDenied,
    EnableFails,
    ReconnectFails,
    EnablePanics,
    EnableHangs,
}

#[derive(Default)]
struct FakeNetwork {
    state: Mutex<NetState>,
    fault: Mutex<Fault>,
    enable_delay: Option<Duration>,
}

impl FakeNetwork {
    fn online() -> Self {
        let net = Self::default();
        net.state.lock().unwrap().internet = true;
        net
    }

    fn set_internet(&self, up: bool) {
        self.state.lock().unwrap().internet = up;
    }

    fn current(&self) -> Option<String> {
        self.state.lock().unwrap().current.clone()
    }

    fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    fn calls(&self, name: &str) -> usize {
        self.log().iter().filter(|l| l.starts_with(name)).count()
    }

    fn set_fault(&self, fault: Fault) {
        *self.fault.lock().unwrap() = fault;
    }

    fn fault(&self) -> Fault {
        *self.fault.lock().unwrap()
    }
}

impl NetworkControl for FakeNetwork {
    async fn current_ssid(&self) -> Result<Option<String>, NetworkError> {
        Ok(self.current())
    }

    async fn has_internet(&self) -> Result<bool, NetworkError> {
        Ok(self.state.lock().unwrap().internet)
    }

    async fn scan(&self) -> Result<Vec<String>, NetworkError> {
        Ok(self.state.lock().unwrap().visible.clone())
    }

    async fn known_networks(&self) -> Result<Vec<KnownNetwork>, NetworkError> {
        let mut state = self.state.lock().unwrap();
        state.log.push("known".into());
        Ok(state.known.clone())
    }

    async fn disconnect(&self) -> Result<(), NetworkError> {
        let mut state = self.state.lock().unwrap();
        state.log.push("disconnect".into());
        if self.fault() == Fault::DisconnectDenied {
            return Err(NetworkError::PermissionDenied("not authorized".into()));
        }
        state.current = None;
        Ok(())
    }

    async fn enable(&self, network: &KnownNetwork) -> Result<(), NetworkError> {
        self.state
            .lock()
            .unwrap()
            .log
            .push(format!("enable {}", network.ssid));
        match self.fault() {
            Fault::EnableFails => {
                return Err(NetworkError::EnableFailed {
                    ssid: network.ssid.clone(),
                    reason: "profile disabled".into(),
                });
            }
            Fault::EnablePanics => panic!("wifi driver crashed"),
            Fault::EnableHangs => std::future::pending::<()>().await,
            _ => {}
        }
        if let Some(delay) = self.enable_delay {
            sleep(delay).await;
        }
        self.state.lock().unwrap().current = Some(network.ssid.clone());
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), NetworkError> {
        let mut state = self.state.lock().unwrap();
        state.log.push("reconnect".into());
        if self.fault() == Fault::ReconnectFails {
            state.current = None;
            return Err(NetworkError::ReconnectFailed("activation timed out".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakePublisher {
    sent: Mutex<Vec<(Instant, Sample)>>,
    fail: AtomicBool,
}

impl FakePublisher {
    fn failing() -> Self {
        let p = Self::default();
        p.fail.store(true, Ordering::SeqCst);
        p
    }

    fn sent(&self) -> Vec<Sample> {
        self.sent.lock().unwrap().iter().map(|(_, s)| s.clone()).collect()
    }

    fn sent_at(&self) -> Vec<Instant> {
        self.sent.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }
}

impl Publisher for FakePublisher {
    async fn publish(&self, sample: &Sample) -> Result<(), CoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::Publish {
                message: "sink unavailable".into(),
                status: Some(503),
                transient: true,
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((Instant::now(), sample.clone()));
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn ready_config(mode: TransmissionMode) -> RelayConfig {
    let mut cfg = RelayConfig {
        mode,
        ..RelayConfig::default()
    };
    cfg.endpoint.base_url = "http://homeassistant.local:8123".into();
    cfg.endpoint.token = SecretString::from("token".to_string());
    cfg
}

fn switching_config() -> RelayConfig {
    RelayConfig {
        target_ssid: "HomeNet".into(),
        source_ssid: "\"OBDII\"".into(),
        auto_switch: true,
        ..ready_config(TransmissionMode::SsidInRange)
    }
}

fn known(ssid: &str) -> KnownNetwork {
    KnownNetwork {
        id: format!("id-{ssid}"),
        ssid: ssid.into(),
    }
}

/// On the source network with the target visible and both known.
fn parked_on_source() -> FakeNetwork {
    let net = FakeNetwork::online();
    {
        let mut state = net.state.lock().unwrap();
        state.current = Some("OBDII".into());
        state.visible = vec!["HomeNet".into(), "OBDII".into()];
        state.known = vec![known("HomeNet"), known("OBDII")];
    }
    net
}

async fn start(
    config: RelayConfig,
    publisher: FakePublisher,
    network: FakeNetwork,
    ledger: Option<Arc<Ledger>>,
) -> (
    Relay<FakePublisher, FakeNetwork>,
    Arc<FakePublisher>,
    Arc<FakeNetwork>,
) {
    let publisher = Arc::new(publisher);
    let network = Arc::new(network);
    let relay = Relay::new(config, Arc::clone(&publisher), Arc::clone(&network), ledger).unwrap();
    relay.start().await.unwrap();
    // Let the loop run its initial connectivity check.
    sleep(Duration::from_millis(1)).await;
    (relay, publisher, network)
}

// ── Flushing ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn realtime_two_samples_two_publishes() {
    let (relay, publisher, _net) = start(
        ready_config(TransmissionMode::Realtime),
        FakePublisher::default(),
        FakeNetwork::online(),
        None,
    )
    .await;

    assert!(relay.submit_sample("rpm", "3000"));
    assert!(relay.submit_sample("speed", "80"));
    sleep(Duration::from_secs(6)).await;

    let mut sent = publisher.sent();
    sent.sort_by(|a, b| a.key.cmp(&b.key));
    assert_eq!(
        sent,
        vec![Sample::new("rpm", "3000"), Sample::new("speed", "80")]
    );
    assert_eq!(relay.buffered(), 0);

    let known = relay.known_keys().borrow().clone();
    assert!(known.contains("rpm") && known.contains("speed"));
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn burst_is_debounced_into_one_flush() {
    let (relay, publisher, _net) = start(
        ready_config(TransmissionMode::Realtime),
        FakePublisher::default(),
        FakeNetwork::online(),
        None,
    )
    .await;

    for i in 0..10 {
        relay.submit_sample(["rpm", "speed", "load"][i % 3], &i.to_string());
        sleep(Duration::from_millis(100)).await;
    }
    assert!(publisher.sent().is_empty());
    sleep(Duration::from_secs(5)).await;

    let sent = publisher.sent();
    assert_eq!(sent.len(), 3);
    let rpm = sent.iter().find(|s| s.key == "rpm").unwrap();
    assert_eq!(rpm.value, "9");

    let times = publisher.sent_at();
    assert!(times.windows(2).all(|w| w[0] == w[1]));

    sleep(Duration::from_secs(20)).await;
    assert_eq!(publisher.sent().len(), 3);
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn gated_out_samples_are_retained_and_retried() {
    let net = FakeNetwork::default();
    let (relay, publisher, net) = start(
        ready_config(TransmissionMode::Realtime),
        FakePublisher::default(),
        net,
        None,
    )
    .await;

    relay.submit_sample("rpm", "1000");
    sleep(Duration::from_secs(6)).await;
    assert!(publisher.sent().is_empty());
    assert_eq!(relay.buffered(), 1);

    // Connectivity returns; the next monitor tick opens the gate and the
    // re-armed flush delivers.
    net.set_internet(true);
    sleep(Duration::from_secs(31)).await;
    assert_eq!(publisher.sent(), vec![Sample::new("rpm", "1000")]);
    assert_eq!(relay.buffered(), 0);
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ssid_connected_requires_target_association() {
    let net = FakeNetwork::online();
    net.state.lock().unwrap().current = Some("CoffeeShop".into());
    let cfg = RelayConfig {
        target_ssid: "HomeNet".into(),
        ..ready_config(TransmissionMode::SsidConnected)
    };
    let (relay, publisher, _net) = start(cfg, FakePublisher::default(), net, None).await;

    relay.submit_sample("rpm", "1000");
    sleep(Duration::from_secs(20)).await;
    assert!(publisher.sent().is_empty());
    assert_eq!(relay.buffered(), 1);
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn missing_endpoint_skips_flush_until_configured() {
    let (relay, publisher, _net) = start(
        RelayConfig::default(),
        FakePublisher::default(),
        FakeNetwork::online(),
        None,
    )
    .await;

    relay.submit_sample("rpm", "1000");
    sleep(Duration::from_secs(6)).await;
    assert!(publisher.sent().is_empty());
    assert_eq!(relay.buffered(), 1);

    relay
        .update_config(ready_config(TransmissionMode::Realtime))
        .await
        .unwrap();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(publisher.sent().len(), 1);
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn flush_now_skips_the_debounce() {
    let (relay, publisher, _net) = start(
        ready_config(TransmissionMode::Realtime),
        FakePublisher::default(),
        FakeNetwork::online(),
        None,
    )
    .await;

    relay.submit_sample("rpm", "1000");
    relay.flush_now().await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(publisher.sent().len(), 1);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(publisher.sent().len(), 1);
    relay.shutdown().await;
}

// ── Ingestion ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn selection_filter_drops_unselected_keys() {
    let cfg = RelayConfig {
        selected_keys: BTreeSet::from(["rpm".to_string()]),
        ..ready_config(TransmissionMode::Realtime)
    };
    let (relay, publisher, _net) =
        start(cfg, FakePublisher::default(), FakeNetwork::online(), None).await;

    assert!(relay.submit_sample("rpm", "1000"));
    assert!(!relay.submit_sample("speed", "80"));
    assert!(!relay.submit_sample("", "1"));
    assert!(!relay.submit_sample("rpm", ""));
    sleep(Duration::from_secs(6)).await;

    assert_eq!(publisher.sent(), vec![Sample::new("rpm", "1000")]);

    let mut cfg = ready_config(TransmissionMode::Realtime);
    cfg.selected_keys = BTreeSet::from(["speed".to_string()]);
    relay.update_config(cfg).await.unwrap();
    assert!(!relay.submit_sample("rpm", "1"));
    assert!(relay.submit_sample("speed", "1"));
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn catalog_update_resets_buffer_and_records_keys() {
    let cfg = RelayConfig {
        known_keys: BTreeSet::from(["COOLANT".to_string()]),
        ..ready_config(TransmissionMode::Realtime)
    };
    let (relay, publisher, _net) =
        start(cfg, FakePublisher::default(), FakeNetwork::online(), None).await;

    relay.submit_sample("rpm", "1000");
    let count = relay
        .catalog_update_csv("SPEED;Vehicle speed;0;km/h\nLOAD;Engine load;0;%\n")
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(relay.buffered(), 0);

    sleep(Duration::from_secs(6)).await;
    assert!(publisher.sent().is_empty());

    let known: Vec<String> = relay.known_keys().borrow().iter().cloned().collect();
    assert_eq!(known, vec!["COOLANT", "LOAD", "SPEED"]);
    relay.shutdown().await;
}

// ── Ledger ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn ledger_marks_confirmed_publishes_sent() {
    let ledger = Arc::new(Ledger::open_in_memory().unwrap());
    let (relay, _publisher, _net) = start(
        ready_config(TransmissionMode::Realtime),
        FakePublisher::default(),
        FakeNetwork::online(),
        Some(Arc::clone(&ledger)),
    )
    .await;

    relay.submit_sample("rpm", "1000");
    relay.submit_sample("speed", "80");
    sleep(Duration::from_secs(6)).await;

    assert_eq!(ledger.count().unwrap(), 2);
    assert_eq!(ledger.unsent_count().unwrap(), 0);
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_publishes_stay_unsent_and_are_not_rebuffered() {
    let ledger = Arc::new(Ledger::open_in_memory().unwrap());
    let (relay, publisher, _net) = start(
        ready_config(TransmissionMode::Realtime),
        FakePublisher::failing(),
        FakeNetwork::online(),
        Some(Arc::clone(&ledger)),
    )
    .await;

    relay.submit_sample("rpm", "1000");
    sleep(Duration::from_secs(6)).await;

    assert!(publisher.sent().is_empty());
    assert_eq!(relay.buffered(), 0);
    let unsent = ledger.unsent().unwrap();
    assert_eq!(unsent.len(), 1);
    assert_eq!(unsent[0].key, "rpm");
    relay.shutdown().await;
}

// ── Network switching ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn switches_to_target_transmits_and_returns() {
    let (relay, publisher, net) = start(
        switching_config(),
        FakePublisher::default(),
        parked_on_source(),
        None,
    )
    .await;

    relay.submit_sample("rpm", "1000");

    // Monitor tick at 30s starts the switch; 5s to settle, then transmit.
    sleep(Duration::from_secs(40)).await;
    assert_eq!(*relay.switch_state().borrow(), SwitchState::AwaitingTransmission);
    assert_eq!(net.current().as_deref(), Some("HomeNet"));
    assert_eq!(publisher.sent(), vec![Sample::new("rpm", "1000")]);

    // 10s window, switch back, 5s to settle.
    sleep(Duration::from_secs(15)).await;
    assert_eq!(*relay.switch_state().borrow(), SwitchState::Idle);
    assert_eq!(net.current().as_deref(), Some("OBDII"));
    assert_eq!(
        net.log(),
        vec![
            "known",
            "disconnect",
            "enable HomeNet",
            "reconnect",
            "known",
            "disconnect",
            "enable OBDII",
            "reconnect",
        ]
    );
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn no_switch_without_buffered_data() {
    let (relay, _publisher, net) = start(
        switching_config(),
        FakePublisher::default(),
        parked_on_source(),
        None,
    )
    .await;

    sleep(Duration::from_secs(95)).await;
    assert_eq!(net.calls("known"), 0);
    assert_eq!(*relay.switch_state().borrow(), SwitchState::Idle);
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn switch_is_single_flight() {
    let mut net = parked_on_source();
    net.enable_delay = Some(Duration::from_secs(3));
    let cfg = RelayConfig {
        monitor_period: Duration::from_secs(1),
        ..switching_config()
    };
    let (relay, publisher, net) = start(cfg, FakePublisher::default(), net, None).await;

    relay.submit_sample("rpm", "1000");

    // Request issued on the 1s tick, still enabling through the 2s and 3s ticks.
    sleep(Duration::from_millis(3500)).await;
    assert_eq!(*relay.switch_state().borrow(), SwitchState::SwitchingToTarget);
    assert_eq!(net.calls("known"), 1);
    assert_eq!(net.calls("disconnect"), 1);

    // Enable completes at 4s, settles at 9s.
    sleep(Duration::from_secs(6)).await;
    assert_eq!(*relay.switch_state().borrow(), SwitchState::AwaitingTransmission);
    assert_eq!(net.calls("disconnect"), 1);
    assert_eq!(publisher.sent().len(), 1);
    relay.shutdown().await;
}

/// Start parked on the source with `fault` armed and one sample pending.
/// The 30s tick requests the switch; by 36s the request has failed or been
/// cut off at the 5s stabilization delay.
async fn switch_with_fault(
    fault: Fault,
) -> (
    Relay<FakePublisher, FakeNetwork>,
    Arc<FakePublisher>,
    Arc<FakeNetwork>,
) {
    let net = parked_on_source();
    net.set_fault(fault);
    let (relay, publisher, net) =
        start(switching_config(), FakePublisher::default(), net, None).await;
    relay.submit_sample("rpm", "1000");

    sleep(Duration::from_secs(36)).await;
    assert_eq!(net.calls("known"), 1, "{fault:?}");
    assert_eq!(
        *relay.switch_state().borrow(),
        SwitchState::Idle,
        "{fault:?} left the switch in flight"
    );
    (relay, publisher, net)
}

/// After a failed attempt the next tick (60s) tries again; with the fault
/// cleared it reaches the target and transmits.
async fn assert_next_switch_succeeds(
    relay: &Relay<FakePublisher, FakeNetwork>,
    publisher: &FakePublisher,
    net: &FakeNetwork,
) {
    net.set_fault(Fault::None);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(net.calls("known"), 2);
    assert_eq!(*relay.switch_state().borrow(), SwitchState::AwaitingTransmission);
    assert_eq!(net.current().as_deref(), Some("HomeNet"));
    assert_eq!(publisher.sent(), vec![Sample::new("rpm", "1000")]);
}

#[tokio::test(start_paused = true)]
async fn denied_disconnect_releases_switch() {
    let (relay, publisher, net) = switch_with_fault(Fault::DisconnectDenied).await;
    assert_eq!(net.calls("enable"), 0);
    assert_eq!(net.current().as_deref(), Some("OBDII"));
    assert_next_switch_succeeds(&relay, &publisher, &net).await;
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_enable_releases_switch() {
    let (relay, publisher, net) = switch_with_fault(Fault::EnableFails).await;
    assert_eq!(net.calls("enable"), 1);
    assert_eq!(net.calls("reconnect"), 0);
    assert_next_switch_succeeds(&relay, &publisher, &net).await;
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_reconnect_releases_switch() {
    let (relay, publisher, net) = switch_with_fault(Fault::ReconnectFails).await;
    assert_eq!(net.calls("reconnect"), 1);
    assert_next_switch_succeeds(&relay, &publisher, &net).await;
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_network_releases_switch() {
    let (relay, publisher, net) = switch_with_fault(Fault::EnablePanics).await;
    assert_eq!(net.calls("reconnect"), 0);
    assert_next_switch_succeeds(&relay, &publisher, &net).await;
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn hung_network_releases_switch_within_stabilize_delay() {
    let (relay, publisher, net) = switch_with_fault(Fault::EnableHangs).await;
    assert_eq!(net.calls("reconnect"), 0);
    assert!(publisher.sent().is_empty());
    assert_next_switch_succeeds(&relay, &publisher, &net).await;
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_switch_releases_flag_and_retries() {
    let net = parked_on_source();
    net.state.lock().unwrap().known.clear();
    let (relay, publisher, net) =
        start(switching_config(), FakePublisher::default(), net, None).await;

    relay.submit_sample("rpm", "1000");

    sleep(Duration::from_secs(31)).await;
    assert_eq!(net.calls("known"), 1);
    assert_eq!(*relay.switch_state().borrow(), SwitchState::Idle);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(net.calls("known"), 2);
    assert_eq!(net.calls("disconnect"), 0);
    assert_eq!(*relay.switch_state().borrow(), SwitchState::Idle);
    assert!(publisher.sent().is_empty());
    assert_eq!(relay.buffered(), 1);
    relay.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn returns_to_source_when_target_disappears() {
    let net = FakeNetwork::online();
    {
        let mut state = net.state.lock().unwrap();
        state.current = Some("CoffeeShop".into());
        state.visible = vec!["OBDII".into()];
        state.known = vec![known("HomeNet"), known("OBDII")];
    }
    let (relay, _publisher, net) =
        start(switching_config(), FakePublisher::default(), net, None).await;

    sleep(Duration::from_secs(10)).await;
    assert_eq!(net.current().as_deref(), Some("OBDII"));
    assert_eq!(*relay.switch_state().borrow(), SwitchState::Idle);
    assert!(relay.facts().borrow().connected_to_source);
    relay.shutdown().await;
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_flush() {
    let (relay, publisher, _net) = start(
        ready_config(TransmissionMode::Realtime),
        FakePublisher::default(),
        FakeNetwork::online(),
        None,
    )
    .await;

    relay.submit_sample("rpm", "1000");
    relay.shutdown().await;
    sleep(Duration::from_secs(10)).await;

    assert!(publisher.sent().is_empty());
    assert!(relay.flush_now().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn start_twice_is_rejected() {
    let (relay, _publisher, _net) = start(
        ready_config(TransmissionMode::Realtime),
        FakePublisher::default(),
        FakeNetwork::online(),
        None,
    )
    .await;

    assert!(matches!(relay.start().await, Err(CoreError::Internal(_))));
    relay.shutdown().await;
}
