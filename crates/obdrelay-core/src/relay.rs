// ── Relay ──
//
// The transmission controller. Producers push samples into the shared
// buffer from any thread; everything else (gating, draining, monitor
// checks, switch transitions, configuration changes) happens on one
// event-loop task that consumes `RelayEvent`s in order. Timers and
// switch requests run as side tasks that report back through the same
// channel.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::SampleBuffer;
use crate::catalog::parse_catalog_csv;
use crate::config::{RelayConfig, normalize_ssid};
use crate::error::{CoreError, NetworkError};
use crate::filter::KeySelection;
use crate::gate;
use crate::ledger::Ledger;
use crate::model::{ConnectivityFacts, Sample, SwitchDirection, SwitchState};
use crate::monitor::NetworkMonitor;
use crate::network::{NetworkControl, perform_switch};
use crate::publisher::Publisher;
use crate::scheduler::{FlushScheduler, fire_after};
use crate::switch::{SettleOutcome, SwitchController};

const EVENT_CHANNEL_SIZE: usize = 64;
const MAINTENANCE_PERIOD: Duration = Duration::from_secs(60 * 60);
const MIN_MONITOR_PERIOD: Duration = Duration::from_secs(1);

// ── Events ───────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum RelayEvent {
    /// The debounce timer elapsed.
    FlushFired,
    /// Manual flush request.
    FlushNow,
    /// A new configuration was stored in `RelayInner::config`.
    ConfigChanged,
    CatalogUpdated(Vec<String>),
    /// A switch request finished issuing.
    SwitchIssued {
        epoch: u64,
        direction: SwitchDirection,
        result: Result<(), NetworkError>,
    },
    /// The post-switch stabilization delay elapsed.
    SwitchSettled { epoch: u64 },
    TransmissionWindowElapsed { epoch: u64 },
}

/// What producers need on every sample, swapped atomically on
/// configuration changes.
#[derive(Debug)]
struct IngestPolicy {
    selection: KeySelection,
    flush_interval: Duration,
}

impl IngestPolicy {
    fn from_config(config: &RelayConfig) -> Self {
        Self {
            selection: config.selection(),
            flush_interval: config.flush_interval,
        }
    }
}

// ── Relay ────────────────────────────────────────────────────────

/// Handle to a running relay.
///
/// Cheaply cloneable via `Arc<RelayInner>`. Create with
/// [`new()`](Self::new), then [`start()`](Self::start) the event loop.
/// Samples submitted before `start` are buffered and flushed once the
/// loop runs.
pub struct Relay<P, N> {
    inner: Arc<RelayInner<P, N>>,
}

impl<P, N> Clone for Relay<P, N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RelayInner<P, N> {
    config: ArcSwap<RelayConfig>,
    ingest: ArcSwap<IngestPolicy>,
    buffer: SampleBuffer,
    scheduler: FlushScheduler,
    publisher: Arc<P>,
    network: Arc<N>,
    ledger: Option<Arc<Ledger>>,
    events_tx: mpsc::Sender<RelayEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<RelayEvent>>>,
    facts: watch::Sender<ConnectivityFacts>,
    switch_state: watch::Sender<SwitchState>,
    known_keys: watch::Sender<BTreeSet<String>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: Publisher, N: NetworkControl> Relay<P, N> {
    /// Create a relay. Does NOT start the event loop.
    ///
    /// Must be called from within a Tokio runtime; timers armed by
    /// [`submit_sample`](Self::submit_sample) run on that runtime even
    /// when samples come from plain threads.
    pub fn new(
        config: RelayConfig,
        publisher: Arc<P>,
        network: Arc<N>,
        ledger: Option<Arc<Ledger>>,
    ) -> Result<Self, CoreError> {
        let runtime = Handle::try_current()
            .map_err(|e| CoreError::Internal(format!("relay requires a Tokio runtime: {e}")))?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let scheduler = FlushScheduler::new(events_tx.clone(), cancel.clone(), runtime);
        let (facts, _) = watch::channel(ConnectivityFacts::default());
        let (switch_state, _) = watch::channel(SwitchState::Idle);
        let (known_keys, _) = watch::channel(config.known_keys.clone());

        Ok(Self {
            inner: Arc::new(RelayInner {
                ingest: ArcSwap::from_pointee(IngestPolicy::from_config(&config)),
                config: ArcSwap::from_pointee(config),
                buffer: SampleBuffer::new(),
                scheduler,
                publisher,
                network,
                ledger,
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                facts,
                switch_state,
                known_keys,
                cancel,
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    /// The configuration most recently applied.
    pub fn config(&self) -> Arc<RelayConfig> {
        self.inner.config.load_full()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the event loop. Runs an initial connectivity check and a
    /// ledger purge before handling events.
    pub async fn start(&self) -> Result<(), CoreError> {
        let Some(events) = self.inner.events_rx.lock().await.take() else {
            return Err(CoreError::Internal("relay already started".into()));
        };

        let event_loop = RelayLoop::new(Arc::clone(&self.inner), events);
        self.inner
            .task_handles
            .lock()
            .await
            .push(tokio::spawn(event_loop.run()));

        info!("relay started");
        Ok(())
    }

    /// Stop the event loop and cancel every pending timer.
    ///
    /// Switch state is left where it is; in-flight publishes are allowed
    /// to finish on their own.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("relay stopped");
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Buffer one reading. Returns `false` if it was dropped: empty key or
    /// value, or a key outside the selection.
    pub fn submit_sample(&self, key: &str, value: &str) -> bool {
        if key.is_empty() || value.is_empty() {
            trace!(key, "ignoring empty sample");
            return false;
        }

        let policy = self.inner.ingest.load();
        if !policy.selection.accept(key) {
            trace!(key, "key not selected");
            return false;
        }

        if self.inner.buffer.put_and_arm(key, value) {
            self.inner.scheduler.schedule(policy.flush_interval);
        }
        true
    }

    /// Replace the data-item catalog: merges `keys` into the known keys
    /// and drops everything buffered so far.
    pub async fn catalog_update(
        &self,
        keys: impl IntoIterator<Item = String>,
    ) -> Result<(), CoreError> {
        self.inner.buffer.clear();
        self.send(RelayEvent::CatalogUpdated(keys.into_iter().collect()))
            .await
    }

    /// [`catalog_update`](Self::catalog_update) from `key;description;value;units`
    /// lines. Returns the number of keys found.
    pub async fn catalog_update_csv(&self, csv: &str) -> Result<usize, CoreError> {
        let keys = parse_catalog_csv(csv);
        let count = keys.len();
        self.catalog_update(keys).await?;
        Ok(count)
    }

    /// Apply a new configuration. Ingestion picks it up immediately; the
    /// loop re-checks connectivity and uses it from the next evaluation.
    pub async fn update_config(&self, config: RelayConfig) -> Result<(), CoreError> {
        self.inner
            .ingest
            .store(Arc::new(IngestPolicy::from_config(&config)));
        self.inner.config.store(Arc::new(config));
        self.send(RelayEvent::ConfigChanged).await
    }

    /// Gate and flush right away instead of waiting for the timer.
    pub async fn flush_now(&self) -> Result<(), CoreError> {
        self.send(RelayEvent::FlushNow).await
    }

    async fn send(&self, event: RelayEvent) -> Result<(), CoreError> {
        self.inner
            .events_tx
            .send(event)
            .await
            .map_err(|_| CoreError::Internal("relay event loop has stopped".into()))
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn facts(&self) -> watch::Receiver<ConnectivityFacts> {
        self.inner.facts.subscribe()
    }

    pub fn switch_state(&self) -> watch::Receiver<SwitchState> {
        self.inner.switch_state.subscribe()
    }

    /// Every key seen so far, from samples, catalogs and configuration.
    pub fn known_keys(&self) -> watch::Receiver<BTreeSet<String>> {
        self.inner.known_keys.subscribe()
    }

    /// Number of samples waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.inner.buffer.len()
    }
}

// ── Event loop ───────────────────────────────────────────────────

struct RelayLoop<P, N> {
    inner: Arc<RelayInner<P, N>>,
    events: mpsc::Receiver<RelayEvent>,
    config: Arc<RelayConfig>,
    monitor: NetworkMonitor<N>,
    switch: SwitchController,
    config_failures: u32,
}

impl<P: Publisher, N: NetworkControl> RelayLoop<P, N> {
    fn new(inner: Arc<RelayInner<P, N>>, events: mpsc::Receiver<RelayEvent>) -> Self {
        Self {
            config: inner.config.load_full(),
            monitor: NetworkMonitor::new(Arc::clone(&inner.network)),
            switch: SwitchController::new(),
            config_failures: 0,
            inner,
            events,
        }
    }

    async fn run(mut self) {
        let cancel = self.inner.cancel.clone();

        self.purge_ledger();
        self.check_network().await;

        let mut monitor_period = self.config.monitor_period;
        let mut monitor_tick = monitor_interval(monitor_period);
        let mut maintenance =
            tokio::time::interval_at(Instant::now() + MAINTENANCE_PERIOD, MAINTENANCE_PERIOD);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(event).await;
                    if self.config.monitor_period != monitor_period {
                        monitor_period = self.config.monitor_period;
                        monitor_tick = monitor_interval(monitor_period);
                    }
                }
                _ = monitor_tick.tick() => self.check_network().await,
                _ = maintenance.tick() => self.purge_ledger(),
            }
        }

        debug!(state = %self.switch.state(), "relay loop exited");
    }

    async fn handle_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::FlushFired => {
                self.inner.buffer.disarm();
                self.flush();
            }
            RelayEvent::FlushNow => self.flush(),
            RelayEvent::ConfigChanged => self.apply_config().await,
            RelayEvent::CatalogUpdated(keys) => {
                info!(keys = keys.len(), "catalog updated, buffer reset");
                self.remember_keys(keys);
            }
            RelayEvent::SwitchIssued {
                epoch,
                direction,
                result,
            } => self.on_switch_issued(epoch, direction, result),
            RelayEvent::SwitchSettled { epoch } => self.on_switch_settled(epoch).await,
            RelayEvent::TransmissionWindowElapsed { epoch } => {
                if let Some(direction) = self.switch.on_transmission_window_elapsed(epoch) {
                    self.publish_switch_state();
                    self.issue_switch(direction);
                }
            }
        }
    }

    // ── Flush ────────────────────────────────────────────────────

    fn flush(&mut self) {
        let config = Arc::clone(&self.config);

        if let Err(e) = config.check_ready() {
            self.config_failures += 1;
            log_failure(
                self.config_failures,
                config.failure_alert_threshold,
                "flush skipped",
                &e,
            );
            self.rearm();
            return;
        }
        self.config_failures = 0;

        let facts = *self.inner.facts.borrow();
        if !gate::should_send(&config.mode, facts) {
            debug!(
                mode = %config.mode,
                ?facts,
                pending = self.inner.buffer.len(),
                "send gate closed, keeping samples"
            );
            self.rearm();
            return;
        }

        let drained = self.inner.buffer.drain();
        if drained.is_empty() {
            return;
        }
        self.remember_keys(drained.keys().cloned());

        info!(count = drained.len(), "flushing samples");
        self.dispatch(
            drained
                .into_iter()
                .map(|(key, value)| Sample { key, value })
                .collect(),
        );
    }

    /// Gated-out or misconfigured flushes retry one interval later while
    /// samples are pending.
    fn rearm(&self) {
        if self.inner.buffer.try_arm() {
            self.inner.scheduler.schedule(self.config.flush_interval);
        }
    }

    /// Record the batch in the ledger, then publish each sample on its own
    /// task. Ledger I/O runs on the blocking pool.
    fn dispatch(&self, samples: Vec<Sample>) {
        let publisher = Arc::clone(&self.inner.publisher);
        let ledger = self.inner.ledger.clone();
        let recorded_at = now_millis();

        tokio::spawn(async move {
            let ids = match &ledger {
                Some(ledger) => {
                    record_batch(Arc::clone(ledger), samples.clone(), recorded_at).await
                }
                None => Vec::new(),
            };

            for (i, sample) in samples.into_iter().enumerate() {
                let publisher = Arc::clone(&publisher);
                let confirm = ledger.clone().zip(ids.get(i).copied());
                tokio::spawn(async move {
                    match publisher.publish(&sample).await {
                        Ok(()) => {
                            debug!(key = %sample.key, "published");
                            if let Some((ledger, id)) = confirm {
                                mark_sent(ledger, id).await;
                            }
                        }
                        Err(e) => warn!(key = %sample.key, error = %e, "publish failed"),
                    }
                });
            }
        });
    }

    fn remember_keys(&self, keys: impl IntoIterator<Item = String>) {
        self.inner.known_keys.send_if_modified(|known| {
            let before = known.len();
            known.extend(keys);
            known.len() != before
        });
    }

    // ── Network ──────────────────────────────────────────────────

    async fn refresh_facts(&self) -> ConnectivityFacts {
        let facts = self.monitor.check(&self.config).await;
        self.inner.facts.send_replace(facts);
        facts
    }

    /// Monitor tick: refresh facts and, when idle, let the switch
    /// controller decide whether to move.
    async fn check_network(&mut self) {
        let facts = self.refresh_facts().await;
        if !self.config.auto_switch || !self.switch.state().is_idle() {
            return;
        }
        if let Some(direction) = self.switch.evaluate(facts, self.inner.buffer.is_empty()) {
            self.publish_switch_state();
            self.issue_switch(direction);
        }
    }

    /// Issue the association request on a side task. The outcome always
    /// comes back as `SwitchIssued`: a request that panics or outlasts the
    /// stabilization delay is aborted and reported as failed.
    fn issue_switch(&self, direction: SwitchDirection) {
        let epoch = self.switch.epoch();
        let (role, ssid) = match direction {
            SwitchDirection::ToTarget => ("target", normalize_ssid(&self.config.target_ssid)),
            SwitchDirection::ToSource => ("source", normalize_ssid(&self.config.source_ssid)),
        };
        info!(%direction, ssid = %ssid, epoch, "requesting network switch");

        let network = Arc::clone(&self.inner.network);
        let tx = self.inner.events_tx.clone();
        let cancel = self.inner.cancel.clone();
        let deadline = self.config.switch_stabilize_delay;
        tokio::spawn(async move {
            let result = if ssid.is_empty() {
                Err(NetworkError::NotConfigured { role })
            } else {
                let request = tokio::spawn(async move { perform_switch(&*network, &ssid).await });
                let abort = request.abort_handle();
                match tokio::time::timeout(deadline, request).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join)) => Err(NetworkError::Aborted(join.to_string())),
                    Err(_) => {
                        abort.abort();
                        Err(NetworkError::TimedOut {
                            operation: "switch request",
                            after: deadline,
                        })
                    }
                }
            };
            if cancel.is_cancelled() {
                return;
            }
            let _ = tx
                .send(RelayEvent::SwitchIssued {
                    epoch,
                    direction,
                    result,
                })
                .await;
        });
    }

    fn on_switch_issued(
        &mut self,
        epoch: u64,
        direction: SwitchDirection,
        result: Result<(), NetworkError>,
    ) {
        if epoch != self.switch.epoch() {
            debug!(epoch, "stale switch result ignored");
            return;
        }
        match result {
            Ok(()) => self.after(
                self.config.switch_stabilize_delay,
                RelayEvent::SwitchSettled { epoch },
            ),
            Err(e) => {
                if self.switch.request_failed(epoch) {
                    self.publish_switch_state();
                    let streak = self.switch.failure_streak().max(1);
                    log_failure(
                        streak,
                        self.config.failure_alert_threshold,
                        &format!("network switch {direction} failed"),
                        &e,
                    );
                }
            }
        }
    }

    async fn on_switch_settled(&mut self, epoch: u64) {
        if epoch != self.switch.epoch() {
            return;
        }
        let facts = self.refresh_facts().await;

        match self.switch.on_settled(epoch, facts.connected_to_target) {
            SettleOutcome::AwaitTransmission => {
                self.publish_switch_state();
                info!(
                    window = ?self.config.await_transmission_timeout,
                    "on target network, transmitting"
                );
                self.after(
                    self.config.await_transmission_timeout,
                    RelayEvent::TransmissionWindowElapsed { epoch },
                );
                self.flush();
            }
            SettleOutcome::TargetUnreachable => {
                self.publish_switch_state();
                log_failure(
                    self.switch.failure_streak(),
                    self.config.failure_alert_threshold,
                    "network switch did not reach target",
                    &format!("still not connected to {}", self.config.target_ssid),
                );
            }
            SettleOutcome::Released => {
                self.publish_switch_state();
                info!(connected_to_source = facts.connected_to_source, "switch released");
            }
            SettleOutcome::Ignored => {}
        }
    }

    fn publish_switch_state(&self) {
        let state = self.switch.state();
        debug!(state = %state, "switch state");
        self.inner.switch_state.send_replace(state);
    }

    /// Deliver `event` to this loop after `delay`.
    fn after(&self, delay: Duration, event: RelayEvent) {
        tokio::spawn(fire_after(
            self.inner.events_tx.clone(),
            self.inner.cancel.clone(),
            delay,
            event,
        ));
    }

    // ── Configuration ────────────────────────────────────────────

    async fn apply_config(&mut self) {
        let config = self.inner.config.load_full();

        if let Err(e) = self.inner.publisher.reconfigure(&config.endpoint) {
            warn!(error = %e, "publisher rejected new endpoint");
        }
        if !config.auto_switch && !self.switch.state().is_idle() {
            info!(state = %self.switch.state(), "auto-switch disabled, abandoning switch");
            self.switch.reset();
            self.publish_switch_state();
        }
        self.remember_keys(config.known_keys.iter().cloned());

        info!(mode = %config.mode, auto_switch = config.auto_switch, "configuration applied");
        self.config = config;
        self.config_failures = 0;
        self.check_network().await;
    }

    // ── Maintenance ──────────────────────────────────────────────

    fn purge_ledger(&self) {
        let Some(ledger) = &self.inner.ledger else {
            return;
        };
        let retention = i64::try_from(self.config.ledger_retention.as_millis()).unwrap_or(i64::MAX);
        match ledger.purge_sent_older_than(now_millis().saturating_sub(retention)) {
            Ok(0) => {}
            Ok(removed) => info!(removed, "purged sent ledger records"),
            Err(e) => warn!(error = %e, "ledger purge failed"),
        }
    }
}

fn monitor_interval(period: Duration) -> Interval {
    let period = period.max(MIN_MONITOR_PERIOD);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Warn on isolated failures, escalate to error once they keep happening.
fn log_failure(streak: u32, threshold: u32, what: &str, err: &dyn fmt::Display) {
    if threshold > 0 && streak >= threshold {
        error!(streak, error = %err, "{what} (repeated)");
    } else {
        warn!(streak, error = %err, "{what}");
    }
}

async fn record_batch(ledger: Arc<Ledger>, samples: Vec<Sample>, recorded_at: i64) -> Vec<i64> {
    let count = samples.len();
    match tokio::task::spawn_blocking(move || ledger.record_all(&samples, recorded_at)).await {
        Ok(Ok(ids)) => ids,
        Ok(Err(e)) => {
            warn!(count, error = %e, "ledger write failed");
            Vec::new()
        }
        Err(e) => {
            warn!(count, error = %e, "ledger write aborted");
            Vec::new()
        }
    }
}

async fn mark_sent(ledger: Arc<Ledger>, id: i64) {
    match tokio::task::spawn_blocking(move || ledger.mark_sent(id)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(id, error = %e, "failed to mark ledger record sent"),
        Err(e) => warn!(id, error = %e, "ledger update aborted"),
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
