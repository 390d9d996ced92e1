// ── Network switch state machine ──
//
// Pure state: no timers, no I/O. The relay loop issues the requests and
// runs the timers, then feeds the outcomes back in. Every request bumps
// `epoch`; callbacks carrying an older epoch are stale and ignored, so a
// late timer can never move the machine out of a newer state.
//
//   Idle ──(data, target visible, not on target)──▶ SwitchingToTarget
//   Idle ──(target gone, source visible, not on source)──▶ SwitchingToSource
//   SwitchingToTarget ──(request failed)──▶ Idle
//   SwitchingToTarget ──(settled, on target)──▶ AwaitingTransmission
//   SwitchingToTarget ──(settled, not on target)──▶ Idle
//   AwaitingTransmission ──(window elapsed)──▶ SwitchingToSource
//   SwitchingToSource ──(request failed | settled)──▶ Idle

use tracing::debug;

use crate::model::{ConnectivityFacts, SwitchDirection, SwitchState};

/// Result of feeding a settled switch back into the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// On the target network; hold for the transmission window.
    AwaitTransmission,
    /// The switch to the target did not take.
    TargetUnreachable,
    /// Back from a source switch, whatever the outcome.
    Released,
    /// Stale or unexpected callback; nothing changed.
    Ignored,
}

#[derive(Debug, Default)]
pub struct SwitchController {
    state: SwitchState,
    epoch: u64,
    failure_streak: u32,
}

impl SwitchController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    /// Identifier of the request currently in flight.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Consecutive switch attempts that ended without reaching the target.
    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    fn begin(&mut self, state: SwitchState) {
        self.state = state;
        self.epoch += 1;
        debug!(state = %state, epoch = self.epoch, "switch started");
    }

    /// Decide whether to start a switch. Only ever starts one from `Idle`.
    pub fn evaluate(
        &mut self,
        facts: ConnectivityFacts,
        buffer_is_empty: bool,
    ) -> Option<SwitchDirection> {
        if !self.state.is_idle() {
            return None;
        }

        if !buffer_is_empty && facts.target_in_range && !facts.connected_to_target {
            self.begin(SwitchState::SwitchingToTarget);
            return Some(SwitchDirection::ToTarget);
        }

        if !facts.target_in_range && facts.source_in_range && !facts.connected_to_source {
            self.begin(SwitchState::SwitchingToSource);
            return Some(SwitchDirection::ToSource);
        }

        None
    }

    /// The association request for `epoch` could not be issued.
    ///
    /// Returns `true` if this moved the machine back to `Idle`.
    pub fn request_failed(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch || self.state.is_idle() {
            return false;
        }
        if self.state == SwitchState::SwitchingToTarget {
            self.failure_streak += 1;
        }
        self.state = SwitchState::Idle;
        true
    }

    /// The stabilization delay for `epoch` elapsed and connectivity was
    /// re-checked.
    pub fn on_settled(&mut self, epoch: u64, connected_to_target: bool) -> SettleOutcome {
        if epoch != self.epoch {
            return SettleOutcome::Ignored;
        }
        match self.state {
            SwitchState::SwitchingToTarget if connected_to_target => {
                self.state = SwitchState::AwaitingTransmission;
                self.failure_streak = 0;
                SettleOutcome::AwaitTransmission
            }
            SwitchState::SwitchingToTarget => {
                self.state = SwitchState::Idle;
                self.failure_streak += 1;
                SettleOutcome::TargetUnreachable
            }
            SwitchState::SwitchingToSource => {
                self.state = SwitchState::Idle;
                SettleOutcome::Released
            }
            SwitchState::Idle | SwitchState::AwaitingTransmission => SettleOutcome::Ignored,
        }
    }

    /// The transmission window for `epoch` elapsed. Starts the switch back
    /// to the source network.
    pub fn on_transmission_window_elapsed(&mut self, epoch: u64) -> Option<SwitchDirection> {
        if epoch != self.epoch || self.state != SwitchState::AwaitingTransmission {
            return None;
        }
        self.begin(SwitchState::SwitchingToSource);
        Some(SwitchDirection::ToSource)
    }

    /// Abandon whatever is in flight. Pending callbacks become stale.
    pub fn reset(&mut self) {
        self.state = SwitchState::Idle;
        self.epoch += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> ConnectivityFacts {
        ConnectivityFacts::default()
    }

    fn target_visible() -> ConnectivityFacts {
        ConnectivityFacts {
            target_in_range: true,
            connected_to_source: true,
            source_in_range: true,
            has_internet: true,
            ..facts()
        }
    }

    fn on_target(sw: &mut SwitchController) -> u64 {
        assert_eq!(sw.evaluate(target_visible(), false), Some(SwitchDirection::ToTarget));
        let epoch = sw.epoch();
        assert_eq!(sw.on_settled(epoch, true), SettleOutcome::AwaitTransmission);
        epoch
    }

    // ── Idle ──────────────────────────────────────────────────────────

    #[test]
    fn idle_to_switching_to_target() {
        let mut sw = SwitchController::new();
        assert_eq!(sw.evaluate(target_visible(), false), Some(SwitchDirection::ToTarget));
        assert_eq!(sw.state(), SwitchState::SwitchingToTarget);
    }

    #[test]
    fn idle_stays_idle_without_data() {
        let mut sw = SwitchController::new();
        assert_eq!(sw.evaluate(target_visible(), true), None);
        assert_eq!(sw.state(), SwitchState::Idle);
    }

    #[test]
    fn idle_stays_idle_when_already_on_target() {
        let mut sw = SwitchController::new();
        let f = ConnectivityFacts {
            connected_to_target: true,
            ..target_visible()
        };
        assert_eq!(sw.evaluate(f, false), None);
    }

    #[test]
    fn idle_to_switching_to_source_when_target_gone() {
        let mut sw = SwitchController::new();
        let f = ConnectivityFacts {
            source_in_range: true,
            ..facts()
        };
        assert_eq!(sw.evaluate(f, true), Some(SwitchDirection::ToSource));
        assert_eq!(sw.state(), SwitchState::SwitchingToSource);
    }

    #[test]
    fn no_return_to_source_when_already_there() {
        let mut sw = SwitchController::new();
        let f = ConnectivityFacts {
            source_in_range: true,
            connected_to_source: true,
            ..facts()
        };
        assert_eq!(sw.evaluate(f, false), None);
    }

    // ── Single flight ─────────────────────────────────────────────────

    #[test]
    fn evaluate_is_single_flight() {
        let mut sw = SwitchController::new();
        assert!(sw.evaluate(target_visible(), false).is_some());
        assert_eq!(sw.evaluate(target_visible(), false), None);
        assert_eq!(sw.evaluate(target_visible(), false), None);
        assert_eq!(sw.epoch(), 1);
    }

    // ── SwitchingToTarget ─────────────────────────────────────────────

    #[test]
    fn request_failure_releases_flag() {
        let mut sw = SwitchController::new();
        sw.evaluate(target_visible(), false);
        assert!(sw.request_failed(sw.epoch()));
        assert_eq!(sw.state(), SwitchState::Idle);
        assert_eq!(sw.failure_streak(), 1);

        // A later attempt is still possible.
        assert!(sw.evaluate(target_visible(), false).is_some());
    }

    #[test]
    fn settled_on_target_awaits_transmission() {
        let mut sw = SwitchController::new();
        on_target(&mut sw);
        assert_eq!(sw.state(), SwitchState::AwaitingTransmission);
        assert_eq!(sw.failure_streak(), 0);
    }

    #[test]
    fn settled_off_target_returns_to_idle() {
        let mut sw = SwitchController::new();
        sw.evaluate(target_visible(), false);
        assert_eq!(
            sw.on_settled(sw.epoch(), false),
            SettleOutcome::TargetUnreachable
        );
        assert_eq!(sw.state(), SwitchState::Idle);
        assert_eq!(sw.failure_streak(), 1);
    }

    // ── AwaitingTransmission ──────────────────────────────────────────

    #[test]
    fn window_elapsed_switches_back_to_source() {
        let mut sw = SwitchController::new();
        let epoch = on_target(&mut sw);
        assert_eq!(
            sw.on_transmission_window_elapsed(epoch),
            Some(SwitchDirection::ToSource)
        );
        assert_eq!(sw.state(), SwitchState::SwitchingToSource);
    }

    // ── SwitchingToSource ─────────────────────────────────────────────

    #[test]
    fn source_settle_always_releases() {
        let mut sw = SwitchController::new();
        let epoch = on_target(&mut sw);
        sw.on_transmission_window_elapsed(epoch);
        assert_eq!(sw.on_settled(sw.epoch(), true), SettleOutcome::Released);
        assert_eq!(sw.state(), SwitchState::Idle);
    }

    #[test]
    fn source_request_failure_releases() {
        let mut sw = SwitchController::new();
        let epoch = on_target(&mut sw);
        sw.on_transmission_window_elapsed(epoch);
        assert!(sw.request_failed(sw.epoch()));
        assert_eq!(sw.state(), SwitchState::Idle);
        assert_eq!(sw.failure_streak(), 0);
    }

    // ── Stale callbacks ───────────────────────────────────────────────

    #[test]
    fn stale_callbacks_are_ignored() {
        let mut sw = SwitchController::new();
        let epoch = on_target(&mut sw);
        sw.on_transmission_window_elapsed(epoch);

        assert_eq!(sw.on_settled(epoch, true), SettleOutcome::Ignored);
        assert!(!sw.request_failed(epoch));
        assert_eq!(sw.on_transmission_window_elapsed(epoch), None);
        assert_eq!(sw.state(), SwitchState::SwitchingToSource);
    }

    #[test]
    fn reset_invalidates_in_flight_request() {
        let mut sw = SwitchController::new();
        sw.evaluate(target_visible(), false);
        let epoch = sw.epoch();
        sw.reset();

        assert_eq!(sw.state(), SwitchState::Idle);
        assert_eq!(sw.on_settled(epoch, true), SettleOutcome::Ignored);
    }
}
