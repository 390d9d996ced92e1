// ── Send gate ──
//
// Pure decision: may a flush proceed given the mode and the latest
// connectivity snapshot. Being in range of the target is never enough
// on its own; the device has to actually be on it.

use crate::config::TransmissionMode;
use crate::model::ConnectivityFacts;

pub fn should_send(mode: &TransmissionMode, facts: ConnectivityFacts) -> bool {
    match mode {
        TransmissionMode::Realtime | TransmissionMode::Unknown(_) => facts.has_internet,
        TransmissionMode::SsidConnected | TransmissionMode::SsidInRange => {
            facts.connected_to_target && facts.has_internet
        }
    }
}
