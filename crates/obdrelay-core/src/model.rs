// ── Domain model ──
//
// Plain value types shared by the buffer, the monitor, the switch
// controller and the relay loop.

use serde::Serialize;

/// One telemetry reading. The buffer keeps at most one per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Sample {
    pub key: String,
    pub value: String,
}

impl Sample {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Snapshot of the network situation, recomputed as a whole on every
/// monitor tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectivityFacts {
    /// Associated with the target (publishing) network.
    pub connected_to_target: bool,
    /// Associated with the source (data collection) network.
    pub connected_to_source: bool,
    /// Target network visible in the latest scan.
    pub target_in_range: bool,
    /// Source network visible in the latest scan.
    pub source_in_range: bool,
    /// An active, available network connection exists.
    pub has_internet: bool,
}

/// State of the network switch controller.
///
/// Any state other than [`Idle`](Self::Idle) means a switch is in flight
/// and no second request may be issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SwitchState {
    #[default]
    Idle,
    SwitchingToTarget,
    AwaitingTransmission,
    SwitchingToSource,
}

impl SwitchState {
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

/// Which network a switch request associates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SwitchDirection {
    ToTarget,
    ToSource,
}
