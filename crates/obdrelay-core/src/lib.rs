// obdrelay-core: Transmission controller for the OBD telemetry relay
//
// Buffers samples, debounces flushes, gates them on connectivity and
// optionally moves the device onto the publishing network and back.

pub mod buffer;
pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod gate;
pub mod ledger;
pub mod model;
pub mod monitor;
pub mod network;
pub mod publisher;
pub mod relay;
mod scheduler;
pub mod switch;

// ── Primary re-exports ──────────────────────────────────────────────
pub use buffer::SampleBuffer;
pub use catalog::parse_catalog_csv;
pub use config::{EndpointConfig, RelayConfig, TlsVerification, TransmissionMode, normalize_ssid};
pub use error::{CoreError, NetworkError};
pub use filter::KeySelection;
pub use gate::should_send;
pub use ledger::{Ledger, LedgerRecord};
pub use model::{ConnectivityFacts, Sample, SwitchDirection, SwitchState};
pub use monitor::NetworkMonitor;
pub use network::{KnownNetwork, NetworkControl, perform_switch};
pub use publisher::{HomeAssistantPublisher, Publisher, build_transport};
pub use relay::Relay;
pub use switch::{SettleOutcome, SwitchController};
