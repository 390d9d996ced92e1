// obdrelay-api: Async Rust client for the Home Assistant REST states API

pub mod entity;
pub mod error;
pub mod states;
pub mod transport;

pub use entity::{DEFAULT_ENTITY_PREFIX, entity_id, sanitize_key};
pub use error::Error;
pub use states::{ApiStatus, DEFAULT_SOURCE_NAME, StateAttributes, StateResponse, StateUpdate, StatesClient};
pub use transport::{TlsMode, TransportConfig};
