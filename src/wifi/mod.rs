//! Wireless connectivity.
//!
//! # Components
//!
//! - [`manager`] - connectivity state machine with access-point fallback
//! - [`radio`] - driver seam the manager talks through
//! - `esp` - ESP-IDF driver binding (hardware builds only)

#[cfg(feature = "esp32")]
pub mod esp;
pub mod manager;
pub mod radio;

pub use manager::{WifiManager, WifiOptions, WifiRequest, WifiState};
pub use radio::{DisconnectReason, EventSink, Radio, RadioError, RadioEvent, ScanRecord};
