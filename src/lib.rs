//! Device-lifecycle controller for a network-connected embedded unit.
//!
//! Brings the unit up on its configured wireless network, persists its
//! configuration across power cycles, and falls back to a local access
//! point with a captive recovery portal when it cannot get online.
//!
//! Everything except the ESP-IDF bindings is platform-independent and
//! testable on the host without hardware.

pub mod boot;
pub mod config;
pub mod manager;
pub mod portal;
pub mod storage;
pub mod system;
pub mod wifi;

// Re-export commonly used items
pub use boot::{boot, BootOutcome, BootTimeouts};
pub use config::{ConfigError, ConfigManager, ConfigState, SharedConfig, UnitConfiguration};
pub use manager::WaitOutcome;
pub use portal::{apply_connectivity_update, ConnectivityUpdate, PortalManager, PortalState};
pub use storage::{ConfigStore, MemoryStore, StorageError};
pub use system::{SystemEvents, SystemSignal};
pub use wifi::{WifiManager, WifiOptions, WifiState};
