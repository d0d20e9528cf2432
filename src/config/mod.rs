//! Device configuration: model, codec, shared store, and the manager that
//! persists it.
//!
//! # Components
//!
//! - [`model`] - configuration data structures and limits
//! - [`codec`] - versioned binary blob encode/decode
//! - [`store`] - the process-wide shared configuration instance
//! - [`manager`] - worker-thread state machine owning the persistent store

pub mod codec;
pub mod manager;
pub mod model;
pub mod store;

pub use codec::{decode, encode, encoded_len, CodecError};
pub use manager::{ConfigError, ConfigManager, ConfigRequest, ConfigState};
pub use model::{
    ConnectivityConfig, LogLevel, ModelError, SystemSettings, UnitConfiguration, UserConfig,
    WifiCredential, CONFIG_VERSION, MAX_PASSWORD_LEN, MAX_SSID_LEN, MAX_UNIT_NAME_LEN, MAX_URL_LEN,
};
pub use store::SharedConfig;
