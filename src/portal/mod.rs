//! Recovery portal.
//!
//! When the unit falls back to its local access point, the portal is how an
//! operator gets it back online: a small HTTP server for submitting new
//! network credentials, plus captive DNS to steer clients at it.
//!
//! # Components
//!
//! - [`manager`] - portal state machine over the [`PortalService`] seam
//! - [`http`] - `tiny_http`-backed service implementation

pub mod http;
pub mod manager;

pub use http::HttpPortal;
pub use manager::{PortalError, PortalManager, PortalRequest, PortalService, PortalState};

use std::time::Duration;

use log::info;

use crate::config::model::WifiCredential;
use crate::config::{CodecError, ConfigError, ConfigManager, SharedConfig};

/// New connectivity settings submitted by an operator.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityUpdate {
    /// Wholesale replacement for the credential list.
    pub credentials: Vec<WifiCredential>,
    pub ota_url: Option<String>,
    pub version_check_url: Option<String>,
    pub unit_name: Option<String>,
}

/// Apply new connectivity settings and persist them.
///
/// The shared store is mutated under its lock only after the whole candidate
/// configuration validated, then a write is issued through the config
/// manager. On a validation error nothing changes; on a persistence error
/// the in-memory update stays applied and the storage-degraded path takes
/// over.
pub fn apply_connectivity_update(
    shared: &SharedConfig,
    config_manager: &ConfigManager,
    update: ConnectivityUpdate,
    timeout: Duration,
) -> Result<(), ConfigError> {
    {
        let mut guard = shared.acquire();
        let mut candidate = guard.clone();
        candidate.connectivity.credentials = update.credentials;
        if let Some(url) = update.ota_url {
            candidate.connectivity.ota_url = url;
        }
        if let Some(url) = update.version_check_url {
            candidate.connectivity.version_check_url = url;
        }
        if let Some(name) = update.unit_name {
            candidate.user.unit_name = Some(name);
        }
        candidate
            .validate()
            .map_err(|e| ConfigError::Codec(CodecError::Invalid(e)))?;
        *guard = candidate;
    }
    info!("portal: connectivity update applied, persisting");
    config_manager.write(timeout)
}
