//! Shared configuration store.
//!
//! One [`UnitConfiguration`] instance, allocated at boot and shared by every
//! manager and request handler through a cloneable [`SharedConfig`] handle.
//!
//! Locking rules:
//! - `acquire` takes the single exclusive lock; the guard allows a whole
//!   read-modify-write critical section before release.
//! - Never call `acquire` again on the same thread while holding a guard.
//! - Never take another lock while holding this one.

use std::sync::{Arc, Mutex, MutexGuard};

use super::model::UnitConfiguration;

/// Cloneable handle to the process-wide configuration.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<Mutex<UnitConfiguration>>,
}

impl SharedConfig {
    /// Allocate the shared instance with an empty default configuration.
    pub fn new() -> Self {
        Self::with_config(UnitConfiguration::default())
    }

    /// Allocate the shared instance with a specific starting configuration.
    pub fn with_config(config: UnitConfiguration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(config)),
        }
    }

    /// Lock and return the configuration guard.
    ///
    /// A poisoned lock means a holder panicked mid-update; the configuration
    /// is still the authoritative copy, so recover the value rather than
    /// cascading the panic through every manager.
    pub fn acquire(&self) -> MutexGuard<'_, UnitConfiguration> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read the runtime connectivity flag without exposing the guard.
    pub fn is_wifi_connected(&self) -> bool {
        self.acquire().wifi_connected
    }

    /// Clone out the current configuration in one critical section.
    pub fn snapshot(&self) -> UnitConfiguration {
        self.acquire().clone()
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new()
    }
}
