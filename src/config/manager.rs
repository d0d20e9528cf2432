//! Configuration persistence manager.
//!
//! Owns the flash-backed key-value store and drives the codec and the shared
//! config store through a `Uninitialized -> Ready <-> Busy -> Uninitialized`
//! state machine on its own worker thread.
//!
//! Request priority (deliberate): Shutdown > Init > Read > Write. Shutdown
//! must win over queued I/O, and a pending Init outranks operations that
//! require an initialized store anyway.
//!
//! Storage failures are reported to the caller *and* raise the global
//! [`SystemSignal::StorageDegraded`] condition: a unit that cannot persist
//! configuration is recovered through the local access point, not silently.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::manager::{
    Mailbox, Msg, RequestKind, RequestRejected, StateCell, StateKind, WaitOutcome,
};
use crate::storage::{ConfigStore, StorageError, UNIT_CONFIG_KEY};
use crate::system::{SystemEvents, SystemSignal};

use super::codec::{self, CodecError};
use super::model::{UnitConfiguration, CONFIG_VERSION};
use super::store::SharedConfig;

/// States published by the config manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigState {
    Uninitialized,
    Ready,
    Busy,
}

impl StateKind for ConfigState {
    fn mask(self) -> u32 {
        match self {
            Self::Uninitialized => 1 << 0,
            Self::Ready => 1 << 1,
            Self::Busy => 1 << 2,
        }
    }
}

/// Requests accepted by the config manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigRequest {
    Init,
    Read,
    Write,
    Shutdown,
}

impl RequestKind for ConfigRequest {
    const PRIORITY: &'static [Self] = &[Self::Shutdown, Self::Init, Self::Read, Self::Write];
}

/// Errors returned to callers of the request-facing operations.
#[derive(Debug, Clone)]
pub enum ConfigError {
    Codec(CodecError),
    Storage(StorageError),
    Rejected(RequestRejected),
    /// The bounded wait for completion elapsed.
    Timeout,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "codec error: {}", e),
            Self::Storage(e) => write!(f, "storage error: {}", e),
            Self::Rejected(e) => write!(f, "{}", e),
            Self::Timeout => write!(f, "configuration operation timed out"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::Rejected(e) => Some(e),
            Self::Timeout => None,
        }
    }
}

impl From<CodecError> for ConfigError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

type OpResult = Result<(), ConfigError>;
type Responders = Arc<Mutex<HashMap<ConfigRequest, Vec<mpsc::Sender<OpResult>>>>>;

/// Cloneable handle to the config manager.
///
/// All handles talk to the same worker thread; the worker is the only
/// mutator of the manager state.
#[derive(Clone)]
pub struct ConfigManager {
    mailbox: Mailbox<ConfigRequest, Infallible>,
    states: StateCell<ConfigState>,
    responders: Responders,
}

impl ConfigManager {
    /// Create the manager and spawn its worker thread.
    pub fn create(
        store: Box<dyn ConfigStore>,
        shared: SharedConfig,
        system: SystemEvents,
    ) -> Self {
        let manager = Self {
            mailbox: Mailbox::new(),
            states: StateCell::new(ConfigState::Uninitialized),
            responders: Arc::new(Mutex::new(HashMap::new())),
        };

        let worker = Worker {
            mailbox: manager.mailbox.clone(),
            states: manager.states.clone(),
            responders: Arc::clone(&manager.responders),
            store,
            shared,
            system,
            current: ConfigState::Uninitialized,
        };
        thread::Builder::new()
            .name("config-manager".to_string())
            .spawn(move || worker.run())
            .expect("failed to spawn config manager worker");

        manager
    }

    /// Enqueue a state request without waiting for completion.
    ///
    /// Rejects requests that are illegal in the currently published state;
    /// the worker re-validates against its own state before acting.
    pub fn request_state(&self, request: ConfigRequest) -> Result<(), RequestRejected> {
        self.validate(request)?;
        self.mailbox.post_request(request);
        Ok(())
    }

    /// Block until `state` has been published.
    pub fn wait_until(&self, state: ConfigState, timeout: Duration) -> WaitOutcome {
        self.states.wait_until(state, timeout)
    }

    /// The most recently published state.
    pub fn state(&self) -> ConfigState {
        self.states.current()
    }

    /// Initialize the store and load (or synthesize) the configuration.
    pub fn init(&self, timeout: Duration) -> OpResult {
        self.execute(ConfigRequest::Init, timeout)
    }

    /// Reload the shared configuration from storage.
    pub fn read(&self, timeout: Duration) -> OpResult {
        self.execute(ConfigRequest::Read, timeout)
    }

    /// Persist the current shared configuration.
    pub fn write(&self, timeout: Duration) -> OpResult {
        self.execute(ConfigRequest::Write, timeout)
    }

    /// Close the store and return to `Uninitialized`.
    pub fn shutdown(&self, timeout: Duration) -> OpResult {
        self.execute(ConfigRequest::Shutdown, timeout)
    }

    /// Stop the worker thread. Pending requests are still served first.
    pub fn stop(&self) {
        self.mailbox.close();
    }

    fn validate(&self, request: ConfigRequest) -> Result<(), RequestRejected> {
        match (self.states.current(), request) {
            // One operation in flight; nothing queues past it.
            (ConfigState::Busy, _) => Err(RequestRejected {
                reason: "config manager busy",
            }),
            (ConfigState::Uninitialized, ConfigRequest::Read)
            | (ConfigState::Uninitialized, ConfigRequest::Write)
            | (ConfigState::Uninitialized, ConfigRequest::Shutdown) => Err(RequestRejected {
                reason: "config manager not initialized",
            }),
            _ => Ok(()),
        }
    }

    fn execute(&self, request: ConfigRequest, timeout: Duration) -> OpResult {
        self.validate(request).map_err(ConfigError::Rejected)?;

        let (tx, rx) = mpsc::channel();
        {
            let mut responders = self.responders.lock().unwrap_or_else(|p| p.into_inner());
            responders.entry(request).or_default().push(tx);
        }
        self.mailbox.post_request(request);

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => Err(ConfigError::Timeout),
        }
    }
}

struct Worker {
    mailbox: Mailbox<ConfigRequest, Infallible>,
    states: StateCell<ConfigState>,
    responders: Responders,
    store: Box<dyn ConfigStore>,
    shared: SharedConfig,
    system: SystemEvents,
    current: ConfigState,
}

impl Worker {
    fn run(mut self) {
        while let Some(msg) = self.mailbox.next() {
            let request = match msg {
                Msg::Request(request) => request,
                Msg::Event(never) => match never {},
            };
            let result = self.transition(request);
            match &result {
                Ok(()) => info!("config manager: {:?} complete", request),
                Err(e) => warn!("config manager: {:?} failed: {}", request, e),
            }
            self.respond(request, result);
        }
        info!("config manager: worker stopped");
    }

    fn respond(&self, request: ConfigRequest, result: OpResult) {
        let senders = {
            let mut responders = self.responders.lock().unwrap_or_else(|p| p.into_inner());
            responders.remove(&request).unwrap_or_default()
        };
        // Coalesced callers all receive the one execution's result; a
        // caller that already timed out just drops the send.
        for sender in senders {
            let _ = sender.send(result.clone());
        }
    }

    fn publish(&mut self, state: ConfigState) {
        self.current = state;
        self.states.publish(state);
    }

    fn transition(&mut self, request: ConfigRequest) -> OpResult {
        match (self.current, request) {
            (ConfigState::Uninitialized, ConfigRequest::Init) => self.do_init(),
            // Re-requesting the state we are already in: no side effects.
            (ConfigState::Ready, ConfigRequest::Init) => Ok(()),
            (ConfigState::Ready, ConfigRequest::Read) => {
                self.publish(ConfigState::Busy);
                let result = self.do_read();
                self.publish(ConfigState::Ready);
                result
            }
            (ConfigState::Ready, ConfigRequest::Write) => {
                self.publish(ConfigState::Busy);
                let result = self.do_write();
                self.publish(ConfigState::Ready);
                result
            }
            (ConfigState::Ready, ConfigRequest::Shutdown) => {
                self.store.close();
                self.publish(ConfigState::Uninitialized);
                Ok(())
            }
            (state, request) => {
                error!(
                    "config manager: illegal transition {:?} in state {:?}",
                    request, state
                );
                Err(ConfigError::Rejected(RequestRejected {
                    reason: "illegal transition",
                }))
            }
        }
    }

    fn do_init(&mut self) -> OpResult {
        if let Err(e) = self.store.open() {
            self.degrade(&e);
            return Err(e.into());
        }

        // Implicit read: the loaded (or synthesized) configuration becomes
        // the shared configuration.
        let config = self.load_or_rebuild()?;
        self.install(config);
        self.publish(ConfigState::Ready);
        Ok(())
    }

    /// Fetch and decode the stored blob, rebuilding from compiled-in
    /// defaults when it is absent, carries a foreign version byte, or
    /// cannot be decoded.
    fn load_or_rebuild(&mut self) -> Result<UnitConfiguration, ConfigError> {
        let stored = match self.store.get(UNIT_CONFIG_KEY) {
            Ok(stored) => stored,
            Err(e) => {
                self.degrade(&e);
                return Err(e.into());
            }
        };

        match stored {
            Some(blob) if blob.first() == Some(&CONFIG_VERSION) => match codec::decode(&blob) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    warn!("config manager: stored blob is corrupt ({}), rebuilding", e);
                }
            },
            Some(blob) => {
                warn!(
                    "config manager: stored version {:?} != firmware {}, rebuilding defaults",
                    blob.first(),
                    CONFIG_VERSION
                );
            }
            None => {
                info!("config manager: no stored configuration, writing defaults");
            }
        }

        let defaults = UnitConfiguration::factory_defaults();
        let blob = codec::encode(&defaults)?;
        if let Err(e) = self
            .store
            .put(UNIT_CONFIG_KEY, &blob)
            .and_then(|()| self.store.commit())
        {
            self.degrade(&e);
            return Err(e.into());
        }
        Ok(defaults)
    }

    fn do_read(&mut self) -> OpResult {
        let blob = match self.store.get(UNIT_CONFIG_KEY) {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                let e = StorageError::NotFound;
                self.degrade(&e);
                return Err(e.into());
            }
            Err(e) => {
                self.degrade(&e);
                return Err(e.into());
            }
        };

        // Decode to a scratch config first; the shared instance is only
        // touched once the whole blob validated.
        let config = codec::decode(&blob)?;
        self.install(config);
        Ok(())
    }

    fn do_write(&mut self) -> OpResult {
        let snapshot = self.shared.snapshot();
        let blob = codec::encode(&snapshot)?;
        debug_assert_eq!(blob.len(), codec::encoded_len(&snapshot));

        if let Err(e) = self
            .store
            .put(UNIT_CONFIG_KEY, &blob)
            .and_then(|()| self.store.commit())
        {
            self.degrade(&e);
            return Err(e.into());
        }
        info!("config manager: {} byte configuration stored", blob.len());
        Ok(())
    }

    /// Swap a decoded configuration into the shared store, preserving the
    /// runtime connectivity flag.
    fn install(&self, mut config: UnitConfiguration) {
        let level = config.system.log_level;
        {
            let mut guard = self.shared.acquire();
            config.wifi_connected = guard.wifi_connected;
            *guard = config;
        }
        log::set_max_level(level.to_level_filter());
    }

    fn degrade(&self, error: &StorageError) {
        error!("config manager: storage failure: {}", error);
        self.system.raise(SystemSignal::StorageDegraded);
    }
}
