//! Portal manager.
//!
//! Drives the recovery portal through `Idle -> Serving -> DnsActive`. The
//! manager owns sequencing and state publication only; serving pages and
//! answering captive DNS happen behind the [`PortalService`] seam.
//!
//! Request priority (deliberate): Shutdown > Serving > Dns. A caller that
//! posts Serving and Dns together always gets the HTTP listener up before
//! DNS starts steering clients at it.

use std::convert::Infallible;
use std::fmt;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::manager::{Mailbox, Msg, RequestKind, StateCell, StateKind, WaitOutcome};

/// States published by the portal manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalState {
    Idle,
    /// The HTTP listener is up.
    Serving,
    /// Serving, plus captive DNS is steering clients at the listener.
    DnsActive,
}

impl StateKind for PortalState {
    fn mask(self) -> u32 {
        match self {
            Self::Idle => 1 << 0,
            Self::Serving => 1 << 1,
            Self::DnsActive => 1 << 2,
        }
    }
}

/// Requests accepted by the portal manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalRequest {
    Serving,
    Dns,
    Shutdown,
}

impl RequestKind for PortalRequest {
    const PRIORITY: &'static [Self] = &[Self::Shutdown, Self::Serving, Self::Dns];
}

/// Errors surfaced by a portal service implementation.
#[derive(Debug, Clone)]
pub enum PortalError {
    /// Binding or starting the HTTP listener failed.
    Http(String),
    /// Starting the captive DNS responder failed.
    Dns(String),
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(detail) => write!(f, "portal HTTP failed: {}", detail),
            Self::Dns(detail) => write!(f, "captive DNS failed: {}", detail),
        }
    }
}

impl std::error::Error for PortalError {}

/// Contract between the portal manager and the serving machinery.
pub trait PortalService: Send {
    /// Bring up the HTTP listener.
    fn start_http(&mut self) -> Result<(), PortalError>;

    /// Start answering captive DNS. Only called once the listener is up.
    fn start_dns(&mut self) -> Result<(), PortalError>;

    /// Tear everything down.
    fn stop(&mut self);
}

/// Cloneable handle to the portal manager.
#[derive(Clone)]
pub struct PortalManager {
    mailbox: Mailbox<PortalRequest, Infallible>,
    states: StateCell<PortalState>,
}

impl PortalManager {
    /// Create the manager and spawn its worker thread.
    pub fn create(service: Box<dyn PortalService>) -> Self {
        let manager = Self {
            mailbox: Mailbox::new(),
            states: StateCell::new(PortalState::Idle),
        };

        let worker = Worker {
            mailbox: manager.mailbox.clone(),
            states: manager.states.clone(),
            service,
            current: PortalState::Idle,
        };
        thread::Builder::new()
            .name("portal-manager".to_string())
            .spawn(move || worker.run())
            .expect("failed to spawn portal manager worker");

        manager
    }

    /// Enqueue a state request without waiting for completion.
    pub fn request_state(&self, request: PortalRequest) {
        self.mailbox.post_request(request);
    }

    /// Block until `state` has been published.
    pub fn wait_until(&self, state: PortalState, timeout: Duration) -> WaitOutcome {
        self.states.wait_until(state, timeout)
    }

    /// The most recently published state.
    pub fn state(&self) -> PortalState {
        self.states.current()
    }

    /// Stop the worker thread. Pending requests are still served first.
    pub fn stop(&self) {
        self.mailbox.close();
    }
}

struct Worker {
    mailbox: Mailbox<PortalRequest, Infallible>,
    states: StateCell<PortalState>,
    service: Box<dyn PortalService>,
    current: PortalState,
}

impl Worker {
    fn run(mut self) {
        while let Some(msg) = self.mailbox.next() {
            let request = match msg {
                Msg::Request(request) => request,
                Msg::Event(never) => match never {},
            };
            self.handle(request);
        }
        self.service.stop();
        info!("portal manager: worker stopped");
    }

    fn handle(&mut self, request: PortalRequest) {
        match (self.current, request) {
            (PortalState::Idle, PortalRequest::Serving) => match self.service.start_http() {
                Ok(()) => {
                    info!("portal manager: serving");
                    self.publish(PortalState::Serving);
                }
                Err(e) => error!("portal manager: {}", e),
            },
            (PortalState::Serving, PortalRequest::Dns) => match self.service.start_dns() {
                Ok(()) => {
                    info!("portal manager: captive DNS active");
                    self.publish(PortalState::DnsActive);
                }
                Err(e) => error!("portal manager: {}", e),
            },
            // DNS without a listener would steer clients at nothing.
            (PortalState::Idle, PortalRequest::Dns) => {
                warn!("portal manager: DNS requested while idle, ignoring");
            }
            (_, PortalRequest::Shutdown) => {
                self.service.stop();
                self.publish(PortalState::Idle);
            }
            (state, request) => {
                debug!("portal manager: {:?} in {:?} is a no-op", request, state);
            }
        }
    }

    fn publish(&mut self, state: PortalState) {
        self.current = state;
        self.states.publish(state);
    }
}
