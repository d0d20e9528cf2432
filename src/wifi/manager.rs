//! Connectivity manager.
//!
//! Drives the radio through `Idle -> Station -> StationConnected` with
//! `AccessPoint` as the universal fallback: no matching network, exhausted
//! reconnect retries, radio failures, and degraded storage all converge on
//! bringing up the local recovery access point.
//!
//! Request priority (deliberate): AccessPoint > Station. The fallback request
//! must win when both are pending.

use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::model::{defaults, WifiCredential};
use crate::config::SharedConfig;
use crate::manager::{Mailbox, Msg, RequestKind, StateCell, StateKind, WaitOutcome};
use crate::system::{SystemEvents, SystemSignal};

use super::radio::{EventSink, Radio, RadioError, RadioEvent, ScanRecord};

/// States published by the connectivity manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Idle,
    /// Station mode is up and a scan/connect cycle is in progress.
    Station,
    /// Station mode with an address obtained.
    StationConnected,
    AccessPoint,
}

impl StateKind for WifiState {
    fn mask(self) -> u32 {
        match self {
            Self::Idle => 1 << 0,
            Self::Station => 1 << 1,
            Self::StationConnected => 1 << 2,
            Self::AccessPoint => 1 << 3,
        }
    }
}

/// Requests accepted by the connectivity manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiRequest {
    Station,
    AccessPoint,
}

impl RequestKind for WifiRequest {
    const PRIORITY: &'static [Self] = &[Self::AccessPoint, Self::Station];
}

/// Tunable retry policy. The defaults match the firmware this replaces.
#[derive(Debug, Clone, Copy)]
pub struct WifiOptions {
    /// Consecutive disconnects tolerated before falling back to the access
    /// point.
    pub max_retries: u32,
    /// Delay before a reconnect attempt.
    pub retry_backoff: Duration,
}

impl Default for WifiOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_secs(30),
        }
    }
}

/// Cloneable handle to the connectivity manager.
#[derive(Clone)]
pub struct WifiManager {
    mailbox: Mailbox<WifiRequest, RadioEvent>,
    states: StateCell<WifiState>,
}

impl WifiManager {
    /// Create the manager and spawn its worker thread.
    ///
    /// `factory` builds the radio around the event sink the manager hands
    /// it; a factory error means the driver could not be brought up at all
    /// and is fatal to the manager instance.
    pub fn create<F>(
        factory: F,
        shared: SharedConfig,
        system: SystemEvents,
        options: WifiOptions,
    ) -> Result<Self, RadioError>
    where
        F: FnOnce(EventSink) -> Result<Box<dyn Radio>, RadioError>,
    {
        let mailbox: Mailbox<WifiRequest, RadioEvent> = Mailbox::new();
        let states = StateCell::new(WifiState::Idle);
        let radio = factory(EventSink::new(mailbox.clone()))?;

        let worker = Worker {
            mailbox: mailbox.clone(),
            states: states.clone(),
            sink: EventSink::new(mailbox.clone()),
            radio,
            shared,
            options,
            current: WifiState::Idle,
            retry_count: 0,
            retry_generation: 0,
        };
        thread::Builder::new()
            .name("wifi-manager".to_string())
            .spawn(move || worker.run())
            .expect("failed to spawn wifi manager worker");

        Self::spawn_degraded_watcher(mailbox.clone(), system);

        Ok(Self { mailbox, states })
    }

    /// A unit that cannot persist its configuration is only recoverable
    /// through the portal, so degraded storage forces the access point.
    fn spawn_degraded_watcher(mailbox: Mailbox<WifiRequest, RadioEvent>, system: SystemEvents) {
        thread::Builder::new()
            .name("wifi-degraded-watch".to_string())
            .spawn(move || loop {
                if system
                    .wait(SystemSignal::StorageDegraded, Duration::from_millis(200))
                    .is_reached()
                {
                    warn!("wifi manager: storage degraded, forcing access point");
                    mailbox.post_request(WifiRequest::AccessPoint);
                    return;
                }
                if mailbox.is_closed() {
                    return;
                }
            })
            .expect("failed to spawn degraded watcher");
    }

    /// Enqueue a state request without waiting for completion.
    pub fn request_state(&self, request: WifiRequest) {
        self.mailbox.post_request(request);
    }

    /// Block until `state` has been published.
    pub fn wait_until(&self, state: WifiState, timeout: Duration) -> WaitOutcome {
        self.states.wait_until(state, timeout)
    }

    /// Block until any state in `mask` has been published. The boot
    /// sequencer races `StationConnected` against `AccessPoint` with this.
    pub fn wait_any(&self, mask: u32, timeout: Duration) -> WaitOutcome {
        self.states.wait_any(mask, timeout)
    }

    /// Whether a state has ever been published.
    pub fn reached(&self, state: WifiState) -> bool {
        self.states.reached(state)
    }

    /// The most recently published state.
    pub fn state(&self) -> WifiState {
        self.states.current()
    }

    /// Stop the worker thread. Pending requests are still served first.
    pub fn stop(&self) {
        self.mailbox.close();
    }
}

/// Pick the strongest configured network from a scan.
///
/// Membership is an exact SSID match. Ties on signal strength resolve to
/// the record encountered first in scan-result order.
fn select_network<'a>(
    records: &'a [ScanRecord],
    credentials: &[WifiCredential],
) -> Option<&'a ScanRecord> {
    let mut best: Option<&ScanRecord> = None;
    for record in records {
        if !credentials.iter().any(|c| c.ssid == record.ssid) {
            continue;
        }
        match best {
            Some(current) if record.rssi <= current.rssi => {}
            _ => best = Some(record),
        }
    }
    best
}

struct Worker {
    mailbox: Mailbox<WifiRequest, RadioEvent>,
    states: StateCell<WifiState>,
    sink: EventSink,
    radio: Box<dyn Radio>,
    shared: SharedConfig,
    options: WifiOptions,
    current: WifiState,
    retry_count: u32,
    retry_generation: u32,
}

impl Worker {
    fn run(mut self) {
        while let Some(msg) = self.mailbox.next() {
            match msg {
                Msg::Request(request) => self.handle_request(request),
                Msg::Event(event) => self.handle_event(event),
            }
        }
        if let Err(e) = self.radio.stop() {
            debug!("wifi manager: radio stop on shutdown: {}", e);
        }
        info!("wifi manager: worker stopped");
    }

    fn handle_request(&mut self, request: WifiRequest) {
        match (self.current, request) {
            // Re-requesting the mode we are already in: no side effects.
            (WifiState::Station, WifiRequest::Station)
            | (WifiState::StationConnected, WifiRequest::Station)
            | (WifiState::AccessPoint, WifiRequest::AccessPoint) => {
                debug!("wifi manager: already in {:?}, ignoring {:?}", self.current, request);
            }
            (_, WifiRequest::Station) => self.enter_station(),
            (_, WifiRequest::AccessPoint) => self.enter_access_point(),
        }
    }

    fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::ScanComplete { records } => self.on_scan_complete(records),
            RadioEvent::Disconnected { reason } => self.on_disconnected(reason),
            RadioEvent::AddressObtained { ip } => self.on_address_obtained(ip),
            RadioEvent::RetryElapsed { generation } => self.on_retry_elapsed(generation),
        }
    }

    fn enter_station(&mut self) {
        self.retry_generation = self.retry_generation.wrapping_add(1);
        if self.current == WifiState::AccessPoint {
            if let Err(e) = self.radio.stop() {
                warn!("wifi manager: access point teardown: {}", e);
            }
        }

        let result = self
            .radio
            .start_station()
            .and_then(|()| self.radio.scan_start());
        match result {
            Ok(()) => {
                info!("wifi manager: station mode up, scanning");
                self.publish(WifiState::Station);
            }
            Err(e) => {
                error!("wifi manager: station bring-up failed: {}", e);
                self.enter_access_point();
            }
        }
    }

    fn enter_access_point(&mut self) {
        self.retry_generation = self.retry_generation.wrapping_add(1);
        if let Err(e) = self.radio.stop() {
            warn!("wifi manager: station teardown: {}", e);
        }
        self.set_connected(false);

        match self
            .radio
            .start_access_point(defaults::AP_SSID, defaults::AP_PASSWORD)
        {
            Ok(()) => {
                info!(
                    "wifi manager: recovery access point '{}' up",
                    defaults::AP_SSID
                );
                self.publish(WifiState::AccessPoint);
            }
            Err(e) => {
                // Nothing left to fall back to; the unit stays dark until
                // the next reboot.
                error!("wifi manager: access point bring-up failed: {}", e);
            }
        }
    }

    fn on_scan_complete(&mut self, records: Vec<ScanRecord>) {
        if self.current != WifiState::Station {
            debug!("wifi manager: scan result in {:?}, ignoring", self.current);
            return;
        }

        let credentials = self.shared.acquire().connectivity.credentials.clone();
        let selected = match select_network(&records, &credentials) {
            Some(record) => record,
            None => {
                warn!(
                    "wifi manager: none of {} scanned networks are configured",
                    records.len()
                );
                self.enter_access_point();
                return;
            }
        };
        info!(
            "wifi manager: selected '{}' at {} dBm",
            selected.ssid, selected.rssi
        );

        // select_network only returns SSIDs present in the credential list.
        let credential = credentials
            .iter()
            .find(|c| c.ssid == selected.ssid)
            .cloned();
        let Some(credential) = credential else {
            return;
        };

        let result = self
            .radio
            .set_station_credential(&credential.ssid, &credential.password)
            .and_then(|()| self.radio.connect());
        if let Err(e) = result {
            error!("wifi manager: connect to '{}' failed: {}", credential.ssid, e);
            self.enter_access_point();
        }
    }

    fn on_disconnected(&mut self, reason: super::radio::DisconnectReason) {
        if self.current != WifiState::Station && self.current != WifiState::StationConnected {
            return;
        }
        warn!("wifi manager: disconnected: {}", reason);
        self.set_connected(false);
        if self.current == WifiState::StationConnected {
            self.publish(WifiState::Station);
        }

        self.retry_count += 1;
        if self.retry_count >= self.options.max_retries {
            warn!(
                "wifi manager: {} consecutive disconnects, falling back to access point",
                self.retry_count
            );
            self.enter_access_point();
        } else {
            info!(
                "wifi manager: reconnect {}/{} in {:?}",
                self.retry_count, self.options.max_retries, self.options.retry_backoff
            );
            self.schedule_retry();
        }
    }

    fn on_address_obtained(&mut self, ip: String) {
        if self.current != WifiState::Station {
            debug!("wifi manager: address event in {:?}, ignoring", self.current);
            return;
        }
        info!("wifi manager: connected, address {}", ip);
        self.retry_count = 0;
        self.set_connected(true);
        self.publish(WifiState::StationConnected);
    }

    fn on_retry_elapsed(&mut self, generation: u32) {
        // Stale timer from before a mode change.
        if generation != self.retry_generation || self.current != WifiState::Station {
            return;
        }
        info!("wifi manager: reconnect attempt {}", self.retry_count);
        if let Err(e) = self.radio.connect() {
            error!("wifi manager: reconnect failed: {}", e);
            self.enter_access_point();
        }
    }

    fn schedule_retry(&self) {
        let sink = self.sink.clone();
        let generation = self.retry_generation;
        let backoff = self.options.retry_backoff;
        thread::Builder::new()
            .name("wifi-retry".to_string())
            .spawn(move || {
                thread::sleep(backoff);
                sink.post(RadioEvent::RetryElapsed { generation });
            })
            .expect("failed to spawn retry timer");
    }

    fn set_connected(&self, connected: bool) {
        self.shared.acquire().wifi_connected = connected;
    }

    fn publish(&mut self, state: WifiState) {
        self.current = state;
        self.states.publish(state);
    }
}
