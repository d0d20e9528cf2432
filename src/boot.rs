//! Boot sequencer.
//!
//! Walks the managers through the fixed startup handshake: configuration
//! first, then the station attempt, then the recovery portal if the unit
//! did not get online. Every wait is bounded; an overall timeout resolves
//! to the access-point path rather than hanging the boot thread.

use std::time::Duration;

use log::{error, info, warn};

use crate::config::ConfigManager;
use crate::manager::StateKind;
use crate::portal::{PortalManager, PortalRequest, PortalState};
use crate::wifi::{WifiManager, WifiRequest, WifiState};

/// Bounds for each boot phase.
#[derive(Debug, Clone, Copy)]
pub struct BootTimeouts {
    /// Store open plus initial load.
    pub config_ready: Duration,
    /// Scan, connect, and the whole retry budget.
    pub station: Duration,
    /// Portal bring-up, and the forced access-point fallback.
    pub portal: Duration,
}

impl Default for BootTimeouts {
    fn default() -> Self {
        Self {
            config_ready: Duration::from_secs(10),
            station: Duration::from_secs(120),
            portal: Duration::from_secs(15),
        }
    }
}

/// How the unit came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// On the configured network; continuation tasks may run.
    Online,
    /// Broadcasting the recovery access point, waiting for an operator.
    Portal,
}

/// Run the startup handshake.
///
/// The caller owns the shared store and the three managers; this only
/// sequences them. The station attempt races `StationConnected` against
/// `AccessPoint`, first one published wins.
pub fn boot(
    config: &ConfigManager,
    wifi: &WifiManager,
    portal: &PortalManager,
    timeouts: BootTimeouts,
) -> BootOutcome {
    match config.init(timeouts.config_ready) {
        Ok(()) => {
            info!("boot: configuration ready");
            wifi.request_state(WifiRequest::Station);
        }
        Err(e) => {
            // Without configuration the only useful mode is the portal.
            error!("boot: configuration unavailable: {}", e);
            wifi.request_state(WifiRequest::AccessPoint);
        }
    }

    let raced = WifiState::StationConnected.mask() | WifiState::AccessPoint.mask();
    if !wifi.wait_any(raced, timeouts.station).is_reached() {
        warn!("boot: station attempt timed out, forcing access point");
        wifi.request_state(WifiRequest::AccessPoint);
        wifi.wait_until(WifiState::AccessPoint, timeouts.portal);
    }

    // Online requires an actual association. An access point, once reached,
    // wins the race even if a connection briefly succeeded first; and a unit
    // whose fallback never came up either is not online, it is an operator
    // problem.
    if wifi.reached(WifiState::StationConnected) && !wifi.reached(WifiState::AccessPoint) {
        info!("boot: online");
        return BootOutcome::Online;
    }

    portal.request_state(PortalRequest::Serving);
    portal.request_state(PortalRequest::Dns);
    if !portal
        .wait_until(PortalState::DnsActive, timeouts.portal)
        .is_reached()
    {
        warn!("boot: portal bring-up incomplete");
    }
    info!("boot: recovery portal up");
    BootOutcome::Portal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::defaults;
    use crate::config::SharedConfig;
    use crate::portal::{PortalError, PortalService};
    use crate::storage::MemoryStore;
    use crate::system::SystemEvents;
    use crate::wifi::{
        EventSink, Radio, RadioError, RadioEvent, ScanRecord, WifiOptions,
    };
    use std::sync::{Arc, Mutex};

    fn fast_timeouts() -> BootTimeouts {
        BootTimeouts {
            config_ready: Duration::from_secs(5),
            station: Duration::from_secs(5),
            portal: Duration::from_secs(5),
        }
    }

    /// Radio that sees exactly the networks it is scripted with and accepts
    /// any connect.
    struct ScriptRadio {
        sink: EventSink,
        visible: Vec<ScanRecord>,
    }

    impl Radio for ScriptRadio {
        fn start_station(&mut self) -> Result<(), RadioError> {
            Ok(())
        }

        fn scan_start(&mut self) -> Result<(), RadioError> {
            self.sink.post(RadioEvent::ScanComplete {
                records: self.visible.clone(),
            });
            Ok(())
        }

        fn set_station_credential(&mut self, _: &str, _: &str) -> Result<(), RadioError> {
            Ok(())
        }

        fn connect(&mut self) -> Result<(), RadioError> {
            self.sink.post(RadioEvent::AddressObtained {
                ip: "10.0.0.9".to_string(),
            });
            Ok(())
        }

        fn start_access_point(&mut self, _: &str, _: &str) -> Result<(), RadioError> {
            Ok(())
        }

        fn stop(&mut self) -> Result<(), RadioError> {
            Ok(())
        }
    }

    /// Radio on which neither station nor access-point mode comes up.
    struct DeadRadio;

    impl Radio for DeadRadio {
        fn start_station(&mut self) -> Result<(), RadioError> {
            Err(RadioError::Operation("station start failed".to_string()))
        }

        fn scan_start(&mut self) -> Result<(), RadioError> {
            Err(RadioError::Operation("scan failed".to_string()))
        }

        fn set_station_credential(&mut self, _: &str, _: &str) -> Result<(), RadioError> {
            Ok(())
        }

        fn connect(&mut self) -> Result<(), RadioError> {
            Err(RadioError::Operation("connect failed".to_string()))
        }

        fn start_access_point(&mut self, _: &str, _: &str) -> Result<(), RadioError> {
            Err(RadioError::Operation("access point start failed".to_string()))
        }

        fn stop(&mut self) -> Result<(), RadioError> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingPortal {
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl PortalService for RecordingPortal {
        fn start_http(&mut self) -> Result<(), PortalError> {
            self.calls.lock().unwrap().push("http");
            Ok(())
        }

        fn start_dns(&mut self) -> Result<(), PortalError> {
            self.calls.lock().unwrap().push("dns");
            Ok(())
        }

        fn stop(&mut self) {}
    }

    struct Fixture {
        config: ConfigManager,
        wifi: WifiManager,
        portal: PortalManager,
        portal_service: RecordingPortal,
        shared: SharedConfig,
    }

    fn fixture(store: MemoryStore, visible: Vec<ScanRecord>) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let shared = SharedConfig::new();
        let system = SystemEvents::new();
        let config = ConfigManager::create(Box::new(store), shared.clone(), system.clone());
        let wifi = WifiManager::create(
            move |sink| Ok(Box::new(ScriptRadio { sink, visible }) as Box<dyn Radio>),
            shared.clone(),
            system,
            WifiOptions {
                max_retries: 3,
                retry_backoff: Duration::from_millis(1),
            },
        )
        .unwrap();
        let portal_service = RecordingPortal::default();
        let portal = PortalManager::create(Box::new(portal_service.clone()));
        Fixture {
            config,
            wifi,
            portal,
            portal_service,
            shared,
        }
    }

    impl Fixture {
        fn shutdown(&self) {
            self.config.stop();
            self.wifi.stop();
            self.portal.stop();
        }
    }

    #[test]
    fn test_fresh_unit_with_default_network_visible_comes_online() {
        let visible = vec![ScanRecord {
            ssid: defaults::SSID.to_string(),
            rssi: -55,
        }];
        let f = fixture(MemoryStore::new(), visible);

        let outcome = boot(&f.config, &f.wifi, &f.portal, fast_timeouts());
        assert_eq!(outcome, BootOutcome::Online);
        assert!(f.shared.is_wifi_connected());
        assert!(f.portal_service.calls.lock().unwrap().is_empty());
        f.shutdown();
    }

    #[test]
    fn test_no_known_network_ends_in_portal() {
        let visible = vec![ScanRecord {
            ssid: "someone-elses".to_string(),
            rssi: -40,
        }];
        let f = fixture(MemoryStore::new(), visible);

        let outcome = boot(&f.config, &f.wifi, &f.portal, fast_timeouts());
        assert_eq!(outcome, BootOutcome::Portal);
        assert_eq!(f.wifi.state(), WifiState::AccessPoint);
        assert_eq!(*f.portal_service.calls.lock().unwrap(), vec!["http", "dns"]);
        f.shutdown();
    }

    #[test]
    fn test_dead_radio_is_not_reported_online() {
        let _ = env_logger::builder().is_test(true).try_init();
        let shared = SharedConfig::new();
        let system = SystemEvents::new();
        let config = ConfigManager::create(
            Box::new(MemoryStore::new()),
            shared.clone(),
            system.clone(),
        );
        let wifi = WifiManager::create(
            |_| Ok(Box::new(DeadRadio) as Box<dyn Radio>),
            shared.clone(),
            system,
            WifiOptions {
                max_retries: 3,
                retry_backoff: Duration::from_millis(1),
            },
        )
        .unwrap();
        let portal_service = RecordingPortal::default();
        let portal = PortalManager::create(Box::new(portal_service.clone()));

        // Station and the forced access-point fallback both fail, so no
        // wifi state is ever published; the only honest outcome is the
        // portal path, never Online.
        let timeouts = BootTimeouts {
            config_ready: Duration::from_secs(5),
            station: Duration::from_millis(200),
            portal: Duration::from_millis(200),
        };
        let outcome = boot(&config, &wifi, &portal, timeouts);
        assert_eq!(outcome, BootOutcome::Portal);
        assert!(!shared.is_wifi_connected());
        assert_eq!(*portal_service.calls.lock().unwrap(), vec!["http", "dns"]);
        config.stop();
        wifi.stop();
        portal.stop();
    }

    #[test]
    fn test_unusable_storage_ends_in_portal() {
        let store = MemoryStore::new();
        store.fail_open();
        // The network is visible, but without configuration the boot goes
        // straight to the recovery path.
        let visible = vec![ScanRecord {
            ssid: defaults::SSID.to_string(),
            rssi: -55,
        }];
        let f = fixture(store, visible);

        let outcome = boot(&f.config, &f.wifi, &f.portal, fast_timeouts());
        assert_eq!(outcome, BootOutcome::Portal);
        assert!(!f.shared.is_wifi_connected());
        f.shutdown();
    }
}
