//! ESP-IDF radio implementation.
//!
//! Wraps the blocking ESP-IDF WiFi driver. Scan and connect block the
//! calling worker thread and post their completion through the
//! [`EventSink`], so the manager sees the same event stream a
//! callback-driven driver would produce.

use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration,
    EspWifi,
};
use esp_idf_sys::EspError;
use log::{info, warn};

use super::radio::{
    DisconnectReason, EventSink, Radio, RadioError, RadioEvent, ScanRecord,
};

pub struct EspRadio {
    wifi: BlockingWifi<EspWifi<'static>>,
    sink: EventSink,
}

impl EspRadio {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        sink: EventSink,
    ) -> Result<Self, RadioError> {
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), None).map_err(init_err)?;
        let wifi = BlockingWifi::wrap(esp_wifi, sysloop).map_err(init_err)?;
        Ok(Self { wifi, sink })
    }
}

impl Radio for EspRadio {
    fn start_station(&mut self) -> Result<(), RadioError> {
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration::default()))
            .map_err(op_err)?;
        self.wifi.start().map_err(op_err)?;
        Ok(())
    }

    fn scan_start(&mut self) -> Result<(), RadioError> {
        let found = self.wifi.scan().map_err(op_err)?;
        let records = found
            .into_iter()
            .map(|ap| ScanRecord {
                ssid: ap.ssid.to_string(),
                rssi: ap.signal_strength,
            })
            .collect();
        self.sink.post(RadioEvent::ScanComplete { records });
        Ok(())
    }

    fn set_station_credential(&mut self, ssid: &str, password: &str) -> Result<(), RadioError> {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| RadioError::Operation("SSID too long for driver".to_string()))?,
            password: password
                .try_into()
                .map_err(|_| RadioError::Operation("password too long for driver".to_string()))?,
            auth_method,
            ..Default::default()
        });
        self.wifi.set_configuration(&config).map_err(op_err)?;
        Ok(())
    }

    fn connect(&mut self) -> Result<(), RadioError> {
        // Association or DHCP failure is a completion, not a driver fault:
        // it is reported as a disconnect event and the retry policy takes
        // over.
        let outcome = self
            .wifi
            .connect()
            .and_then(|()| self.wifi.wait_netif_up());
        match outcome {
            Ok(()) => {
                let ip_info = self
                    .wifi
                    .wifi()
                    .sta_netif()
                    .get_ip_info()
                    .map_err(op_err)?;
                self.sink.post(RadioEvent::AddressObtained {
                    ip: ip_info.ip.to_string(),
                });
            }
            Err(e) => {
                warn!("esp radio: association failed: {}", e);
                self.sink.post(RadioEvent::Disconnected {
                    reason: DisconnectReason::ConnectionFailed,
                });
            }
        }
        Ok(())
    }

    fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<(), RadioError> {
        let config = Configuration::AccessPoint(AccessPointConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| RadioError::Operation("AP SSID too long for driver".to_string()))?,
            password: password
                .try_into()
                .map_err(|_| RadioError::Operation("AP password too long".to_string()))?,
            auth_method: AuthMethod::WPA2Personal,
            ..Default::default()
        });
        self.wifi.set_configuration(&config).map_err(op_err)?;
        self.wifi.start().map_err(op_err)?;
        info!("esp radio: access point '{}' started", ssid);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RadioError> {
        self.wifi.stop().map_err(op_err)?;
        Ok(())
    }
}

fn init_err(e: EspError) -> RadioError {
    RadioError::Init(format!("{:?}", e))
}

fn op_err(e: EspError) -> RadioError {
    RadioError::Operation(format!("{:?}", e))
}
