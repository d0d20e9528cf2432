//! `tiny_http`-backed portal service.
//!
//! Serves the configuration page, accepts credential submissions, and
//! redirects every other path back to the page so captive-portal probes land
//! on it. Works on both host and device since `tiny_http` only needs
//! `std::net`.

use std::io::Read;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use tiny_http::{Header, Method, Response, Server};

use crate::config::model::WifiCredential;
use crate::config::{ConfigManager, SharedConfig};
use crate::system::{SystemEvents, SystemSignal};

use super::manager::{PortalError, PortalService};
use super::{apply_connectivity_update, ConnectivityUpdate};

/// Default portal port. Port 80 so captive probes hit it without a port in
/// the URL.
pub const DEFAULT_PORTAL_PORT: u16 = 80;

const PORTAL_PAGE: &str = "<!DOCTYPE html>\n\
<html><head><title>Unit setup</title></head><body>\n\
<h1>Network setup</h1>\n\
<form method=\"post\" action=\"/wifi\">\n\
<label>Network name <input name=\"ssid\" maxlength=\"32\"></label><br>\n\
<label>Passphrase <input name=\"password\" type=\"password\" maxlength=\"64\"></label><br>\n\
<button type=\"submit\">Save</button>\n\
</form>\n\
<form method=\"post\" action=\"/reboot\">\n\
<button type=\"submit\">Reboot unit</button>\n\
</form></body></html>\n";

/// HTTP portal server.
///
/// The captive DNS responder itself is deployment machinery plugged in at a
/// higher level; `start_dns` here only records that clients are expected to
/// be steered by the platform resolver.
pub struct HttpPortal {
    bind_addr: String,
    shared: SharedConfig,
    config_manager: ConfigManager,
    system: SystemEvents,
    write_timeout: Duration,
    shutdown: Arc<AtomicBool>,
    local_addr: Arc<Mutex<Option<SocketAddr>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl HttpPortal {
    pub fn new(
        bind_addr: impl Into<String>,
        shared: SharedConfig,
        config_manager: ConfigManager,
        system: SystemEvents,
        write_timeout: Duration,
    ) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            shared,
            config_manager,
            system,
            write_timeout,
            shutdown: Arc::new(AtomicBool::new(false)),
            local_addr: Arc::new(Mutex::new(None)),
            handle: None,
        }
    }

    /// The address the listener actually bound, once serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn run_server(
        server: Server,
        shared: SharedConfig,
        config_manager: ConfigManager,
        system: SystemEvents,
        write_timeout: Duration,
        shutdown: Arc<AtomicBool>,
    ) {
        let html = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..])
            .expect("static header");
        let redirect = Header::from_bytes(&b"Location"[..], &b"/"[..]).expect("static header");

        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("portal http: shutting down");
                break;
            }
            match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(mut request)) => {
                    let method = request.method().clone();
                    let url = request.url().to_string();
                    let response = match (method, url.as_str()) {
                        (Method::Get, "/") | (Method::Get, "/index.html") => {
                            Response::from_string(PORTAL_PAGE).with_header(html.clone())
                        }
                        (Method::Post, "/reboot") => {
                            warn!("portal http: operator requested reboot");
                            system.raise(SystemSignal::RebootRequested);
                            Response::from_string("Rebooting.")
                        }
                        (Method::Post, "/wifi") => {
                            let mut body = String::new();
                            if request.as_reader().read_to_string(&mut body).is_err() {
                                Response::from_string("unreadable request body")
                                    .with_status_code(400)
                            } else {
                                handle_wifi_submission(
                                    &body,
                                    &shared,
                                    &config_manager,
                                    write_timeout,
                                )
                            }
                        }
                        // Captive probes land wherever; steer them home.
                        (Method::Get, _) => Response::from_string("")
                            .with_status_code(302)
                            .with_header(redirect.clone()),
                        _ => Response::from_string("Method Not Allowed").with_status_code(405),
                    };
                    if let Err(e) = request.respond(response) {
                        warn!("portal http: failed to send response: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("portal http: server error: {}", e);
                    break;
                }
            }
        }
    }
}

impl PortalService for HttpPortal {
    fn start_http(&mut self) -> Result<(), PortalError> {
        let server =
            Server::http(&self.bind_addr).map_err(|e| PortalError::Http(e.to_string()))?;
        *self.local_addr.lock().unwrap_or_else(|p| p.into_inner()) =
            server.server_addr().to_ip();
        info!("portal http: listening on {}", self.bind_addr);

        self.shutdown.store(false, Ordering::Release);
        let shared = self.shared.clone();
        let config_manager = self.config_manager.clone();
        let system = self.system.clone();
        let write_timeout = self.write_timeout;
        let shutdown = self.shutdown.clone();
        let handle = thread::Builder::new()
            .name("portal-http".to_string())
            .spawn(move || {
                Self::run_server(server, shared, config_manager, system, write_timeout, shutdown);
            })
            .map_err(|e| PortalError::Http(e.to_string()))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn start_dns(&mut self) -> Result<(), PortalError> {
        // The DNS-redirect responder is provided by the platform layer; the
        // portal only needs the listener it steers clients at.
        info!("portal http: captive DNS delegated to platform responder");
        Ok(())
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        *self.local_addr.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

impl Drop for HttpPortal {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_wifi_submission(
    body: &str,
    shared: &SharedConfig,
    config_manager: &ConfigManager,
    write_timeout: Duration,
) -> Response<std::io::Cursor<Vec<u8>>> {
    let fields = parse_form(body);
    let ssid = fields
        .iter()
        .find(|(k, _)| k == "ssid")
        .map(|(_, v)| v.as_str())
        .unwrap_or("");
    let password = fields
        .iter()
        .find(|(k, _)| k == "password")
        .map(|(_, v)| v.as_str())
        .unwrap_or("");

    let credential = match WifiCredential::new(ssid, password) {
        Ok(credential) => credential,
        Err(e) => {
            warn!("portal http: rejected credential submission: {}", e);
            return Response::from_string(format!("invalid submission: {}", e))
                .with_status_code(400);
        }
    };

    let update = ConnectivityUpdate {
        credentials: vec![credential],
        ..Default::default()
    };
    match apply_connectivity_update(shared, config_manager, update, write_timeout) {
        Ok(()) => Response::from_string(
            "Saved. The unit will join the new network after it restarts.",
        ),
        Err(e) => {
            error!("portal http: failed to persist submission: {}", e);
            Response::from_string(format!("failed to save: {}", e)).with_status_code(500)
        }
    }
}

/// Parse an `application/x-www-form-urlencoded` body.
fn parse_form(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(key), percent_decode(value))
        })
        .collect()
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (hex_value(bytes.get(i + 1)), hex_value(bytes.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                // Invalid escape passes through literally.
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: Option<&u8>) -> Option<u8> {
    match byte? {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, UNIT_CONFIG_KEY};
    use crate::system::SystemEvents;
    use std::io::Write;
    use std::net::TcpStream;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        portal: HttpPortal,
        shared: SharedConfig,
        manager: ConfigManager,
        store: MemoryStore,
        system: SystemEvents,
    }

    fn portal_fixture() -> Fixture {
        let store = MemoryStore::new();
        let shared = SharedConfig::new();
        let system = SystemEvents::new();
        let manager = ConfigManager::create(
            Box::new(store.clone()),
            shared.clone(),
            system.clone(),
        );
        manager.init(WAIT).unwrap();
        let portal = HttpPortal::new(
            "127.0.0.1:0",
            shared.clone(),
            manager.clone(),
            system.clone(),
            WAIT,
        );
        Fixture {
            portal,
            shared,
            manager,
            store,
            system,
        }
    }

    fn roundtrip(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(request.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_parse_form_decodes_plus_and_percent() {
        let fields = parse_form("ssid=cafe+net&password=p%40ss%2Fword");
        assert_eq!(
            fields,
            vec![
                ("ssid".to_string(), "cafe net".to_string()),
                ("password".to_string(), "p@ss/word".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_form_tolerates_malformed_pairs() {
        let fields = parse_form("lonely&ssid=x&bad%zz=1");
        assert_eq!(fields[0], ("lonely".to_string(), String::new()));
        assert_eq!(fields[1], ("ssid".to_string(), "x".to_string()));
        // An invalid escape passes through literally.
        assert_eq!(fields[2].0, "bad%zz");
    }

    #[test]
    fn test_serves_configuration_page() {
        let mut f = portal_fixture();
        f.portal.start_http().unwrap();
        let addr = f.portal.local_addr().unwrap();

        let response = roundtrip(
            addr,
            "GET / HTTP/1.1\r\nHost: unit\r\nConnection: close\r\n\r\n",
        );
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("<form"));
        f.portal.stop();
        f.manager.stop();
    }

    #[test]
    fn test_unknown_path_redirects_to_page() {
        let mut f = portal_fixture();
        f.portal.start_http().unwrap();
        let addr = f.portal.local_addr().unwrap();

        let response = roundtrip(
            addr,
            "GET /generate_204 HTTP/1.1\r\nHost: unit\r\nConnection: close\r\n\r\n",
        );
        assert!(response.starts_with("HTTP/1.1 302"));
        assert!(response.contains("Location: /"));
        f.portal.stop();
        f.manager.stop();
    }

    #[test]
    fn test_wifi_submission_updates_and_persists() {
        let mut f = portal_fixture();
        f.portal.start_http().unwrap();
        let addr = f.portal.local_addr().unwrap();

        let body = "ssid=cafe+net&password=espresso%21";
        let request = format!(
            "POST /wifi HTTP/1.1\r\nHost: unit\r\nConnection: close\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let response = roundtrip(addr, &request);
        assert!(response.starts_with("HTTP/1.1 200"));

        let snapshot = f.shared.snapshot();
        assert_eq!(snapshot.connectivity.credentials.len(), 1);
        assert_eq!(snapshot.connectivity.credentials[0].ssid, "cafe net");
        assert_eq!(snapshot.connectivity.credentials[0].password, "espresso!");

        // Persisted, not just in memory.
        let blob = f.store.get_raw(UNIT_CONFIG_KEY).unwrap();
        let stored = crate::config::decode(&blob).unwrap();
        assert_eq!(stored.connectivity.credentials[0].ssid, "cafe net");
        f.portal.stop();
        f.manager.stop();
    }

    #[test]
    fn test_wifi_submission_with_empty_ssid_is_rejected() {
        let mut f = portal_fixture();
        f.portal.start_http().unwrap();
        let addr = f.portal.local_addr().unwrap();
        let before = f.shared.snapshot();

        let body = "ssid=&password=x";
        let request = format!(
            "POST /wifi HTTP/1.1\r\nHost: unit\r\nConnection: close\r\n\
             Content-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let response = roundtrip(addr, &request);
        assert!(response.starts_with("HTTP/1.1 400"));
        assert_eq!(f.shared.snapshot(), before);
        f.portal.stop();
        f.manager.stop();
    }

    #[test]
    fn test_reboot_request_raises_signal() {
        let mut f = portal_fixture();
        f.portal.start_http().unwrap();
        let addr = f.portal.local_addr().unwrap();
        assert!(!f.system.is_raised(SystemSignal::RebootRequested));

        let response = roundtrip(
            addr,
            "POST /reboot HTTP/1.1\r\nHost: unit\r\nConnection: close\r\n\
             Content-Length: 0\r\n\r\n",
        );
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(f.system.is_raised(SystemSignal::RebootRequested));
        f.portal.stop();
        f.manager.stop();
    }
}
