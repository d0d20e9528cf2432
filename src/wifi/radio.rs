//! Radio subsystem seam.
//!
//! The connectivity manager never talks to a wireless driver directly; it
//! drives a [`Radio`] and consumes the [`RadioEvent`]s the driver posts back
//! through an [`EventSink`]. On hardware the implementation wraps the ESP-IDF
//! driver; tests substitute a scripted fake.

use std::fmt;

use crate::manager::Mailbox;

use super::manager::WifiRequest;

/// One network discovered by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub ssid: String,
    /// Signal strength in dBm; higher is stronger.
    pub rssi: i8,
}

/// Why the station lost (or never gained) its association.
///
/// Informational only; the retry policy does not branch on the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    AuthExpired,
    AuthFailed,
    NoApFound,
    AssociationFailed,
    HandshakeTimeout,
    LeftNetwork,
    ComebackTooLong,
    ConnectionFailed,
    Other(u16),
}

impl DisconnectReason {
    /// Map an IEEE 802.11 / driver reason code.
    pub fn from_code(code: u16) -> Self {
        match code {
            2 => Self::AuthExpired,
            8 => Self::LeftNetwork,
            25 => Self::ComebackTooLong,
            201 => Self::NoApFound,
            202 => Self::AuthFailed,
            203 => Self::AssociationFailed,
            204 => Self::HandshakeTimeout,
            205 => Self::ConnectionFailed,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthExpired => write!(f, "authentication expired"),
            Self::AuthFailed => write!(f, "authentication failed"),
            Self::NoApFound => write!(f, "no access point found"),
            Self::AssociationFailed => write!(f, "association failed"),
            Self::HandshakeTimeout => write!(f, "handshake timed out"),
            Self::LeftNetwork => write!(f, "left the network"),
            Self::ComebackTooLong => write!(f, "association comeback time too long"),
            Self::ConnectionFailed => write!(f, "connection failed"),
            Self::Other(code) => write!(f, "reason code {}", code),
        }
    }
}

/// Completions delivered from the radio into the connectivity manager.
#[derive(Debug)]
pub enum RadioEvent {
    ScanComplete { records: Vec<ScanRecord> },
    Disconnected { reason: DisconnectReason },
    AddressObtained { ip: String },
    /// Internal reconnect backoff expired. The generation guards against
    /// timers scheduled before a state change.
    RetryElapsed { generation: u32 },
}

/// Handle a radio implementation uses to post completions.
#[derive(Clone)]
pub struct EventSink {
    mailbox: Mailbox<WifiRequest, RadioEvent>,
}

impl EventSink {
    pub(super) fn new(mailbox: Mailbox<WifiRequest, RadioEvent>) -> Self {
        Self { mailbox }
    }

    pub fn post(&self, event: RadioEvent) {
        self.mailbox.post_event(event);
    }
}

/// Errors surfaced by a radio implementation.
#[derive(Debug, Clone)]
pub enum RadioError {
    /// Bringing the driver up failed. Fatal to station mode.
    Init(String),
    /// A scan, connect, or access-point operation failed.
    Operation(String),
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(detail) => write!(f, "radio initialization failed: {}", detail),
            Self::Operation(detail) => write!(f, "radio operation failed: {}", detail),
        }
    }
}

impl std::error::Error for RadioError {}

/// Contract between the connectivity manager and a wireless driver.
///
/// `scan_start` and `connect` are asynchronous: they return once the driver
/// accepted the operation, and completion arrives later as a [`RadioEvent`]
/// through the [`EventSink`] handed to the implementation at construction.
pub trait Radio: Send {
    /// Bring the driver up in station mode.
    fn start_station(&mut self) -> Result<(), RadioError>;

    /// Begin a scan; completion posts [`RadioEvent::ScanComplete`].
    fn scan_start(&mut self) -> Result<(), RadioError>;

    /// Apply the credential to use for the next connect.
    fn set_station_credential(&mut self, ssid: &str, password: &str) -> Result<(), RadioError>;

    /// Attempt association; outcome posts `AddressObtained` or
    /// `Disconnected`.
    fn connect(&mut self) -> Result<(), RadioError>;

    /// Tear down station mode and broadcast a local access point.
    fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<(), RadioError>;

    /// Stop the driver entirely.
    fn stop(&mut self) -> Result<(), RadioError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_map_to_named_variants() {
        assert_eq!(DisconnectReason::from_code(201), DisconnectReason::NoApFound);
        assert_eq!(
            DisconnectReason::from_code(204),
            DisconnectReason::HandshakeTimeout
        );
        assert_eq!(DisconnectReason::from_code(999), DisconnectReason::Other(999));
    }

    #[test]
    fn test_reason_display_is_human_readable() {
        assert_eq!(
            DisconnectReason::NoApFound.to_string(),
            "no access point found"
        );
        assert_eq!(DisconnectReason::Other(7).to_string(), "reason code 7");
    }
}
