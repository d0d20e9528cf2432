//! Unit configuration data structures.
//!
//! Platform-independent types for the persisted device configuration.
//! One [`UnitConfiguration`] instance lives in the shared config store for
//! the lifetime of the process; everything here validates its length limits
//! at mutation time so the codec can rely on them.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum passphrase length for WPA2.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Maximum length of the OTA and version-check URLs.
pub const MAX_URL_LEN: usize = 255;

/// Maximum length of the user-assigned unit name.
pub const MAX_UNIT_NAME_LEN: usize = 64;

/// Maximum number of stored credentials (count is one byte on the wire).
pub const MAX_CREDENTIALS: usize = 255;

/// Current on-flash configuration format version.
pub const CONFIG_VERSION: u8 = 1;

/// Compiled-in defaults, written on first boot or after a format change.
pub mod defaults {
    /// SSID of the default station credential.
    pub const SSID: &str = "foundation-home";
    /// Passphrase of the default station credential.
    pub const PASSWORD: &str = "changeme123";
    /// Default firmware image endpoint.
    pub const OTA_URL: &str = "https://firmware.example.com/unit.bin";
    /// Default firmware version endpoint.
    pub const VERSION_URL: &str = "https://firmware.example.com/version";
    /// Default unit name.
    pub const UNIT_NAME: &str = "unit";
    /// Recovery access-point SSID (never user-configurable).
    pub const AP_SSID: &str = "unit-recovery";
    /// Recovery access-point passphrase.
    pub const AP_PASSWORD: &str = "configure-me";
}

/// Log verbosity stored in the system settings.
///
/// Wire values 0..=5 match the stored byte exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    None = 0,
    Error = 1,
    Warn = 2,
    #[default]
    Info = 3,
    Debug = 4,
    Verbose = 5,
}

impl LogLevel {
    /// Parse a stored byte. Returns `None` for out-of-range values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Error),
            2 => Some(Self::Warn),
            3 => Some(Self::Info),
            4 => Some(Self::Debug),
            5 => Some(Self::Verbose),
            _ => None,
        }
    }

    /// Map onto the `log` crate's filter levels.
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::None => log::LevelFilter::Off,
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Verbose => log::LevelFilter::Trace,
        }
    }
}

/// A single stored station credential.
///
/// The passphrase is wiped from memory on drop. Credentials are only ever
/// replaced wholesale through the credential list, never edited in place.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct WifiCredential {
    /// Network SSID (1-32 bytes).
    pub ssid: String,
    /// Network passphrase (up to 64 bytes, empty for open networks).
    pub password: String,
}

impl WifiCredential {
    /// Create a credential, validating the length limits.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Result<Self, ModelError> {
        let credential = Self {
            ssid: ssid.into(),
            password: password.into(),
        };
        credential.validate()?;
        Ok(credential)
    }

    /// Validate against the wire-format limits.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.ssid.is_empty() {
            return Err(ModelError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ModelError::FieldTooLong {
                field: "ssid",
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(ModelError::FieldTooLong {
                field: "password",
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }
        Ok(())
    }
}

// Manual Debug so passphrases never end up in logs.
impl fmt::Debug for WifiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredential")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connectivity section of the unit configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectivityConfig {
    /// Ordered credential list; order is the tie-break for equal-RSSI scans.
    pub credentials: Vec<WifiCredential>,
    /// Firmware image endpoint.
    pub ota_url: String,
    /// Firmware version endpoint.
    pub version_check_url: String,
}

impl ConnectivityConfig {
    /// Validate counts and string lengths against the wire format.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.credentials.len() > MAX_CREDENTIALS {
            return Err(ModelError::TooManyCredentials {
                count: self.credentials.len(),
            });
        }
        for credential in &self.credentials {
            credential.validate()?;
        }
        if self.ota_url.len() > MAX_URL_LEN {
            return Err(ModelError::FieldTooLong {
                field: "ota_url",
                len: self.ota_url.len(),
                max: MAX_URL_LEN,
            });
        }
        if self.version_check_url.len() > MAX_URL_LEN {
            return Err(ModelError::FieldTooLong {
                field: "version_check_url",
                len: self.version_check_url.len(),
                max: MAX_URL_LEN,
            });
        }
        Ok(())
    }
}

/// System settings section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemSettings {
    pub log_level: LogLevel,
}

/// User-editable section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserConfig {
    /// Optional unit name; absent is stored as a zero-length field.
    pub unit_name: Option<String>,
}

impl UserConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if let Some(name) = &self.unit_name {
            if name.len() > MAX_UNIT_NAME_LEN {
                return Err(ModelError::FieldTooLong {
                    field: "unit_name",
                    len: name.len(),
                    max: MAX_UNIT_NAME_LEN,
                });
            }
        }
        Ok(())
    }
}

/// The full persisted configuration plus the runtime connectivity flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitConfiguration {
    /// On-flash format version; must equal [`CONFIG_VERSION`] to be trusted.
    pub version: u8,
    pub connectivity: ConnectivityConfig,
    pub system: SystemSettings,
    pub user: UserConfig,
    /// Runtime-only flag, never persisted.
    pub wifi_connected: bool,
}

impl Default for UnitConfiguration {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            connectivity: ConnectivityConfig::default(),
            system: SystemSettings::default(),
            user: UserConfig::default(),
            wifi_connected: false,
        }
    }
}

impl UnitConfiguration {
    /// Configuration synthesized on a fresh device or format change.
    pub fn factory_defaults() -> Self {
        Self {
            version: CONFIG_VERSION,
            connectivity: ConnectivityConfig {
                credentials: vec![WifiCredential {
                    ssid: defaults::SSID.to_string(),
                    password: defaults::PASSWORD.to_string(),
                }],
                ota_url: defaults::OTA_URL.to_string(),
                version_check_url: defaults::VERSION_URL.to_string(),
            },
            system: SystemSettings {
                log_level: LogLevel::Info,
            },
            user: UserConfig {
                unit_name: Some(defaults::UNIT_NAME.to_string()),
            },
            wifi_connected: false,
        }
    }

    /// Validate every section against the wire-format limits.
    pub fn validate(&self) -> Result<(), ModelError> {
        self.connectivity.validate()?;
        self.user.validate()?;
        Ok(())
    }
}

/// Errors from constructing or validating configuration values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// SSID cannot be empty.
    SsidEmpty,
    /// A string field exceeds its wire-format limit.
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    /// Credential count does not fit in one byte.
    TooManyCredentials { count: usize },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::FieldTooLong { field, len, max } => {
                write!(f, "{} too long: {} bytes (max {})", field, len, max)
            }
            Self::TooManyCredentials { count } => {
                write!(f, "too many credentials: {} (max {})", count, MAX_CREDENTIALS)
            }
        }
    }
}

impl std::error::Error for ModelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_credential() {
        let credential = WifiCredential::new("TestNetwork", "password123").unwrap();
        assert_eq!(credential.ssid, "TestNetwork");
        assert_eq!(credential.password, "password123");
    }

    #[test]
    fn test_empty_ssid() {
        let result = WifiCredential::new("", "password123");
        assert_eq!(result, Err(ModelError::SsidEmpty));
    }

    #[test]
    fn test_ssid_boundary() {
        assert!(WifiCredential::new("a".repeat(32), "pw").is_ok());
        assert!(matches!(
            WifiCredential::new("a".repeat(33), "pw"),
            Err(ModelError::FieldTooLong { field: "ssid", .. })
        ));
    }

    #[test]
    fn test_password_boundary() {
        assert!(WifiCredential::new("net", "a".repeat(64)).is_ok());
        assert!(matches!(
            WifiCredential::new("net", "a".repeat(65)),
            Err(ModelError::FieldTooLong {
                field: "password",
                ..
            })
        ));
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let credential = WifiCredential::new("net", "secretpw").unwrap();
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("secretpw"));
        assert!(debug.contains("net"));
    }

    #[test]
    fn test_log_level_round_trip() {
        for value in 0u8..=5 {
            let level = LogLevel::from_u8(value).unwrap();
            assert_eq!(level as u8, value);
        }
        assert_eq!(LogLevel::from_u8(6), None);
    }

    #[test]
    fn test_log_level_filter_mapping() {
        assert_eq!(LogLevel::None.to_level_filter(), log::LevelFilter::Off);
        assert_eq!(LogLevel::Verbose.to_level_filter(), log::LevelFilter::Trace);
    }

    #[test]
    fn test_url_too_long() {
        let config = ConnectivityConfig {
            credentials: Vec::new(),
            ota_url: "a".repeat(256),
            version_check_url: String::new(),
        };
        assert!(matches!(
            config.validate(),
            Err(ModelError::FieldTooLong {
                field: "ota_url",
                ..
            })
        ));
    }

    #[test]
    fn test_unit_name_boundary() {
        let user = UserConfig {
            unit_name: Some("a".repeat(64)),
        };
        assert!(user.validate().is_ok());
        let user = UserConfig {
            unit_name: Some("a".repeat(65)),
        };
        assert!(user.validate().is_err());
    }

    #[test]
    fn test_factory_defaults_are_valid() {
        let config = UnitConfiguration::factory_defaults();
        assert_eq!(config.version, CONFIG_VERSION);
        assert!(config.validate().is_ok());
        assert!(!config.wifi_connected);
        assert_eq!(config.connectivity.credentials.len(), 1);
    }

    #[test]
    fn test_default_version_matches_codec() {
        assert_eq!(UnitConfiguration::default().version, CONFIG_VERSION);
    }
}
