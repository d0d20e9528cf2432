//! Versioned binary codec for the persisted configuration blob.
//!
//! Wire layout (little-endian, no padding):
//!
//! ```text
//! version:u8
//! credential_count:u8
//! ota_url_len:u8, ota_url_bytes
//! version_url_len:u8, version_url_bytes
//! credential_count x { ssid_len:u8, ssid_bytes, password_len:u8, password_bytes }
//! log_level:u8
//! name_len:u8, name_bytes
//! ```
//!
//! Every length field is validated against the remaining buffer before any
//! copy. A version mismatch means the whole blob is untrusted; decoding never
//! yields a partially-populated configuration.

use std::fmt;

use super::model::{
    ConnectivityConfig, LogLevel, ModelError, SystemSettings, UnitConfiguration, UserConfig,
    WifiCredential, CONFIG_VERSION,
};

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Stored format version differs from [`CONFIG_VERSION`].
    VersionMismatch { found: u8, expected: u8 },
    /// A length field disagrees with the actual blob size.
    SizeInconsistent,
    /// The in-memory configuration violates a wire-format limit.
    Invalid(ModelError),
    /// A stored string is not valid UTF-8.
    InvalidUtf8 { field: &'static str },
    /// The stored log level byte is out of range.
    InvalidLogLevel { value: u8 },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionMismatch { found, expected } => {
                write!(
                    f,
                    "configuration version mismatch: stored {} vs firmware {}",
                    found, expected
                )
            }
            Self::SizeInconsistent => write!(f, "blob size inconsistent with length fields"),
            Self::Invalid(e) => write!(f, "invalid configuration: {}", e),
            Self::InvalidUtf8 { field } => write!(f, "{} is not valid UTF-8", field),
            Self::InvalidLogLevel { value } => write!(f, "invalid log level byte: {}", value),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invalid(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ModelError> for CodecError {
    fn from(e: ModelError) -> Self {
        Self::Invalid(e)
    }
}

/// Exact encoded size of a configuration.
///
/// Drives the same length fields as [`encode`], so the two can never
/// disagree.
pub fn encoded_len(config: &UnitConfiguration) -> usize {
    let mut size = 1; // version
    size += 1; // credential_count
    size += 1 + config.connectivity.ota_url.len();
    size += 1 + config.connectivity.version_check_url.len();
    for credential in &config.connectivity.credentials {
        size += 1 + credential.ssid.len();
        size += 1 + credential.password.len();
    }
    size += 1; // log_level
    size += 1 + config.user.unit_name.as_deref().map_or(0, str::len);
    size
}

/// Encode a configuration into a freshly allocated blob of exactly
/// [`encoded_len`] bytes.
///
/// The runtime `wifi_connected` flag is not part of the wire format.
pub fn encode(config: &UnitConfiguration) -> Result<Vec<u8>, CodecError> {
    config.validate()?;

    let expected = encoded_len(config);
    let mut buf = Vec::with_capacity(expected);

    buf.push(CONFIG_VERSION);
    buf.push(config.connectivity.credentials.len() as u8);
    push_field(&mut buf, config.connectivity.ota_url.as_bytes());
    push_field(&mut buf, config.connectivity.version_check_url.as_bytes());
    for credential in &config.connectivity.credentials {
        push_field(&mut buf, credential.ssid.as_bytes());
        push_field(&mut buf, credential.password.as_bytes());
    }
    buf.push(config.system.log_level as u8);
    push_field(
        &mut buf,
        config.user.unit_name.as_deref().unwrap_or("").as_bytes(),
    );

    debug_assert_eq!(buf.len(), expected);
    Ok(buf)
}

fn push_field(buf: &mut Vec<u8>, bytes: &[u8]) {
    // Lengths fit in a byte: validate() enforces every limit <= 255.
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(bytes);
}

/// Decode a blob into a [`UnitConfiguration`].
///
/// `wifi_connected` always comes back `false`; connection state is runtime
/// information and never trusted from storage.
pub fn decode(blob: &[u8]) -> Result<UnitConfiguration, CodecError> {
    let mut reader = Reader::new(blob);

    let version = reader.read_u8()?;
    if version != CONFIG_VERSION {
        return Err(CodecError::VersionMismatch {
            found: version,
            expected: CONFIG_VERSION,
        });
    }

    let credential_count = reader.read_u8()? as usize;
    let ota_url = reader.read_string("ota_url")?;
    let version_check_url = reader.read_string("version_check_url")?;

    let mut credentials = Vec::with_capacity(credential_count);
    for _ in 0..credential_count {
        let ssid = reader.read_string("ssid")?;
        let password = reader.read_string("password")?;
        credentials.push(WifiCredential { ssid, password });
    }

    let log_level_byte = reader.read_u8()?;
    let log_level = LogLevel::from_u8(log_level_byte)
        .ok_or(CodecError::InvalidLogLevel {
            value: log_level_byte,
        })?;

    let name = reader.read_string("unit_name")?;
    let unit_name = if name.is_empty() { None } else { Some(name) };

    // Trailing bytes mean the length fields lied about the payload.
    if !reader.is_empty() {
        return Err(CodecError::SizeInconsistent);
    }

    let config = UnitConfiguration {
        version,
        connectivity: ConnectivityConfig {
            credentials,
            ota_url,
            version_check_url,
        },
        system: SystemSettings { log_level },
        user: UserConfig { unit_name },
        wifi_connected: false,
    };
    config.validate()?;
    Ok(config)
}

/// Bounds-checked cursor over the blob.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        let byte = *self.buf.get(self.pos).ok_or(CodecError::SizeInconsistent)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(len).ok_or(CodecError::SizeInconsistent)?;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or(CodecError::SizeInconsistent)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let len = self.read_u8()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
    }
}
