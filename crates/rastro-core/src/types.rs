use crate::{
    Result,
    constants::{
        DEFAULT_HEARTBEAT_SECS, DEFAULT_LOCATION_SECS, DEFAULT_PORT, DEFAULT_RECONNECT_SECS,
        DEFAULT_SATELLITES, IMEI_BCD_BYTES, IMEI_DIGITS, MAX_HEARTBEAT_SECS, MAX_LOCATION_SECS,
        MIN_HEARTBEAT_SECS, MIN_LOCATION_SECS,
    },
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tracker identity: exactly 15 decimal digits.
///
/// Construction normalizes the raw input the way commodity GT06 firmware
/// does: shorter inputs are left-padded with `'0'`, longer inputs keep
/// their trailing 15 digits (the digits stay right-aligned either way).
/// Anything other than ASCII digits is rejected.
///
/// On the wire the IMEI travels as 8 BCD bytes: a leading `'0'` pad makes
/// 16 digits, packed two per byte with the first digit in the high nibble.
///
/// # Example
/// ```
/// use rastro_core::Imei;
///
/// let imei = Imei::parse("356932080000000").unwrap();
/// assert_eq!(
///     imei.to_bcd(),
///     [0x03, 0x56, 0x93, 0x20, 0x80, 0x00, 0x00, 0x00]
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Imei(String);

impl Imei {
    /// Parse and normalize an IMEI.
    ///
    /// # Errors
    /// Returns `Error::InvalidImei` if the input is empty or contains a
    /// non-digit character.
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_core::Imei;
    ///
    /// // Short inputs are left-padded to 15 digits.
    /// let imei = Imei::parse("98765").unwrap();
    /// assert_eq!(imei.as_str(), "000000000098765");
    ///
    /// assert!(Imei::parse("not-digits").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidImei("empty".to_string()));
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidImei(format!(
                "'{raw}' contains non-digit characters"
            )));
        }

        let digits = if raw.len() > IMEI_DIGITS {
            raw[raw.len() - IMEI_DIGITS..].to_string()
        } else {
            format!("{raw:0>15}")
        };

        Ok(Imei(digits))
    }

    /// The normalized 15-digit string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encode as 8 BCD bytes with the leading zero pad.
    #[must_use]
    pub fn to_bcd(&self) -> [u8; IMEI_BCD_BYTES] {
        let mut padded = [0u8; 16];
        padded[0] = 0;
        for (i, b) in self.0.bytes().enumerate() {
            padded[i + 1] = b - b'0';
        }

        let mut out = [0u8; IMEI_BCD_BYTES];
        for (i, chunk) in padded.chunks_exact(2).enumerate() {
            out[i] = (chunk[0] << 4) | chunk[1];
        }
        out
    }

    /// Decode from the 8-byte BCD wire form, dropping the pad digit.
    ///
    /// # Errors
    /// Returns `Error::InvalidImei` if any nibble is not a decimal digit.
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_core::Imei;
    ///
    /// let imei = Imei::parse("123456789012345").unwrap();
    /// assert_eq!(Imei::from_bcd(&imei.to_bcd()).unwrap(), imei);
    /// ```
    pub fn from_bcd(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != IMEI_BCD_BYTES {
            return Err(Error::InvalidImei(format!(
                "BCD IMEI must be {IMEI_BCD_BYTES} bytes, got {}",
                bytes.len()
            )));
        }

        let mut digits = String::with_capacity(16);
        for byte in bytes {
            let hi = byte >> 4;
            let lo = byte & 0x0F;
            if hi > 9 || lo > 9 {
                return Err(Error::InvalidImei(format!(
                    "byte {byte:#04X} is not valid BCD"
                )));
            }
            digits.push((b'0' + hi) as char);
            digits.push((b'0' + lo) as char);
        }

        // First nibble is the pad digit.
        Imei::parse(&digits[1..])
    }
}

impl fmt::Display for Imei {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Imei {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Imei::parse(s)
    }
}

impl TryFrom<String> for Imei {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Imei::parse(&s)
    }
}

impl From<Imei> for String {
    fn from(imei: Imei) -> String {
        imei.0
    }
}

/// A GPS fix as delivered by the host's position source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Speed in km/h; clamped to 0..=255 on the wire.
    pub speed_kmh: f64,
    /// Course over ground in degrees (0..360).
    pub course_deg: f64,
    pub timestamp: DateTime<Utc>,
    pub gps_valid: bool,
    pub satellites: u8,
}

impl Position {
    /// Convenience constructor for a valid fix "now" with default satellite
    /// count; the remaining fields can be adjusted with struct update syntax.
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_core::Position;
    ///
    /// let fix = Position {
    ///     speed_kmh: 50.0,
    ///     course_deg: 180.0,
    ///     ..Position::new(-23.55052, -46.63331)
    /// };
    /// assert!(fix.gps_valid);
    /// assert_eq!(fix.satellites, 8);
    /// ```
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Position {
            latitude,
            longitude,
            speed_kmh: 0.0,
            course_deg: 0.0,
            timestamp: Utc::now(),
            gps_valid: true,
            satellites: DEFAULT_SATELLITES,
        }
    }
}

/// Alarm categories a tracker can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    Sos,
    PowerCut,
    Shock,
    FenceEnter,
    FenceExit,
    Overspeed,
}

impl AlarmKind {
    /// Wire code carried in the alarm frame's type byte.
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_core::AlarmKind;
    ///
    /// assert_eq!(AlarmKind::Sos.code(), 0x01);
    /// assert_eq!(AlarmKind::from_code(0x02).unwrap(), AlarmKind::PowerCut);
    /// assert!(AlarmKind::from_code(0x7F).is_err());
    /// ```
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            AlarmKind::Sos => 0x01,
            AlarmKind::PowerCut => 0x02,
            AlarmKind::Shock => 0x03,
            AlarmKind::FenceEnter => 0x04,
            AlarmKind::FenceExit => 0x05,
            AlarmKind::Overspeed => 0x06,
        }
    }

    /// Decode a wire code.
    ///
    /// # Errors
    /// Returns a decode error for unknown alarm codes.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x01 => Ok(AlarmKind::Sos),
            0x02 => Ok(AlarmKind::PowerCut),
            0x03 => Ok(AlarmKind::Shock),
            0x04 => Ok(AlarmKind::FenceEnter),
            0x05 => Ok(AlarmKind::FenceExit),
            0x06 => Ok(AlarmKind::Overspeed),
            _ => Err(Error::decode("alarm", format!("unknown alarm code {code:#04X}"))),
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            AlarmKind::Sos => "SOS",
            AlarmKind::PowerCut => "PowerCut",
            AlarmKind::Shock => "Shock",
            AlarmKind::FenceEnter => "FenceEnter",
            AlarmKind::FenceExit => "FenceExit",
            AlarmKind::Overspeed => "Overspeed",
        };
        write!(f, "{name}")
    }
}

/// Connection lifecycle states of the tracker client.
///
/// # Valid transitions
///
/// - Disconnected → Connecting
/// - Connecting → Connected | Disconnected | Error
/// - Connected → LoggingIn | Disconnected
/// - LoggingIn → Online | Disconnected
/// - Online → Disconnected
/// - Error → Connecting | Disconnected
///
/// `Online` is only reachable through a login acknowledgement, and any
/// stream failure collapses the session back to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Disconnected,
    Connecting,
    Connected,
    LoggingIn,
    Online,
    Error,
}

impl TrackerState {
    /// Check whether a transition to `target` is part of the lifecycle.
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_core::TrackerState;
    ///
    /// assert!(TrackerState::LoggingIn.can_transition_to(&TrackerState::Online));
    /// assert!(!TrackerState::Connected.can_transition_to(&TrackerState::Online));
    /// ```
    #[must_use]
    pub fn can_transition_to(&self, target: &TrackerState) -> bool {
        matches!(
            (self, target),
            (TrackerState::Disconnected, TrackerState::Connecting)
                | (
                    TrackerState::Connecting,
                    TrackerState::Connected | TrackerState::Disconnected | TrackerState::Error
                )
                | (
                    TrackerState::Connected,
                    TrackerState::LoggingIn | TrackerState::Disconnected
                )
                | (
                    TrackerState::LoggingIn,
                    TrackerState::Online | TrackerState::Disconnected
                )
                | (TrackerState::Online, TrackerState::Disconnected)
                | (
                    TrackerState::Error,
                    TrackerState::Connecting | TrackerState::Disconnected
                )
        )
    }

    /// `true` while a session is being established or is established.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TrackerState::Connecting
                | TrackerState::Connected
                | TrackerState::LoggingIn
                | TrackerState::Online
        )
    }
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TrackerState::Disconnected => "Disconnected",
            TrackerState::Connecting => "Connecting",
            TrackerState::Connected => "Connected",
            TrackerState::LoggingIn => "LoggingIn",
            TrackerState::Online => "Online",
            TrackerState::Error => "Error",
        };
        write!(f, "{name}")
    }
}

/// Client configuration, supplied once at engine construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// GT06 server host name or address.
    pub host: String,

    /// GT06 server port.
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Tracker identity sent in the login frame.
    pub imei: Imei,

    /// Heartbeat cadence while online (5..=300 s).
    #[serde(default = "defaults::heartbeat_seconds")]
    pub heartbeat_seconds: u64,

    /// Location cadence while online (5..=3600 s).
    #[serde(default = "defaults::location_seconds")]
    pub location_seconds: u64,

    /// Base reconnect delay; the engine backs off exponentially from here.
    #[serde(default = "defaults::reconnect_seconds")]
    pub reconnect_seconds: u64,

    /// Consecutive failed attempts before the engine stops retrying.
    /// `-1` retries forever.
    #[serde(default = "defaults::max_reconnect_attempts")]
    pub max_reconnect_attempts: i32,
}

mod defaults {
    pub fn port() -> u16 {
        super::DEFAULT_PORT
    }
    pub fn heartbeat_seconds() -> u64 {
        super::DEFAULT_HEARTBEAT_SECS
    }
    pub fn location_seconds() -> u64 {
        super::DEFAULT_LOCATION_SECS
    }
    pub fn reconnect_seconds() -> u64 {
        super::DEFAULT_RECONNECT_SECS
    }
    pub fn max_reconnect_attempts() -> i32 {
        -1
    }
}

impl ClientConfig {
    /// Build a configuration with defaults, normalizing the IMEI.
    ///
    /// # Errors
    /// Returns `Error::InvalidImei` for unusable IMEI input.
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_core::ClientConfig;
    ///
    /// let config = ClientConfig::new("tracking.example.com", "98765").unwrap();
    /// assert_eq!(config.port, 5023);
    /// assert_eq!(config.imei.as_str(), "000000000098765");
    /// config.validate().unwrap();
    /// ```
    pub fn new(host: impl Into<String>, imei: &str) -> Result<Self> {
        Ok(ClientConfig {
            host: host.into(),
            port: DEFAULT_PORT,
            imei: Imei::parse(imei)?,
            heartbeat_seconds: DEFAULT_HEARTBEAT_SECS,
            location_seconds: DEFAULT_LOCATION_SECS,
            reconnect_seconds: DEFAULT_RECONNECT_SECS,
            max_reconnect_attempts: -1,
        })
    }

    /// Validate ranges the wire contract imposes.
    ///
    /// # Errors
    /// Returns `Error::Config` naming the offending field.
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_core::ClientConfig;
    ///
    /// let mut config = ClientConfig::new("127.0.0.1", "123456789012345").unwrap();
    /// config.heartbeat_seconds = 2; // below the 5 s floor
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must be 1..=65535".to_string()));
        }
        if !(MIN_HEARTBEAT_SECS..=MAX_HEARTBEAT_SECS).contains(&self.heartbeat_seconds) {
            return Err(Error::Config(format!(
                "heartbeat_seconds must be {MIN_HEARTBEAT_SECS}..={MAX_HEARTBEAT_SECS}, got {}",
                self.heartbeat_seconds
            )));
        }
        if !(MIN_LOCATION_SECS..=MAX_LOCATION_SECS).contains(&self.location_seconds) {
            return Err(Error::Config(format!(
                "location_seconds must be {MIN_LOCATION_SECS}..={MAX_LOCATION_SECS}, got {}",
                self.location_seconds
            )));
        }
        if self.reconnect_seconds == 0 {
            return Err(Error::Config(
                "reconnect_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-session traffic counters; reset when a connection attempt starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub heartbeats_ok: u64,
    pub locations_ok: u64,
    pub commands_received: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionCounters {
    /// Zero every counter and clear the activity timestamp.
    pub fn reset(&mut self) {
        *self = SessionCounters::default();
    }

    pub fn record_sent(&mut self) {
        self.packets_sent += 1;
    }

    /// Any inbound frame counts as activity, whatever its protocol.
    pub fn record_received(&mut self) {
        self.packets_received += 1;
        self.last_activity = Some(Utc::now());
    }
}
