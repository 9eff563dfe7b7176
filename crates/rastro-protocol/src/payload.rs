//! Typed frame contents.
//!
//! Each frame protocol carries a fixed content layout; this module gives
//! every layout a typed encode/decode pair. Encoders are used by the
//! client (tracker) side, decoders by the server side and by tests, so
//! both directions stay bit-exact against each other.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use rastro_core::constants::{
    COMMAND_SUBTYPE_OUTPUT, COORDINATE_SCALE, COURSE_MASK, STATUS_BIT_GPS_VALID, STATUS_BIT_SOUTH,
    STATUS_BIT_WEST, TERMINAL_BIT_ACC, TERMINAL_BIT_GPS_POSITIONED, TERMINAL_BIT_GPS_REALTIME,
};
use rastro_core::{AlarmKind, Error, Imei, Position, Result};

use crate::frame::hex_dump;

/// Wire timestamp: `YY MM DD hh mm ss`, UTC, year offset from 2000.
///
/// # Examples
///
/// ```
/// use rastro_protocol::Gt06Time;
///
/// let time = Gt06Time::decode(&[0x19, 0x01, 0x02, 0x03, 0x04, 0x05]).unwrap();
/// assert_eq!(time.year, 2025);
/// assert_eq!(time.encode(), [0x19, 0x01, 0x02, 0x03, 0x04, 0x05]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gt06Time {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Gt06Time {
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Gt06Time {
            year: dt.year().clamp(2000, 2255) as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; 6] {
        [
            (self.year - 2000) as u8,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        ]
    }

    /// # Errors
    /// Returns a decode error when fewer than six bytes are given.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 6 {
            return Err(Error::decode("timestamp", "needs 6 bytes"));
        }
        Ok(Gt06Time {
            year: 2000 + u16::from(bytes[0]),
            month: bytes[1],
            day: bytes[2],
            hour: bytes[3],
            minute: bytes[4],
            second: bytes[5],
        })
    }

    /// Convert back to a UTC instant.
    ///
    /// # Errors
    /// Returns a decode error for impossible calendar values.
    pub fn to_datetime(&self) -> Result<DateTime<Utc>> {
        Utc.with_ymd_and_hms(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
        )
        .single()
        .ok_or_else(|| {
            Error::decode(
                "timestamp",
                format!(
                    "invalid date {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    self.year, self.month, self.day, self.hour, self.minute, self.second
                ),
            )
        })
    }
}

/// Scale a coordinate to the unsigned wire integer.
///
/// `raw = round(|deg| * 30000 * 60)`; the sign travels in the
/// course/status word, not here.
///
/// # Examples
///
/// ```
/// use rastro_protocol::encode_coordinate;
///
/// assert_eq!(encode_coordinate(-23.55052), 42_390_936);
/// assert_eq!(encode_coordinate(23.55052), 42_390_936);
/// ```
#[must_use]
pub fn encode_coordinate(degrees: f64) -> u32 {
    (degrees.abs() * COORDINATE_SCALE).round() as u32
}

/// Invert [`encode_coordinate`], applying the sign from the status word.
///
/// # Examples
///
/// ```
/// use rastro_protocol::decode_coordinate;
///
/// let degrees = decode_coordinate(42_390_936, true);
/// assert!((degrees - (-23.55052)).abs() < 1e-6);
/// ```
#[must_use]
pub fn decode_coordinate(raw: u32, negative: bool) -> f64 {
    let degrees = f64::from(raw) / COORDINATE_SCALE;
    if negative { -degrees } else { degrees }
}

/// The course/status word: low 10 bits hold `course / 10`, bit 10 flags
/// southern latitude, bit 11 western longitude, bit 12 a valid GPS fix.
///
/// # Examples
///
/// ```
/// use rastro_protocol::CourseStatus;
///
/// let status = CourseStatus {
///     course_deg: 180.0,
///     south: true,
///     west: true,
///     gps_valid: true,
/// };
/// assert_eq!(status.encode(), 0x1C12);
/// assert!(CourseStatus::decode(0x1C12).south);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CourseStatus {
    pub course_deg: f64,
    pub south: bool,
    pub west: bool,
    pub gps_valid: bool,
}

impl CourseStatus {
    #[must_use]
    pub fn encode(&self) -> u16 {
        let bucket = (self.course_deg / 10.0).floor();
        let mut word = (bucket.clamp(0.0, f64::from(COURSE_MASK)) as u16) & COURSE_MASK;
        if self.south {
            word |= STATUS_BIT_SOUTH;
        }
        if self.west {
            word |= STATUS_BIT_WEST;
        }
        if self.gps_valid {
            word |= STATUS_BIT_GPS_VALID;
        }
        word
    }

    #[must_use]
    pub fn decode(word: u16) -> Self {
        CourseStatus {
            course_deg: f64::from(word & COURSE_MASK) * 10.0,
            south: word & STATUS_BIT_SOUTH != 0,
            west: word & STATUS_BIT_WEST != 0,
            gps_valid: word & STATUS_BIT_GPS_VALID != 0,
        }
    }
}

/// Login content: the IMEI as 8 BCD bytes.
///
/// # Examples
///
/// ```
/// use rastro_core::Imei;
/// use rastro_protocol::LoginPayload;
///
/// let payload = LoginPayload {
///     imei: Imei::parse("356932080000000").unwrap(),
/// };
/// assert_eq!(
///     &payload.encode()[..],
///     &[0x03, 0x56, 0x93, 0x20, 0x80, 0x00, 0x00, 0x00]
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPayload {
    pub imei: Imei,
}

impl LoginPayload {
    #[must_use]
    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.imei.to_bcd())
    }

    /// # Errors
    /// Returns a decode error for a wrong length or non-BCD bytes.
    pub fn decode(content: &[u8]) -> Result<Self> {
        if content.len() < 8 {
            return Err(Error::decode("login", "needs 8 BCD bytes"));
        }
        Ok(LoginPayload {
            imei: Imei::from_bcd(&content[..8])?,
        })
    }
}

/// Location content, 18 bytes:
/// time (6), satellites (1), latitude (4 BE), longitude (4 BE),
/// speed km/h (1, clamped), course/status (2 BE).
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPayload {
    pub time: Gt06Time,
    pub satellites: u8,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub course_deg: f64,
    pub gps_valid: bool,
}

const LOCATION_CONTENT_LEN: usize = 18;

impl LocationPayload {
    #[must_use]
    pub fn from_position(position: &Position) -> Self {
        LocationPayload {
            time: Gt06Time::from_datetime(position.timestamp),
            satellites: position.satellites,
            latitude: position.latitude,
            longitude: position.longitude,
            speed_kmh: position.speed_kmh,
            course_deg: position.course_deg,
            gps_valid: position.gps_valid,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let status = CourseStatus {
            course_deg: self.course_deg,
            south: self.latitude < 0.0,
            west: self.longitude < 0.0,
            gps_valid: self.gps_valid,
        };

        let mut buf = BytesMut::with_capacity(LOCATION_CONTENT_LEN);
        buf.put_slice(&self.time.encode());
        buf.put_u8(self.satellites);
        buf.put_u32(encode_coordinate(self.latitude));
        buf.put_u32(encode_coordinate(self.longitude));
        buf.put_u8(self.speed_kmh.clamp(0.0, 255.0).round() as u8);
        buf.put_u16(status.encode());
        buf.freeze()
    }

    /// # Errors
    /// Returns a decode error when the content is shorter than 18 bytes.
    pub fn decode(content: &[u8]) -> Result<Self> {
        if content.len() < LOCATION_CONTENT_LEN {
            return Err(Error::decode(
                "location",
                format!("needs {LOCATION_CONTENT_LEN} bytes, got {}", content.len()),
            ));
        }

        let time = Gt06Time::decode(&content[0..6])?;
        let satellites = content[6];
        let lat_raw = u32::from_be_bytes([content[7], content[8], content[9], content[10]]);
        let lon_raw = u32::from_be_bytes([content[11], content[12], content[13], content[14]]);
        let speed = f64::from(content[15]);
        let status = CourseStatus::decode(u16::from_be_bytes([content[16], content[17]]));

        Ok(LocationPayload {
            time,
            satellites,
            latitude: decode_coordinate(lat_raw, status.south),
            longitude: decode_coordinate(lon_raw, status.west),
            speed_kmh: speed,
            course_deg: status.course_deg,
            gps_valid: status.gps_valid,
        })
    }

    /// Rebuild a [`Position`] from decoded wire data.
    ///
    /// # Errors
    /// Returns a decode error when the wire timestamp is not a real date.
    pub fn to_position(&self) -> Result<Position> {
        Ok(Position {
            latitude: self.latitude,
            longitude: self.longitude,
            speed_kmh: self.speed_kmh,
            course_deg: self.course_deg,
            timestamp: self.time.to_datetime()?,
            gps_valid: self.gps_valid,
            satellites: self.satellites,
        })
    }
}

/// Heartbeat content, 5 bytes:
/// terminal info (1), voltage level (1, 0..=6), GSM signal (1, 0..=4),
/// alarm/language (2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatPayload {
    pub acc_on: bool,
    pub gps_positioned: bool,
    pub gps_realtime: bool,
    pub voltage_level: u8,
    pub gsm_signal: u8,
    pub alarm: u8,
    pub language: u8,
}

impl Default for HeartbeatPayload {
    fn default() -> Self {
        HeartbeatPayload {
            acc_on: true,
            gps_positioned: true,
            gps_realtime: true,
            voltage_level: 4,
            gsm_signal: 4,
            alarm: 0x00,
            language: 0x01,
        }
    }
}

impl HeartbeatPayload {
    /// The packed terminal info byte (ACC, GPS positioned, GPS
    /// real-time bits).
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_protocol::HeartbeatPayload;
    ///
    /// // ACC on (bit 0), positioned (bit 1), real-time (bit 6).
    /// assert_eq!(HeartbeatPayload::default().terminal_info(), 0x43);
    /// ```
    #[must_use]
    pub fn terminal_info(&self) -> u8 {
        let mut info = 0u8;
        if self.acc_on {
            info |= TERMINAL_BIT_ACC;
        }
        if self.gps_positioned {
            info |= TERMINAL_BIT_GPS_POSITIONED;
        }
        if self.gps_realtime {
            info |= TERMINAL_BIT_GPS_REALTIME;
        }
        info
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(self.terminal_info());
        buf.put_u8(self.voltage_level.min(6));
        buf.put_u8(self.gsm_signal.min(4));
        buf.put_u8(self.alarm);
        buf.put_u8(self.language);
        buf.freeze()
    }

    /// # Errors
    /// Returns a decode error when the content is shorter than 5 bytes.
    pub fn decode(content: &[u8]) -> Result<Self> {
        if content.len() < 5 {
            return Err(Error::decode("heartbeat", "needs 5 bytes"));
        }
        let info = content[0];
        Ok(HeartbeatPayload {
            acc_on: info & TERMINAL_BIT_ACC != 0,
            gps_positioned: info & TERMINAL_BIT_GPS_POSITIONED != 0,
            gps_realtime: info & TERMINAL_BIT_GPS_REALTIME != 0,
            voltage_level: content[1],
            gsm_signal: content[2],
            alarm: content[3],
            language: content[4],
        })
    }
}

/// Alarm content, 23 bytes:
/// time (6), alarm type (1), satellites (1), latitude (4), longitude (4),
/// speed (1), course/status (2), alarm status (4).
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmPayload {
    pub location: LocationPayload,
    pub kind: AlarmKind,
    pub status: u32,
}

const ALARM_CONTENT_LEN: usize = 23;

impl AlarmPayload {
    #[must_use]
    pub fn new(kind: AlarmKind, position: &Position) -> Self {
        AlarmPayload {
            location: LocationPayload::from_position(position),
            kind,
            status: 0,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let loc = self.location.encode();
        let mut buf = BytesMut::with_capacity(ALARM_CONTENT_LEN);
        buf.put_slice(&loc[0..6]); // time
        buf.put_u8(self.kind.code());
        buf.put_slice(&loc[6..]); // satellites .. course/status
        buf.put_u32(self.status);
        buf.freeze()
    }

    /// # Errors
    /// Returns a decode error for short content or an unknown alarm code.
    pub fn decode(content: &[u8]) -> Result<Self> {
        if content.len() < ALARM_CONTENT_LEN {
            return Err(Error::decode(
                "alarm",
                format!("needs {ALARM_CONTENT_LEN} bytes, got {}", content.len()),
            ));
        }

        let kind = AlarmKind::from_code(content[6])?;

        // Re-assemble the location view: time + everything after the type.
        let mut loc = BytesMut::with_capacity(LOCATION_CONTENT_LEN);
        loc.put_slice(&content[0..6]);
        loc.put_slice(&content[7..19]);
        let location = LocationPayload::decode(&loc)?;

        let status = u32::from_be_bytes([content[19], content[20], content[21], content[22]]);

        Ok(AlarmPayload {
            location,
            kind,
            status,
        })
    }
}

/// Command response content (protocol 0x21):
/// server flag (1, fixed 0x00), subtype (1, 0x01 = ASCII text),
/// text length (2 BE), text bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub text: String,
}

impl CommandResponse {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        CommandResponse { text: text.into() }
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let text = self.text.as_bytes();
        let mut buf = BytesMut::with_capacity(4 + text.len());
        buf.put_u8(0x00);
        buf.put_u8(0x01);
        buf.put_u16(text.len() as u16);
        buf.put_slice(text);
        buf.freeze()
    }

    /// # Errors
    /// Returns a decode error for a short header or a length that
    /// overruns the content.
    pub fn decode(content: &[u8]) -> Result<Self> {
        let command = ServerCommand::decode(content)?;
        Ok(CommandResponse {
            text: command.text_lossy(),
        })
    }
}

/// What a decoded 0x80 command asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// A textual operator command ("STOP", "WHERE#", ...).
    Text(String),
    /// The structured OUTPUT pseudo-command: drive output N to state S.
    Output { output: u8, state: u8 },
}

/// A decoded server command frame (protocol 0x80).
///
/// Layout: `flag (1) | subtype (1) | payload_len (2 BE) | payload`.
/// Subtype 0x01 carries UTF-8 text; subtype 0x80 carries the structured
/// OUTPUT pair. Invalid UTF-8 is decoded lossily — the raw bytes stay
/// available as hex for the event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub server_flag: u8,
    pub subtype: u8,
    pub payload: Bytes,
}

impl ServerCommand {
    /// # Errors
    /// Returns a decode error when the header is short or `payload_len`
    /// exceeds the remaining bytes (such frames are discarded unacked).
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_protocol::{CommandKind, ServerCommand};
    ///
    /// let content = [0x00, 0x01, 0x00, 0x04, b'S', b'T', b'O', b'P'];
    /// let command = ServerCommand::decode(&content).unwrap();
    /// assert_eq!(command.kind().unwrap(), CommandKind::Text("STOP".into()));
    ///
    /// // A declared length that overruns the content is rejected.
    /// assert!(ServerCommand::decode(&[0x00, 0x01, 0x00, 0x10, b'S']).is_err());
    /// ```
    pub fn decode(content: &[u8]) -> Result<Self> {
        if content.len() < 4 {
            return Err(Error::decode("command", "header needs 4 bytes"));
        }
        let payload_len = u16::from_be_bytes([content[2], content[3]]) as usize;
        let rest = &content[4..];
        if payload_len > rest.len() {
            return Err(Error::decode(
                "command",
                format!(
                    "declared payload of {payload_len} bytes but only {} available",
                    rest.len()
                ),
            ));
        }

        Ok(ServerCommand {
            server_flag: content[0],
            subtype: content[1],
            payload: Bytes::copy_from_slice(&rest[..payload_len]),
        })
    }

    /// The payload interpreted per subtype.
    ///
    /// # Errors
    /// Returns a decode error for an OUTPUT payload shorter than 2 bytes.
    pub fn kind(&self) -> Result<CommandKind> {
        if self.subtype == COMMAND_SUBTYPE_OUTPUT {
            if self.payload.len() < 2 {
                return Err(Error::decode("command", "OUTPUT payload needs 2 bytes"));
            }
            return Ok(CommandKind::Output {
                output: self.payload[0],
                state: self.payload[1],
            });
        }
        Ok(CommandKind::Text(self.text_lossy()))
    }

    /// Payload as text, replacing invalid UTF-8 sequences.
    #[must_use]
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Raw payload bytes as spaced hex (for events when UTF-8 fails).
    #[must_use]
    pub fn payload_hex(&self) -> String {
        hex_dump(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::hex_dump;
    use rstest::rstest;

    #[test]
    fn coordinate_law() {
        assert_eq!(encode_coordinate(-23.55052), 42_390_936);
        assert_eq!(encode_coordinate(23.55052), 42_390_936);
        assert_eq!(encode_coordinate(-46.63331), 83_939_958);
        assert_eq!(encode_coordinate(0.0), 0);
    }

    #[test]
    fn coordinate_round_trip_keeps_precision() {
        let raw = encode_coordinate(-23.55052);
        let decoded = decode_coordinate(raw, true);
        assert!((decoded - (-23.55052)).abs() < 1e-6);
    }

    #[rstest]
    #[case(180.0, true, true, true, 0x1C12)]
    #[case(359.0, false, false, true, 0x1023)]
    #[case(90.0, false, false, false, 0x0009)]
    #[case(0.0, true, false, false, 0x0400)]
    fn course_status_word(
        #[case] course: f64,
        #[case] south: bool,
        #[case] west: bool,
        #[case] valid: bool,
        #[case] expected: u16,
    ) {
        let status = CourseStatus {
            course_deg: course,
            south,
            west,
            gps_valid: valid,
        };
        assert_eq!(status.encode(), expected);

        let decoded = CourseStatus::decode(expected);
        assert_eq!(decoded.south, south);
        assert_eq!(decoded.west, west);
        assert_eq!(decoded.gps_valid, valid);
    }

    #[test]
    fn course_is_clamped_to_ten_bits() {
        let status = CourseStatus {
            course_deg: 20_000.0,
            south: false,
            west: false,
            gps_valid: false,
        };
        assert_eq!(status.encode(), COURSE_MASK);
    }

    fn sample_position() -> Position {
        Position {
            latitude: -23.55052,
            longitude: -46.63331,
            speed_kmh: 50.0,
            course_deg: 180.0,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            gps_valid: true,
            satellites: 8,
        }
    }

    #[test]
    fn location_content_bit_exact() {
        let payload = LocationPayload::from_position(&sample_position());
        let content = payload.encode();
        assert_eq!(content.len(), 18);
        assert_eq!(
            hex_dump(&content),
            "19 01 02 03 04 05 08 02 86 D5 98 05 00 D2 76 32 1C 12"
        );
    }

    #[test]
    fn location_round_trip() {
        let payload = LocationPayload::from_position(&sample_position());
        let decoded = LocationPayload::decode(&payload.encode()).unwrap();

        assert_eq!(decoded.time, payload.time);
        assert_eq!(decoded.satellites, 8);
        assert!((decoded.latitude - payload.latitude).abs() < 1e-6);
        assert!((decoded.longitude - payload.longitude).abs() < 1e-6);
        assert_eq!(decoded.speed_kmh, 50.0);
        assert_eq!(decoded.course_deg, 180.0);
        assert!(decoded.gps_valid);

        let position = decoded.to_position().unwrap();
        assert_eq!(position.timestamp, sample_position().timestamp);
    }

    #[test]
    fn location_speed_is_clamped() {
        let mut position = sample_position();
        position.speed_kmh = 512.0;
        let content = LocationPayload::from_position(&position).encode();
        assert_eq!(content[15], 255);
    }

    #[test]
    fn location_decode_rejects_short_content() {
        assert!(LocationPayload::decode(&[0u8; 17]).is_err());
    }

    #[test]
    fn heartbeat_terminal_info_bits() {
        let payload = HeartbeatPayload::default();
        // ACC (bit 0) + positioned (bit 1) + realtime (bit 6)
        assert_eq!(payload.terminal_info(), 0x43);

        let content = payload.encode();
        assert_eq!(&content[..], &[0x43, 0x04, 0x04, 0x00, 0x01]);
    }

    #[test]
    fn heartbeat_clamps_levels() {
        let payload = HeartbeatPayload {
            voltage_level: 9,
            gsm_signal: 7,
            ..HeartbeatPayload::default()
        };
        let content = payload.encode();
        assert_eq!(content[1], 6);
        assert_eq!(content[2], 4);
    }

    #[test]
    fn heartbeat_round_trip() {
        let payload = HeartbeatPayload {
            acc_on: false,
            gps_positioned: true,
            gps_realtime: false,
            voltage_level: 2,
            gsm_signal: 3,
            alarm: 0x01,
            language: 0x02,
        };
        let decoded = HeartbeatPayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn alarm_round_trip() {
        let payload = AlarmPayload::new(AlarmKind::Sos, &sample_position());
        let content = payload.encode();
        assert_eq!(content.len(), 23);
        assert_eq!(content[6], 0x01); // SOS code after the timestamp

        let decoded = AlarmPayload::decode(&content).unwrap();
        assert_eq!(decoded.kind, AlarmKind::Sos);
        assert_eq!(decoded.status, 0);
        assert!((decoded.location.latitude - (-23.55052)).abs() < 1e-6);
    }

    #[test]
    fn alarm_decode_rejects_unknown_code() {
        let mut content = AlarmPayload::new(AlarmKind::Shock, &sample_position())
            .encode()
            .to_vec();
        content[6] = 0x7E;
        assert!(AlarmPayload::decode(&content).is_err());
    }

    #[test]
    fn command_response_layout() {
        let response = CommandResponse::new("CMD OK:STOP");
        let content = response.encode();

        assert_eq!(content[0], 0x00);
        assert_eq!(content[1], 0x01);
        assert_eq!(u16::from_be_bytes([content[2], content[3]]), 11);
        assert_eq!(&content[4..], b"CMD OK:STOP");

        let decoded = CommandResponse::decode(&content).unwrap();
        assert_eq!(decoded.text, "CMD OK:STOP");
    }

    #[test]
    fn server_command_text() {
        let content = [0x00, 0x01, 0x00, 0x04, b'S', b'T', b'O', b'P'];
        let command = ServerCommand::decode(&content).unwrap();
        assert_eq!(command.server_flag, 0x00);
        assert_eq!(command.kind().unwrap(), CommandKind::Text("STOP".to_string()));
    }

    #[test]
    fn server_command_truncated_payload_is_rejected() {
        // Declares 16 bytes of text but carries only 4.
        let content = [0x00, 0x01, 0x00, 0x10, b'S', b'T', b'O', b'P'];
        assert!(ServerCommand::decode(&content).is_err());
    }

    #[test]
    fn server_command_short_header_is_rejected() {
        assert!(ServerCommand::decode(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn server_command_invalid_utf8_is_lossy_with_hex() {
        let content = [0x00, 0x01, 0x00, 0x03, 0xFF, 0xFE, b'A'];
        let command = ServerCommand::decode(&content).unwrap();

        let text = command.text_lossy();
        assert!(text.contains('A'));
        assert!(text.contains('\u{FFFD}'));
        assert_eq!(command.payload_hex(), "FF FE 41");
    }

    #[test]
    fn server_command_output_subtype() {
        let content = [0x00, 0x80, 0x00, 0x02, 0x01, 0x01];
        let command = ServerCommand::decode(&content).unwrap();
        assert_eq!(
            command.kind().unwrap(),
            CommandKind::Output {
                output: 1,
                state: 1
            }
        );
    }

    #[test]
    fn server_command_output_too_short() {
        let content = [0x00, 0x80, 0x00, 0x01, 0x01];
        let command = ServerCommand::decode(&content).unwrap();
        assert!(command.kind().is_err());
    }

    #[test]
    fn gt06_time_round_trip() {
        let time = Gt06Time {
            year: 2025,
            month: 1,
            day: 2,
            hour: 3,
            minute: 4,
            second: 5,
        };
        assert_eq!(time.encode(), [0x19, 0x01, 0x02, 0x03, 0x04, 0x05]);

        let decoded = Gt06Time::decode(&time.encode()).unwrap();
        assert_eq!(decoded, time);
        assert_eq!(
            decoded.to_datetime().unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
        );
    }

    #[test]
    fn gt06_time_rejects_impossible_date() {
        let time = Gt06Time {
            year: 2025,
            month: 13,
            day: 40,
            hour: 3,
            minute: 4,
            second: 5,
        };
        assert!(time.to_datetime().is_err());
    }
}
