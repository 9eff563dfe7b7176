//! Tokio codec integrating the GT06 framer with async TCP streams.
//!
//! `Gt06Codec` wraps the [`StreamParser`] behind tokio-util's
//! [`Decoder`]/[`Encoder`] traits so connections can be driven through
//! `Framed<TcpStream, Gt06Codec>`:
//!
//! ```text
//! TCP stream -> Decoder -> Frame (validated, checksum flagged)
//! Packet     -> Encoder -> TCP stream (marked, checksummed)
//! ```
//!
//! Serial numbers are *not* assigned here: the task that owns the
//! connection assigns them (fresh from its [`crate::SerialCounter`] for
//! originated frames, echoed from the request for acknowledgements) and
//! hands the codec a fully-determined [`Packet`]. That keeps serial
//! assignment in send order on exactly one task.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{Frame, encode_frame};
use crate::payload::{
    AlarmPayload, CommandResponse, HeartbeatPayload, LocationPayload, LoginPayload,
};
use crate::stream_parser::StreamParser;
use rastro_core::constants::{
    PROTO_ALARM, PROTO_COMMAND_RESPONSE, PROTO_HEARTBEAT, PROTO_LOCATION, PROTO_LOGIN,
    PROTO_SERVER_COMMAND,
};
use rastro_core::{AlarmKind, Error, Imei, Position, Result};

/// Default maximum frame size accepted from the peer.
///
/// GT06 frames are at most 258 bytes (one-byte length field plus
/// overhead); anything larger indicates a desynchronized or hostile
/// stream.
const DEFAULT_MAX_FRAME_SIZE: usize = 512;

/// An outbound frame: protocol, content, and the serial chosen by the
/// sending task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub protocol: u8,
    pub content: Bytes,
    pub serial: u16,
}

impl Packet {
    #[must_use]
    pub fn new(protocol: u8, content: Bytes, serial: u16) -> Self {
        Packet {
            protocol,
            content,
            serial,
        }
    }

    /// LOGIN (0x01) carrying the BCD IMEI.
    #[must_use]
    pub fn login(imei: &Imei, serial: u16) -> Self {
        Packet::new(PROTO_LOGIN, LoginPayload { imei: imei.clone() }.encode(), serial)
    }

    /// LOCATION (0x12) from a GPS fix.
    #[must_use]
    pub fn location(position: &Position, serial: u16) -> Self {
        Packet::new(
            PROTO_LOCATION,
            LocationPayload::from_position(position).encode(),
            serial,
        )
    }

    /// HEARTBEAT (0x13) with the given status byte set.
    #[must_use]
    pub fn heartbeat(payload: &HeartbeatPayload, serial: u16) -> Self {
        Packet::new(PROTO_HEARTBEAT, payload.encode(), serial)
    }

    /// ALARM (0x16) for a kind at a position.
    #[must_use]
    pub fn alarm(kind: AlarmKind, position: &Position, serial: u16) -> Self {
        Packet::new(PROTO_ALARM, AlarmPayload::new(kind, position).encode(), serial)
    }

    /// COMMAND RESPONSE (0x21) carrying ASCII text.
    #[must_use]
    pub fn command_response(text: impl Into<String>, serial: u16) -> Self {
        Packet::new(
            PROTO_COMMAND_RESPONSE,
            CommandResponse::new(text).encode(),
            serial,
        )
    }

    /// Server-originated COMMAND (0x80) carrying ASCII text.
    #[must_use]
    pub fn server_command(text: impl Into<String>, serial: u16) -> Self {
        // Same flag/subtype/length layout as the command response.
        let body = CommandResponse::new(text).encode();
        Packet::new(PROTO_SERVER_COMMAND, body, serial)
    }

    /// Generic acknowledgement: echoes the peer's protocol and serial
    /// with a zero status byte. Used for LOGIN-ACK, HEARTBEAT-ACK,
    /// STATUS-style ACKs and unknown-protocol ACKs alike.
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_protocol::Packet;
    ///
    /// let ack = Packet::ack(0x13, 9);
    /// assert_eq!(ack.protocol, 0x13);
    /// assert_eq!(&ack.content[..], &[0x00]);
    /// assert_eq!(ack.serial, 9);
    /// ```
    #[must_use]
    pub fn ack(protocol: u8, serial: u16) -> Self {
        Packet::new(protocol, Bytes::from_static(&[0x00]), serial)
    }

    /// Content length in bytes.
    #[must_use]
    pub fn content_len(&self) -> usize {
        self.content.len()
    }
}

/// Tokio codec for GT06 connections.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use rastro_protocol::{Gt06Codec, Packet};
/// use tokio_util::codec::{Decoder, Encoder};
///
/// let mut codec = Gt06Codec::new();
/// let mut buf = BytesMut::new();
/// codec.encode(Packet::ack(0x01, 1), &mut buf).unwrap();
///
/// let frame = codec.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(frame.protocol, 0x01);
/// assert!(frame.checksum_ok);
/// ```
#[derive(Debug)]
pub struct Gt06Codec {
    parser: StreamParser,
    max_frame_size: usize,
}

impl Gt06Codec {
    #[must_use]
    pub fn new() -> Self {
        Gt06Codec {
            parser: StreamParser::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Gt06Codec {
            parser: StreamParser::new(),
            max_frame_size,
        }
    }

    /// Desync recoveries performed by the underlying parser.
    #[must_use]
    pub fn resync_count(&self) -> u64 {
        self.parser.resync_count()
    }
}

impl Default for Gt06Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for Gt06Codec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if !src.is_empty() {
            // The parser owns buffering from here on.
            self.parser.feed(src);
            src.clear();
        }

        match self.parser.next_frame() {
            Some(frame) if frame.wire_len() > self.max_frame_size => Err(Error::FrameTooLarge {
                size: frame.wire_len(),
                max_size: self.max_frame_size,
            }),
            Some(frame) => Ok(Some(frame)),
            None => Ok(None),
        }
    }
}

impl Encoder<Packet> for Gt06Codec {
    type Error = Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        let wire = encode_frame(item.protocol, &item.content, item.serial)?;
        dst.extend_from_slice(&wire);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::hex_dump;
    use chrono::TimeZone;

    #[test]
    fn decode_complete_frame() {
        let mut codec = Gt06Codec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Packet::ack(PROTO_LOGIN, 1), &mut buf)
            .unwrap();

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.protocol, PROTO_LOGIN);
        assert_eq!(frame.serial, 1);
        assert!(frame.checksum_ok);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_partial_then_complete() {
        let mut codec = Gt06Codec::new();
        let wire = encode_frame(PROTO_HEARTBEAT, &[0x00], 2).unwrap();

        let mut first = BytesMut::from(&wire[..5]);
        assert!(codec.decode(&mut first).unwrap().is_none());

        let mut rest = BytesMut::from(&wire[5..]);
        let frame = codec.decode(&mut rest).unwrap().unwrap();
        assert_eq!(frame.serial, 2);
    }

    #[test]
    fn decode_multiple_frames_one_buffer() {
        let mut codec = Gt06Codec::new();
        let mut buf = BytesMut::new();
        codec.encode(Packet::ack(0x13, 1), &mut buf).unwrap();
        codec.encode(Packet::ack(0x13, 2), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().serial, 1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().serial, 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn login_packet_bit_exact() {
        let imei = Imei::parse("123456789012345").unwrap();
        let packet = Packet::login(&imei, 1);
        let wire = encode_frame(packet.protocol, &packet.content, packet.serial).unwrap();
        assert_eq!(
            hex_dump(&wire),
            "78 78 0B 01 01 23 45 67 89 01 23 45 00 01 E5 0D 0A"
        );
    }

    #[test]
    fn command_packets_share_text_layout() {
        let response = Packet::command_response("CMD OK:STOP", 4);
        let command = Packet::server_command("CMD OK:STOP", 4);
        assert_eq!(response.content, command.content);
        assert_eq!(response.protocol, PROTO_COMMAND_RESPONSE);
        assert_eq!(command.protocol, PROTO_SERVER_COMMAND);
    }

    #[test]
    fn location_packet_round_trips_through_codec() {
        let position = Position {
            latitude: -23.55052,
            longitude: -46.63331,
            speed_kmh: 50.0,
            course_deg: 180.0,
            timestamp: chrono::Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            gps_valid: true,
            satellites: 8,
        };

        let mut codec = Gt06Codec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Packet::location(&position, 3), &mut buf)
            .unwrap();

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.protocol, PROTO_LOCATION);
        let decoded = LocationPayload::decode(&frame.content).unwrap();
        assert!((decoded.latitude - position.latitude).abs() < 1e-6);
        assert!((decoded.longitude - position.longitude).abs() < 1e-6);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = Gt06Codec::with_max_frame_size(16);
        let wire = encode_frame(PROTO_LOCATION, &[0u8; 32], 1).unwrap();
        let mut buf = BytesMut::from(&wire[..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn noise_between_frames_is_tolerated() {
        let mut codec = Gt06Codec::new();
        let wire = encode_frame(PROTO_HEARTBEAT, &[0x00], 9).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\x00\x01garbage");
        buf.extend_from_slice(&wire);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.serial, 9);
    }
}
