//! Byte-level GT06 frame layout.
//!
//! Every frame on the wire looks like this:
//!
//! ```text
//! 78 78 | len | proto | content ... | serial_hi serial_lo | chk | 0D 0A
//! ```
//!
//! `len` counts the bytes between itself and the checksum, i.e.
//! `proto + content + serial`, so a complete packet occupies `len + 6`
//! bytes. `chk` is the XOR of every byte from `len` through the last
//! serial byte inclusive.
//!
//! A frame whose markers and length are consistent is always decoded,
//! even when the checksum does not match; [`Frame::checksum_ok`] reports
//! the verdict so dispatch can tolerate corrupted-but-parseable traffic.

use bytes::{BufMut, Bytes, BytesMut};
use rastro_core::constants::{FRAME_OVERHEAD, MIN_LENGTH_BYTE, START_MARKER, STOP_MARKER};
use rastro_core::{Error, Result};
use std::fmt;

/// A decoded GT06 frame.
///
/// Immutable once parsed; `raw` keeps the complete packet bytes for
/// logging and event records.
///
/// # Example
/// ```
/// use rastro_protocol::{Frame, encode_frame};
///
/// let wire = encode_frame(0x13, &[0x43, 0x04, 0x03, 0x00, 0x01], 2).unwrap();
/// let frame = Frame::parse(&wire).unwrap();
/// assert_eq!(frame.protocol, 0x13);
/// assert_eq!(frame.serial, 2);
/// assert!(frame.checksum_ok);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Protocol number (login 0x01, location 0x12, ...).
    pub protocol: u8,

    /// Content bytes between the protocol byte and the serial.
    pub content: Bytes,

    /// Frame sequence number, big-endian on the wire.
    pub serial: u16,

    /// Whether the transmitted XOR checksum matched.
    pub checksum_ok: bool,

    /// The complete packet including markers.
    pub raw: Bytes,
}

impl Frame {
    /// Parse one complete packet (start marker through stop marker).
    ///
    /// # Errors
    /// Returns `Error::Framing` for wrong markers, an impossible length
    /// byte, or a slice that does not span exactly one packet. A checksum
    /// mismatch is *not* an error; it only clears [`Frame::checksum_ok`].
    ///
    /// # Examples
    ///
    /// ```
    /// use rastro_protocol::{Frame, encode_frame};
    ///
    /// let mut wire = encode_frame(0x12, &[0xAA], 7).unwrap().to_vec();
    /// let chk = wire.len() - 3;
    /// wire[chk] ^= 0xFF;
    ///
    /// // A corrupted checksum still yields a frame, flagged as such.
    /// let frame = Frame::parse(&wire).unwrap();
    /// assert_eq!(frame.serial, 7);
    /// assert!(!frame.checksum_ok);
    /// ```
    pub fn parse(packet: &[u8]) -> Result<Frame> {
        if packet.len() < FRAME_OVERHEAD + MIN_LENGTH_BYTE as usize {
            return Err(Error::Framing(format!(
                "packet too short: {} bytes",
                packet.len()
            )));
        }
        if packet[0..2] != START_MARKER {
            return Err(Error::Framing(format!(
                "bad start marker {:02X} {:02X}",
                packet[0], packet[1]
            )));
        }

        let len = packet[2] as usize;
        if (len as u8) < MIN_LENGTH_BYTE {
            return Err(Error::Framing(format!("length byte {len} below minimum")));
        }
        if packet.len() != len + FRAME_OVERHEAD {
            return Err(Error::Framing(format!(
                "length byte {len} does not match packet of {} bytes",
                packet.len()
            )));
        }
        if packet[len + 4..len + 6] != STOP_MARKER {
            return Err(Error::Framing(format!(
                "bad stop marker {:02X} {:02X}",
                packet[len + 4],
                packet[len + 5]
            )));
        }

        let protocol = packet[3];
        let content = Bytes::copy_from_slice(&packet[4..len + 1]);
        let serial = u16::from_be_bytes([packet[len + 1], packet[len + 2]]);
        let transmitted = packet[len + 3];
        let computed = xor_checksum(&packet[2..len + 3]);

        Ok(Frame {
            protocol,
            content,
            serial,
            checksum_ok: transmitted == computed,
            raw: Bytes::copy_from_slice(packet),
        })
    }

    /// Uppercase spaced hex of the complete packet, for events and logs.
    #[must_use]
    pub fn hex(&self) -> String {
        hex_dump(&self.raw)
    }

    /// Total packet size in bytes.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        self.raw.len()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame[proto={:#04X}, serial={}, len={}, checksum_ok={}]",
            self.protocol,
            self.serial,
            self.raw.len(),
            self.checksum_ok
        )
    }
}

/// XOR of all bytes in the slice.
///
/// # Examples
///
/// ```
/// use rastro_protocol::xor_checksum;
///
/// assert_eq!(xor_checksum(&[0x04, 0x13, 0x00, 0x00, 0x02]), 0x15);
/// assert_eq!(xor_checksum(&[]), 0x00);
/// ```
#[must_use]
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Encode a complete frame.
///
/// # Errors
/// Returns `Error::FrameTooLarge` if the content does not fit the
/// one-byte length field (content is limited to 252 bytes).
///
/// # Examples
///
/// ```
/// use rastro_protocol::{encode_frame, hex_dump};
///
/// let wire = encode_frame(0x13, &[0x00], 2).unwrap();
/// assert_eq!(hex_dump(&wire), "78 78 04 13 00 00 02 15 0D 0A");
/// ```
pub fn encode_frame(protocol: u8, content: &[u8], serial: u16) -> Result<Bytes> {
    let len = content.len() + 3;
    if len > u8::MAX as usize {
        return Err(Error::FrameTooLarge {
            size: len,
            max_size: u8::MAX as usize,
        });
    }

    let mut buf = BytesMut::with_capacity(len + FRAME_OVERHEAD);
    buf.put_slice(&START_MARKER);
    buf.put_u8(len as u8);
    buf.put_u8(protocol);
    buf.put_slice(content);
    buf.put_u16(serial);

    let chk = xor_checksum(&buf[2..]);
    buf.put_u8(chk);
    buf.put_slice(&STOP_MARKER);

    Ok(buf.freeze())
}

/// Uppercase spaced hex rendering (`"78 78 0B 01 ..."`).
///
/// # Examples
///
/// ```
/// use rastro_protocol::hex_dump;
///
/// assert_eq!(hex_dump(&[0x78, 0x78, 0x0D, 0x0A]), "78 78 0D 0A");
/// ```
#[must_use]
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn encode_login_frame_bit_exact() {
        let content = [0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x23, 0x45];
        let wire = encode_frame(0x01, &content, 1).unwrap();
        assert_eq!(
            hex_dump(&wire),
            "78 78 0B 01 01 23 45 67 89 01 23 45 00 01 E5 0D 0A"
        );
    }

    #[test]
    fn checksum_law_covers_len_through_serial() {
        let wire = encode_frame(0x13, &[0x43, 0x04, 0x03, 0x00, 0x01], 2).unwrap();
        let len = wire[2] as usize;
        let expected = xor_checksum(&wire[2..len + 3]);
        assert_eq!(wire[len + 3], expected);
    }

    #[test]
    fn parse_round_trip() {
        let content = [0xDE, 0xAD, 0xBE, 0xEF];
        let wire = encode_frame(0x16, &content, 0x1234).unwrap();
        let frame = Frame::parse(&wire).unwrap();

        assert_eq!(frame.protocol, 0x16);
        assert_eq!(&frame.content[..], &content);
        assert_eq!(frame.serial, 0x1234);
        assert!(frame.checksum_ok);
        assert_eq!(&frame.raw[..], &wire[..]);
    }

    #[test]
    fn parse_empty_content_frame() {
        let wire = encode_frame(0x13, &[], 7).unwrap();
        assert_eq!(wire.len(), 9); // len byte 3 + overhead 6
        let frame = Frame::parse(&wire).unwrap();
        assert!(frame.content.is_empty());
        assert_eq!(frame.serial, 7);
    }

    #[test]
    fn corrupted_checksum_still_parses() {
        let mut wire = encode_frame(0x13, &[0x00], 9).unwrap().to_vec();
        let chk_pos = wire.len() - 3;
        wire[chk_pos] ^= 0xFF;

        let frame = Frame::parse(&wire).unwrap();
        assert_eq!(frame.protocol, 0x13);
        assert!(!frame.checksum_ok);
    }

    #[rstest]
    #[case(&[0x79, 0x79, 0x04, 0x01, 0x00, 0x00, 0x01, 0x04, 0x0D, 0x0A])] // extended marker
    #[case(&[0x78, 0x78, 0x04, 0x01, 0x00, 0x00, 0x01, 0x04, 0x0D, 0x0B])] // bad stop
    #[case(&[0x78, 0x78, 0x02, 0x01, 0x00, 0x00, 0x0D, 0x0A])] // length below minimum
    fn parse_rejects_malformed_packets(#[case] packet: &[u8]) {
        assert!(Frame::parse(packet).is_err());
    }

    #[test]
    fn parse_rejects_length_mismatch() {
        let wire = encode_frame(0x12, &[1, 2, 3, 4], 1).unwrap();
        // Truncate one byte: length byte no longer matches.
        assert!(Frame::parse(&wire[..wire.len() - 1]).is_err());
    }

    #[test]
    fn encode_rejects_oversized_content() {
        let content = vec![0u8; 253];
        assert!(matches!(
            encode_frame(0x12, &content, 1),
            Err(Error::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn max_content_encodes() {
        let content = vec![0xAA; 252];
        let wire = encode_frame(0x12, &content, 1).unwrap();
        assert_eq!(wire[2], 0xFF);
        let frame = Frame::parse(&wire).unwrap();
        assert_eq!(frame.content.len(), 252);
    }

    #[test]
    fn display_shows_protocol_and_serial() {
        let wire = encode_frame(0x12, &[0x00], 42).unwrap();
        let frame = Frame::parse(&wire).unwrap();
        let shown = format!("{frame}");
        assert!(shown.contains("0x12"));
        assert!(shown.contains("serial=42"));
    }
}
