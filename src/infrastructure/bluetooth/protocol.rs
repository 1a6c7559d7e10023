//! Face link UART protocol
//!
//! Nordic UART Service identifiers and the fixed-width text packet the
//! firmware parses.

use crate::domain::models::SensorFrame;
use crate::infrastructure::bluetooth::error::TransportError;
use anyhow::Result;
use uuid::Uuid;

/// Nordic UART Service
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// RX characteristic: the central writes packets here
pub const RX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// TX characteristic: the peripheral notifies from here
pub const TX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Packet length without the line terminator: eight 2-digit fields and
/// three 1-digit fields
pub const PACKET_LEN: usize = 19;

/// Service and characteristic roles used for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartProfile {
    pub service: Uuid,
    pub write_char: Uuid,
    pub notify_char: Uuid,
}

impl Default for UartProfile {
    fn default() -> Self {
        Self {
            service: SERVICE_UUID,
            write_char: RX_CHAR_UUID,
            notify_char: TX_CHAR_UUID,
        }
    }
}

/// Parse a hyphenated 128-bit UUID string
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid_str.trim()).map_err(|e| anyhow::anyhow!("Invalid UUID format: {}", e))
}

fn push_digits(out: &mut Vec<u8>, value: i32, width: u32) {
    let max = 10i32.pow(width) - 1;
    let mut value = value.clamp(0, max);
    let start = out.len();
    for _ in 0..width {
        out.push(b'0' + (value % 10) as u8);
        value /= 10;
    }
    out[start..].reverse();
}

/// Encode a frame into the wire packet
///
/// # Packet Layout (19 bytes, ASCII digits)
///
/// ```text
/// [0-1]   : face X           (0-99)
/// [2-3]   : face Y           (0-99)
/// [4-5]   : face distance    (0-99)
/// [6-7]   : face yaw         (0-99)
/// [8-9]   : face pitch       (0-99)
/// [10-11] : mouth openness   (0-99)
/// [12-13] : left eye         (0-99)
/// [14-15] : right eye        (0-99)
/// [16]    : roll             (0-9)
/// [17]    : smile            (0-9)
/// [18]    : face visible     (0-9)
/// ```
///
/// Every value is clamped into its field so the layout never shifts. An
/// optional `\n` follows.
pub fn encode_packet(frame: &SensorFrame, newline: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(PACKET_LEN + 1);

    for value in [
        frame.face_x,
        frame.face_y,
        frame.face_distance,
        frame.face_yaw,
        frame.face_pitch,
        frame.mouth_openness,
        frame.left_eye_openness,
        frame.right_eye_openness,
    ] {
        push_digits(&mut out, value, 2);
    }
    for value in [frame.face_roll, frame.smile, frame.face_visible] {
        push_digits(&mut out, value, 1);
    }

    if newline {
        out.push(b'\n');
    }
    out
}

/// Map each inbound byte to the character with the same code
pub fn decode_inbound(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Like [`decode_inbound`], but rejects anything outside 7-bit ASCII
pub fn decode_inbound_ascii(bytes: &[u8]) -> Result<String, TransportError> {
    if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
        return Err(TransportError::Decode(format!(
            "byte {:#04X} at offset {} is not 7-bit ASCII",
            bytes[pos], pos
        )));
    }
    Ok(decode_inbound(bytes))
}
