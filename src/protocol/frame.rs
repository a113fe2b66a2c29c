//! Binary control frame.
//!
//! ```text
//! AA 55 | VER | TYPE | SEQ u16 | LEN u16 | payload[LEN] | CRC16 u16 | [7E]
//! ```
//!
//! Multi-byte fields are little-endian. The CRC covers VER through the end of
//! the payload. The `0x7E` terminator is present on byte streams only; the
//! datagram transport omits it.
//!
//! Control payload (57 bytes):
//!
//! ```text
//! ax ay az gx gy gz (f32 × 6) | temp u8 | pos[8] u16 | off[8] u16
//! ```

use heapless::Vec;
use nalgebra::Vector3;

use super::CodecError;
use super::command::{CMD_PING, Command, CommandError, MAX_COMMAND_LEN};
use super::crc::crc16_ccitt;
use super::servo::{SERVO_CHANNELS, ServoVector};

pub const SYNC0: u8 = 0xAA;
pub const SYNC1: u8 = 0x55;
pub const VERSION: u8 = 0x01;
pub const ETX: u8 = 0x7E;

pub const TYPE_CONTROL: u8 = 0x01;
pub const TYPE_COMMAND: u8 = 0x02;

/// SYNC×2, VER, TYPE, SEQ, LEN.
pub const HEADER_LEN: usize = 8;
pub const CRC_LEN: usize = 2;
pub const CONTROL_PAYLOAD_LEN: usize = 6 * 4 + 1 + 2 * SERVO_CHANNELS * 2;
/// Largest payload any frame type carries.
pub const MAX_PAYLOAD_LEN: usize = CONTROL_PAYLOAD_LEN;
/// Largest frame on a byte stream, terminator included.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN + CRC_LEN + 1;
/// Control frame without terminator, as sent in one datagram.
pub const CONTROL_FRAME_LEN: usize = HEADER_LEN + CONTROL_PAYLOAD_LEN + CRC_LEN;
/// Scratch buffer used for datagram telemetry.
pub const DATAGRAM_BUFFER_LEN: usize = 80;

/// Total frame size for a payload of `payload_len` bytes.
pub const fn frame_len(payload_len: usize, with_etx: bool) -> usize {
    HEADER_LEN + payload_len + CRC_LEN + if with_etx { 1 } else { 0 }
}

/// Reasons a received frame is dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Checksum over VER..payload does not match.
    CrcMismatch,
    /// Last byte is not `0x7E`.
    BadTerminator,
    /// LEN announces more than the receive buffer holds.
    BufferOverflow,
    /// Missing `AA 55`.
    BadSync,
    /// Fewer bytes than the header and LEN require.
    Truncated,
    /// More bytes than the header and LEN describe.
    LengthMismatch,
    UnsupportedVersion(u8),
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::CrcMismatch => f.write_str("CRC mismatch"),
            FrameError::BadTerminator => f.write_str("missing 0x7E terminator"),
            FrameError::BufferOverflow => f.write_str("frame longer than receive buffer"),
            FrameError::BadSync => f.write_str("missing AA 55 sync"),
            FrameError::Truncated => f.write_str("frame truncated"),
            FrameError::LengthMismatch => f.write_str("frame length does not match LEN"),
            FrameError::UnsupportedVersion(v) => write!(f, "unsupported protocol version {}", v),
        }
    }
}

/// Frame TYPE byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameKind {
    Control,
    Command,
    Unknown(u8),
}

impl From<u8> for FrameKind {
    fn from(value: u8) -> Self {
        match value {
            TYPE_CONTROL => FrameKind::Control,
            TYPE_COMMAND => FrameKind::Command,
            other => FrameKind::Unknown(other),
        }
    }
}

impl From<FrameKind> for u8 {
    fn from(kind: FrameKind) -> Self {
        match kind {
            FrameKind::Control => TYPE_CONTROL,
            FrameKind::Command => TYPE_COMMAND,
            FrameKind::Unknown(other) => other,
        }
    }
}

/// A validated frame: checksum, terminator and version already checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub kind: FrameKind,
    pub seq: u16,
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl Frame {
    /// Decode the payload of a `TYPE_COMMAND` frame; `None` for other types.
    pub fn command(&self) -> Option<Result<Command, CommandError>> {
        match self.kind {
            FrameKind::Command => Some(Command::decode(&self.payload)),
            _ => None,
        }
    }

    /// Decode the payload of a `TYPE_CONTROL` frame; `None` for other types.
    pub fn telemetry(&self) -> Option<Result<Telemetry, FrameError>> {
        match self.kind {
            FrameKind::Control => Some(Telemetry::decode(&self.payload)),
            _ => None,
        }
    }
}

/// Contents of a control frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Telemetry {
    /// g
    pub accel: Vector3<f32>,
    /// deg/s, bias removed
    pub gyro: Vector3<f32>,
    /// Whole degrees Celsius, 0 - 255
    pub temperature: u8,
    pub servo: ServoVector,
}

impl Telemetry {
    /// Assemble telemetry from the estimator's latest reading.
    ///
    /// With `include_imu == false` the IMU fields and the temperature are
    /// zeroed so the frame still has its fixed layout.
    pub fn new(
        accel: Vector3<f32>,
        gyro: Vector3<f32>,
        temperature_c: f32,
        servo: ServoVector,
        include_imu: bool,
    ) -> Self {
        if include_imu {
            Self {
                accel,
                gyro,
                temperature: temperature_byte(temperature_c),
                servo,
            }
        } else {
            Self {
                servo,
                ..Self::default()
            }
        }
    }

    /// Decode a 57-byte control payload.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < CONTROL_PAYLOAD_LEN {
            return Err(FrameError::Truncated);
        }
        if payload.len() > CONTROL_PAYLOAD_LEN {
            return Err(FrameError::LengthMismatch);
        }

        let f32_at = |i: usize| {
            f32::from_le_bytes([payload[i], payload[i + 1], payload[i + 2], payload[i + 3]])
        };
        let u16_at = |i: usize| u16::from_le_bytes([payload[i], payload[i + 1]]);

        let mut servo = ServoVector::neutral();
        for ch in 0..SERVO_CHANNELS {
            servo.positions[ch] = u16_at(25 + 2 * ch);
            servo.offsets[ch] = u16_at(41 + 2 * ch);
        }

        Ok(Self {
            accel: Vector3::new(f32_at(0), f32_at(4), f32_at(8)),
            gyro: Vector3::new(f32_at(12), f32_at(16), f32_at(20)),
            temperature: payload[24],
            servo,
        })
    }

    fn encode_payload(&self) -> [u8; CONTROL_PAYLOAD_LEN] {
        let mut payload = [0u8; CONTROL_PAYLOAD_LEN];
        let floats = [
            self.accel.x,
            self.accel.y,
            self.accel.z,
            self.gyro.x,
            self.gyro.y,
            self.gyro.z,
        ];
        for (chunk, value) in payload[..24].chunks_exact_mut(4).zip(floats) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        payload[24] = self.temperature;
        let words = self.servo.positions.iter().chain(self.servo.offsets.iter());
        for (chunk, value) in payload[25..].chunks_exact_mut(2).zip(words) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        payload
    }
}

/// Temperature byte: clamped to 0 - 255 °C and truncated.
pub fn temperature_byte(celsius: f32) -> u8 {
    if celsius.is_nan() {
        0
    } else {
        celsius.clamp(0.0, 255.0) as u8
    }
}

/// Write a frame of any type around `payload`.
///
/// # Returns
/// - `Ok(n)`: bytes written to `out`
/// - `Err(CodecError::BufferTooSmall)`: `out` shorter than the frame
pub fn build_frame(
    out: &mut [u8],
    kind: FrameKind,
    seq: u16,
    payload: &[u8],
    with_etx: bool,
) -> Result<usize, CodecError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }
    let needed = frame_len(payload.len(), with_etx);
    if out.len() < needed {
        return Err(CodecError::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }

    out[0] = SYNC0;
    out[1] = SYNC1;
    out[2] = VERSION;
    out[3] = kind.into();
    out[4..6].copy_from_slice(&seq.to_le_bytes());
    out[6..8].copy_from_slice(&(payload.len() as u16).to_le_bytes());

    let crc_at = HEADER_LEN + payload.len();
    out[HEADER_LEN..crc_at].copy_from_slice(payload);
    let crc = crc16_ccitt(&out[2..crc_at]);
    out[crc_at..crc_at + CRC_LEN].copy_from_slice(&crc.to_le_bytes());
    if with_etx {
        out[crc_at + CRC_LEN] = ETX;
    }
    Ok(needed)
}

/// Write a control frame: 67 bytes, 68 with the terminator.
pub fn build_control(
    out: &mut [u8],
    telemetry: &Telemetry,
    seq: u16,
    with_etx: bool,
) -> Result<usize, CodecError> {
    build_frame(out, FrameKind::Control, seq, &telemetry.encode_payload(), with_etx)
}

/// Write a command frame (host side).
pub fn build_command(
    out: &mut [u8],
    command: &Command,
    seq: u16,
    with_etx: bool,
) -> Result<usize, CodecError> {
    let mut payload = [0u8; MAX_COMMAND_LEN];
    let n = command.encode(&mut payload)?;
    build_frame(out, FrameKind::Command, seq, &payload[..n], with_etx)
}

/// Write the reply to a binary PING: a one-byte command frame echoing `seq`,
/// always terminated.
pub fn build_pong(out: &mut [u8], seq: u16) -> Result<usize, CodecError> {
    build_frame(out, FrameKind::Command, seq, &[CMD_PING], true)
}

/// Validate and split one complete frame.
///
/// `bytes` must hold exactly one frame. Checks run in order: length, sync,
/// checksum, terminator, version.
pub fn decode_frame(bytes: &[u8], with_etx: bool) -> Result<Frame, FrameError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::Truncated);
    }
    if bytes[0] != SYNC0 || bytes[1] != SYNC1 {
        return Err(FrameError::BadSync);
    }

    let len = usize::from(u16::from_le_bytes([bytes[6], bytes[7]]));
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::BufferOverflow);
    }
    let expected = frame_len(len, with_etx);
    if bytes.len() < expected {
        return Err(FrameError::Truncated);
    }
    if bytes.len() > expected {
        return Err(FrameError::LengthMismatch);
    }

    let crc_at = HEADER_LEN + len;
    let received = u16::from_le_bytes([bytes[crc_at], bytes[crc_at + 1]]);
    if crc16_ccitt(&bytes[2..crc_at]) != received {
        return Err(FrameError::CrcMismatch);
    }
    if with_etx && bytes[expected - 1] != ETX {
        return Err(FrameError::BadTerminator);
    }
    if bytes[2] != VERSION {
        return Err(FrameError::UnsupportedVersion(bytes[2]));
    }

    let mut payload = Vec::new();
    payload
        .extend_from_slice(&bytes[HEADER_LEN..crc_at])
        .map_err(|_| FrameError::BufferOverflow)?;

    Ok(Frame {
        version: bytes[2],
        kind: FrameKind::from(bytes[3]),
        seq: u16::from_le_bytes([bytes[4], bytes[5]]),
        payload,
    })
}
