//! Control-link protocol: binary frames, newline-delimited JSON, the command
//! set and the byte-at-a-time framers for both encodings.

pub mod attitude;
pub mod command;
pub mod crc;
pub mod frame;
pub mod framer;
pub mod servo;
pub mod text;

pub use attitude::{ATTITUDE_PACKET_LEN, AttitudeReport};
pub use command::{ChannelValues, Command, CommandError};
pub use crc::crc16_ccitt;
pub use frame::{
    Frame, FrameError, FrameKind, Telemetry, build_command, build_control, build_pong, decode_frame,
};
pub use framer::{Framer, FramerStats};
pub use servo::{SERVO_CHANNELS, ServoVector, decode_servo_datagram};
pub use text::{LineFramer, TextRequest};

/// Encoding failures. These indicate a caller bug, never bad input from the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// Destination buffer shorter than the encoded output.
    BufferTooSmall { needed: usize, available: usize },
    /// Payload longer than any frame may carry.
    PayloadTooLarge(usize),
    /// The command has no form in this encoding.
    NotRepresentable,
}

impl core::fmt::Display for CodecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CodecError::BufferTooSmall { needed, available } => {
                write!(f, "buffer too small: need {} bytes, have {}", needed, available)
            }
            CodecError::PayloadTooLarge(len) => write!(f, "payload of {} bytes too large", len),
            CodecError::NotRepresentable => f.write_str("command has no binary encoding"),
        }
    }
}
