//! Command sub-frames carried in `TYPE_COMMAND` payloads.
//!
//! Payload byte 0 is the command code; arguments follow little-endian.
//!
//! | code | command          | arguments      | min length |
//! |------|------------------|----------------|------------|
//! | 0x01 | `SET_SERVO`      | id u8, val u16 | 4          |
//! | 0x02 | `SET_ALL_SERVOS` | 8 × u16        | 17         |
//! | 0x03 | `RESET`          |                | 1          |
//! | 0x04 | `PING`           |                | 1          |
//!
//! Bytes beyond the minimum length are ignored.

use heapless::Vec;

use super::CodecError;
use super::servo::SERVO_CHANNELS;

pub const CMD_SET_SERVO: u8 = 0x01;
pub const CMD_SET_ALL_SERVOS: u8 = 0x02;
pub const CMD_RESET: u8 = 0x03;
pub const CMD_PING: u8 = 0x04;

/// Longest encoded command (`SET_ALL_SERVOS`).
pub const MAX_COMMAND_LEN: usize = 1 + 2 * SERVO_CHANNELS;

/// Up to eight channel values; shorter lists update a prefix.
pub type ChannelValues = Vec<u16, SERVO_CHANNELS>;

/// A request from the host, decoded from either encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// One channel's target angle.
    SetServo { id: u8, value: u16 },
    /// Target angles for the first N channels.
    SetPositions(ChannelValues),
    /// Trim offsets for the first N channels. Text encoding only.
    SetOffsets(ChannelValues),
    /// All positions to neutral, all offsets to zero.
    Reset,
    /// Liveness check; answered, never applied.
    Ping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// Zero-length payload.
    Empty,
    UnknownCode(u8),
    /// Payload shorter than the command's arguments.
    Truncated,
    /// `SET_SERVO` addressed a channel ≥ 8.
    ChannelOutOfRange(u8),
}

impl core::fmt::Display for CommandError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CommandError::Empty => f.write_str("empty command payload"),
            CommandError::UnknownCode(code) => write!(f, "unknown command code {:#04x}", code),
            CommandError::Truncated => f.write_str("command payload truncated"),
            CommandError::ChannelOutOfRange(id) => write!(f, "servo channel {} out of range", id),
        }
    }
}

impl Command {
    /// Decode a `TYPE_COMMAND` payload.
    pub fn decode(payload: &[u8]) -> Result<Self, CommandError> {
        let (&code, args) = payload.split_first().ok_or(CommandError::Empty)?;
        match code {
            CMD_SET_SERVO => {
                if args.len() < 3 {
                    return Err(CommandError::Truncated);
                }
                let id = args[0];
                if usize::from(id) >= SERVO_CHANNELS {
                    return Err(CommandError::ChannelOutOfRange(id));
                }
                Ok(Command::SetServo {
                    id,
                    value: u16::from_le_bytes([args[1], args[2]]),
                })
            }
            CMD_SET_ALL_SERVOS => {
                if args.len() < 2 * SERVO_CHANNELS {
                    return Err(CommandError::Truncated);
                }
                let mut values = ChannelValues::new();
                for chunk in args.chunks_exact(2).take(SERVO_CHANNELS) {
                    // capacity equals the number of chunks taken
                    let _ = values.push(u16::from_le_bytes([chunk[0], chunk[1]]));
                }
                Ok(Command::SetPositions(values))
            }
            CMD_RESET => Ok(Command::Reset),
            CMD_PING => Ok(Command::Ping),
            other => Err(CommandError::UnknownCode(other)),
        }
    }

    /// Binary command code, `None` for commands only the text encoding can
    /// express.
    pub fn code(&self) -> Option<u8> {
        match self {
            Command::SetServo { .. } => Some(CMD_SET_SERVO),
            Command::SetPositions(values) if values.len() == SERVO_CHANNELS => {
                Some(CMD_SET_ALL_SERVOS)
            }
            Command::SetPositions(_) | Command::SetOffsets(_) => None,
            Command::Reset => Some(CMD_RESET),
            Command::Ping => Some(CMD_PING),
        }
    }

    /// Encode as a `TYPE_COMMAND` payload.
    ///
    /// # Returns
    /// - `Ok(n)`: bytes written
    /// - `Err(CodecError::NotRepresentable)`: no binary form (offsets, or
    ///   fewer than eight positions)
    /// - `Err(CodecError::BufferTooSmall)`: `out` too short
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, CodecError> {
        let code = self.code().ok_or(CodecError::NotRepresentable)?;
        let needed = match self {
            Command::SetServo { .. } => 4,
            Command::SetPositions(_) => MAX_COMMAND_LEN,
            _ => 1,
        };
        if out.len() < needed {
            return Err(CodecError::BufferTooSmall {
                needed,
                available: out.len(),
            });
        }

        out[0] = code;
        match self {
            Command::SetServo { id, value } => {
                out[1] = *id;
                out[2..4].copy_from_slice(&value.to_le_bytes());
            }
            Command::SetPositions(values) => {
                for (chunk, value) in out[1..needed].chunks_exact_mut(2).zip(values) {
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
            }
            _ => {}
        }
        Ok(needed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_code() {
        assert_eq!(
            Command::decode(&[CMD_SET_SERVO, 2, 0x2D, 0x00]),
            Ok(Command::SetServo { id: 2, value: 45 })
        );
        assert_eq!(Command::decode(&[CMD_RESET]), Ok(Command::Reset));
        assert_eq!(Command::decode(&[CMD_PING, 0xFF]), Ok(Command::Ping));

        let mut payload = [0u8; 17];
        payload[0] = CMD_SET_ALL_SERVOS;
        for i in 0..8 {
            payload[1 + 2 * i] = (i * 20) as u8;
        }
        let Ok(Command::SetPositions(values)) = Command::decode(&payload) else {
            panic!("expected SetPositions");
        };
        assert_eq!(&values[..], &[0, 20, 40, 60, 80, 100, 120, 140]);
    }

    #[test]
    fn rejects_bad_payloads() {
        assert_eq!(Command::decode(&[]), Err(CommandError::Empty));
        assert_eq!(Command::decode(&[0x09]), Err(CommandError::UnknownCode(0x09)));
        assert_eq!(Command::decode(&[CMD_SET_SERVO, 1, 0]), Err(CommandError::Truncated));
        assert_eq!(
            Command::decode(&[CMD_SET_ALL_SERVOS, 0, 0, 0]),
            Err(CommandError::Truncated)
        );
        assert_eq!(
            Command::decode(&[CMD_SET_SERVO, 8, 0, 0]),
            Err(CommandError::ChannelOutOfRange(8))
        );
    }

    #[test]
    fn encode_then_decode() {
        let all = Command::SetPositions(Vec::from_slice(&[180, 0, 90, 90, 1, 2, 3, 500]).unwrap());
        for cmd in [
            Command::SetServo { id: 7, value: 0x1234 },
            all,
            Command::Reset,
            Command::Ping,
        ] {
            let mut buf = [0u8; MAX_COMMAND_LEN];
            let n = cmd.encode(&mut buf).unwrap();
            assert_eq!(Command::decode(&buf[..n]), Ok(cmd));
        }
    }

    #[test]
    fn text_only_commands_have_no_binary_form() {
        let mut buf = [0u8; MAX_COMMAND_LEN];
        let partial = Command::SetPositions(Vec::from_slice(&[1, 2]).unwrap());
        assert_eq!(partial.encode(&mut buf), Err(CodecError::NotRepresentable));
        let offsets = Command::SetOffsets(Vec::from_slice(&[0; 8]).unwrap());
        assert_eq!(offsets.encode(&mut buf), Err(CodecError::NotRepresentable));
    }

    #[test]
    fn encode_checks_buffer() {
        let mut buf = [0u8; 3];
        assert_eq!(
            Command::SetServo { id: 0, value: 1 }.encode(&mut buf),
            Err(CodecError::BufferTooSmall { needed: 4, available: 3 })
        );
    }
}
