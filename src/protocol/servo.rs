use super::command::Command;

/// Number of servo channels carried by every frame.
pub const SERVO_CHANNELS: usize = 8;

/// Neutral servo angle in degrees.
pub const NEUTRAL_POSITION: u16 = 90;

/// Upper bound of a servo angle in degrees.
pub const MAX_POSITION: u16 = 180;

/// Target angles and trim offsets for the eight servo channels.
///
/// Values are carried verbatim as `u16`; mapping to PWM, clamping and
/// per-channel inversion happen in the output stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServoVector {
    /// Target angles, 0 - 180°
    pub positions: [u16; SERVO_CHANNELS],
    /// Per-channel trim
    pub offsets: [u16; SERVO_CHANNELS],
}

impl Default for ServoVector {
    fn default() -> Self {
        Self::neutral()
    }
}

impl ServoVector {
    /// All channels at 90° with zero trim.
    pub const fn neutral() -> Self {
        Self {
            positions: [NEUTRAL_POSITION; SERVO_CHANNELS],
            offsets: [0; SERVO_CHANNELS],
        }
    }

    /// Back to [`neutral`](Self::neutral). Idempotent.
    pub fn reset(&mut self) {
        *self = Self::neutral();
    }

    /// Apply a decoded command.
    ///
    /// # Returns
    /// `true` when the command targets the servo state (even if the values
    /// were already in place), `false` for [`Command::Ping`] and for an
    /// out-of-range channel.
    pub fn apply(&mut self, command: &Command) -> bool {
        match command {
            Command::SetServo { id, value } => match self.positions.get_mut(usize::from(*id)) {
                Some(slot) => {
                    *slot = *value;
                    true
                }
                None => false,
            },
            Command::SetPositions(values) => {
                copy_prefix(&mut self.positions, values);
                true
            }
            Command::SetOffsets(values) => {
                copy_prefix(&mut self.offsets, values);
                true
            }
            Command::Reset => {
                self.reset();
                true
            }
            Command::Ping => false,
        }
    }
}

fn copy_prefix(dst: &mut [u16; SERVO_CHANNELS], src: &[u16]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = *s;
    }
}

/// Decode the legacy datagram servo packet: `AA 55` followed by eight
/// little-endian `u16` angles, each clamped to 180°.
///
/// Trailing bytes are ignored; `None` for a short packet or wrong sync.
pub fn decode_servo_datagram(data: &[u8]) -> Option<[u16; SERVO_CHANNELS]> {
    let body = data.strip_prefix(&[super::frame::SYNC0, super::frame::SYNC1])?;
    if body.len() < SERVO_CHANNELS * 2 {
        return None;
    }

    let mut angles = [0u16; SERVO_CHANNELS];
    for (angle, chunk) in angles.iter_mut().zip(body.chunks_exact(2)) {
        *angle = u16::from_le_bytes([chunk[0], chunk[1]]).min(MAX_POSITION);
    }
    Some(angles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    #[test]
    fn reset_is_idempotent() {
        let mut servo = ServoVector {
            positions: [10, 20, 30, 40, 50, 60, 70, 80],
            offsets: [1, 2, 3, 4, 5, 6, 7, 8],
        };
        assert!(servo.apply(&Command::Reset));
        let once = servo;
        assert!(servo.apply(&Command::Reset));
        assert_eq!(servo, once);
        assert_eq!(servo.positions, [90; 8]);
        assert_eq!(servo.offsets, [0; 8]);
    }

    #[test]
    fn set_servo_touches_one_channel() {
        let mut servo = ServoVector::neutral();
        assert!(servo.apply(&Command::SetServo { id: 3, value: 120 }));
        assert_eq!(servo.positions, [90, 90, 90, 120, 90, 90, 90, 90]);
    }

    #[test]
    fn out_of_range_channel_is_ignored() {
        let mut servo = ServoVector::neutral();
        assert!(!servo.apply(&Command::SetServo { id: 8, value: 0 }));
        assert_eq!(servo, ServoVector::neutral());
    }

    #[test]
    fn partial_arrays_update_a_prefix() {
        let mut servo = ServoVector::neutral();
        let pos: Vec<u16, 8> = Vec::from_slice(&[0, 45]).unwrap();
        servo.apply(&Command::SetPositions(pos));
        assert_eq!(servo.positions, [0, 45, 90, 90, 90, 90, 90, 90]);

        let off: Vec<u16, 8> = Vec::from_slice(&[5, 5, 5]).unwrap();
        servo.apply(&Command::SetOffsets(off));
        assert_eq!(servo.offsets, [5, 5, 5, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn ping_leaves_state_alone() {
        let mut servo = ServoVector::neutral();
        assert!(!servo.apply(&Command::Ping));
        assert_eq!(servo, ServoVector::neutral());
    }

    #[test]
    fn datagram_angles_are_clamped() {
        let mut packet = [0u8; 18];
        packet[0] = 0xAA;
        packet[1] = 0x55;
        let angles: [u16; 8] = [0, 90, 180, 181, 1000, 45, 135, 7];
        for (i, a) in angles.iter().enumerate() {
            packet[2 + 2 * i..4 + 2 * i].copy_from_slice(&a.to_le_bytes());
        }
        assert_eq!(
            decode_servo_datagram(&packet),
            Some([0, 90, 180, 180, 180, 45, 135, 7])
        );
    }

    #[test]
    fn datagram_rejects_short_or_unsynced() {
        assert_eq!(decode_servo_datagram(&[0xAA, 0x55, 0, 0]), None);
        let mut packet = [0u8; 18];
        packet[0] = 0xAA;
        packet[1] = 0x54;
        assert_eq!(decode_servo_datagram(&packet), None);
    }
}
