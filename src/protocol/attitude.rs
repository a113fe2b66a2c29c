//! Attitude datagram: the estimator's tared angles and gyro rates, broadcast
//! once per telemetry tick.
//!
//! ```text
//! AA 55 | roll pitch yaw (deg) | gx gy gz (deg/s) | temp u8
//!        f32 LE × 6                                  27 bytes total
//! ```
//!
//! No version, sequence number or checksum; receivers check the sync bytes
//! and the length only.

use nalgebra::Vector3;

use super::CodecError;
use super::frame::{SYNC0, SYNC1, temperature_byte};
use crate::hardware::EulerAngles;

pub const ATTITUDE_PACKET_LEN: usize = 2 + 6 * 4 + 1;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AttitudeReport {
    /// Relative to the level reference.
    pub angles: EulerAngles,
    /// deg/s, bias removed
    pub gyro: Vector3<f32>,
    pub temperature: u8,
}

impl AttitudeReport {
    pub fn new(angles: EulerAngles, gyro: Vector3<f32>, temperature_c: f32) -> Self {
        Self {
            angles,
            gyro,
            temperature: temperature_byte(temperature_c),
        }
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, CodecError> {
        let available = out.len();
        let out = out
            .get_mut(..ATTITUDE_PACKET_LEN)
            .ok_or(CodecError::BufferTooSmall {
                needed: ATTITUDE_PACKET_LEN,
                available,
            })?;

        out[0] = SYNC0;
        out[1] = SYNC1;
        let floats = [
            self.angles.roll,
            self.angles.pitch,
            self.angles.yaw,
            self.gyro.x,
            self.gyro.y,
            self.gyro.z,
        ];
        for (chunk, value) in out[2..26].chunks_exact_mut(4).zip(floats) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out[26] = self.temperature;
        Ok(ATTITUDE_PACKET_LEN)
    }

    /// `None` unless `packet` is exactly one attitude datagram.
    pub fn decode(packet: &[u8]) -> Option<Self> {
        if packet.len() != ATTITUDE_PACKET_LEN || packet[..2] != [SYNC0, SYNC1] {
            return None;
        }
        let f32_at = |i: usize| {
            f32::from_le_bytes([packet[i], packet[i + 1], packet[i + 2], packet[i + 3]])
        };
        Some(Self {
            angles: EulerAngles {
                roll: f32_at(2),
                pitch: f32_at(6),
                yaw: f32_at(10),
            },
            gyro: Vector3::new(f32_at(14), f32_at(18), f32_at(22)),
            temperature: packet[26],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> AttitudeReport {
        AttitudeReport::new(
            EulerAngles {
                roll: 12.5,
                pitch: -3.25,
                yaw: 179.0,
            },
            Vector3::new(0.5, -1.0, 2.0),
            36.7,
        )
    }

    #[test]
    fn byte_layout() {
        let mut buf = [0u8; 32];
        let n = report().encode(&mut buf).unwrap();
        assert_eq!(n, 27);
        assert_eq!(&buf[..2], &[0xAA, 0x55]);
        assert_eq!(&buf[2..6], &12.5f32.to_le_bytes());
        assert_eq!(&buf[6..10], &(-3.25f32).to_le_bytes());
        assert_eq!(&buf[10..14], &179.0f32.to_le_bytes());
        assert_eq!(&buf[14..18], &0.5f32.to_le_bytes());
        assert_eq!(&buf[22..26], &2.0f32.to_le_bytes());
        assert_eq!(buf[26], 36);
        assert_eq!(AttitudeReport::decode(&buf[..n]), Some(report()));
    }

    #[test]
    fn short_buffer_is_reported() {
        let mut buf = [0u8; 26];
        assert_eq!(
            report().encode(&mut buf),
            Err(CodecError::BufferTooSmall {
                needed: 27,
                available: 26
            })
        );
    }

    #[test]
    fn decode_rejects_wrong_length_or_sync() {
        let mut buf = [0u8; 27];
        report().encode(&mut buf).unwrap();
        assert!(AttitudeReport::decode(&buf[..26]).is_none());
        buf[1] = 0x56;
        assert!(AttitudeReport::decode(&buf).is_none());
    }
}
