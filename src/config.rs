//! Build-time defaults and runtime configuration.
//!
//! Constants mirror the board wiring and the host tooling defaults. The
//! runtime structs are handed to the estimator and the link session at
//! construction; nothing here is global mutable state.

/// Default 7-bit I2C address of the IMU (AD0 low).
pub const IMU_ADDRESS: u8 = 0x68;

/// Control loop / filter update rate.
pub const SAMPLE_RATE_HZ: f32 = 100.0;

/// Madgwick-style feedback gain used by the firmware.
pub const FILTER_GAIN: f32 = 0.1;

/// Number of gyro samples averaged by a calibration run.
pub const CALIBRATION_SAMPLES: u32 = 500;

/// Delay between calibration reads, in milliseconds.
pub const CALIBRATION_DELAY_MS: u32 = 5;

/// Telemetry send rate.
pub const CONTROL_RATE_HZ: u16 = 100;

/// Byte-stream transport baud rate.
pub const SERIAL_BAUD: u32 = 921_600;

/// Datagram telemetry target.
pub const UDP_TARGET_ADDR: [u8; 4] = [192, 168, 0, 100];
pub const UDP_TARGET_PORT: u16 = 5000;

/// Port on which inbound datagram commands are accepted.
pub const UDP_LISTEN_PORT: u16 = 12345;

/// Broadcast destination of the attitude datagram.
pub const ATTITUDE_BROADCAST_ADDR: [u8; 4] = [192, 168, 0, 255];
pub const ATTITUDE_PORT: u16 = 12346;

/// Estimator parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EstimatorConfig {
    /// I2C address of the IMU.
    pub address: u8,
    /// Nominal update rate in Hz, used when no measured `dt` is available.
    pub sample_rate_hz: f32,
    /// Filter feedback gain (β).
    pub gain: f32,
    /// Samples averaged by [`calibrate`](crate::hardware::Mpu6886AhrsSolver::calibrate).
    pub calibration_samples: u32,
    /// Delay between calibration reads (ms).
    pub calibration_delay_ms: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            address: IMU_ADDRESS,
            sample_rate_hz: SAMPLE_RATE_HZ,
            gain: FILTER_GAIN,
            calibration_samples: CALIBRATION_SAMPLES,
            calibration_delay_ms: CALIBRATION_DELAY_MS,
        }
    }
}

/// Encoding used on the byte-stream transport. One per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEncoding {
    /// `AA 55` framed binary packets terminated by `0x7E`.
    Binary,
    /// Newline-delimited JSON.
    Text,
}

/// Control-link parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkConfig {
    pub encoding: LinkEncoding,
    /// Telemetry frequency; 0 disables outbound telemetry.
    pub control_rate_hz: u16,
    /// When false, IMU fields are sent as zeros (binary) or omitted (text).
    pub include_imu: bool,
    /// Master switch for telemetry output.
    pub telemetry_enabled: bool,
    pub serial_baud: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            encoding: LinkEncoding::Binary,
            control_rate_hz: CONTROL_RATE_HZ,
            include_imu: true,
            telemetry_enabled: true,
            serial_baud: SERIAL_BAUD,
        }
    }
}

impl LinkConfig {
    /// Send interval derived from [`control_rate_hz`](Self::control_rate_hz).
    pub fn send_interval_ms(&self) -> Option<u32> {
        if self.control_rate_hz == 0 {
            None
        } else {
            Some((1000 / u32::from(self.control_rate_hz)).max(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_interval_is_ten_ms() {
        assert_eq!(LinkConfig::default().send_interval_ms(), Some(10));
    }

    #[test]
    fn zero_rate_disables_sending() {
        let cfg = LinkConfig {
            control_rate_hz: 0,
            ..Default::default()
        };
        assert_eq!(cfg.send_interval_ms(), None);
    }

    #[test]
    fn very_high_rate_clamps_to_one_ms() {
        let cfg = LinkConfig {
            control_rate_hz: 5000,
            ..Default::default()
        };
        assert_eq!(cfg.send_interval_ms(), Some(1));
    }
}
