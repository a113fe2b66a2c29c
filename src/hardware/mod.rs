//! Sensor side: IMU driver, attitude filter, calibration and tick counters.

pub mod calibration;
pub mod complementary_filter;
pub mod heartbeat;
pub mod mpu6886;
pub mod mpu6886_ahrs_solver;

#[cfg(test)]
pub(crate) mod fake_bus;

pub use calibration::GyroBiasEstimator;
pub use complementary_filter::{ComplementaryFilter, EulerAngles, FilterStep};
pub use heartbeat::{Heartbeat, Period};
pub use mpu6886::{AccelRange, GyroRange, ImuSample, InitError, Mpu6886};
pub use mpu6886_ahrs_solver::Mpu6886AhrsSolver;
