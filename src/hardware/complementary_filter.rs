//! Quaternion complementary filter (Madgwick/Mahony style) for 6-axis IMUs.
//!
//! The gravity error between the measured acceleration and the direction
//! predicted by the current orientation is fed back into the angular rate
//! before the quaternion is integrated. There is no magnetometer, so yaw is
//! gyro-only and drifts with residual bias.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use num_traits::Float;

/// Squared accelerometer norm below which the sample carries no direction.
const MIN_ACCEL_NORM_SQUARED: f32 = 1e-12;

/// Outcome of one [`ComplementaryFilter::update`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterStep {
    /// Gyro integration with accelerometer correction.
    Corrected,
    /// Zero-magnitude accelerometer reading: integrated gyro only.
    DegenerateSample,
}

/// Roll/pitch/yaw in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EulerAngles {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl core::ops::Sub for EulerAngles {
    type Output = EulerAngles;

    fn sub(self, rhs: Self) -> Self::Output {
        EulerAngles {
            roll: self.roll - rhs.roll,
            pitch: self.pitch - rhs.pitch,
            yaw: self.yaw - rhs.yaw,
        }
    }
}

/// Attitude filter state.
#[derive(Clone, Copy, Debug)]
pub struct ComplementaryFilter {
    /// Orientation, `(w, i, j, k)`, kept at unit norm.
    q: Quaternion<f32>,
    /// Feedback gain β
    gain: f32,
    /// Nominal sample period in seconds
    sample_period: f32,
}

impl Default for ComplementaryFilter {
    /// 100 Hz, β = 0.4.
    fn default() -> Self {
        Self::new(100.0, 0.4)
    }
}

impl ComplementaryFilter {
    /// Create a filter at the identity orientation.
    ///
    /// # Parameters
    /// - `sample_rate_hz`: nominal update rate, used by [`update_fixed`](Self::update_fixed)
    /// - `gain`: feedback gain; higher converges faster but passes more accelerometer noise
    ///   (typical 0.1 - 0.5)
    pub fn new(sample_rate_hz: f32, gain: f32) -> Self {
        Self {
            q: Quaternion::identity(),
            gain,
            sample_period: 1.0 / sample_rate_hz,
        }
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_sample_rate(&mut self, sample_rate_hz: f32) {
        self.sample_period = 1.0 / sample_rate_hz;
    }

    /// Nominal sample period in seconds.
    pub fn sample_period(&self) -> f32 {
        self.sample_period
    }

    /// Back to the identity orientation. Bias lives with the caller and is untouched.
    pub fn reset(&mut self) {
        self.q = Quaternion::identity();
    }

    /// Advance the estimate by `dt` seconds.
    ///
    /// # Parameters
    /// - `gyro`: bias-corrected angular rate in deg/s
    /// - `accel`: acceleration in g (any scale works, only the direction is used)
    /// - `dt`: elapsed time since the previous update, in seconds
    pub fn update(&mut self, gyro: &Vector3<f32>, accel: &Vector3<f32>, dt: f32) -> FilterStep {
        let mut gx = gyro.x.to_radians();
        let mut gy = gyro.y.to_radians();
        let mut gz = gyro.z.to_radians();

        let (q0, q1, q2, q3) = (self.q.w, self.q.i, self.q.j, self.q.k);

        let norm_squared = accel.x * accel.x + accel.y * accel.y + accel.z * accel.z;
        let step = if norm_squared > MIN_ACCEL_NORM_SQUARED && norm_squared.is_finite() {
            let recip_norm = inv_sqrt(norm_squared);
            let ax = accel.x * recip_norm;
            let ay = accel.y * recip_norm;
            let az = accel.z * recip_norm;

            // Estimated direction of gravity, halved
            let halfvx = q1 * q3 - q0 * q2;
            let halfvy = q0 * q1 + q2 * q3;
            let halfvz = q0 * q0 - 0.5 + q3 * q3;

            // Error is the cross product between measured and estimated gravity
            let halfex = (ay * halfvz - az * halfvy) * self.gain;
            let halfey = (az * halfvx - ax * halfvz) * self.gain;
            let halfez = (ax * halfvy - ay * halfvx) * self.gain;

            gx += 2.0 * halfex;
            gy += 2.0 * halfey;
            gz += 2.0 * halfez;
            FilterStep::Corrected
        } else {
            FilterStep::DegenerateSample
        };

        let half_dt = 0.5 * dt;
        let qa = q0 + (-q1 * gx - q2 * gy - q3 * gz) * half_dt;
        let qb = q1 + (q0 * gx + q2 * gz - q3 * gy) * half_dt;
        let qc = q2 + (q0 * gy - q1 * gz + q3 * gx) * half_dt;
        let qd = q3 + (q0 * gz + q1 * gy - q2 * gx) * half_dt;

        let norm_squared = qa * qa + qb * qb + qc * qc + qd * qd;
        if norm_squared > 0.0 && norm_squared.is_finite() {
            let recip_norm = inv_sqrt(norm_squared);
            self.q = Quaternion::new(
                qa * recip_norm,
                qb * recip_norm,
                qc * recip_norm,
                qd * recip_norm,
            );
        }

        step
    }

    /// [`update`](Self::update) using the nominal sample period.
    pub fn update_fixed(&mut self, gyro: &Vector3<f32>, accel: &Vector3<f32>) -> FilterStep {
        self.update(gyro, accel, self.sample_period)
    }

    /// Current orientation.
    pub fn quaternion(&self) -> UnitQuaternion<f32> {
        UnitQuaternion::new_unchecked(self.q)
    }

    /// Roll about X, degrees.
    pub fn roll(&self) -> f32 {
        let (q0, q1, q2, q3) = (self.q.w, self.q.i, self.q.j, self.q.k);
        Float::atan2(2.0 * (q0 * q1 + q2 * q3), 1.0 - 2.0 * (q1 * q1 + q2 * q2)).to_degrees()
    }

    /// Pitch about Y, degrees. The `asin` argument is clamped so rounding
    /// near ±90° cannot produce NaN.
    pub fn pitch(&self) -> f32 {
        let (q0, q1, q2, q3) = (self.q.w, self.q.i, self.q.j, self.q.k);
        let sinp = (2.0 * (q0 * q2 - q3 * q1)).clamp(-1.0, 1.0);
        Float::asin(sinp).to_degrees()
    }

    /// Yaw about Z, degrees.
    pub fn yaw(&self) -> f32 {
        let (q0, q1, q2, q3) = (self.q.w, self.q.i, self.q.j, self.q.k);
        Float::atan2(2.0 * (q0 * q3 + q1 * q2), 1.0 - 2.0 * (q2 * q2 + q3 * q3)).to_degrees()
    }

    pub fn euler_angles(&self) -> EulerAngles {
        EulerAngles {
            roll: self.roll(),
            pitch: self.pitch(),
            yaw: self.yaw(),
        }
    }
}

#[inline(always)]
fn inv_sqrt(x: f32) -> f32 {
    1.0 / Float::sqrt(x)
}
