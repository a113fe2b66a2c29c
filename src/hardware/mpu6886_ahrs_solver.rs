use embedded_hal::{delay::DelayNs, i2c::I2c};
use nalgebra::{UnitQuaternion, Vector3};

use super::calibration::GyroBiasEstimator;
use super::complementary_filter::{ComplementaryFilter, EulerAngles, FilterStep};
use super::mpu6886::{ImuSample, InitError, Mpu6886};
use crate::config::EstimatorConfig;

/// MPU6886 sensor plus complementary filter: the complete attitude estimator.
///
/// Owns the driver, the filter state, the gyro bias and the level reference.
/// One [`update`](Self::update) per control tick reads a burst sample,
/// subtracts the bias and advances the filter by the measured `dt`.
///
/// # Type parameters
/// - `I2C`: bus implementing `embedded_hal::i2c::I2c`
pub struct Mpu6886AhrsSolver<I2C> {
    imu: Mpu6886<I2C>,
    filter: ComplementaryFilter,
    config: EstimatorConfig,
    /// Latest reading, gyro not bias-corrected
    sample: ImuSample,
    /// Gyro zero-rate offset (deg/s)
    gyro_bias: Vector3<f32>,
    /// Angles recorded by the last tare
    level: EulerAngles,
    missed_samples: u32,
}

impl<I2C, E> Mpu6886AhrsSolver<I2C>
where
    I2C: I2c<Error = E>,
{
    /// Create an estimator. The bus is not touched until [`init`](Self::init).
    pub fn new(i2c: I2C, config: EstimatorConfig) -> Self {
        Self {
            imu: Mpu6886::new(i2c, config.address),
            filter: ComplementaryFilter::new(config.sample_rate_hz, config.gain),
            config,
            sample: ImuSample::default(),
            gyro_bias: Vector3::zeros(),
            level: EulerAngles::default(),
            missed_samples: 0,
        }
    }

    /// Detect and configure the IMU.
    ///
    /// # Returns
    /// - `Ok(id)`: WHO_AM_I of the detected part
    /// - `Err(InitError)`: unknown part or bus failure
    pub fn init<D: DelayNs>(&mut self, delay: &mut D) -> Result<u8, InitError<E>> {
        let id = self.imu.init(delay)?;
        info!("IMU ready, WHO_AM_I {}", id);
        Ok(id)
    }

    /// Measure the gyro zero-rate offset. The sensor must be still.
    ///
    /// Reads the gyro `samples` times, `calibration_delay_ms` apart, and
    /// stores the mean as the new bias. Zero samples leave the bias as it was.
    ///
    /// # Returns
    /// - `Ok(bias)`: the bias in effect afterwards
    /// - `Err(E)`: bus failure; the previous bias is kept
    pub fn calibrate<D: DelayNs>(&mut self, samples: u32, delay: &mut D) -> Result<Vector3<f32>, E> {
        info!("gyro calibration: {} samples, keep still", samples);
        let mut estimator = GyroBiasEstimator::new(samples);
        while !estimator.is_complete() {
            estimator.add(&self.imu.read_gyro()?);
            delay.delay_ms(self.config.calibration_delay_ms);
        }
        Ok(self.finish_calibration(&estimator))
    }

    /// [`calibrate`](Self::calibrate) with an async delay, so other tasks keep
    /// running between reads.
    #[cfg(feature = "async")]
    pub async fn calibrate_async<D>(&mut self, samples: u32, delay: &mut D) -> Result<Vector3<f32>, E>
    where
        D: embedded_hal_async::delay::DelayNs,
    {
        info!("gyro calibration: {} samples, keep still", samples);
        let mut estimator = GyroBiasEstimator::new(samples);
        while !estimator.is_complete() {
            estimator.add(&self.imu.read_gyro()?);
            if estimator.samples_taken() % 100 == 0 {
                debug!("calibration {}%", estimator.progress_percent());
            }
            delay.delay_ms(self.config.calibration_delay_ms).await;
        }
        Ok(self.finish_calibration(&estimator))
    }

    fn finish_calibration(&mut self, estimator: &GyroBiasEstimator) -> Vector3<f32> {
        if let Some(bias) = estimator.mean() {
            self.gyro_bias = bias;
            info!("gyro bias: {} {} {} dps", bias.x, bias.y, bias.z);
        }
        self.gyro_bias
    }

    /// Read one sample and advance the filter by `dt` seconds.
    ///
    /// A failed read leaves the orientation untouched and is counted in
    /// [`missed_samples`](Self::missed_samples).
    pub fn update(&mut self, dt: f32) -> Result<FilterStep, E> {
        self.sample = match self.imu.read_sample() {
            Ok(sample) => sample,
            Err(e) => {
                self.missed_samples = self.missed_samples.wrapping_add(1);
                return Err(e);
            }
        };

        let gyro = self.gyro();
        let step = self.filter.update(&gyro, &self.sample.accel, dt);
        if step == FilterStep::DegenerateSample {
            trace!("zero accel sample, gyro-only step");
        }
        Ok(step)
    }

    /// [`update`](Self::update) at the nominal sample period.
    pub fn update_fixed(&mut self) -> Result<FilterStep, E> {
        self.update(self.filter.sample_period())
    }

    /// Latest angular rate with the bias removed (deg/s).
    pub fn gyro(&self) -> Vector3<f32> {
        self.sample.gyro - self.gyro_bias
    }

    /// Latest acceleration (g).
    pub fn accel(&self) -> Vector3<f32> {
        self.sample.accel
    }

    /// Latest die temperature (°C).
    pub fn temperature(&self) -> f32 {
        self.sample.temperature
    }

    /// Latest raw sample, gyro still including the bias.
    pub fn sample(&self) -> &ImuSample {
        &self.sample
    }

    pub fn gyro_bias(&self) -> Vector3<f32> {
        self.gyro_bias
    }

    /// Override the bias, e.g. with a value restored by the caller.
    pub fn set_gyro_bias(&mut self, bias: Vector3<f32>) {
        self.gyro_bias = bias;
    }

    pub fn quaternion(&self) -> UnitQuaternion<f32> {
        self.filter.quaternion()
    }

    /// Absolute roll/pitch/yaw in degrees.
    pub fn euler_angles(&self) -> EulerAngles {
        self.filter.euler_angles()
    }

    /// Record the current attitude as level.
    pub fn tare(&mut self) {
        self.level = self.filter.euler_angles();
        debug!(
            "level reference: roll {} pitch {} yaw {}",
            self.level.roll, self.level.pitch, self.level.yaw
        );
    }

    /// Angles relative to the last [`tare`](Self::tare).
    pub fn level_angles(&self) -> EulerAngles {
        self.filter.euler_angles() - self.level
    }

    /// Back to the identity orientation; bias and level reference are kept.
    pub fn reset_orientation(&mut self) {
        self.filter.reset();
    }

    pub fn filter_mut(&mut self) -> &mut ComplementaryFilter {
        &mut self.filter
    }

    /// Bus reads that failed since start-up.
    pub fn missed_samples(&self) -> u32 {
        self.missed_samples
    }

    /// Give the bus back.
    pub fn release(self) -> I2C {
        self.imu.release()
    }
}
