//! Stationary gyro bias averaging.

use nalgebra::Vector3;

/// Running sum of raw gyro samples taken while the sensor is still.
///
/// The solver drives it from a blocking or async loop; it owns no bus and no
/// clock, so the mean can be checked with synthetic samples.
#[derive(Clone, Copy, Debug)]
pub struct GyroBiasEstimator {
    sum: Vector3<f32>,
    taken: u32,
    target: u32,
}

impl GyroBiasEstimator {
    /// Start a run that expects `target` samples.
    pub fn new(target: u32) -> Self {
        Self {
            sum: Vector3::zeros(),
            taken: 0,
            target,
        }
    }

    /// Accumulate one gyro reading (deg/s).
    pub fn add(&mut self, gyro: &Vector3<f32>) {
        self.sum += gyro;
        self.taken = self.taken.saturating_add(1);
    }

    pub fn samples_taken(&self) -> u32 {
        self.taken
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn is_complete(&self) -> bool {
        self.taken >= self.target
    }

    /// Completion in percent, 100 for an empty run.
    pub fn progress_percent(&self) -> u8 {
        if self.target == 0 {
            return 100;
        }
        let pct = u64::from(self.taken.min(self.target)) * 100 / u64::from(self.target);
        pct as u8
    }

    /// Mean of the accumulated samples, `None` before the first one.
    pub fn mean(&self) -> Option<Vector3<f32>> {
        if self.taken == 0 {
            None
        } else {
            Some(self.sum / self.taken as f32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn empty_run_has_no_mean() {
        let est = GyroBiasEstimator::new(0);
        assert_eq!(est.mean(), None);
        assert!(est.is_complete());
        assert_eq!(est.progress_percent(), 100);
    }

    #[test]
    fn zero_input_gives_zero_bias() {
        let mut est = GyroBiasEstimator::new(500);
        for _ in 0..500 {
            est.add(&Vector3::zeros());
        }
        assert_eq!(est.mean(), Some(Vector3::zeros()));
    }

    #[test]
    fn constant_input_gives_that_constant() {
        let c = Vector3::new(1.25, -0.5, 3.0);
        let mut est = GyroBiasEstimator::new(100);
        for _ in 0..100 {
            est.add(&c);
        }
        let mean = est.mean().unwrap();
        assert_relative_eq!(mean.x, c.x, epsilon = 1e-5);
        assert_relative_eq!(mean.y, c.y, epsilon = 1e-5);
        assert_relative_eq!(mean.z, c.z, epsilon = 1e-5);
    }

    #[test]
    fn progress_tracks_samples() {
        let mut est = GyroBiasEstimator::new(4);
        assert_eq!(est.progress_percent(), 0);
        est.add(&Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(est.progress_percent(), 25);
        est.add(&Vector3::new(3.0, 0.0, 0.0));
        assert!(!est.is_complete());
        assert_relative_eq!(est.mean().unwrap().x, 2.0);
        est.add(&Vector3::zeros());
        est.add(&Vector3::zeros());
        assert!(est.is_complete());
        assert_eq!(est.progress_percent(), 100);
        assert_eq!(est.samples_taken(), 4);
    }
}
