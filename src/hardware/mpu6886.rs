use embedded_hal::{delay::DelayNs, i2c::I2c};
use nalgebra::Vector3;

/// MPU6886 register map (subset used by the polling driver).
pub mod reg {
    pub const GYRO_OFFSET: u8 = 0x13;
    pub const SMPLRT_DIV: u8 = 0x19;
    pub const CONFIG: u8 = 0x1A;
    pub const GYRO_CONFIG: u8 = 0x1B;
    pub const ACCEL_CONFIG: u8 = 0x1C;
    pub const ACCEL_CONFIG2: u8 = 0x1D;
    pub const FIFO_EN: u8 = 0x23;
    pub const INT_PIN_CFG: u8 = 0x37;
    pub const INT_ENABLE: u8 = 0x38;
    pub const ACCEL_XOUT_H: u8 = 0x3B;
    pub const TEMP_OUT_H: u8 = 0x41;
    pub const GYRO_XOUT_H: u8 = 0x43;
    pub const USER_CTRL: u8 = 0x6A;
    pub const PWR_MGMT_1: u8 = 0x6B;
    pub const WHO_AM_I: u8 = 0x75;
}

/// WHO_AM_I value reported by the MPU6886.
pub const WHO_AM_I_MPU6886: u8 = 0x19;
/// WHO_AM_I value reported by MPU6500-class parts on the same footprint.
pub const WHO_AM_I_MPU6500: u8 = 0x70;

/// Temperature sensitivity (LSB per °C) and offset.
const TEMP_SENSITIVITY: f32 = 326.8;
const TEMP_OFFSET: f32 = 25.0;

/// Full-scale range of the accelerometer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccelRange {
    G2 = 0,
    G4 = 1,
    G8 = 2,
    G16 = 3,
}

impl AccelRange {
    /// ACCEL_CONFIG register value selecting this range.
    pub fn bits(self) -> u8 {
        (self as u8) << 3
    }

    /// g per LSB.
    pub fn resolution(self) -> f32 {
        let full_scale = match self {
            AccelRange::G2 => 2.0,
            AccelRange::G4 => 4.0,
            AccelRange::G8 => 8.0,
            AccelRange::G16 => 16.0,
        };
        full_scale / 32768.0
    }
}

/// Full-scale range of the gyroscope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GyroRange {
    D250 = 0,
    D500 = 1,
    D1000 = 2,
    D2000 = 3,
}

impl GyroRange {
    /// GYRO_CONFIG register value selecting this range.
    pub fn bits(self) -> u8 {
        (self as u8) << 3
    }

    /// deg/s per LSB.
    pub fn resolution(self) -> f32 {
        let full_scale = match self {
            GyroRange::D250 => 250.0,
            GyroRange::D500 => 500.0,
            GyroRange::D1000 => 1000.0,
            GyroRange::D2000 => 2000.0,
        };
        full_scale / 32768.0
    }
}

/// One IMU reading in physical units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImuSample {
    /// Acceleration in g.
    pub accel: Vector3<f32>,
    /// Angular rate in deg/s.
    pub gyro: Vector3<f32>,
    /// Die temperature in °C.
    pub temperature: f32,
}

/// Errors raised while bringing up the sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError<E> {
    /// WHO_AM_I did not match a supported part; carries the value read.
    DeviceNotFound(u8),
    /// The bus transaction itself failed.
    Bus(E),
}

impl<E: core::fmt::Debug> core::fmt::Display for InitError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InitError::DeviceNotFound(id) => write!(f, "no IMU found (WHO_AM_I = {:#04x})", id),
            InitError::Bus(e) => write!(f, "IMU bus error: {:?}", e),
        }
    }
}

/// Minimal polling driver for the MPU6886 6-axis IMU.
///
/// FIFO and interrupts are left disabled; every read is a bounded
/// `write_read` transaction on the shared bus.
///
/// # Type parameters
/// - `I2C`: any bus implementing `embedded_hal::i2c::I2c`
pub struct Mpu6886<I2C> {
    i2c: I2C,
    address: u8,
    device_id: u8,
    accel_range: AccelRange,
    gyro_range: GyroRange,
    accel_res: f32,
    gyro_res: f32,
}

impl<I2C, E> Mpu6886<I2C>
where
    I2C: I2c<Error = E>,
{
    /// Wrap a bus. No traffic is generated until [`init`](Self::init).
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self {
            i2c,
            address,
            device_id: 0,
            accel_range: AccelRange::G8,
            gyro_range: GyroRange::D2000,
            accel_res: AccelRange::G8.resolution(),
            gyro_res: GyroRange::D2000.resolution(),
        }
    }

    /// Identify and configure the sensor.
    ///
    /// Steps:
    /// 1. check WHO_AM_I against the two known IDs
    /// 2. reset and wake the device on its internal oscillator
    /// 3. ±8 g accelerometer, ±2000 dps gyroscope
    /// 4. DLPF mode 1, sample divider 1 (500 Hz)
    /// 5. FIFO and interrupts off
    ///
    /// # Returns
    /// - `Ok(id)`: the WHO_AM_I value of the detected part
    /// - `Err(InitError::DeviceNotFound(id))`: unknown part at this address
    /// - `Err(InitError::Bus(e))`: bus failure
    pub fn init<D: DelayNs>(&mut self, delay: &mut D) -> Result<u8, InitError<E>> {
        let id = self.read_register(reg::WHO_AM_I).map_err(InitError::Bus)?;
        self.device_id = id;
        delay.delay_ms(1);

        if id != WHO_AM_I_MPU6886 && id != WHO_AM_I_MPU6500 {
            warn!("IMU: unexpected WHO_AM_I {}", id);
            return Err(InitError::DeviceNotFound(id));
        }

        let sequence: [(u8, u8, u32); 11] = [
            (reg::PWR_MGMT_1, 0x00, 10),
            (reg::PWR_MGMT_1, 0x80, 10),
            (reg::PWR_MGMT_1, 0x01, 10),
            (reg::ACCEL_CONFIG, AccelRange::G8.bits(), 1),
            (reg::GYRO_CONFIG, GyroRange::D2000.bits(), 1),
            (reg::CONFIG, 0x01, 1),
            (reg::SMPLRT_DIV, 0x01, 1),
            (reg::ACCEL_CONFIG2, 0x00, 1),
            (reg::USER_CTRL, 0x00, 1),
            (reg::FIFO_EN, 0x00, 1),
            (reg::INT_ENABLE, 0x00, 1),
        ];
        for (register, value, settle_ms) in sequence {
            self.write_register(register, value).map_err(InitError::Bus)?;
            delay.delay_ms(settle_ms);
        }

        self.set_accel_range(AccelRange::G8).map_err(InitError::Bus)?;
        self.set_gyro_range(GyroRange::D2000).map_err(InitError::Bus)?;

        debug!("IMU: configured, WHO_AM_I {}", id);
        Ok(id)
    }

    /// Select the accelerometer full-scale range and update the resolution.
    pub fn set_accel_range(&mut self, range: AccelRange) -> Result<(), E> {
        self.write_register(reg::ACCEL_CONFIG, range.bits())?;
        self.accel_range = range;
        self.accel_res = range.resolution();
        Ok(())
    }

    /// Select the gyroscope full-scale range and update the resolution.
    pub fn set_gyro_range(&mut self, range: GyroRange) -> Result<(), E> {
        self.write_register(reg::GYRO_CONFIG, range.bits())?;
        self.gyro_range = range;
        self.gyro_res = range.resolution();
        Ok(())
    }

    /// Set the digital low-pass filter mode (CONFIG register, 0-7).
    pub fn set_dlpf_mode(&mut self, dlpf_cfg: u8) -> Result<(), E> {
        self.write_register(reg::CONFIG, dlpf_cfg & 0x07)
    }

    /// Raw accelerometer ADC counts.
    pub fn read_accel_raw(&mut self) -> Result<[i16; 3], E> {
        self.read_triplet(reg::ACCEL_XOUT_H)
    }

    /// Raw gyroscope ADC counts.
    pub fn read_gyro_raw(&mut self) -> Result<[i16; 3], E> {
        self.read_triplet(reg::GYRO_XOUT_H)
    }

    /// Raw temperature ADC counts.
    pub fn read_temperature_raw(&mut self) -> Result<i16, E> {
        let mut buf = [0u8; 2];
        self.read_registers(reg::TEMP_OUT_H, &mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }

    /// Acceleration in g.
    pub fn read_accel(&mut self) -> Result<Vector3<f32>, E> {
        let raw = self.read_accel_raw()?;
        Ok(scale(raw, self.accel_res))
    }

    /// Angular rate in deg/s.
    pub fn read_gyro(&mut self) -> Result<Vector3<f32>, E> {
        let raw = self.read_gyro_raw()?;
        Ok(scale(raw, self.gyro_res))
    }

    /// Die temperature in °C.
    pub fn read_temperature(&mut self) -> Result<f32, E> {
        let raw = self.read_temperature_raw()?;
        Ok(temperature_from_raw(raw))
    }

    /// Accelerometer, temperature and gyroscope in one 14-byte burst.
    pub fn read_sample(&mut self) -> Result<ImuSample, E> {
        let mut buf = [0u8; 14];
        self.read_registers(reg::ACCEL_XOUT_H, &mut buf)?;

        let word = |i: usize| i16::from_be_bytes([buf[i], buf[i + 1]]);
        Ok(ImuSample {
            accel: scale([word(0), word(2), word(4)], self.accel_res),
            temperature: temperature_from_raw(word(6)),
            gyro: scale([word(8), word(10), word(12)], self.gyro_res),
        })
    }

    /// Program the hardware gyro offset registers (big-endian, X/Y/Z).
    pub fn set_gyro_offset(&mut self, x: u16, y: u16, z: u16) -> Result<(), E> {
        let [xh, xl] = x.to_be_bytes();
        let [yh, yl] = y.to_be_bytes();
        let [zh, zl] = z.to_be_bytes();
        self.i2c
            .write(self.address, &[reg::GYRO_OFFSET, xh, xl, yh, yl, zh, zl])
    }

    /// WHO_AM_I value read during [`init`](Self::init).
    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn accel_range(&self) -> AccelRange {
        self.accel_range
    }

    pub fn gyro_range(&self) -> GyroRange {
        self.gyro_range
    }

    /// Give the bus back.
    pub fn release(self) -> I2C {
        self.i2c
    }

    #[cfg(test)]
    pub(crate) fn i2c_mut(&mut self) -> &mut I2C {
        &mut self.i2c
    }

    fn read_triplet(&mut self, start: u8) -> Result<[i16; 3], E> {
        let mut buf = [0u8; 6];
        self.read_registers(start, &mut buf)?;
        Ok([
            i16::from_be_bytes([buf[0], buf[1]]),
            i16::from_be_bytes([buf[2], buf[3]]),
            i16::from_be_bytes([buf[4], buf[5]]),
        ])
    }

    fn read_register(&mut self, register: u8) -> Result<u8, E> {
        let mut buf = [0u8; 1];
        self.read_registers(register, &mut buf)?;
        Ok(buf[0])
    }

    fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> Result<(), E> {
        self.i2c.write_read(self.address, &[register], buf)
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), E> {
        self.i2c.write(self.address, &[register, value])
    }
}

fn scale(raw: [i16; 3], resolution: f32) -> Vector3<f32> {
    Vector3::new(
        f32::from(raw[0]) * resolution,
        f32::from(raw[1]) * resolution,
        f32::from(raw[2]) * resolution,
    )
}

fn temperature_from_raw(raw: i16) -> f32 {
    f32::from(raw) / TEMP_SENSITIVITY + TEMP_OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::fake_bus::{FakeBus, NoDelay};
    use approx::assert_relative_eq;

    fn ready_driver() -> Mpu6886<FakeBus> {
        let mut imu = Mpu6886::new(FakeBus::with_who_am_i(WHO_AM_I_MPU6886), 0x68);
        imu.init(&mut NoDelay).unwrap();
        imu
    }

    #[test]
    fn init_accepts_both_known_ids() {
        for id in [WHO_AM_I_MPU6886, WHO_AM_I_MPU6500] {
            let mut imu = Mpu6886::new(FakeBus::with_who_am_i(id), 0x68);
            assert_eq!(imu.init(&mut NoDelay), Ok(id));
            assert_eq!(imu.device_id(), id);
        }
    }

    #[test]
    fn init_rejects_unknown_id() {
        let mut imu = Mpu6886::new(FakeBus::with_who_am_i(0x42), 0x68);
        assert_eq!(imu.init(&mut NoDelay), Err(InitError::DeviceNotFound(0x42)));
        // nothing was configured
        assert!(imu.release().writes.is_empty());
    }

    #[test]
    fn init_propagates_bus_failure() {
        let mut bus = FakeBus::with_who_am_i(WHO_AM_I_MPU6886);
        bus.fail = true;
        let mut imu = Mpu6886::new(bus, 0x68);
        assert!(matches!(imu.init(&mut NoDelay), Err(InitError::Bus(_))));
    }

    #[test]
    fn init_configures_ranges_and_disables_fifo() {
        let imu = ready_driver();
        assert_eq!(imu.accel_range(), AccelRange::G8);
        assert_eq!(imu.gyro_range(), GyroRange::D2000);

        let bus = imu.release();
        assert_eq!(bus.regs[reg::ACCEL_CONFIG as usize], 0x10);
        assert_eq!(bus.regs[reg::GYRO_CONFIG as usize], 0x18);
        assert_eq!(bus.regs[reg::FIFO_EN as usize], 0x00);
        assert_eq!(bus.regs[reg::INT_ENABLE as usize], 0x00);
        assert_eq!(bus.regs[reg::PWR_MGMT_1 as usize], 0x01);
        assert!(bus.writes.contains(&(reg::PWR_MGMT_1, 0x80)));
    }

    #[test]
    fn resolution_is_range_over_two_to_fifteen() {
        assert_relative_eq!(AccelRange::G8.resolution(), 8.0 / 32768.0);
        assert_relative_eq!(GyroRange::D2000.resolution(), 2000.0 / 32768.0);
        assert_relative_eq!(AccelRange::G2.resolution(), 1.0 / 16384.0);
    }

    #[test]
    fn converts_raw_counts_to_physical_units() {
        let mut imu = ready_driver();
        // 4096 counts = 1 g at ±8 g
        imu.i2c.set_word(reg::ACCEL_XOUT_H + 4, 4096);
        imu.i2c.set_word(reg::ACCEL_XOUT_H, -2048);
        // 16.384 counts/dps at ±2000 dps → 1638 ≈ 100 dps
        imu.i2c.set_word(reg::GYRO_XOUT_H + 2, 1638);

        let accel = imu.read_accel().unwrap();
        assert_relative_eq!(accel.x, -0.5);
        assert_relative_eq!(accel.z, 1.0);

        let gyro = imu.read_gyro().unwrap();
        assert_relative_eq!(gyro.y, 99.975586, epsilon = 1e-4);
    }

    #[test]
    fn temperature_formula() {
        let mut imu = ready_driver();
        imu.i2c.set_word(reg::TEMP_OUT_H, 3268);
        assert_relative_eq!(imu.read_temperature().unwrap(), 35.0, epsilon = 1e-4);
        imu.i2c.set_word(reg::TEMP_OUT_H, 0);
        assert_relative_eq!(imu.read_temperature().unwrap(), 25.0);
    }

    #[test]
    fn burst_sample_matches_individual_reads() {
        let mut imu = ready_driver();
        imu.i2c.set_word(reg::ACCEL_XOUT_H + 2, 4096);
        imu.i2c.set_word(reg::TEMP_OUT_H, -3268);
        imu.i2c.set_word(reg::GYRO_XOUT_H + 4, -164);

        let sample = imu.read_sample().unwrap();
        assert_eq!(sample.accel, imu.read_accel().unwrap());
        assert_eq!(sample.gyro, imu.read_gyro().unwrap());
        assert_relative_eq!(sample.temperature, 15.0, epsilon = 1e-4);
    }

    #[test]
    fn range_change_rescales_readings() {
        let mut imu = ready_driver();
        imu.i2c.set_word(reg::ACCEL_XOUT_H, 16384);
        imu.set_accel_range(AccelRange::G2).unwrap();
        assert_relative_eq!(imu.read_accel().unwrap().x, 1.0);
        assert_eq!(imu.i2c.regs[reg::ACCEL_CONFIG as usize], 0x00);
    }

    #[test]
    fn gyro_offset_written_big_endian() {
        let mut imu = ready_driver();
        imu.set_gyro_offset(0x0102, 0x0304, 0x0506).unwrap();
        let regs = &imu.i2c.regs;
        let start = reg::GYRO_OFFSET as usize;
        assert_eq!(&regs[start..start + 6], &[1, 2, 3, 4, 5, 6]);
    }
}
