//! Register-file stand-in for the IMU bus, used by unit tests.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation};

use super::mpu6886::reg;

/// A 128-register device that answers `write_read` with its register file.
pub struct FakeBus {
    pub regs: [u8; 128],
    /// Every `(register, value)` written, in order.
    pub writes: Vec<(u8, u8)>,
    /// Number of completed read operations.
    pub reads: usize,
    /// Fail every transaction.
    pub fail: bool,
}

impl FakeBus {
    pub fn with_who_am_i(id: u8) -> Self {
        let mut regs = [0u8; 128];
        regs[reg::WHO_AM_I as usize] = id;
        Self {
            regs,
            writes: Vec::new(),
            reads: 0,
            fail: false,
        }
    }

    /// Store a big-endian 16-bit value at `register`.
    pub fn set_word(&mut self, register: u8, value: i16) {
        let [hi, lo] = value.to_be_bytes();
        self.regs[register as usize] = hi;
        self.regs[register as usize + 1] = lo;
    }

    /// Store the same raw gyro counts on all three axes.
    pub fn set_gyro_raw(&mut self, raw: [i16; 3]) {
        for (axis, value) in raw.iter().enumerate() {
            self.set_word(reg::GYRO_XOUT_H + 2 * axis as u8, *value);
        }
    }
}

impl ErrorType for FakeBus {
    type Error = ErrorKind;
}

impl I2c for FakeBus {
    fn transaction(
        &mut self,
        _address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if self.fail {
            return Err(ErrorKind::Other);
        }

        let mut pointer = 0usize;
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    if let Some((&register, data)) = bytes.split_first() {
                        pointer = register as usize;
                        for (i, &value) in data.iter().enumerate() {
                            self.regs[pointer + i] = value;
                            self.writes.push((register + i as u8, value));
                        }
                    }
                }
                Operation::Read(buf) => {
                    for (i, byte) in buf.iter_mut().enumerate() {
                        *byte = self.regs[pointer + i];
                    }
                    self.reads += 1;
                }
            }
        }
        Ok(())
    }
}

/// Delay that returns immediately.
#[derive(Default)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

#[cfg(feature = "async")]
impl embedded_hal_async::delay::DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// Delay that accumulates requested time.
#[derive(Default)]
pub struct CountingDelay {
    pub total_ns: u64,
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}
