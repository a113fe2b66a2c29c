//! rovate attitude node: MPU6886 + complementary filter + control link
//! =============================================================================================
//!
//! This firmware runs the estimator and the control link on a Blue Pill:
//! - MPU6886 6-axis IMU via I2C2, sampled at 100Hz
//! - quaternion complementary filter with gyro bias calibration at boot
//! - binary control frames over USART1 (921600 baud), commands from the host
//!   update the 8-channel servo vector
//!
//! Hardware Connections:
//!   MPU6886 Sensor -> Blue Pill
//!      VCC  -> 3.3V
//!      GND  -> GND
//!      SDA  -> PB11 (I2C2)
//!      SCL  -> PB10 (I2C2)
//!
//!   Host link -> Blue Pill
//!      RX   -> PA9  (USART1 TX)
//!      TX   -> PA10 (USART1 RX)
//!
//!   Recalibrate button -> PB15 (to GND, internal pull-up)
//!
//! Keep the board still and level while it boots or after pressing the button.
//! Without a working IMU the board still runs the command link, sending
//! telemetry with zeroed IMU fields.

#![no_std]
#![no_main]

use defmt_rtt as _; // Global logger
use embassy_executor::Spawner;
use embassy_stm32::{
    bind_interrupts,
    exti::ExtiInput,
    gpio::Pull,
    i2c, peripherals,
    time::Hertz,
    usart::{self, BufferedUart},
};
use embassy_sync::{blocking_mutex::raw::ThreadModeRawMutex, signal::Signal};
use embassy_time::{Delay, Duration, Instant, Ticker, Timer};
use panic_probe as _; // Panic handler
use static_cell::StaticCell;

use rovate::config::{EstimatorConfig, LinkConfig};
use rovate::hardware::{Heartbeat, ImuSample, Mpu6886AhrsSolver, Period, heartbeat::TICK_MS};
use rovate::link::LinkSession;
use rovate::transport::ByteStream;

/// Tick counters shared with the heartbeat task.
static HEARTBEAT: Heartbeat = Heartbeat::new();

/// Raised by the button task, consumed by the control loop.
static RECALIBRATE: Signal<ThreadModeRawMutex, ()> = Signal::new();

static UART_TX_BUF: StaticCell<[u8; 256]> = StaticCell::new();
static UART_RX_BUF: StaticCell<[u8; 256]> = StaticCell::new();

bind_interrupts!(struct Irqs {
    USART1 => usart::BufferedInterruptHandler<peripherals::USART1>;
});

type Imu = Mpu6886AhrsSolver<i2c::I2c<'static, embassy_stm32::mode::Blocking>>;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // HSE 8MHz -> PLL x9 -> 72MHz
    let mut config = embassy_stm32::Config::default();
    {
        use embassy_stm32::rcc::*;
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Oscillator,
        });
        config.rcc.pll = Some(Pll {
            src: PllSource::HSE,
            prediv: PllPreDiv::DIV1,
            mul: PllMul::MUL9,
        });
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV2;
        config.rcc.apb2_pre = APBPrescaler::DIV1;
    }
    let p = embassy_stm32::init(config);
    defmt::info!("rovate booting");

    let estimator = EstimatorConfig::default();

    let imu_i2c = i2c::I2c::new_blocking(p.I2C2, p.PB10, p.PB11, Hertz(400_000), Default::default());
    let mut imu = Mpu6886AhrsSolver::new(imu_i2c, estimator);
    let imu = match imu.init(&mut Delay) {
        Ok(_) => Some(imu),
        Err(e) => {
            defmt::error!("IMU init failed, running without estimator: {}", e);
            None
        }
    };

    let link = LinkConfig {
        include_imu: imu.is_some(),
        ..LinkConfig::default()
    };

    let mut uart_config = usart::Config::default();
    uart_config.baudrate = link.serial_baud;
    let uart = BufferedUart::new(
        p.USART1,
        Irqs,
        p.PA10,
        p.PA9,
        UART_TX_BUF.init([0; 256]),
        UART_RX_BUF.init([0; 256]),
        uart_config,
    )
    .unwrap();

    spawner.spawn(heartbeat()).unwrap();

    let button = ExtiInput::new(p.PB15, p.EXTI15, Pull::Up);
    spawner
        .spawn(recalibrate_button(button, Duration::from_millis(20)))
        .unwrap();

    control_loop(
        imu,
        ByteStream::new(uart),
        LinkSession::new(link),
        estimator,
    )
    .await
}

/// Estimator and link at the sample rate, forever. With `imu == None` only
/// the link runs.
async fn control_loop(
    mut imu: Option<Imu>,
    mut stream: ByteStream<BufferedUart<'static>>,
    mut session: LinkSession,
    estimator: EstimatorConfig,
) -> ! {
    if let Some(imu) = imu.as_mut() {
        calibrate(imu, &mut session, estimator.calibration_samples).await;
    }

    let period = Duration::from_hz(estimator.sample_rate_hz as u64);
    let mut ticker = Ticker::every(period);
    let mut last = Instant::now();

    loop {
        if RECALIBRATE.try_take().is_some() {
            match imu.as_mut() {
                Some(imu) => {
                    calibrate(imu, &mut session, estimator.calibration_samples).await;
                    last = Instant::now();
                }
                None => defmt::warn!("no IMU, recalibration ignored"),
            }
        }

        let now = Instant::now();
        let dt = (now - last).as_micros() as f32 / 1_000_000.0;
        last = now;
        let now_ms = now.as_millis() as u32;

        let sample = match imu.as_mut() {
            Some(imu) => {
                if let Err(e) = imu.update(dt) {
                    defmt::warn!("IMU read failed: {}", e);
                }
                ImuSample {
                    accel: imu.accel(),
                    gyro: imu.gyro(),
                    temperature: imu.temperature(),
                }
            }
            None => ImuSample::default(),
        };

        if let Some(seq) = session.tick(now_ms) {
            if let Err(e) = session.send_stream_telemetry(&mut stream, seq, &sample) {
                defmt::warn!("telemetry send failed: {}", e);
            }
        }

        match session.poll_stream(&mut stream, now_ms) {
            Ok(true) if session.outputs_enabled() => {
                defmt::debug!("servo targets: {}", session.servo().positions);
            }
            Ok(_) => {}
            Err(e) => defmt::warn!("link receive failed: {}", e),
        }

        if HEARTBEAT.take(Period::Ms1000) {
            match imu.as_ref() {
                Some(imu) => {
                    let angles = imu.level_angles();
                    defmt::info!(
                        "roll {} pitch {} yaw {} | missed {} | link errors {}",
                        angles.roll,
                        angles.pitch,
                        angles.yaw,
                        imu.missed_samples(),
                        session.framer_stats().errors()
                    );
                }
                None => defmt::info!("no IMU | link errors {}", session.framer_stats().errors()),
            }
        }

        ticker.next().await;
    }
}

/// Hold the servos, average the gyro bias and take the current attitude as level.
async fn calibrate(imu: &mut Imu, session: &mut LinkSession, samples: u32) {
    session.hold_outputs();
    defmt::info!("calibrating, keep still");

    match imu.calibrate_async(samples, &mut Delay).await {
        Ok(bias) => {
            // let the filter settle on the corrected gyro before taring
            for _ in 0..100 {
                if imu.update_fixed().is_err() {
                    break;
                }
                Timer::after_millis(10).await;
            }
            imu.tare();
            defmt::info!("gyro bias - X: {}, Y: {}, Z: {}", bias.x, bias.y, bias.z);
        }
        Err(e) => defmt::error!("calibration failed, bias kept: {}", e),
    }

    session.release_outputs();
}

/// Advances the shared tick counters.
#[embassy_executor::task]
async fn heartbeat() {
    let mut ticker = Ticker::every(Duration::from_millis(TICK_MS as u64));
    loop {
        HEARTBEAT.tick();
        ticker.next().await;
    }
}

/// Debounced falling edge on the button requests a recalibration.
#[embassy_executor::task]
async fn recalibrate_button(mut button: ExtiInput<'static>, debounce: Duration) {
    loop {
        button.wait_for_falling_edge().await;
        Timer::after(debounce).await;
        if button.is_high() {
            continue;
        }
        defmt::info!("recalibration requested");
        RECALIBRATE.signal(());
        button.wait_for_rising_edge().await;
    }
}
