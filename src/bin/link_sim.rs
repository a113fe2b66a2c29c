//! Host-side link simulator
//! =============================================================================================
//!
//! Runs the estimator and the datagram link without hardware: a synthetic IMU
//! rolls back and forth at a fixed rate, the complementary filter tracks it,
//! and one binary control frame per tick goes to the UDP target together with
//! an attitude datagram. Legacy servo packets received on the listen port
//! update the servo vector.
//!
//! Environment:
//!   ROVATE_TARGET   host:port telemetry goes to   (default 127.0.0.1:5000)
//!   ROVATE_ATTITUDE host:port attitude goes to    (default 127.0.0.1:12346;
//!                   the board broadcasts to 192.168.0.255:12346)
//!   ROVATE_LISTEN   local port for servo packets  (default 12345)
//!   ROVATE_SECONDS  stop after this many seconds  (default: run forever)
//!   RUST_LOG        env_logger filter             (default: info)

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{info, warn};
use nalgebra::Vector3;

use rovate::config::{self, EstimatorConfig, LinkConfig};
use rovate::hardware::{ComplementaryFilter, ImuSample};
use rovate::link::LinkSession;
use rovate::protocol::AttitudeReport;
use rovate::transport::UdpTransport;

/// Peak roll of the synthetic motion, degrees.
const SWING_DEG: f32 = 30.0;
/// One full swing every this many seconds.
const SWING_PERIOD_S: f32 = 4.0;

/// IMU reading for a board rolled by `roll` degrees turning at `rate` dps.
fn synthetic_sample(roll_deg: f32, rate_dps: f32) -> ImuSample {
    let roll = roll_deg.to_radians();
    ImuSample {
        accel: Vector3::new(0.0, roll.sin(), roll.cos()),
        gyro: Vector3::new(rate_dps, 0.0, 0.0),
        temperature: 25.0,
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("ignoring unparsable {}={}", name, value);
            default
        }),
        Err(_) => default,
    }
}

fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let default_target = SocketAddr::from(([127, 0, 0, 1], config::UDP_TARGET_PORT));
    let target: SocketAddr = env_or("ROVATE_TARGET", default_target);
    let default_attitude = SocketAddr::from(([127, 0, 0, 1], config::ATTITUDE_PORT));
    let attitude_target: SocketAddr = env_or("ROVATE_ATTITUDE", default_attitude);
    let listen_port: u16 = env_or("ROVATE_LISTEN", config::UDP_LISTEN_PORT);
    let seconds: Option<u64> = std::env::var("ROVATE_SECONDS").ok().and_then(|s| s.parse().ok());

    let estimator = EstimatorConfig::default();
    let mut filter = ComplementaryFilter::new(estimator.sample_rate_hz, estimator.gain);
    let mut session = LinkSession::new(LinkConfig::default());
    let mut udp = UdpTransport::bind(SocketAddr::from(([0, 0, 0, 0], listen_port)), target)?;
    let mut attitude = UdpTransport::bind(SocketAddr::from(([0, 0, 0, 0], 0)), attitude_target)?;
    attitude.enable_broadcast()?;

    let period = Duration::from_secs_f32(filter.sample_period());
    let start = Instant::now();
    let mut last = start;
    let mut last_report = 0u32;

    loop {
        let now = Instant::now();
        let elapsed = now - start;
        if seconds.is_some_and(|s| elapsed.as_secs() >= s) {
            break;
        }
        let dt = (now - last).as_secs_f32();
        last = now;
        let now_ms = elapsed.as_millis() as u32;

        let phase = core::f32::consts::TAU * elapsed.as_secs_f32() / SWING_PERIOD_S;
        let roll = SWING_DEG * phase.sin();
        let rate = SWING_DEG * core::f32::consts::TAU / SWING_PERIOD_S * phase.cos();
        let sample = synthetic_sample(roll, rate);
        filter.update(&sample.gyro, &sample.accel, dt);

        if let Some(seq) = session.tick(now_ms) {
            if let Err(e) = session.send_datagram_telemetry(&mut udp, seq, &sample) {
                warn!("telemetry send failed: {}", e);
            }
            let report = AttitudeReport::new(filter.euler_angles(), sample.gyro, sample.temperature);
            if let Err(e) = session.send_attitude(&mut attitude, &report) {
                warn!("attitude send failed: {}", e);
            }
        }
        match session.poll_datagrams(&mut udp) {
            Ok(true) => info!("servo targets: {:?}", session.servo().positions),
            Ok(false) => {}
            Err(e) => warn!("receive failed: {}", e),
        }

        if now_ms.wrapping_sub(last_report) >= 1000 {
            last_report = now_ms;
            let angles = filter.euler_angles();
            info!(
                "true roll {:6.2} | estimate roll {:6.2} pitch {:6.2} yaw {:6.2} | sent {}",
                roll,
                angles.roll,
                angles.pitch,
                angles.yaw,
                session.stats().telemetry_sent
            );
        }

        std::thread::sleep(period.saturating_sub(now.elapsed()));
    }

    info!("done: {:?}", session.stats());
    Ok(())
}
