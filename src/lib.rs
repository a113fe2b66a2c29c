//! Attitude estimation and control-link protocol for the rovate platform.
//!
//! - [`hardware`]: MPU6886 driver, complementary filter, gyro calibration
//! - [`protocol`]: binary frames, JSON lines, commands and stream framers
//! - [`transport`]: byte-stream and datagram adapters
//! - [`link`]: the per-tick control session tying them together
//!
//! The library is `no_std`; host builds enable `std` for the UDP adapter and
//! `env_logger`.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

// must stay first so the logging macros are visible to every module
mod fmt;

pub mod config;
pub mod hardware;
pub mod link;
pub mod protocol;
pub mod transport;
