//! Fan control for Clevo laptops.
//!
//! The embedded controller (EC) on these machines runs its own fan curve,
//! which on several models keeps the fans idle until both CPU and GPU are
//! already hot. This crate reads fan telemetry from the EC and replaces
//! that curve with its own duty control.
//!
//! The pieces, leaves first:
//!
//! - [`ec`]: register access over the EC port handshake, the kernel debug
//!   file, or the hwmon attributes of the `clevo_xsm_wmi` driver.
//! - [`telemetry`]: decoding of temperature, duty and RPM encodings.
//! - [`thermal`]: the two duty strategies and the standalone control loop.
//! - [`shared`], [`poller`], [`session`]: the split between a privileged
//!   poller that owns all EC I/O and an unprivileged session that only
//!   reads telemetry and posts duty requests.

pub mod config;
pub mod ec;
pub mod error;
pub mod poller;
pub mod session;
pub mod shared;
pub mod signals;
pub mod telemetry;
pub mod thermal;
pub mod tracing;

#[cfg(test)]
pub(crate) mod test_utils;
