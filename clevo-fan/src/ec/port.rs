//! The EC port handshake.
//!
//! The EC sits behind two I/O ports: a status/command port (0x66) and a
//! data port (0x62). Every byte moved across them is bracketed by waits on
//! the status flags:
//!
//! ```text
//! read(offset):  wait IBF=0, cmd 0x80 -> SC
//!                wait IBF=0, offset   -> DATA
//!                wait OBF=1, DATA     -> value
//!
//! write(fan, v): wait IBF=0, cmd 0x99 -> SC
//!                wait IBF=0, selector -> DATA
//!                wait IBF=0, v        -> DATA
//!                wait IBF=0
//! ```
//!
//! Ports are reached through `/dev/port`, where the file offset is the
//! port number. Opening it needs root (CAP_SYS_RAWIO).

use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bitflags::bitflags;
use rustix::fs::{Mode, OFlags};
use tokio::time;

use super::RegisterChannel;
use super::registers;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

pub const STATUS_PORT: u16 = 0x66;
pub const DATA_PORT: u16 = 0x62;

const READ_COMMAND: u8 = 0x80;
const FAN_DUTY_COMMAND: u8 = 0x99;

const CPU_FAN_SELECTOR: u8 = 0x01;
const GPU_FAN_SELECTOR: u8 = 0x02;

/// Polls of the status port before a wait gives up.
const WAIT_ATTEMPTS: u32 = 100;
const WAIT_INTERVAL: Duration = Duration::from_millis(1);

bitflags! {
    /// Bits of the EC status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        /// Output buffer full: a result byte is waiting on the data port.
        const OUTPUT_FULL = 1 << 0;
        /// Input buffer full: the EC hasn't consumed the last byte yet.
        const INPUT_FULL = 1 << 1;
    }
}

/// Raw byte access to I/O ports.
pub trait PortIo: Send + Sync {
    fn read_port(&self, port: u16) -> Result<u8>;
    fn write_port(&self, port: u16, value: u8) -> Result<()>;
}

/// Port access through `/dev/port`.
pub struct DevPort {
    fd: OwnedFd,
    path: PathBuf,
}

impl DevPort {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let fd = rustix::fs::open(&path, OFlags::RDWR | OFlags::CLOEXEC, Mode::empty())
            .map_err(io::Error::from)?;
        Ok(Self { fd, path })
    }
}

impl PortIo for DevPort {
    fn read_port(&self, port: u16) -> Result<u8> {
        let mut buf = [0u8; 1];
        let n = rustix::io::pread(&self.fd, &mut buf, port as u64).map_err(io::Error::from)?;
        if n != buf.len() {
            return Err(Error::ShortRead {
                path: self.path.clone(),
                expected: buf.len(),
                actual: n,
            });
        }
        Ok(buf[0])
    }

    fn write_port(&self, port: u16, value: u8) -> Result<()> {
        let n = rustix::io::pwrite(&self.fd, &[value], port as u64).map_err(io::Error::from)?;
        if n != 1 {
            return Err(Error::ShortWrite {
                path: self.path.clone(),
                expected: 1,
                actual: n,
            });
        }
        Ok(())
    }
}

/// Register channel speaking the port handshake.
pub struct PortChannel<P> {
    io: P,
}

impl<P: PortIo> PortChannel<P> {
    pub fn new(io: P) -> Self {
        Self { io }
    }

    /// Poll the status port until `flag` reads as `expected`.
    async fn wait_status(&self, flag: StatusFlags, expected: bool) -> Result<()> {
        for attempt in 0..=WAIT_ATTEMPTS {
            let status = StatusFlags::from_bits_truncate(self.io.read_port(STATUS_PORT)?);
            if status.contains(flag) == expected {
                return Ok(());
            }
            if attempt < WAIT_ATTEMPTS {
                time::sleep(WAIT_INTERVAL).await;
            }
        }

        warn!(
            port = STATUS_PORT,
            flag = ?flag,
            expected,
            "EC handshake wait timed out"
        );
        Err(Error::Timeout {
            port: STATUS_PORT,
            flag,
            expected,
        })
    }

    async fn send(&self, port: u16, value: u8) -> Result<()> {
        self.wait_status(StatusFlags::INPUT_FULL, false).await?;
        self.io.write_port(port, value)
    }

    /// Issue the vendor fan-duty command. `raw` is the 0-255 PWM value.
    pub async fn write_fan_duty(&self, selector: u8, raw: u8) -> Result<()> {
        trace!(selector, raw, "EC fan duty command");
        self.send(STATUS_PORT, FAN_DUTY_COMMAND).await?;
        self.send(DATA_PORT, selector).await?;
        self.send(DATA_PORT, raw).await?;
        self.wait_status(StatusFlags::INPUT_FULL, false).await
    }
}

/// Vendor selector for a writable duty register.
fn fan_selector(offset: u8) -> Option<u8> {
    match offset {
        registers::CPU_FAN_DUTY => Some(CPU_FAN_SELECTOR),
        registers::GPU_FAN_DUTY => Some(GPU_FAN_SELECTOR),
        _ => None,
    }
}

#[async_trait]
impl<P: PortIo> RegisterChannel for PortChannel<P> {
    async fn read_register(&self, offset: u8) -> Result<u8> {
        self.send(STATUS_PORT, READ_COMMAND).await?;
        self.send(DATA_PORT, offset).await?;
        self.wait_status(StatusFlags::OUTPUT_FULL, true).await?;
        self.io.read_port(DATA_PORT)
    }

    /// Only the fan duty registers are writable, through the vendor
    /// command rather than a plain register write.
    async fn write_register(&self, offset: u8, value: u8) -> Result<()> {
        let selector = fan_selector(offset).ok_or(Error::ReadOnlyRegister { offset })?;
        self.write_fan_duty(selector, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeEcPorts;

    #[tokio::test(start_paused = true)]
    async fn should_read_register_through_handshake() {
        let ports = FakeEcPorts::new();
        ports.set_register(registers::CPU_TEMP, 57);
        let channel = PortChannel::new(ports.clone());

        let value = channel.read_register(registers::CPU_TEMP).await.unwrap();

        assert_eq!(value, 57);
        assert_eq!(
            ports.writes(),
            vec![(STATUS_PORT, READ_COMMAND), (DATA_PORT, registers::CPU_TEMP)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_write_duty_through_vendor_command() {
        let ports = FakeEcPorts::new();
        let channel = PortChannel::new(ports.clone());

        channel
            .write_register(registers::GPU_FAN_DUTY, 179)
            .await
            .unwrap();

        assert_eq!(
            ports.writes(),
            vec![
                (STATUS_PORT, FAN_DUTY_COMMAND),
                (DATA_PORT, GPU_FAN_SELECTOR),
                (DATA_PORT, 179)
            ]
        );
        assert_eq!(ports.register(registers::GPU_FAN_DUTY), 179);
    }

    #[tokio::test(start_paused = true)]
    async fn should_refuse_writes_to_other_registers() {
        let ports = FakeEcPorts::new();
        let channel = PortChannel::new(ports.clone());

        let result = channel.write_register(registers::CPU_TEMP, 1).await;

        assert!(matches!(
            result,
            Err(Error::ReadOnlyRegister {
                offset: registers::CPU_TEMP
            })
        ));
        assert!(ports.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_time_out_when_input_buffer_stays_full() {
        let ports = FakeEcPorts::new();
        ports.set_input_stuck(true);
        let channel = PortChannel::new(ports.clone());

        let result = channel.read_register(registers::CPU_TEMP).await;

        assert!(matches!(
            result,
            Err(Error::Timeout {
                port: STATUS_PORT,
                flag,
                expected: false
            }) if flag == StatusFlags::INPUT_FULL
        ));
        assert!(ports.writes().is_empty());
        assert_eq!(ports.status_reads(), WAIT_ATTEMPTS as usize + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_time_out_when_output_never_arrives() {
        let ports = FakeEcPorts::new();
        ports.set_output_silent(true);
        let channel = PortChannel::new(ports.clone());

        let result = channel.read_register(registers::GPU_TEMP).await;

        assert!(matches!(
            result,
            Err(Error::Timeout {
                flag,
                expected: true,
                ..
            }) if flag == StatusFlags::OUTPUT_FULL
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_wait_for_busy_controller() {
        let ports = FakeEcPorts::new();
        ports.set_register(registers::GPU_TEMP, 48);
        ports.set_busy_polls(20);
        let channel = PortChannel::new(ports.clone());

        let value = channel.read_register(registers::GPU_TEMP).await.unwrap();

        assert_eq!(value, 48);
    }
}
