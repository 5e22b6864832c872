//! Access to the embedded controller.
//!
//! Two levels of abstraction live here. A [`RegisterChannel`] moves single
//! bytes at absolute offsets of the 256-byte register file, either over
//! the port handshake ([`port`]) or from the kernel debug file
//! ([`debugfs`]). A [`FanInterface`] speaks in decoded quantities
//! (temperature, duty, RPM per [`Zone`]) and is what the control code
//! uses; [`Ec`] implements it over any register channel and
//! [`hwmon::HwmonFans`] implements it over the hwmon attributes, which
//! have no register offsets at all.
//!
//! The backend is picked once at startup by [`open_backend`] and doesn't
//! change during a run.

pub mod debugfs;
pub mod hwmon;
pub mod port;
pub mod registers;

use async_trait::async_trait;

use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::telemetry::{self, Snapshot, Zone};
use crate::tracing::prelude::*;
use registers::{REGISTER_FILE_SIZE, RegisterFile};

/// Byte access to the EC register file.
#[async_trait]
pub trait RegisterChannel: Send + Sync {
    async fn read_register(&self, offset: u8) -> Result<u8>;

    async fn write_register(&self, offset: u8, value: u8) -> Result<()>;

    /// Read the whole register file.
    ///
    /// The default walks every offset through
    /// [`read_register`](Self::read_register); channels with block access
    /// override it.
    async fn read_all_registers(&self) -> Result<RegisterFile> {
        let mut file = [0u8; REGISTER_FILE_SIZE];
        for (offset, byte) in file.iter_mut().enumerate() {
            *byte = self.read_register(offset as u8).await?;
        }
        Ok(file)
    }

    /// Whether a full-file read costs about the same as a single register.
    fn reads_in_blocks(&self) -> bool {
        false
    }
}

/// Decoded fan and temperature access, independent of the backend.
#[async_trait]
pub trait FanInterface: Send {
    async fn temperature(&mut self, zone: Zone) -> Result<i32>;

    /// Current duty in percent.
    async fn duty(&mut self, zone: Zone) -> Result<u8>;

    async fn rpm(&mut self, zone: Zone) -> Result<u32>;

    /// Set a zone's fan duty in percent. Values above 100 are rejected
    /// before any I/O.
    async fn set_duty(&mut self, zone: Zone, percent: u8) -> Result<()>;

    /// Read all telemetry for one cycle.
    async fn snapshot(&mut self) -> Result<Snapshot> {
        Ok(Snapshot {
            cpu_temp: self.temperature(Zone::Cpu).await?,
            gpu_temp: self.temperature(Zone::Gpu).await?,
            cpu_fan_duty: self.duty(Zone::Cpu).await?,
            cpu_fan_rpm: self.rpm(Zone::Cpu).await?,
            gpu_fan_duty: self.duty(Zone::Gpu).await?,
            gpu_fan_rpm: self.rpm(Zone::Gpu).await?,
        })
    }

    /// Raw register file, for diagnostics.
    async fn read_all_registers(&mut self) -> Result<RegisterFile>;
}

/// Fan interface over a register channel, using the P775DM3 register map.
pub struct Ec<C> {
    channel: C,
}

impl<C: RegisterChannel> Ec<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl<C: RegisterChannel> FanInterface for Ec<C> {
    async fn temperature(&mut self, zone: Zone) -> Result<i32> {
        let raw = self
            .channel
            .read_register(registers::zone(zone).temperature)
            .await?;
        Ok(telemetry::decode_temperature(raw))
    }

    async fn duty(&mut self, zone: Zone) -> Result<u8> {
        let raw = self.channel.read_register(registers::zone(zone).duty).await?;
        Ok(telemetry::decode_duty(raw))
    }

    async fn rpm(&mut self, zone: Zone) -> Result<u32> {
        let regs = registers::zone(zone);
        let hi = self.channel.read_register(regs.rpm_hi).await?;
        let lo = self.channel.read_register(regs.rpm_lo).await?;
        Ok(telemetry::decode_rpm(hi, lo))
    }

    async fn set_duty(&mut self, zone: Zone, percent: u8) -> Result<()> {
        let raw = telemetry::encode_duty(percent)?;
        debug!(%zone, percent, raw, "Writing fan duty");
        self.channel
            .write_register(registers::zone(zone).duty, raw)
            .await
    }

    async fn snapshot(&mut self) -> Result<Snapshot> {
        if self.channel.reads_in_blocks() {
            let file = self.channel.read_all_registers().await?;
            return Ok(Snapshot::from_registers(&file));
        }

        Ok(Snapshot {
            cpu_temp: self.temperature(Zone::Cpu).await?,
            gpu_temp: self.temperature(Zone::Gpu).await?,
            cpu_fan_duty: self.duty(Zone::Cpu).await?,
            cpu_fan_rpm: self.rpm(Zone::Cpu).await?,
            gpu_fan_duty: self.duty(Zone::Gpu).await?,
            gpu_fan_rpm: self.rpm(Zone::Gpu).await?,
        })
    }

    async fn read_all_registers(&mut self) -> Result<RegisterFile> {
        self.channel.read_all_registers().await
    }
}

/// Open the backend selected by `config`.
pub async fn open_backend(config: &Config) -> Result<Box<dyn FanInterface>> {
    info!(backend = %config.backend, "Opening EC backend");

    let fans: Box<dyn FanInterface> = match config.backend {
        BackendKind::Port => {
            let io = port::DevPort::open(&config.port_device)?;
            Box::new(Ec::new(port::PortChannel::new(io)))
        }
        BackendKind::Debugfs => {
            debugfs::ensure_debug_file(&config.debug_file).await?;
            let io = port::DevPort::open(&config.port_device)?;
            let channel = debugfs::DebugFileChannel::new(
                config.debug_file.clone(),
                port::PortChannel::new(io),
            );
            Box::new(Ec::new(channel))
        }
        BackendKind::Hwmon => {
            Box::new(hwmon::HwmonFans::discover(&config.hwmon_root, &config.hwmon_name).await?)
        }
    };

    Ok(fans)
}
