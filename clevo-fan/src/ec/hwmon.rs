//! Fan access through the `clevo_xsm_wmi` hwmon driver.
//!
//! The driver exposes one text attribute per quantity:
//!
//! - `temp1_input`, `temp2_input`: CPU/GPU temperature in millidegrees
//! - `pwm1`, `pwm2`: CPU/GPU fan duty, 0-255
//! - `fan1_input`, `fan2_input`: CPU/GPU fan speed in RPM

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::FanInterface;
use super::registers::RegisterFile;
use crate::error::{Error, Result};
use crate::telemetry::{self, Zone};
use crate::tracing::prelude::*;

/// Find the hwmon instance whose `name` matches.
///
/// Instances are probed in order (`hwmon0`, `hwmon1`, ...) until one is
/// missing. Returns the instance index and directory.
pub async fn find_interface(root: &Path, name: &str) -> Result<(usize, PathBuf)> {
    for index in 0.. {
        let dir = root.join(format!("hwmon{index}"));
        match fs::read_to_string(dir.join("name")).await {
            Ok(found) if found.trim_end() == name => {
                info!(index, dir = %dir.display(), "Found hwmon interface");
                return Ok((index, dir));
            }
            Ok(found) => trace!(index, name = found.trim_end(), "Skipping hwmon instance"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::InterfaceNotFound(name.to_string()))
}

fn channel_index(zone: Zone) -> u8 {
    match zone {
        Zone::Cpu => 1,
        Zone::Gpu => 2,
    }
}

pub struct HwmonFans {
    dir: PathBuf,
}

impl HwmonFans {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub async fn discover(root: &Path, name: &str) -> Result<Self> {
        let (_, dir) = find_interface(root, name).await?;
        Ok(Self::new(dir))
    }

    async fn read_value(&self, attribute: &str) -> Result<i64> {
        let path = self.dir.join(attribute);
        let text = fs::read_to_string(&path).await?;
        text.trim().parse().map_err(|_| Error::Parse {
            path,
            value: text.trim().to_string(),
        })
    }

    async fn write_value(&self, attribute: &str, value: i64) -> Result<()> {
        let path = self.dir.join(attribute);
        let text = format!("{value}\n");
        let mut file = OpenOptions::new().write(true).open(&path).await?;
        let written = file.write(text.as_bytes()).await?;
        if written != text.len() {
            return Err(Error::ShortWrite {
                path,
                expected: text.len(),
                actual: written,
            });
        }
        file.flush().await?;
        Ok(())
    }
}

fn out_of_range(dir: &Path, attribute: &str, value: i64) -> Error {
    Error::Parse {
        path: dir.join(attribute),
        value: value.to_string(),
    }
}

#[async_trait]
impl FanInterface for HwmonFans {
    async fn temperature(&mut self, zone: Zone) -> Result<i32> {
        let millidegrees = self
            .read_value(&format!("temp{}_input", channel_index(zone)))
            .await?;
        Ok(telemetry::decode_millidegrees(millidegrees))
    }

    async fn duty(&mut self, zone: Zone) -> Result<u8> {
        let attribute = format!("pwm{}", channel_index(zone));
        let raw = self.read_value(&attribute).await?;
        let raw = u8::try_from(raw).map_err(|_| out_of_range(&self.dir, &attribute, raw))?;
        Ok(telemetry::decode_duty(raw))
    }

    async fn rpm(&mut self, zone: Zone) -> Result<u32> {
        let attribute = format!("fan{}_input", channel_index(zone));
        let rpm = self.read_value(&attribute).await?;
        u32::try_from(rpm).map_err(|_| out_of_range(&self.dir, &attribute, rpm))
    }

    async fn set_duty(&mut self, zone: Zone, percent: u8) -> Result<()> {
        let raw = telemetry::encode_duty(percent)?;
        debug!(%zone, percent, raw, "Writing hwmon pwm");
        self.write_value(&format!("pwm{}", channel_index(zone)), raw as i64)
            .await
    }

    async fn read_all_registers(&mut self) -> Result<RegisterFile> {
        Err(Error::Other(
            "hwmon interface does not expose the EC register file".to_string(),
        ))
    }
}
