//! Decoding of EC telemetry and the per-cycle snapshot.

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::ec::registers::{self, RegisterFile};
use crate::error::{Error, Result};

/// Tachometer constant of the Clevo fans. RPM is this divided by the
/// 16-bit period the EC reports.
pub const RPM_CONSTANT: u32 = 2_156_220;

/// Thermal zone, each with its own sensor and fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Cpu,
    Gpu,
}

impl Zone {
    pub const ALL: [Zone; 2] = [Zone::Cpu, Zone::Gpu];
}

/// One value per zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZonePair<T> {
    pub cpu: T,
    pub gpu: T,
}

impl<T> ZonePair<T> {
    pub fn new(cpu: T, gpu: T) -> Self {
        Self { cpu, gpu }
    }

    pub fn map<U>(self, mut f: impl FnMut(Zone, T) -> U) -> ZonePair<U> {
        ZonePair {
            cpu: f(Zone::Cpu, self.cpu),
            gpu: f(Zone::Gpu, self.gpu),
        }
    }
}

impl<T: Clone> ZonePair<T> {
    pub fn splat(value: T) -> Self {
        Self {
            cpu: value.clone(),
            gpu: value,
        }
    }
}

impl<T> Index<Zone> for ZonePair<T> {
    type Output = T;

    fn index(&self, zone: Zone) -> &T {
        match zone {
            Zone::Cpu => &self.cpu,
            Zone::Gpu => &self.gpu,
        }
    }
}

impl<T> IndexMut<Zone> for ZonePair<T> {
    fn index_mut(&mut self, zone: Zone) -> &mut T {
        match zone {
            Zone::Cpu => &mut self.cpu,
            Zone::Gpu => &mut self.gpu,
        }
    }
}

/// Register temperatures are whole degrees Celsius already.
pub fn decode_temperature(raw: u8) -> i32 {
    raw as i32
}

/// hwmon reports millidegrees.
pub fn decode_millidegrees(millidegrees: i64) -> i32 {
    (millidegrees / 1000) as i32
}

/// Raw PWM byte (0-255) to percent, rounded.
pub fn decode_duty(raw: u8) -> u8 {
    (raw as f64 / 255.0 * 100.0).round() as u8
}

/// Percent to raw PWM byte, rounded. Fails above 100 %.
pub fn encode_duty(percent: u8) -> Result<u8> {
    if percent > 100 {
        return Err(Error::InvalidDuty(percent as i32));
    }
    Ok((percent as f64 / 100.0 * 255.0).round().clamp(0.0, 255.0) as u8)
}

/// Fan speed from the tachometer period bytes. A zero period means the fan
/// is stalled or the EC has no reading yet.
pub fn decode_rpm(hi: u8, lo: u8) -> u32 {
    let raw = ((hi as u32) << 8) | lo as u32;
    if raw == 0 { 0 } else { RPM_CONSTANT / raw }
}

/// Decoded telemetry from one poll cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Snapshot {
    pub cpu_temp: i32,
    pub gpu_temp: i32,
    pub cpu_fan_duty: u8,
    pub cpu_fan_rpm: u32,
    pub gpu_fan_duty: u8,
    pub gpu_fan_rpm: u32,
}

impl Snapshot {
    pub fn from_registers(file: &RegisterFile) -> Self {
        let cpu = registers::zone(Zone::Cpu);
        let gpu = registers::zone(Zone::Gpu);
        let reg = |offset: u8| file[offset as usize];

        Self {
            cpu_temp: decode_temperature(reg(cpu.temperature)),
            gpu_temp: decode_temperature(reg(gpu.temperature)),
            cpu_fan_duty: decode_duty(reg(cpu.duty)),
            cpu_fan_rpm: decode_rpm(reg(cpu.rpm_hi), reg(cpu.rpm_lo)),
            gpu_fan_duty: decode_duty(reg(gpu.duty)),
            gpu_fan_rpm: decode_rpm(reg(gpu.rpm_hi), reg(gpu.rpm_lo)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_round_trip_duty_within_one_point() {
        for percent in 0..=100u8 {
            let raw = encode_duty(percent).unwrap();
            let decoded = decode_duty(raw);
            assert!(
                (decoded as i32 - percent as i32).abs() <= 1,
                "{percent}% -> {raw} -> {decoded}%"
            );
        }
    }

    #[test]
    fn should_round_rather_than_truncate_duty() {
        assert_eq!(encode_duty(50).unwrap(), 128);
        assert_eq!(encode_duty(70).unwrap(), 179);
        assert_eq!(decode_duty(128), 50);
        assert_eq!(decode_duty(254), 100);
        assert_eq!(decode_duty(1), 0);
        assert_eq!(decode_duty(2), 1);
    }

    #[test]
    fn should_reject_duty_above_hundred() {
        assert!(matches!(encode_duty(101), Err(Error::InvalidDuty(101))));
    }

    #[test]
    fn should_report_zero_rpm_for_zero_period() {
        assert_eq!(decode_rpm(0, 0), 0);
    }

    #[test]
    fn should_divide_constant_by_period() {
        assert_eq!(decode_rpm(0x01, 0xF4), RPM_CONSTANT / 500);
        assert_eq!(decode_rpm(0x00, 0x01), RPM_CONSTANT);
        assert_eq!(decode_rpm(0xFF, 0xFF), RPM_CONSTANT / 0xFFFF);
    }

    #[test]
    fn should_convert_millidegrees() {
        assert_eq!(decode_millidegrees(45_500), 45);
        assert_eq!(decode_millidegrees(0), 0);
    }

    #[test]
    fn should_decode_snapshot_from_register_file() {
        let mut file: RegisterFile = [0; registers::REGISTER_FILE_SIZE];
        file[registers::CPU_TEMP as usize] = 61;
        file[registers::GPU_TEMP as usize] = 54;
        file[registers::CPU_FAN_DUTY as usize] = 179;
        file[registers::GPU_FAN_DUTY as usize] = 128;
        file[registers::CPU_FAN_RPM_HI as usize] = 0x01;
        file[registers::CPU_FAN_RPM_LO as usize] = 0xF4;

        let snapshot = Snapshot::from_registers(&file);

        assert_eq!(
            snapshot,
            Snapshot {
                cpu_temp: 61,
                gpu_temp: 54,
                cpu_fan_duty: 70,
                cpu_fan_rpm: RPM_CONSTANT / 500,
                gpu_fan_duty: 50,
                gpu_fan_rpm: 0,
            }
        );
    }

    #[test]
    fn should_index_zone_pair_by_zone() {
        let mut pair = ZonePair::new(1, 2);
        pair[Zone::Gpu] = 5;

        assert_eq!(pair[Zone::Cpu], 1);
        assert_eq!(pair.gpu, 5);
        assert_eq!(pair.map(|_, v| v * 2), ZonePair::new(2, 10));
    }
}
