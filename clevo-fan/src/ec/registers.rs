//! Register map of the Clevo P775DM3 embedded controller.

use crate::telemetry::Zone;

pub const REGISTER_FILE_SIZE: usize = 0x100;

/// Full EC register file as read in one block.
pub type RegisterFile = [u8; REGISTER_FILE_SIZE];

pub const CPU_TEMP: u8 = 0x07;
pub const GPU_TEMP: u8 = 0xCD;
pub const CPU_FAN_DUTY: u8 = 0xCE;
pub const GPU_FAN_DUTY: u8 = 0xCF;
pub const CPU_FAN_RPM_HI: u8 = 0xD0;
pub const CPU_FAN_RPM_LO: u8 = 0xD1;
pub const GPU_FAN_RPM_HI: u8 = 0xD2;
pub const GPU_FAN_RPM_LO: u8 = 0xD3;

/// Registers belonging to one thermal zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneRegisters {
    pub temperature: u8,
    pub duty: u8,
    pub rpm_hi: u8,
    pub rpm_lo: u8,
}

pub const fn zone(zone: Zone) -> ZoneRegisters {
    match zone {
        Zone::Cpu => ZoneRegisters {
            temperature: CPU_TEMP,
            duty: CPU_FAN_DUTY,
            rpm_hi: CPU_FAN_RPM_HI,
            rpm_lo: CPU_FAN_RPM_LO,
        },
        Zone::Gpu => ZoneRegisters {
            temperature: GPU_TEMP,
            duty: GPU_FAN_DUTY,
            rpm_hi: GPU_FAN_RPM_HI,
            rpm_lo: GPU_FAN_RPM_LO,
        },
    }
}

/// Short tag for register dumps, if the offset is one we know.
pub fn label(offset: u8) -> Option<&'static str> {
    match offset {
        CPU_TEMP => Some("cpu temp"),
        GPU_TEMP => Some("gpu temp"),
        CPU_FAN_DUTY => Some("cpu duty"),
        GPU_FAN_DUTY => Some("gpu duty"),
        CPU_FAN_RPM_HI => Some("cpu rpm hi"),
        CPU_FAN_RPM_LO => Some("cpu rpm lo"),
        GPU_FAN_RPM_HI => Some("gpu rpm hi"),
        GPU_FAN_RPM_LO => Some("gpu rpm lo"),
        _ => None,
    }
}
