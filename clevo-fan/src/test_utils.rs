//! Test doubles for the EC.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ec::FanInterface;
use crate::ec::port::{DATA_PORT, PortIo, STATUS_PORT, StatusFlags};
use crate::ec::registers::{self, REGISTER_FILE_SIZE, RegisterFile};
use crate::error::{Error, Result};
use crate::telemetry::{Zone, ZonePair};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortMode {
    Idle,
    ReadAddress,
    FanSelector,
    FanValue(u8),
}

struct PortState {
    registers: RegisterFile,
    mode: PortMode,
    output: Option<u8>,
    writes: Vec<(u16, u8)>,
    status_reads: usize,
    input_stuck: bool,
    output_silent: bool,
    busy_polls: usize,
}

/// Simulated EC behind the status and data ports.
///
/// Implements just enough of the command state machine for register reads
/// (0x80) and the vendor fan-duty command (0x99).
#[derive(Clone)]
pub struct FakeEcPorts {
    state: Arc<Mutex<PortState>>,
}

impl FakeEcPorts {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PortState {
                registers: [0; REGISTER_FILE_SIZE],
                mode: PortMode::Idle,
                output: None,
                writes: Vec::new(),
                status_reads: 0,
                input_stuck: false,
                output_silent: false,
                busy_polls: 0,
            })),
        }
    }

    pub fn set_register(&self, offset: u8, value: u8) {
        self.state.lock().registers[offset as usize] = value;
    }

    pub fn register(&self, offset: u8) -> u8 {
        self.state.lock().registers[offset as usize]
    }

    /// Bytes written to either port, in order.
    pub fn writes(&self) -> Vec<(u16, u8)> {
        self.state.lock().writes.clone()
    }

    pub fn status_reads(&self) -> usize {
        self.state.lock().status_reads
    }

    /// Keep IBF set forever.
    pub fn set_input_stuck(&self, stuck: bool) {
        self.state.lock().input_stuck = stuck;
    }

    /// Never raise OBF after a read command.
    pub fn set_output_silent(&self, silent: bool) {
        self.state.lock().output_silent = silent;
    }

    /// Report IBF set for the next `polls` status reads.
    pub fn set_busy_polls(&self, polls: usize) {
        self.state.lock().busy_polls = polls;
    }
}

impl PortIo for FakeEcPorts {
    fn read_port(&self, port: u16) -> Result<u8> {
        let mut state = self.state.lock();
        match port {
            STATUS_PORT => {
                state.status_reads += 1;
                let mut status = StatusFlags::empty();
                if state.input_stuck {
                    status |= StatusFlags::INPUT_FULL;
                } else if state.busy_polls > 0 {
                    state.busy_polls -= 1;
                    status |= StatusFlags::INPUT_FULL;
                }
                if state.output.is_some() && !state.output_silent {
                    status |= StatusFlags::OUTPUT_FULL;
                }
                Ok(status.bits())
            }
            DATA_PORT => Ok(state.output.take().unwrap_or(0)),
            _ => Err(Error::Other(format!("unexpected port {port:#x}"))),
        }
    }

    fn write_port(&self, port: u16, value: u8) -> Result<()> {
        let mut state = self.state.lock();
        state.writes.push((port, value));
        match port {
            STATUS_PORT => {
                state.mode = match value {
                    0x80 => PortMode::ReadAddress,
                    0x99 => PortMode::FanSelector,
                    _ => PortMode::Idle,
                };
            }
            DATA_PORT => match state.mode {
                PortMode::ReadAddress => {
                    state.output = Some(state.registers[value as usize]);
                    state.mode = PortMode::Idle;
                }
                PortMode::FanSelector => state.mode = PortMode::FanValue(value),
                PortMode::FanValue(selector) => {
                    let offset = match selector {
                        0x01 => registers::CPU_FAN_DUTY,
                        _ => registers::GPU_FAN_DUTY,
                    };
                    state.registers[offset as usize] = value;
                    state.mode = PortMode::Idle;
                }
                PortMode::Idle => {}
            },
            _ => return Err(Error::Other(format!("unexpected port {port:#x}"))),
        }
        Ok(())
    }
}

struct FanState {
    temperature: ZonePair<i32>,
    cpu_readings: VecDeque<i32>,
    duty: ZonePair<u8>,
    rpm: ZonePair<u32>,
    writes: Vec<(Zone, u8)>,
    stuck: bool,
    failing: bool,
}

/// Scripted fan interface that records every duty write.
#[derive(Clone)]
pub struct FakeFans {
    state: Arc<Mutex<FanState>>,
}

impl FakeFans {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FanState {
                temperature: ZonePair::new(45, 45),
                cpu_readings: VecDeque::new(),
                duty: ZonePair::default(),
                rpm: ZonePair::new(2000, 2000),
                writes: Vec::new(),
                stuck: false,
                failing: false,
            })),
        }
    }

    pub fn set_temperature(&self, zone: Zone, temp: i32) {
        self.state.lock().temperature[zone] = temp;
    }

    /// CPU readings returned before falling back to the set temperature.
    pub fn queue_cpu_readings(&self, readings: &[i32]) {
        self.state.lock().cpu_readings.extend(readings);
    }

    /// Change what the hardware reports, as an out-of-band writer would.
    pub fn set_reported_duty(&self, zone: Zone, duty: u8) {
        self.state.lock().duty[zone] = duty;
    }

    pub fn reported_duty(&self, zone: Zone) -> u8 {
        self.state.lock().duty[zone]
    }

    pub fn writes(&self) -> Vec<(Zone, u8)> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Accept writes without the hardware duty following them.
    pub fn set_stuck(&self, stuck: bool) {
        self.state.lock().stuck = stuck;
    }

    /// Make every read fail.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }
}

#[async_trait]
impl FanInterface for FakeFans {
    async fn temperature(&mut self, zone: Zone) -> Result<i32> {
        let mut state = self.state.lock();
        if state.failing {
            return Err(Error::Other("simulated read failure".to_string()));
        }
        if zone == Zone::Cpu {
            if let Some(reading) = state.cpu_readings.pop_front() {
                return Ok(reading);
            }
        }
        Ok(state.temperature[zone])
    }

    async fn duty(&mut self, zone: Zone) -> Result<u8> {
        let state = self.state.lock();
        if state.failing {
            return Err(Error::Other("simulated read failure".to_string()));
        }
        Ok(state.duty[zone])
    }

    async fn rpm(&mut self, zone: Zone) -> Result<u32> {
        let state = self.state.lock();
        if state.failing {
            return Err(Error::Other("simulated read failure".to_string()));
        }
        Ok(state.rpm[zone])
    }

    async fn set_duty(&mut self, zone: Zone, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(Error::InvalidDuty(percent as i32));
        }
        let mut state = self.state.lock();
        state.writes.push((zone, percent));
        if !state.stuck {
            state.duty[zone] = percent;
        }
        Ok(())
    }

    async fn read_all_registers(&mut self) -> Result<RegisterFile> {
        Ok([0; REGISTER_FILE_SIZE])
    }
}
