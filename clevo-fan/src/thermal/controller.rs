use super::curve::duty_for_temperature;
use super::overrides::Overrides;
use super::rate_limit::RateLimiter;
use super::smoothing;
use super::strategy::{Decision, DutyStrategy, Sample};
use crate::telemetry::{Zone, ZonePair};
use crate::tracing::prelude::*;

/// Readings below this are implausible for a running laptop and taken as a
/// sensor or read fault.
pub const FAULT_FLOOR_C: i32 = 15;

/// Duty floor forced on both fans from the second consecutive fault cycle.
pub const FAULT_SAFE_DUTY: u8 = 50;

/// Dual-sensor duty controller.
///
/// Each cycle the CPU reading is bounded in how fast it may fall, the GPU
/// reading is rescaled, and the two are blended so that the cooler zone is
/// pulled toward the hotter. The blend is exponentially smoothed per zone
/// and mapped through [`duty_for_temperature`], then through the control
/// file overrides. A per-zone [`RateLimiter`] decides whether the new
/// target is worth writing.
///
/// On top of that:
///
/// - the first cycle writes both zones unconditionally;
/// - when the hardware reports a duty other than the one last applied,
///   something else changed it, and both zones are re-written at no less
///   than what the hardware reports;
/// - a cycle with either reading below [`FAULT_FLOOR_C`] is a fault. One
///   fault cycle is absorbed, further consecutive ones force both fans to
///   at least [`FAULT_SAFE_DUTY`].
#[derive(Debug, Default)]
pub struct DualSensorController {
    initialized: bool,
    smoothed: ZonePair<f32>,
    applied: ZonePair<u8>,
    limiters: ZonePair<RateLimiter>,
    fault_cycles: u32,
}

impl DualSensorController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a raw CPU reading looks like a glitch worth re-reading.
    pub fn is_spurious_cpu(&self, raw: i32) -> bool {
        smoothing::is_spurious_cpu(raw as f32, self.smoothed.cpu)
    }

    pub fn smoothed(&self, zone: Zone) -> f32 {
        self.smoothed[zone]
    }

    /// Duty last handed out for `zone`.
    pub fn applied(&self, zone: Zone) -> u8 {
        self.applied[zone]
    }

    fn driving_temperatures(&mut self, sample: &Sample) -> ZonePair<f32> {
        let cpu = smoothing::clamp_fall(sample.cpu_temp as f32, self.smoothed.cpu);
        let gpu = smoothing::rescale_gpu(sample.gpu_temp as f32);

        let driving = smoothing::blend(cpu, gpu)
            .map(|zone, temp| smoothing::smooth(temp, self.smoothed[zone]));

        let raw = ZonePair::new(sample.cpu_temp, sample.gpu_temp);
        for zone in Zone::ALL {
            if raw[zone] >= FAULT_FLOOR_C {
                self.smoothed[zone] = driving[zone];
            }
        }

        driving
    }
}

impl DutyStrategy for DualSensorController {
    fn name(&self) -> &'static str {
        "dual"
    }

    fn evaluate(&mut self, sample: &Sample, overrides: &Overrides) -> Decision {
        let driving = self.driving_temperatures(sample);
        let mut targets =
            driving.map(|zone, temp| overrides.apply(zone, duty_for_temperature(temp)));

        let mut apply = ZonePair::new(
            self.limiters.cpu.should_apply(self.applied.cpu, targets.cpu),
            self.limiters.gpu.should_apply(self.applied.gpu, targets.gpu),
        );

        if !self.initialized {
            self.initialized = true;
            apply = ZonePair::splat(true);
        } else if sample.duty != self.applied {
            warn!(
                reported = ?sample.duty,
                applied = ?self.applied,
                "Fan duty changed outside the controller, re-applying"
            );
            apply = ZonePair::splat(true);
            targets = targets.map(|zone, target| target.max(sample.duty[zone]));
        }

        if sample.cpu_temp < FAULT_FLOOR_C || sample.gpu_temp < FAULT_FLOOR_C {
            self.fault_cycles = self.fault_cycles.saturating_add(1);
            if self.fault_cycles == 1 {
                warn!(
                    cpu_temp = sample.cpu_temp,
                    gpu_temp = sample.gpu_temp,
                    "Implausible temperature, holding duty for one cycle"
                );
                apply = ZonePair::splat(false);
            } else {
                error!(
                    cpu_temp = sample.cpu_temp,
                    gpu_temp = sample.gpu_temp,
                    cycles = self.fault_cycles,
                    "Repeated implausible temperature, forcing safe duty"
                );
                apply = ZonePair::splat(true);
                targets = targets.map(|_, target| target.max(FAULT_SAFE_DUTY));
            }
        } else {
            self.fault_cycles = 0;
        }

        debug!(
            cpu_temp = sample.cpu_temp,
            gpu_temp = sample.gpu_temp,
            cpu_driving = driving.cpu,
            gpu_driving = driving.gpu,
            cpu_target = targets.cpu,
            gpu_target = targets.gpu,
            "Dual-sensor cycle"
        );

        apply.map(|zone, apply| {
            if !apply {
                return None;
            }
            self.applied[zone] = targets[zone];
            self.limiters[zone].reset();
            Some(targets[zone])
        })
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}
