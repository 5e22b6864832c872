//! Sensor conditioning for the dual-sensor controller.

use crate::telemetry::ZonePair;

/// A CPU reading at or above this, and well above the smoothed value, is
/// treated as a sensor glitch and re-read.
pub const SPURIOUS_CPU_C: f32 = 100.0;
pub const SPURIOUS_JUMP_C: f32 = 20.0;

/// Largest drop in the CPU reading accepted per cycle.
pub const MAX_FALL_C: f32 = 10.0;

/// Exponential smoothing only kicks in above this.
pub const SMOOTHING_FLOOR_C: f32 = 30.0;

pub fn is_spurious_cpu(raw: f32, last: f32) -> bool {
    raw >= SPURIOUS_CPU_C && raw >= last + SPURIOUS_JUMP_C
}

/// Bound how fast the CPU reading may fall relative to the last smoothed
/// value.
pub fn clamp_fall(raw: f32, last: f32) -> f32 {
    raw.max(last - MAX_FALL_C)
}

/// Map the GPU reading onto the CPU's scale.
///
/// The GPU idles and works much closer to its limit than the CPU does, so
/// its reading is pulled down below 75 °C: a flat 10 °C at or below 65 °C,
/// and by the distance to 75 °C in between.
pub fn rescale_gpu(gpu: f32) -> f32 {
    if gpu <= 65.0 {
        gpu - 10.0
    } else if gpu < 75.0 {
        gpu - (75.0 - gpu)
    } else {
        gpu
    }
}

/// Couple the two zones: the hotter one drives its own fan directly, the
/// cooler one is pulled a third of the way toward the hotter.
pub fn blend(cpu: f32, gpu: f32) -> ZonePair<f32> {
    if cpu > gpu {
        ZonePair::new(cpu, (2.0 * gpu + cpu) / 3.0)
    } else {
        ZonePair::new((2.0 * cpu + gpu) / 3.0, gpu)
    }
}

/// Exponential smoothing, new value weighted 2:1 against the last.
pub fn smooth(value: f32, last: f32) -> f32 {
    if last > SMOOTHING_FLOOR_C {
        (2.0 * value + last) / 3.0
    } else {
        value
    }
}
