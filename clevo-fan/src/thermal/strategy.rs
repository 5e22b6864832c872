use crate::telemetry::{Snapshot, ZonePair};

use super::overrides::Overrides;

/// Inputs to one control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub cpu_temp: i32,
    pub gpu_temp: i32,
    /// Duty the hardware currently reports, per zone.
    pub duty: ZonePair<u8>,
}

impl From<&Snapshot> for Sample {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            cpu_temp: snapshot.cpu_temp,
            gpu_temp: snapshot.gpu_temp,
            duty: ZonePair::new(snapshot.cpu_fan_duty, snapshot.gpu_fan_duty),
        }
    }
}

/// Duty to write per zone this cycle. `None` leaves that fan alone.
pub type Decision = ZonePair<Option<u8>>;

/// A fan duty control algorithm, evaluated once per poll cycle.
pub trait DutyStrategy: Send {
    fn name(&self) -> &'static str;

    fn evaluate(&mut self, sample: &Sample, overrides: &Overrides) -> Decision;

    /// Forget everything learned so far, e.g. when automatic mode is
    /// re-entered after a manual override.
    fn reset(&mut self);
}
