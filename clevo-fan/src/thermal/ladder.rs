//! Stepped hysteresis ladder.
//!
//! Each duty step has a rising threshold and a falling threshold about
//! 5 °C below it:
//!
//! | duty | rises at | falls back at |
//! |------|----------|---------------|
//! | 100  | >= 80    | <= 75 -> 90   |
//! | 90   | >= 70    | <= 65 -> 80   |
//! | 80   | >= 60    | <= 55 -> 70   |
//! | 70   | >= 55    | <= 45 -> 60   |
//! | 60   | >= 40    | <= 35 -> 50   |
//! | 50   | >= 30    | <= 25 -> 40   |
//! | 40   | >= 20    | <= 15 -> 30   |
//! | 30   | >= 10    |               |
//!
//! A temperature that fires neither a rising nor a falling rule goes to
//! full duty.

use super::overrides::Overrides;
use super::strategy::{Decision, DutyStrategy, Sample};
use crate::telemetry::ZonePair;

/// (threshold, duty), checked top to bottom; first match wins.
const RISING: [(i32, u8); 8] = [
    (80, 100),
    (70, 90),
    (60, 80),
    (55, 70),
    (40, 60),
    (30, 50),
    (20, 40),
    (10, 30),
];

/// Only consulted when no rising rule matched.
const FALLING: [(i32, u8); 7] = [
    (15, 30),
    (25, 40),
    (35, 50),
    (45, 60),
    (55, 70),
    (65, 80),
    (75, 90),
];

const FULL_DUTY: u8 = 100;

/// Next duty for `temp` given the duty currently applied.
pub fn ladder_duty(temp: i32, duty: u8) -> u8 {
    if let Some(&(_, step)) = RISING
        .iter()
        .find(|&&(threshold, step)| temp >= threshold && duty < step)
    {
        return step;
    }

    if let Some(&(_, step)) = FALLING
        .iter()
        .find(|&&(threshold, step)| temp <= threshold && duty > step)
    {
        return step;
    }

    FULL_DUTY
}

/// The ladder as a [`DutyStrategy`]. Drives the CPU fan from the hotter
/// of the two sensors and only emits a duty when it differs from the one
/// it last emitted.
#[derive(Debug, Default)]
pub struct LadderStrategy {
    last_applied: Option<u8>,
}

impl LadderStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DutyStrategy for LadderStrategy {
    fn name(&self) -> &'static str {
        "ladder"
    }

    fn evaluate(&mut self, sample: &Sample, _overrides: &Overrides) -> Decision {
        let temp = sample.cpu_temp.max(sample.gpu_temp);
        let target = ladder_duty(temp, sample.duty.cpu);

        if self.last_applied == Some(target) {
            return ZonePair::default();
        }

        self.last_applied = Some(target);
        ZonePair::new(Some(target), None)
    }

    fn reset(&mut self) {
        self.last_applied = None;
    }
}
