//! Fan duty control.
//!
//! Two control strategies share the [`DutyStrategy`] interface:
//!
//! - [`LadderStrategy`]: a stepped hysteresis ladder keyed to the hotter
//!   of the two sensors. The poller runs it by default.
//! - [`DualSensorController`]: per-zone smoothing, rate limiting and
//!   fault recovery. [`AutoRunner`] drives it in the standalone mode,
//!   where GPU temperatures arrive on an input stream.

mod controller;
mod curve;
mod ladder;
mod overrides;
mod rate_limit;
pub mod runner;
mod smoothing;
mod strategy;

pub use controller::DualSensorController;
pub use curve::duty_for_temperature;
pub use ladder::{LadderStrategy, ladder_duty};
pub use overrides::Overrides;
pub use rate_limit::RateLimiter;
pub use runner::AutoRunner;
pub use strategy::{Decision, DutyStrategy, Sample};

use crate::config::StrategyKind;

/// Build the strategy selected in the configuration.
pub fn strategy_for(kind: StrategyKind) -> Box<dyn DutyStrategy> {
    match kind {
        StrategyKind::Ladder => Box::new(LadderStrategy::new()),
        StrategyKind::Dual => Box::new(DualSensorController::new()),
    }
}
