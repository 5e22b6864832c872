//! The privileged poller.
//!
//! Owns every EC access. Each cycle it:
//!
//! 1. stops if the exit flag is set or the owning session is gone;
//! 2. writes a pending manual duty request;
//! 3. reads telemetry and publishes it to the control block;
//! 4. in automatic mode, runs the duty strategy and applies its decision.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use time::macros::format_description;
use tokio::time::{self as tokio_time, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::ec::FanInterface;
use crate::error::Result;
use crate::shared::{FanMode, PollerSide, SharedControl};
use crate::telemetry::{Snapshot, Zone};
use crate::thermal::{DutyStrategy, Overrides, Sample};
use crate::tracing::prelude::*;

/// Consecutive failed telemetry reads before the poller gives up.
const MAX_READ_FAILURES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ExitRequested,
    OwnerGone,
    Cancelled,
}

pub struct Poller {
    fans: Box<dyn FanInterface>,
    shared: Arc<SharedControl>,
    strategy: Box<dyn DutyStrategy>,
    interval: Duration,
    read_failures: u32,
    was_auto: bool,
}

impl Poller {
    pub fn new(
        fans: Box<dyn FanInterface>,
        shared: Arc<SharedControl>,
        strategy: Box<dyn DutyStrategy>,
        interval: Duration,
    ) -> Self {
        Self {
            fans,
            shared,
            strategy,
            interval,
            read_failures: 0,
            was_auto: false,
        }
    }

    /// Poll until told to stop. The exit flag is set on the way out, for
    /// any reason, so the session learns the poller is gone.
    pub async fn run(mut self, cancellation: CancellationToken) -> Result<StopReason> {
        let shared = Arc::clone(&self.shared);
        shared.poller().register();
        info!(
            strategy = self.strategy.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Poller started"
        );

        let result = self.poll_loop(&cancellation).await;

        shared.poller().block().request_exit();
        match &result {
            Ok(reason) => info!(?reason, "Poller stopped"),
            Err(e) => error!(error = %e, "Poller failed"),
        }
        result
    }

    async fn poll_loop(&mut self, cancellation: &CancellationToken) -> Result<StopReason> {
        let mut interval = tokio_time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return Ok(StopReason::Cancelled),
                _ = interval.tick() => {
                    if let Some(reason) = self.cycle().await? {
                        return Ok(reason);
                    }
                }
            }
        }
    }

    async fn cycle(&mut self) -> Result<Option<StopReason>> {
        let shared = Arc::clone(&self.shared);
        let side = shared.poller();
        let block = side.block();

        if block.exit_requested() {
            return Ok(Some(StopReason::ExitRequested));
        }
        if !side.owner_alive() {
            warn!(owner = %block.owner_pid(), "Session is gone");
            return Ok(Some(StopReason::OwnerGone));
        }

        let auto = block.mode() == FanMode::Auto;
        self.apply_manual_request(&side, auto).await;

        let snapshot = match self.fans.snapshot().await {
            Ok(snapshot) => {
                self.read_failures = 0;
                snapshot
            }
            Err(e) => {
                self.read_failures += 1;
                warn!(error = %e, failures = self.read_failures, "Telemetry read failed");
                if self.read_failures >= MAX_READ_FAILURES {
                    return Err(e);
                }
                return Ok(None);
            }
        };
        side.publish(&snapshot);
        trace!(?snapshot, "Published telemetry");

        if auto {
            if !self.was_auto {
                debug!(strategy = self.strategy.name(), "Entering automatic mode");
                self.strategy.reset();
            }
            self.apply_strategy(&side, &snapshot).await;
        }
        self.was_auto = auto;

        Ok(None)
    }

    async fn apply_manual_request(&mut self, side: &PollerSide<'_>, auto: bool) {
        let block = side.block();
        if auto {
            if block.manual_applied() != 0 {
                side.record_manual_applied(0);
            }
            return;
        }

        let requested = block.manual_request();
        if requested == 0 || requested == block.manual_applied() {
            return;
        }

        match self.fans.set_duty(Zone::Cpu, requested).await {
            Ok(()) => {
                info!(duty = requested, "Manual fan duty applied");
                side.record_manual_applied(requested);
            }
            Err(e) => warn!(duty = requested, error = %e, "Manual fan duty write failed"),
        }
    }

    async fn apply_strategy(&mut self, side: &PollerSide<'_>, snapshot: &Snapshot) {
        let decision = self
            .strategy
            .evaluate(&Sample::from(snapshot), &Overrides::default());

        for zone in Zone::ALL {
            let Some(duty) = decision[zone] else {
                continue;
            };

            if let Err(e) = self.fans.set_duty(zone, duty).await {
                warn!(%zone, duty, error = %e, "Automatic fan duty write failed");
                // Re-evaluate from scratch next cycle instead of assuming
                // the write took.
                self.strategy.reset();
                continue;
            }

            let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
            let stamp = now
                .format(format_description!(
                    "[month]/[day] [hour]:[minute]:[second]"
                ))
                .unwrap_or_default();
            info!(
                at = %stamp,
                %zone,
                cpu_temp = snapshot.cpu_temp,
                gpu_temp = snapshot.gpu_temp,
                duty,
                "Automatic fan duty change"
            );
            if zone == Zone::Cpu {
                side.record_auto_duty(duty, now.unix_timestamp().max(0) as u64);
            }
        }
    }
}
