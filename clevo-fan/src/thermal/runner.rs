//! Standalone dual-sensor control loop.
//!
//! GPU temperatures arrive one per line on an input stream (typically the
//! output of `nvidia-smi` piped into stdin); CPU temperature and fan duty
//! are read from the EC. The loop ticks once a second and treats a stream
//! that stops delivering as fatal: the fans go to a safe duty and the run
//! ends with [`Error::Liveness`].

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::controller::DualSensorController;
use super::overrides::Overrides;
use super::strategy::{DutyStrategy, Sample};
use crate::ec::FanInterface;
use crate::error::{Error, Result};
use crate::telemetry::{Zone, ZonePair};
use crate::tracing::prelude::*;

const CYCLE: Duration = Duration::from_secs(1);

/// Consecutive cycles without GPU input before giving up.
pub const MAX_MISSING_CYCLES: u32 = 5;

/// Duty both fans are left at when GPU input is lost.
pub const LIVENESS_SAFE_DUTY: u8 = 70;

const CPU_READ_ATTEMPTS: u32 = 3;

const WRITE_ATTEMPTS: u32 = 3;
const SETTLE_DELAY: Duration = Duration::from_millis(1100);
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// The control file is re-read on every this many cycles with GPU input.
const CONTROL_FILE_INTERVAL: u32 = 3;

const GPU_INPUT_CAPACITY: usize = 64;

/// Read GPU temperatures from `reader`, one integer per line.
///
/// Malformed lines are logged and skipped. The returned channel closes
/// when the input ends.
pub fn spawn_gpu_input<R>(reader: R) -> mpsc::Receiver<i32>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(GPU_INPUT_CAPACITY);

    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match line.parse::<i32>() {
                        Ok(temp) => {
                            if tx.send(temp).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => warn!(line, "Ignoring malformed GPU temperature"),
                    }
                }
                Ok(None) => {
                    info!("GPU temperature input closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read GPU temperature input");
                    break;
                }
            }
        }
    });

    rx
}

pub struct AutoRunner {
    fans: Box<dyn FanInterface>,
    controller: DualSensorController,
    overrides: Overrides,
    control_file: PathBuf,
    gpu_rx: mpsc::Receiver<i32>,
    missing_cycles: u32,
    input_cycles: u32,
}

impl AutoRunner {
    pub fn new(
        fans: Box<dyn FanInterface>,
        control_file: PathBuf,
        gpu_rx: mpsc::Receiver<i32>,
    ) -> Self {
        Self {
            fans,
            controller: DualSensorController::new(),
            overrides: Overrides::default(),
            control_file,
            gpu_rx,
            missing_cycles: 0,
            input_cycles: 0,
        }
    }

    /// Run until cancelled or GPU input is lost.
    pub async fn run(mut self, cancellation: CancellationToken) -> Result<()> {
        info!(control_file = %self.control_file.display(), "Automatic fan control started");

        let mut interval = time::interval(CYCLE);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("Automatic fan control stopped");
                    return Ok(());
                }
                _ = interval.tick() => self.tick().await?,
            }
        }
    }

    /// Latest GPU temperature queued since the last cycle.
    fn drain_gpu_input(&mut self) -> Option<i32> {
        let mut latest = None;
        while let Ok(temp) = self.gpu_rx.try_recv() {
            latest = Some(temp);
        }
        latest
    }

    async fn tick(&mut self) -> Result<()> {
        let Some(gpu_temp) = self.drain_gpu_input() else {
            self.missing_cycles += 1;
            warn!(cycles = self.missing_cycles, "No GPU temperature this cycle");
            if self.missing_cycles >= MAX_MISSING_CYCLES {
                self.fail_safe().await;
                return Err(Error::Liveness {
                    cycles: self.missing_cycles,
                });
            }
            return Ok(());
        };
        self.missing_cycles = 0;

        self.input_cycles += 1;
        if self.input_cycles >= CONTROL_FILE_INTERVAL {
            self.input_cycles = 0;
            if let Err(e) = self.overrides.reload(&self.control_file).await {
                warn!(error = %e, path = %self.control_file.display(), "Could not read control file");
            }
        }

        let sample = Sample {
            cpu_temp: self.read_cpu_temperature().await,
            gpu_temp,
            duty: self.read_reported_duty().await,
        };

        let decision = self.controller.evaluate(&sample, &self.overrides);
        for zone in Zone::ALL {
            if let Some(duty) = decision[zone] {
                self.apply(zone, duty).await;
            }
        }

        Ok(())
    }

    /// CPU temperature, re-read a few times if it looks like a glitch. A
    /// failed read comes back as 0, which the controller counts as a fault.
    async fn read_cpu_temperature(&mut self) -> i32 {
        let mut reading = 0;
        for attempt in 1..=CPU_READ_ATTEMPTS {
            match self.fans.temperature(Zone::Cpu).await {
                Ok(temp) if self.controller.is_spurious_cpu(temp) => {
                    debug!(temp, attempt, "Spurious CPU temperature, re-reading");
                    reading = temp;
                }
                Ok(temp) => return temp,
                Err(e) => {
                    warn!(error = %e, attempt, "CPU temperature read failed");
                    reading = 0;
                }
            }
        }
        reading
    }

    /// Duty the hardware reports. A failed read assumes the last applied
    /// value rather than triggering a re-sync.
    async fn read_reported_duty(&mut self) -> ZonePair<u8> {
        let mut duty = ZonePair::default();
        for zone in Zone::ALL {
            duty[zone] = match self.fans.duty(zone).await {
                Ok(duty) => duty,
                Err(e) => {
                    warn!(%zone, error = %e, "Fan duty read failed");
                    self.controller.applied(zone)
                }
            };
        }
        duty
    }

    /// Write a duty and confirm the hardware took it.
    async fn apply(&mut self, zone: Zone, duty: u8) {
        for attempt in 1..=WRITE_ATTEMPTS {
            match self.fans.set_duty(zone, duty).await {
                Ok(()) => {
                    time::sleep(SETTLE_DELAY).await;
                    match self.fans.duty(zone).await {
                        Ok(reported) if reported == duty => {
                            info!(%zone, duty, "Fan duty applied");
                            return;
                        }
                        Ok(reported) => {
                            warn!(%zone, duty, reported, attempt, "Fan duty did not take")
                        }
                        Err(e) => warn!(%zone, error = %e, attempt, "Fan duty read-back failed"),
                    }
                }
                Err(e) => warn!(%zone, duty, error = %e, attempt, "Fan duty write failed"),
            }
            time::sleep(RETRY_BACKOFF).await;
        }

        error!(%zone, duty, "Giving up on fan duty write");
    }

    async fn fail_safe(&mut self) {
        error!(
            cycles = self.missing_cycles,
            duty = LIVENESS_SAFE_DUTY,
            "GPU temperature input lost, forcing safe duty"
        );
        for zone in [Zone::Gpu, Zone::Cpu] {
            if let Err(e) = self.fans.set_duty(zone, LIVENESS_SAFE_DUTY).await {
                error!(%zone, error = %e, "Could not set safe duty");
            }
        }
    }
}
