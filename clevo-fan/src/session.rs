//! The unprivileged side of the split.
//!
//! A session creates the control block, starts the poller, reads telemetry
//! and posts mode and duty requests. It never touches the EC.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::shared::{FanMode, SharedControl};
use crate::telemetry::Snapshot;
use crate::tracing::prelude::*;

/// How long the poller gets to notice the exit flag before it's killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const EXIT_FLAG_CHECK: Duration = Duration::from_millis(500);

/// What a session can show about the fans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    #[serde(flatten)]
    pub telemetry: Snapshot,
    pub mode: FanMode,
    pub auto_duty: u8,
    pub auto_changed_at: u64,
    pub manual_duty: u8,
    pub poller_running: bool,
}

#[derive(Debug)]
pub enum SessionEnd {
    /// The poller exited on its own.
    PollerExited(ExitStatus),
    /// The session was asked to stop and took the poller down with it.
    Shutdown,
}

#[derive(Clone)]
pub struct Session {
    shared: Arc<SharedControl>,
}

impl Session {
    /// Create the control block under `name` and own it.
    pub fn create(name: &str) -> Result<Self> {
        Ok(Self::from_shared(Arc::new(SharedControl::create(name)?)))
    }

    /// Attach to a running session's block.
    pub fn attach(name: &str) -> Result<Self> {
        Ok(Self::from_shared(Arc::new(SharedControl::open(name)?)))
    }

    pub fn from_shared(shared: Arc<SharedControl>) -> Self {
        Self { shared }
    }

    /// Request a fixed duty, switching to manual mode.
    pub fn set_duty(&self, percent: u8) -> Result<()> {
        if percent == 0 || percent > 100 {
            return Err(Error::InvalidDuty(percent as i32));
        }
        info!(duty = percent, "Requesting manual fan duty");
        self.shared.session().request_manual(percent);
        Ok(())
    }

    pub fn set_auto(&self) {
        info!("Requesting automatic fan control");
        self.shared.session().request_auto();
    }

    pub fn status(&self) -> Status {
        let block = self.shared.block();
        Status {
            telemetry: block.snapshot(),
            mode: block.mode(),
            auto_duty: block.auto_duty(),
            auto_changed_at: block.auto_changed_at(),
            manual_duty: block.manual_request(),
            poller_running: !block.exit_requested() && self.shared.session().poller_alive(),
        }
    }

    pub fn shutdown(&self) {
        self.shared.block().request_exit();
    }

    /// Watch the poller until it exits or `cancellation` fires.
    ///
    /// Either way the exit flag ends up set. On cancellation the poller is
    /// given [`SHUTDOWN_GRACE`] to stop before it is killed.
    pub async fn supervise(
        &self,
        poller: &mut Child,
        cancellation: CancellationToken,
    ) -> Result<SessionEnd> {
        let mut check = time::interval(EXIT_FLAG_CHECK);

        loop {
            tokio::select! {
                status = poller.wait() => {
                    let status = status?;
                    if status.success() {
                        info!(%status, "Poller exited");
                    } else {
                        error!(%status, "Poller exited abnormally");
                    }
                    self.shutdown();
                    return Ok(SessionEnd::PollerExited(status));
                }
                _ = cancellation.cancelled() => {
                    self.shutdown();
                    stop_poller(poller).await?;
                    return Ok(SessionEnd::Shutdown);
                }
                _ = check.tick() => {
                    if self.shared.block().exit_requested() {
                        debug!("Exit flag set, waiting for poller");
                        stop_poller(poller).await?;
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }
        }
    }
}

async fn stop_poller(poller: &mut Child) -> Result<()> {
    match time::timeout(SHUTDOWN_GRACE, poller.wait()).await {
        Ok(status) => {
            let status = status?;
            debug!(%status, "Poller stopped");
        }
        Err(_) => {
            warn!("Poller did not stop in time, killing it");
            poller.kill().await?;
        }
    }
    Ok(())
}

/// Start the poller for the block `shm_name`.
///
/// `command` is split on whitespace, so a privilege helper can be put in
/// front of the poller (`pkexec clevo-fand`).
pub fn spawn_poller(command: &str, shm_name: &str) -> Result<Child> {
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| Error::Other("empty poller command".to_string()))?;

    let child = Command::new(program)
        .args(parts)
        .env("CLEVO_FAN_SHM", shm_name)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;
    info!(command, pid = ?child.id(), "Started poller");
    Ok(child)
}
