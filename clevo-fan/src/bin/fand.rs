//! Privileged fan poller.
//!
//! Started by a `clevo-fan watch` session with `CLEVO_FAN_SHM` naming the
//! session's control block. Owns all EC access until the session goes
//! away, the exit flag is set, or a termination signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;

use clevo_fan::config::Config;
use clevo_fan::poller::Poller;
use clevo_fan::shared::SharedControl;
use clevo_fan::tracing::prelude::*;
use clevo_fan::{ec, signals, thermal};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    clevo_fan::tracing::init_journald_or_stdout();

    let config = Config::from_env()?;
    if !nix::unistd::geteuid().is_root() {
        bail!("clevo-fand needs root for EC access");
    }

    let shared = Arc::new(
        SharedControl::open(&config.shm_name)
            .with_context(|| format!("attaching to control block {}", config.shm_name))?,
    );

    let cancellation = CancellationToken::new();
    signals::cancel_on_termination(cancellation.clone())?;

    let fans = match ec::open_backend(&config).await {
        Ok(fans) => fans,
        Err(e) => {
            shared.poller().block().request_exit();
            return Err(e).context("opening EC backend");
        }
    };

    info!(backend = %config.backend, strategy = %config.strategy, "Starting poller");
    let poller = Poller::new(
        fans,
        shared,
        thermal::strategy_for(config.strategy),
        config.poll_interval,
    );
    poller.run(cancellation).await?;

    Ok(())
}
