//! Standalone dual-sensor fan control.
//!
//! Reads GPU temperatures from stdin, one per line, for example:
//!
//! ```text
//! nvidia-smi --query-gpu=temperature.gpu --format=csv,noheader -l 1 | clevo-fan-auto
//! ```

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use clevo_fan::config::Config;
use clevo_fan::thermal::{AutoRunner, runner};
use clevo_fan::{ec, signals};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    clevo_fan::tracing::init_journald_or_stdout();

    let config = Config::from_env()?;
    let fans = ec::open_backend(&config)
        .await
        .context("opening EC backend")?;

    let cancellation = CancellationToken::new();
    signals::cancel_on_termination(cancellation.clone())?;

    let gpu_rx = runner::spawn_gpu_input(BufReader::new(tokio::io::stdin()));
    AutoRunner::new(fans, config.control_file.clone(), gpu_rx)
        .run(cancellation)
        .await
        .context("automatic fan control stopped")?;

    Ok(())
}
