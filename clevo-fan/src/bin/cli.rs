//! Command-line front end.
//!
//! `watch` is the session: it creates the control block, starts the
//! privileged poller and prints telemetry until interrupted. The other
//! commands attach to a running session, except `dump`, which reads the
//! EC directly and needs root.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use clevo_fan::config::Config;
use clevo_fan::ec::{self, registers};
use clevo_fan::session::{self, Session, SessionEnd, Status};
use clevo_fan::signals;
use clevo_fan::tracing::prelude::*;

const WATCH_INTERVAL: Duration = Duration::from_secs(1);

fn usage() -> ! {
    eprintln!("Usage: clevo-fan <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  watch            Start the poller and show fan telemetry");
    eprintln!("  status [--json]  Show the running session's state");
    eprintln!("  set <percent>    Switch to manual mode at a fixed duty (1-100)");
    eprintln!("  auto             Switch back to automatic control");
    eprintln!("  dump             Print the EC register file (root)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  CLEVO_FAN_BACKEND   port, debugfs or hwmon (default: debugfs)");
    eprintln!("  CLEVO_FAN_STRATEGY  ladder or dual (default: ladder)");
    eprintln!("  CLEVO_FAN_POLLER    poller command (default: clevo-fand)");
    std::process::exit(1);
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        usage();
    }

    clevo_fan::tracing::init_journald_or_stdout();
    let config = Config::from_env()?;

    match args[1].as_str() {
        "watch" => cmd_watch(&config).await?,
        "status" => cmd_status(&config, args.get(2).map(String::as_str) == Some("--json"))?,
        "set" => {
            let percent = args
                .get(2)
                .context("missing duty percentage")?
                .parse::<u8>()
                .context("duty must be a number from 1 to 100")?;
            cmd_set(&config, percent)?
        }
        "auto" => cmd_auto(&config)?,
        "dump" => cmd_dump(&config).await?,
        command => {
            eprintln!("Unknown command: {}", command);
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Give up root if installed setuid; the session never needs it.
fn drop_privileges() -> Result<()> {
    let uid = nix::unistd::getuid();
    if nix::unistd::geteuid().is_root() && !uid.is_root() {
        nix::unistd::setuid(uid).context("dropping privileges")?;
        debug!(%uid, "Dropped root privileges");
    }
    Ok(())
}

fn attach(config: &Config) -> Result<Session> {
    Session::attach(&config.shm_name).with_context(|| {
        format!(
            "no running session at {} (start one with `clevo-fan watch`)",
            config.shm_name
        )
    })
}

fn print_status_line(status: &Status) {
    println!(
        "CPU {:>3}°C  GPU {:>3}°C  fan {:>3}% {:>5} RPM  gpu fan {:>3}% {:>5} RPM  [{}]",
        status.telemetry.cpu_temp,
        status.telemetry.gpu_temp,
        status.telemetry.cpu_fan_duty,
        status.telemetry.cpu_fan_rpm,
        status.telemetry.gpu_fan_duty,
        status.telemetry.gpu_fan_rpm,
        status.mode,
    );
}

async fn cmd_watch(config: &Config) -> Result<()> {
    drop_privileges()?;

    let session = Session::create(&config.shm_name).context("creating control block")?;
    let mut poller = session::spawn_poller(&config.poller_command, &config.shm_name)
        .with_context(|| format!("starting poller `{}`", config.poller_command))?;

    let cancellation = CancellationToken::new();
    signals::cancel_on_termination(cancellation.clone())?;

    let printer = {
        let session = session.clone();
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(WATCH_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = interval.tick() => print_status_line(&session.status()),
                }
            }
        })
    };

    let end = session.supervise(&mut poller, cancellation.clone()).await;
    cancellation.cancel();
    let _ = printer.await;

    match end? {
        SessionEnd::PollerExited(status) if !status.success() => {
            anyhow::bail!("poller exited abnormally ({status})")
        }
        end => info!(?end, "Session ended"),
    }
    Ok(())
}

fn cmd_status(config: &Config, json: bool) -> Result<()> {
    let status = attach(config)?.status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    print_status_line(&status);
    println!("Mode:       {}", status.mode);
    if status.auto_changed_at > 0 {
        let changed = OffsetDateTime::from_unix_timestamp(status.auto_changed_at as i64)
            .map(|at| at.to_string())
            .unwrap_or_default();
        println!("Auto duty:  {}% (since {})", status.auto_duty, changed);
    }
    if status.manual_duty > 0 {
        println!("Manual:     {}%", status.manual_duty);
    }
    println!(
        "Poller:     {}",
        if status.poller_running { "running" } else { "stopped" }
    );
    Ok(())
}

fn cmd_set(config: &Config, percent: u8) -> Result<()> {
    attach(config)?.set_duty(percent)?;
    println!("Fan duty set to {percent}%");
    Ok(())
}

fn cmd_auto(config: &Config) -> Result<()> {
    attach(config)?.set_auto();
    println!("Automatic fan control enabled");
    Ok(())
}

async fn cmd_dump(config: &Config) -> Result<()> {
    let mut fans = ec::open_backend(config).await.context("opening EC backend")?;
    let file = fans.read_all_registers().await?;

    println!("    {}", (0..16).map(|col| format!("  {col:x}")).collect::<String>());
    for (row, chunk) in file.chunks(16).enumerate() {
        let bytes: String = chunk.iter().map(|byte| format!(" {byte:02x}")).collect();
        println!("{:02x}: {}", row * 16, bytes);
    }

    println!();
    for offset in 0..=u8::MAX {
        if let Some(label) = registers::label(offset) {
            let value = file[offset as usize];
            println!("{offset:#04x} {label:<11} {value:#04x} ({value})");
        }
    }
    Ok(())
}
