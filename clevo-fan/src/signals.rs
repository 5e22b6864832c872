//! Termination signal handling.

use std::io;

use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio_util::sync::CancellationToken;

use crate::tracing::prelude::*;

/// The signals either process treats as a request to stop.
pub struct TerminationSignals {
    hangup: Signal,
    interrupt: Signal,
    quit: Signal,
    pipe: Signal,
    alarm: Signal,
    terminate: Signal,
    user1: Signal,
    user2: Signal,
}

impl TerminationSignals {
    /// Install handlers. Must run inside a tokio runtime.
    pub fn register() -> io::Result<Self> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            pipe: signal(SignalKind::pipe())?,
            alarm: signal(SignalKind::alarm())?,
            terminate: signal(SignalKind::terminate())?,
            user1: signal(SignalKind::user_defined1())?,
            user2: signal(SignalKind::user_defined2())?,
        })
    }

    /// Wait for the next termination signal and return its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.quit.recv() => "SIGQUIT",
            _ = self.pipe.recv() => "SIGPIPE",
            _ = self.alarm.recv() => "SIGALRM",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.user1.recv() => "SIGUSR1",
            _ = self.user2.recv() => "SIGUSR2",
        }
    }
}

/// Cancel `token` on the first termination signal.
pub fn cancel_on_termination(token: CancellationToken) -> io::Result<()> {
    let mut signals = TerminationSignals::register()?;
    tokio::spawn(async move {
        tokio::select! {
            signal = signals.recv() => {
                info!(signal, "Termination signal received, shutting down");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    });
    Ok(())
}
