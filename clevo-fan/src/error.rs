//! Error types for EC access and fan control.

use std::path::PathBuf;

use crate::ec::port::StatusFlags;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A handshake wait on the EC status port exceeded its retry bound.
    /// Whatever the EC returns afterwards is not ground truth.
    #[error("EC handshake timed out on port {port:#04x} waiting for {flag:?} = {expected}")]
    Timeout {
        port: u16,
        flag: StatusFlags,
        expected: bool,
    },

    #[error("short read from {}: expected {expected} bytes, got {actual}", path.display())]
    ShortRead {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("short write to {}: expected {expected} bytes, wrote {actual}", path.display())]
    ShortWrite {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("EC register {offset:#04x} is not writable")]
    ReadOnlyRegister { offset: u8 },

    #[error("invalid fan duty {0}% (expected 0-100)")]
    InvalidDuty(i32),

    #[error("no hwmon interface named {0:?}")]
    InterfaceNotFound(String),

    #[error("unexpected value {value:?} in {}", path.display())]
    Parse { path: PathBuf, value: String },

    /// The GPU temperature feed went quiet for too many cycles.
    #[error("no GPU temperature input for {cycles} consecutive cycles")]
    Liveness { cycles: u32 },

    #[error("shared control block has an incompatible layout")]
    IncompatibleBlock,

    #[error("shared control block: {0}")]
    SharedMemory(#[from] nix::errno::Errno),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
