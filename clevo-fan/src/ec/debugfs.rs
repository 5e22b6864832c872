//! Register reads from the `ec_sys` debug file.
//!
//! With the `ec_sys` module loaded the kernel exposes the register file at
//! `/sys/kernel/debug/ec/ec0/io`. Reading it is one block operation and
//! doesn't race with the kernel's own EC traffic the way the port
//! handshake can. The file is treated as read-only; duty writes still go
//! through the port protocol.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs, process::Command};

use super::RegisterChannel;
use super::port::{PortChannel, PortIo};
use super::registers::{REGISTER_FILE_SIZE, RegisterFile};
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

pub struct DebugFileChannel<P> {
    path: PathBuf,
    writer: PortChannel<P>,
}

impl<P: PortIo> DebugFileChannel<P> {
    pub fn new(path: PathBuf, writer: PortChannel<P>) -> Self {
        Self { path, writer }
    }
}

/// Read the full register file from `path`.
pub async fn read_register_file(path: &Path) -> Result<RegisterFile> {
    let bytes = fs::read(path).await?;
    let file: RegisterFile = bytes.as_slice().try_into().map_err(|_| Error::ShortRead {
        path: path.to_path_buf(),
        expected: REGISTER_FILE_SIZE,
        actual: bytes.len(),
    })?;
    Ok(file)
}

#[async_trait]
impl<P: PortIo> RegisterChannel for DebugFileChannel<P> {
    async fn read_register(&self, offset: u8) -> Result<u8> {
        let file = read_register_file(&self.path).await?;
        Ok(file[offset as usize])
    }

    async fn write_register(&self, offset: u8, value: u8) -> Result<()> {
        self.writer.write_register(offset, value).await
    }

    async fn read_all_registers(&self) -> Result<RegisterFile> {
        read_register_file(&self.path).await
    }

    fn reads_in_blocks(&self) -> bool {
        true
    }
}

/// Make sure the debug file exists, loading `ec_sys` once if it doesn't.
pub async fn ensure_debug_file(path: &Path) -> Result<()> {
    if fs::try_exists(path).await? {
        return Ok(());
    }

    info!(path = %path.display(), "EC debug file missing, loading ec_sys");
    match Command::new("modprobe").arg("ec_sys").status().await {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(%status, "modprobe ec_sys failed"),
        Err(e) => warn!(error = %e, "Could not run modprobe"),
    }

    if fs::try_exists(path).await? {
        Ok(())
    } else {
        Err(Error::Other(format!(
            "EC debug file {} not available",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ec::registers;
    use crate::test_utils::FakeEcPorts;

    #[tokio::test]
    async fn should_read_registers_from_block_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("io");
        let mut contents = vec![0u8; REGISTER_FILE_SIZE];
        contents[registers::CPU_TEMP as usize] = 71;
        std::fs::write(&path, &contents).unwrap();
        let channel = DebugFileChannel::new(path, PortChannel::new(FakeEcPorts::new()));

        assert_eq!(channel.read_register(registers::CPU_TEMP).await.unwrap(), 71);
        assert_eq!(channel.read_all_registers().await.unwrap().len(), 256);
        assert!(channel.reads_in_blocks());
    }

    #[tokio::test]
    async fn should_report_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("io");
        std::fs::write(&path, [0u8; 100]).unwrap();
        let channel = DebugFileChannel::new(path, PortChannel::new(FakeEcPorts::new()));

        let result = channel.read_all_registers().await;

        assert!(matches!(
            result,
            Err(Error::ShortRead {
                expected: 256,
                actual: 100,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_forward_writes_to_ports() {
        let dir = tempfile::tempdir().unwrap();
        let ports = FakeEcPorts::new();
        let channel =
            DebugFileChannel::new(dir.path().join("io"), PortChannel::new(ports.clone()));

        channel
            .write_register(registers::CPU_FAN_DUTY, 230)
            .await
            .unwrap();

        assert_eq!(ports.register(registers::CPU_FAN_DUTY), 230);
    }

    #[tokio::test]
    async fn should_accept_existing_debug_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("io");
        std::fs::write(&path, [0u8; REGISTER_FILE_SIZE]).unwrap();

        ensure_debug_file(&path).await.unwrap();
    }
}
