//! Control block shared between the poller and the session.
//!
//! The block is a single page of POSIX shared memory holding nothing but
//! fixed-width atomics. Every field has exactly one writer:
//!
//! | field                         | written by |
//! |-------------------------------|------------|
//! | telemetry, auto duty, manual applied, poller pid | poller |
//! | mode, manual request, owner pid | session  |
//! | exit flag                     | either, false to true only |
//!
//! so no field needs more than a plain load or store. A reader may see a
//! mix of two cycles' telemetry; each field is meaningful on its own.
//!
//! The single-writer rule is enforced by handing out [`PollerSide`] and
//! [`SessionSide`] views, each of which can only write its own fields.

use std::fs::File;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use nix::sys::signal::{self, Signal};
use nix::sys::stat::Mode;
use nix::unistd::{self, Pid};
use serde::Serialize;
use strum::Display;

use crate::error::{Error, Result};
use crate::telemetry::Snapshot;
use crate::tracing::prelude::*;

/// Marks an initialized block with the layout below.
const LAYOUT_MAGIC: u32 = 0x434c_4631;

const MAPPING_SIZE: usize = 4096;

#[repr(C)]
pub struct ControlBlock {
    magic: AtomicU32,
    exit: AtomicU32,
    owner_pid: AtomicI32,
    poller_pid: AtomicI32,
    cpu_temp: AtomicI32,
    gpu_temp: AtomicI32,
    cpu_fan_duty: AtomicU32,
    cpu_fan_rpm: AtomicU32,
    gpu_fan_duty: AtomicU32,
    gpu_fan_rpm: AtomicU32,
    auto_mode: AtomicU32,
    auto_duty: AtomicU32,
    manual_next_duty: AtomicU32,
    manual_prev_duty: AtomicU32,
    /// Unix time of the last automatic duty change.
    auto_changed_at: AtomicU64,
}

const _: () = assert!(size_of::<ControlBlock>() <= MAPPING_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    Auto,
    Manual,
}

impl ControlBlock {
    fn initialize(&self, owner: Pid) {
        self.owner_pid.store(owner.as_raw(), Ordering::Relaxed);
        self.auto_mode.store(1, Ordering::Relaxed);
        self.magic.store(LAYOUT_MAGIC, Ordering::Release);
    }

    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::Acquire) != 0
    }

    /// Ask both sides to stop. Never undone.
    pub fn request_exit(&self) {
        self.exit.store(1, Ordering::Release);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            cpu_temp: self.cpu_temp.load(Ordering::Relaxed),
            gpu_temp: self.gpu_temp.load(Ordering::Relaxed),
            cpu_fan_duty: self.cpu_fan_duty.load(Ordering::Relaxed) as u8,
            cpu_fan_rpm: self.cpu_fan_rpm.load(Ordering::Relaxed),
            gpu_fan_duty: self.gpu_fan_duty.load(Ordering::Relaxed) as u8,
            gpu_fan_rpm: self.gpu_fan_rpm.load(Ordering::Relaxed),
        }
    }

    pub fn mode(&self) -> FanMode {
        if self.auto_mode.load(Ordering::Acquire) != 0 {
            FanMode::Auto
        } else {
            FanMode::Manual
        }
    }

    /// Last duty applied by the automatic strategy.
    pub fn auto_duty(&self) -> u8 {
        self.auto_duty.load(Ordering::Relaxed) as u8
    }

    /// Unix time of the last automatic change, 0 if none yet.
    pub fn auto_changed_at(&self) -> u64 {
        self.auto_changed_at.load(Ordering::Relaxed)
    }

    /// Manual duty requested by the session, 0 for none.
    pub fn manual_request(&self) -> u8 {
        self.manual_next_duty.load(Ordering::Acquire) as u8
    }

    /// Manual duty the poller last applied, 0 for none.
    pub fn manual_applied(&self) -> u8 {
        self.manual_prev_duty.load(Ordering::Relaxed) as u8
    }

    pub fn owner_pid(&self) -> Pid {
        Pid::from_raw(self.owner_pid.load(Ordering::Relaxed))
    }

    pub fn poller_pid(&self) -> Pid {
        Pid::from_raw(self.poller_pid.load(Ordering::Relaxed))
    }
}

/// Whether `pid` names a live process. A process we may not signal still
/// exists.
pub fn process_alive(pid: Pid) -> bool {
    if pid.as_raw() <= 0 {
        return false;
    }
    match signal::kill(pid, None::<Signal>) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Writes owned by the poller.
pub struct PollerSide<'a>(&'a ControlBlock);

impl PollerSide<'_> {
    pub fn block(&self) -> &ControlBlock {
        self.0
    }

    pub fn register(&self) {
        self.0
            .poller_pid
            .store(unistd::getpid().as_raw(), Ordering::Relaxed);
    }

    pub fn publish(&self, snapshot: &Snapshot) {
        let block = self.0;
        block.cpu_temp.store(snapshot.cpu_temp, Ordering::Relaxed);
        block.gpu_temp.store(snapshot.gpu_temp, Ordering::Relaxed);
        block
            .cpu_fan_duty
            .store(snapshot.cpu_fan_duty as u32, Ordering::Relaxed);
        block.cpu_fan_rpm.store(snapshot.cpu_fan_rpm, Ordering::Relaxed);
        block
            .gpu_fan_duty
            .store(snapshot.gpu_fan_duty as u32, Ordering::Relaxed);
        block.gpu_fan_rpm.store(snapshot.gpu_fan_rpm, Ordering::Relaxed);
    }

    pub fn record_auto_duty(&self, duty: u8, at_unix: u64) {
        self.0.auto_duty.store(duty as u32, Ordering::Relaxed);
        self.0.auto_changed_at.store(at_unix, Ordering::Relaxed);
    }

    pub fn record_manual_applied(&self, duty: u8) {
        self.0.manual_prev_duty.store(duty as u32, Ordering::Relaxed);
    }

    /// Whether the session that created the block is still running.
    pub fn owner_alive(&self) -> bool {
        process_alive(self.0.owner_pid())
    }
}

/// Writes owned by the session.
pub struct SessionSide<'a>(&'a ControlBlock);

impl SessionSide<'_> {
    pub fn block(&self) -> &ControlBlock {
        self.0
    }

    /// Switch to manual mode with `duty` as the request.
    pub fn request_manual(&self, duty: u8) {
        self.0.manual_next_duty.store(duty as u32, Ordering::Release);
        self.0.auto_mode.store(0, Ordering::Release);
    }

    pub fn request_auto(&self) {
        self.0.auto_mode.store(1, Ordering::Release);
        self.0.manual_next_duty.store(0, Ordering::Release);
    }

    pub fn poller_alive(&self) -> bool {
        process_alive(self.0.poller_pid())
    }
}

/// A mapping of the control block.
pub struct SharedControl {
    block: NonNull<ControlBlock>,
    /// Set on the creating side, which removes the name on drop.
    name: Option<String>,
}

// The block is only ever accessed through atomics.
unsafe impl Send for SharedControl {}
unsafe impl Sync for SharedControl {}

const MAPPING_LEN: NonZeroUsize = match NonZeroUsize::new(MAPPING_SIZE) {
    Some(len) => len,
    None => panic!("empty mapping"),
};

impl SharedControl {
    /// Create the named block, replacing any stale one left behind by a
    /// crashed session. The calling process becomes its owner.
    pub fn create(name: &str) -> Result<Self> {
        match mman::shm_unlink(name) {
            Ok(()) => warn!(name, "Removed stale control block"),
            Err(Errno::ENOENT) => {}
            Err(e) => return Err(e.into()),
        }

        let fd = mman::shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )?;
        let file = File::from(fd);
        file.set_len(MAPPING_SIZE as u64)?;

        let shared = Self {
            block: map_shared(&file)?,
            name: Some(name.to_string()),
        };
        shared.block().initialize(unistd::getpid());
        debug!(name, "Created control block");
        Ok(shared)
    }

    /// Attach to a block created by [`create`](Self::create).
    pub fn open(name: &str) -> Result<Self> {
        let fd = mman::shm_open(name, OFlag::O_RDWR, Mode::empty())?;
        let file = File::from(fd);
        let len = file.metadata()?.len();
        if len < MAPPING_SIZE as u64 {
            return Err(Error::IncompatibleBlock);
        }

        let shared = Self {
            block: map_shared(&file)?,
            name: None,
        };
        if shared.block().magic.load(Ordering::Acquire) != LAYOUT_MAGIC {
            return Err(Error::IncompatibleBlock);
        }
        debug!(name, owner = %shared.block().owner_pid(), "Attached to control block");
        Ok(shared)
    }

    /// An unnamed block, private to this process and its threads.
    pub fn anonymous() -> Result<Self> {
        let ptr = unsafe {
            mman::mmap_anonymous(
                None,
                MAPPING_LEN,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )?
        };
        let shared = Self {
            block: ptr.cast(),
            name: None,
        };
        shared.block().initialize(unistd::getpid());
        Ok(shared)
    }

    pub fn block(&self) -> &ControlBlock {
        // SAFETY: the mapping is page aligned, at least a page long, and
        // lives until drop. Every field is an atomic, so shared access
        // from either process is sound.
        unsafe { self.block.as_ref() }
    }

    pub fn poller(&self) -> PollerSide<'_> {
        PollerSide(self.block())
    }

    pub fn session(&self) -> SessionSide<'_> {
        SessionSide(self.block())
    }
}

fn map_shared(file: &File) -> Result<NonNull<ControlBlock>> {
    let ptr = unsafe {
        mman::mmap(
            None,
            MAPPING_LEN,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            file,
            0,
        )?
    };
    Ok(ptr.cast())
}

impl Drop for SharedControl {
    fn drop(&mut self) {
        if let Err(e) = unsafe { mman::munmap(self.block.cast(), MAPPING_SIZE) } {
            warn!(error = %e, "Failed to unmap control block");
        }
        if let Some(name) = &self.name {
            if let Err(e) = mman::shm_unlink(name.as_str()) {
                warn!(name, error = %e, "Failed to remove control block");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            cpu_temp: 61,
            gpu_temp: 55,
            cpu_fan_duty: 40,
            cpu_fan_rpm: 2900,
            gpu_fan_duty: 35,
            gpu_fan_rpm: 2400,
        }
    }

    #[test]
    fn should_start_in_auto_mode_owned_by_creator() {
        let shared = SharedControl::anonymous().unwrap();
        let block = shared.block();

        assert_eq!(block.mode(), FanMode::Auto);
        assert!(!block.exit_requested());
        assert_eq!(block.owner_pid(), unistd::getpid());
        assert_eq!(block.manual_request(), 0);
    }

    #[test]
    fn should_expose_published_telemetry() {
        let shared = SharedControl::anonymous().unwrap();

        shared.poller().publish(&snapshot());

        assert_eq!(shared.block().snapshot(), snapshot());
    }

    #[test]
    fn should_switch_between_manual_and_auto() {
        let shared = SharedControl::anonymous().unwrap();

        shared.session().request_manual(80);
        assert_eq!(shared.block().mode(), FanMode::Manual);
        assert_eq!(shared.block().manual_request(), 80);

        shared.session().request_auto();
        assert_eq!(shared.block().mode(), FanMode::Auto);
        assert_eq!(shared.block().manual_request(), 0);
    }

    #[test]
    fn should_keep_exit_flag_set() {
        let shared = SharedControl::anonymous().unwrap();

        shared.session().block().request_exit();
        shared.poller().block().request_exit();

        assert!(shared.block().exit_requested());
    }

    #[test]
    fn should_record_auto_transition() {
        let shared = SharedControl::anonymous().unwrap();

        shared.poller().record_auto_duty(70, 1_700_000_000);

        assert_eq!(shared.block().auto_duty(), 70);
        assert_eq!(shared.block().auto_changed_at(), 1_700_000_000);
    }

    #[test]
    fn should_treat_own_process_as_alive() {
        let shared = SharedControl::anonymous().unwrap();

        assert!(shared.poller().owner_alive());
        assert!(!process_alive(Pid::from_raw(0)));
    }

    #[test]
    fn should_share_named_block_between_mappings() {
        let name = format!("/clevo-fan-test-{}", unistd::getpid());
        let owner = SharedControl::create(&name).unwrap();
        let attached = SharedControl::open(&name).unwrap();

        owner.session().request_manual(55);
        attached.poller().publish(&snapshot());

        assert_eq!(attached.block().manual_request(), 55);
        assert_eq!(owner.block().snapshot(), snapshot());
    }

    #[test]
    fn should_refuse_missing_block() {
        let name = format!("/clevo-fan-missing-{}", unistd::getpid());

        assert!(matches!(
            SharedControl::open(&name),
            Err(Error::SharedMemory(Errno::ENOENT))
        ));
    }
}
