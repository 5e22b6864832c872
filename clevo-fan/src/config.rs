//! Runtime configuration from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use strum::{Display, EnumString};

use crate::error::{Error, Result};

/// How register access reaches the EC. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    /// Port handshake on 0x66/0x62 through `/dev/port`.
    Port,
    /// Block reads of the `ec_sys` debug file, writes over the port.
    Debugfs,
    /// Text attributes of the `clevo_xsm_wmi` hwmon driver.
    Hwmon,
}

/// Which duty strategy the poller runs in automatic mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum StrategyKind {
    Ladder,
    Dual,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendKind,
    pub strategy: StrategyKind,
    /// POSIX shared memory name of the control block.
    pub shm_name: String,
    pub control_file: PathBuf,
    pub poll_interval: Duration,
    /// Command the session launches to start the privileged poller.
    pub poller_command: String,
    pub port_device: PathBuf,
    pub debug_file: PathBuf,
    pub hwmon_root: PathBuf,
    pub hwmon_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Debugfs,
            strategy: StrategyKind::Ladder,
            shm_name: "/clevo-fan".to_string(),
            control_file: PathBuf::from("/tmp/clevo_fan_ctrl"),
            poll_interval: Duration::from_millis(200),
            poller_command: "clevo-fand".to_string(),
            port_device: PathBuf::from("/dev/port"),
            debug_file: PathBuf::from("/sys/kernel/debug/ec/ec0/io"),
            hwmon_root: PathBuf::from("/sys/class/hwmon"),
            hwmon_name: "clevo_xsm_wmi".to_string(),
        }
    }
}

impl Config {
    /// Build a configuration from `CLEVO_FAN_*` variables over the defaults.
    ///
    /// `USE_HWMON=1` is still honored and wins over `CLEVO_FAN_BACKEND`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(value) = lookup("CLEVO_FAN_BACKEND") {
            config.backend = parse_var("CLEVO_FAN_BACKEND", &value)?;
        }
        if lookup("USE_HWMON").as_deref() == Some("1") {
            config.backend = BackendKind::Hwmon;
        }
        if let Some(value) = lookup("CLEVO_FAN_STRATEGY") {
            config.strategy = parse_var("CLEVO_FAN_STRATEGY", &value)?;
        }
        if let Some(value) = lookup("CLEVO_FAN_SHM") {
            config.shm_name = value;
        }
        if let Some(value) = lookup("CLEVO_FAN_CONTROL_FILE") {
            config.control_file = PathBuf::from(value);
        }
        if let Some(value) = lookup("CLEVO_FAN_POLL_MS") {
            let millis: u64 = parse_var("CLEVO_FAN_POLL_MS", &value)?;
            config.poll_interval = Duration::from_millis(millis);
        }
        if let Some(value) = lookup("CLEVO_FAN_POLLER") {
            config.poller_command = value;
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Other(format!("invalid value {value:?} for {key}")))
}
