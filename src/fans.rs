use std::{
    cell::Cell,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use crate::{
    config::Settings,
    error::{ConfigError, FanError},
    level::{FanSpeed, Level},
    util,
};

/// Longest watchdog timeout thinkpad_acpi accepts, in seconds.
pub const TP_WATCHDOG_MAX_S: u64 = 120;

pub trait FanDriver {
    fn init(&self) -> Result<(), FanError>;

    fn set_speed(&self, level: &Level) -> Result<(), FanError>;

    /// Called on every iteration that keeps the current level.
    fn ping_watchdog_and_depulse(&self, level: &Level) -> Result<(), FanError>;

    /// Rejects levels this fan cannot represent.
    fn check_level(&self, _level: &Level) -> Result<(), ConfigError> {
        Ok(())
    }
}

fn write_fan(path: &Path, value: &str) -> Result<(), FanError> {
    util::write_value(path, value).map_err(|source| FanError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// The thinkpad_acpi fan interface, usually `/proc/acpi/ibm/fan`.
#[derive(Debug)]
pub struct TpFan {
    path: PathBuf,
    watchdog: Duration,
    depulse: Duration,
    last_ping: Cell<Instant>,
}

impl TpFan {
    pub fn new(path: PathBuf, settings: &Settings) -> Self {
        let watchdog = (settings.sleeptime.as_secs() * 6).min(TP_WATCHDOG_MAX_S);
        Self {
            path,
            watchdog: Duration::from_secs(watchdog),
            depulse: settings.depulse,
            last_ping: Cell::new(Instant::now()),
        }
    }
}

impl FanDriver for TpFan {
    fn init(&self) -> Result<(), FanError> {
        let content = util::read_trimmed(&self.path).map_err(|source| FanError::Io {
            path: self.path.clone(),
            source,
        })?;
        if !content.contains("commands:") {
            return Err(FanError::Init {
                path: self.path.clone(),
                reason: "thinkpad_acpi does not accept fan commands, load it with fan_control=1"
                    .to_string(),
            });
        }
        write_fan(&self.path, &format!("watchdog {}", self.watchdog.as_secs()))
    }

    fn set_speed(&self, level: &Level) -> Result<(), FanError> {
        write_fan(&self.path, &level.speed.to_string())?;
        self.last_ping.set(Instant::now());
        Ok(())
    }

    fn ping_watchdog_and_depulse(&self, level: &Level) -> Result<(), FanError> {
        if !self.depulse.is_zero() {
            write_fan(&self.path, "level disengaged")?;
            thread::sleep(self.depulse);
            self.set_speed(level)
        } else if self.last_ping.get().elapsed() >= self.watchdog / 2 {
            log::debug!("watchdog ping: {}", level);
            self.set_speed(level)
        } else {
            Ok(())
        }
    }
}

/// An hwmon `pwmN` output, switched to manual mode through `pwmN_enable`.
#[derive(Debug)]
pub struct PwmFan {
    path: PathBuf,
    enable_path: PathBuf,
}

impl PwmFan {
    pub fn new(path: PathBuf) -> Self {
        let mut enable = path.clone().into_os_string();
        enable.push("_enable");
        Self {
            path,
            enable_path: PathBuf::from(enable),
        }
    }
}

impl FanDriver for PwmFan {
    fn init(&self) -> Result<(), FanError> {
        write_fan(&self.enable_path, "1")
    }

    fn set_speed(&self, level: &Level) -> Result<(), FanError> {
        match &level.speed {
            FanSpeed::Numeric(n) => write_fan(&self.path, &n.to_string()),
            FanSpeed::Named(name) => Err(FanError::UnsupportedSpeed {
                path: self.path.clone(),
                speed: name.clone(),
            }),
        }
    }

    fn ping_watchdog_and_depulse(&self, _level: &Level) -> Result<(), FanError> {
        Ok(())
    }

    fn check_level(&self, level: &Level) -> Result<(), ConfigError> {
        match level.speed {
            FanSpeed::Numeric(n) if (0..=255).contains(&n) => Ok(()),
            _ => Err(ConfigError::PwmLevel {
                path: self.path.clone(),
                speed: level.speed.to_string(),
            }),
        }
    }
}
