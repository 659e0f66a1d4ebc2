use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("failed to read temperature from {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("{path}: cannot parse temperature from {content:?}")]
    Parse { path: PathBuf, content: String },

    /// A sensor tried to push past the configured number of temperatures.
    #[error("sensor produced more than {capacity} temperatures")]
    Overflow { capacity: usize },
}

#[derive(Error, Debug)]
pub enum FanError {
    #[error("failed to write fan control {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("{path}: {reason}")]
    Init { path: PathBuf, reason: String },

    #[error("fan {path} cannot be set to {speed:?}")]
    UnsupportedSpeed { path: PathBuf, speed: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("{path}:{line}: syntax error: {text:?}")]
    Syntax {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("No fan levels specified.")]
    NoLevels,

    #[error("Multiple fans specified, only the last one is used.")]
    MultipleFans,

    #[error("Fan levels are not ordered correctly.")]
    LevelOrder,

    #[error("Inconsistent number of limits between consecutive levels.")]
    LimitLength,

    #[error("Lower limits exceed the previous level's upper limits, leaving a gap.")]
    LimitGap,

    #[error("{speed}: lower limit must be below upper limit.")]
    LowerNotBelowUpper { speed: String },

    #[error("{speed}: has {got} limits but {expected} temperatures are configured.")]
    LevelWidth {
        speed: String,
        got: usize,
        expected: usize,
    },

    #[error("Invalid fan level {0:?}.")]
    LevelFormat(String),

    #[error("PWM fan {path} needs numeric levels in 0..=255, got {speed:?}.")]
    PwmLevel { path: PathBuf, speed: String },

    #[error("sensor setup failed: {0}")]
    Sensor(#[from] SensorError),
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("A sensor has been lost: expected {expected} temperatures, got {got}.")]
    SensorLost { expected: usize, got: usize },

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Fan(#[from] FanError),
}

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("failed to install SIGINT handler: {0}")]
    Ctrlc(#[from] ctrlc::Error),

    #[error("sigaction({signal}): {source}")]
    Sigaction { signal: i32, source: io::Error },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid option: {0}")]
    Invocation(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error("bug: {0}")]
    Bug(String),
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Bug(_) => 2,
            _ => 1,
        }
    }
}
