use std::path::{Path, PathBuf};

use crate::{error::SensorError, temperature::TemperatureState, util};

/// Source of one or more temperatures, polled in configuration order.
pub trait SensorDriver {
    /// How many temperatures each `read_temps` call pushes.
    fn num_temps(&self) -> usize;

    fn read_temps(&self, state: &mut TemperatureState) -> Result<(), SensorError>;
}

fn read_file(path: &Path) -> Result<String, SensorError> {
    util::read_trimmed(path).map_err(|source| SensorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_error(path: &Path, content: &str) -> SensorError {
    SensorError::Parse {
        path: path.to_path_buf(),
        content: content.to_string(),
    }
}

/// A single hwmon `tempN_input` file, reporting millidegrees.
#[derive(Debug)]
pub struct HwmonSensor {
    path: PathBuf,
    correction: i32,
}

impl HwmonSensor {
    pub fn new(path: PathBuf, correction: i32) -> Self {
        Self { path, correction }
    }
}

impl SensorDriver for HwmonSensor {
    fn num_temps(&self) -> usize {
        1
    }

    fn read_temps(&self, state: &mut TemperatureState) -> Result<(), SensorError> {
        let content = read_file(&self.path)?;
        let millis: i32 = content
            .parse()
            .map_err(|_| parse_error(&self.path, &content))?;
        let temp = (millis / 1000)
            .checked_add(self.correction)
            .ok_or_else(|| parse_error(&self.path, &content))?;
        state.add_temp(temp)
    }
}

/// The thinkpad_acpi thermal file, one line of the form
/// `temperatures:   45 40 -128 ...`.
#[derive(Debug)]
pub struct TpThermalSensor {
    path: PathBuf,
    correction: Vec<i32>,
    num_temps: usize,
}

impl TpThermalSensor {
    /// Reads the file once to learn how many temperatures it provides.
    pub fn new(path: PathBuf, correction: Vec<i32>) -> Result<Self, SensorError> {
        let num_temps = parse_thermal(&path, &read_file(&path)?)?.len();
        if correction.len() > num_temps {
            log::warn!(
                "{}: {} correction values for {} temperatures, ignoring the rest",
                path.display(),
                correction.len(),
                num_temps
            );
        }
        Ok(Self {
            path,
            correction,
            num_temps,
        })
    }
}

fn parse_thermal(path: &Path, content: &str) -> Result<Vec<i32>, SensorError> {
    let fields = content
        .strip_prefix("temperatures:")
        .ok_or_else(|| parse_error(path, content))?;
    fields
        .split_whitespace()
        .map(|f| f.parse().map_err(|_| parse_error(path, content)))
        .collect()
}

impl SensorDriver for TpThermalSensor {
    fn num_temps(&self) -> usize {
        self.num_temps
    }

    fn read_temps(&self, state: &mut TemperatureState) -> Result<(), SensorError> {
        let content = read_file(&self.path)?;
        let temps = parse_thermal(&self.path, &content)?;
        for (idx, temp) in temps.into_iter().enumerate() {
            let temp = temp
                .checked_add(self.correction.get(idx).copied().unwrap_or(0))
                .ok_or_else(|| parse_error(&self.path, &content))?;
            state.add_temp(temp)?;
        }
        Ok(())
    }
}
