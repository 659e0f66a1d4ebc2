use std::fmt;

use crate::temperature::TemperatureState;

/// Speed names that carry no ordering number.
pub const SPECIAL_LEVELS: &[&str] = &["level auto", "level disengaged", "level full-speed"];

/// What a level asks the fan to do. The meaning is up to the fan driver.
#[derive(Debug, Clone, PartialEq)]
pub enum FanSpeed {
    Numeric(i32),
    Named(String),
}

impl FanSpeed {
    /// Ordering key used to check that levels ascend, if the speed has one.
    pub fn num(&self) -> Option<i32> {
        match self {
            FanSpeed::Numeric(n) => Some(*n),
            FanSpeed::Named(name) => name
                .strip_prefix("level ")
                .and_then(|n| n.trim().parse().ok()),
        }
    }

    pub fn is_special(&self) -> bool {
        matches!(self, FanSpeed::Named(name) if SPECIAL_LEVELS.contains(&name.as_str()))
    }
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanSpeed::Numeric(n) => write!(f, "level {}", n),
            FanSpeed::Named(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Limits {
    /// One band compared against the biased maximum temperature.
    Simple { lower: i32, upper: i32 },
    /// One band per temperature index, compared against the raw readings.
    Complex { lower: Vec<i32>, upper: Vec<i32> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub speed: FanSpeed,
    pub limits: Limits,
}

impl Level {
    pub fn simple(speed: FanSpeed, lower: i32, upper: i32) -> Self {
        Self {
            speed,
            limits: Limits::Simple { lower, upper },
        }
    }

    pub fn complex(speed: FanSpeed, lower: Vec<i32>, upper: Vec<i32>) -> Self {
        Self {
            speed,
            limits: Limits::Complex { lower, upper },
        }
    }

    pub fn lower_limits(&self) -> &[i32] {
        match &self.limits {
            Limits::Simple { lower, .. } => std::slice::from_ref(lower),
            Limits::Complex { lower, .. } => lower,
        }
    }

    pub fn upper_limits(&self) -> &[i32] {
        match &self.limits {
            Limits::Simple { upper, .. } => std::slice::from_ref(upper),
            Limits::Complex { upper, .. } => upper,
        }
    }

    /// True when the state has reached this level's ceiling and a higher
    /// level is needed.
    pub fn is_exceeded_by(&self, state: &TemperatureState) -> bool {
        match &self.limits {
            Limits::Simple { upper, .. } => state.b_tmax() >= *upper as f32,
            Limits::Complex { upper, .. } => {
                state.temps().iter().zip(upper).any(|(t, u)| t >= u)
            }
        }
    }

    /// True when the state has dropped below this level's floor and a
    /// lower level would do.
    pub fn is_undercut_by(&self, state: &TemperatureState) -> bool {
        match &self.limits {
            Limits::Simple { lower, .. } => state.b_tmax() < *lower as f32,
            Limits::Complex { lower, .. } => {
                state.temps().iter().zip(lower).all(|(t, l)| t < l)
            }
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.speed, f)
    }
}
