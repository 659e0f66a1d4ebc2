use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use regex::Regex;

use crate::{
    error::ConfigError,
    fans::{FanDriver, PwmFan, TpFan},
    level::{FanSpeed, Level, Limits, SPECIAL_LEVELS},
    sensors::{HwmonSensor, SensorDriver, TpThermalSensor},
};

/// Where the config file is looked for unless `-c` says otherwise
pub const DEFAULT_CONFIG: &str = "/etc/thinkfan.conf";

/// Fan used when the config file names none
pub const DEFAULT_FAN: &str = "/proc/acpi/ibm/fan";

/// Sensor used when the config file names none
pub const DEFAULT_SENSOR: &str = "/proc/acpi/ibm/thermal";

/// Polling interval
pub const DEFAULT_SLEEPTIME_S: u64 = 5;

/// Bias level as given on the command line, divided by 10 before use
pub const DEFAULT_BIAS_INPUT: f32 = 5.0;

/// Runtime settings taken from the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    pub sleeptime: Duration,
    pub bias_level: f32,
    pub depulse: Duration,
    /// Sanity warnings are fatal unless this is cleared (`-D`).
    pub chk_sanity: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sleeptime: Duration::from_secs(DEFAULT_SLEEPTIME_S),
            bias_level: DEFAULT_BIAS_INPUT / 10.,
            depulse: Duration::ZERO,
            chk_sanity: true,
        }
    }
}

impl Settings {
    /// Fails with `warning` unless sanity checks are disabled, in which
    /// case it is only logged.
    pub fn sanity<E: fmt::Display>(&self, warning: E) -> Result<(), E> {
        if self.chk_sanity {
            Err(warning)
        } else {
            log::warn!("{}", warning);
            Ok(())
        }
    }
}

/// One generation of sensors, levels and fan. Immutable once built.
pub struct Config {
    sensors: Vec<Box<dyn SensorDriver>>,
    levels: Vec<Level>,
    fan: Box<dyn FanDriver>,
    num_temps: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("sensors", &self.sensors.len())
            .field("levels", &self.levels)
            .field("num_temps", &self.num_temps)
            .finish()
    }
}

impl Config {
    pub fn load(path: &Path, settings: &Settings) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = parse(path, &text, settings)?;
        log::info!(
            "Loaded {}: {} sensor(s), {} temperature(s), {} level(s)",
            path.display(),
            config.sensors.len(),
            config.num_temps,
            config.levels.len()
        );
        Ok(config)
    }

    pub fn sensors(&self) -> &[Box<dyn SensorDriver>] {
        &self.sensors
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn fan(&self) -> &dyn FanDriver {
        self.fan.as_ref()
    }

    pub fn num_temps(&self) -> usize {
        self.num_temps
    }
}

#[derive(Default)]
pub struct ConfigBuilder {
    sensors: Vec<Box<dyn SensorDriver>>,
    levels: Vec<Level>,
    fan: Option<Box<dyn FanDriver>>,
    fans_given: usize,
}

impl ConfigBuilder {
    pub fn sensor(mut self, sensor: Box<dyn SensorDriver>) -> Self {
        self.sensors.push(sensor);
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.levels.push(level);
        self
    }

    pub fn fan(mut self, fan: Box<dyn FanDriver>) -> Self {
        self.fan = Some(fan);
        self.fans_given += 1;
        self
    }

    pub fn build(self, settings: &Settings) -> Result<Config, ConfigError> {
        if self.levels.is_empty() {
            return Err(ConfigError::NoLevels);
        }
        if self.fans_given > 1 {
            settings.sanity(ConfigError::MultipleFans)?;
        }

        let fan: Box<dyn FanDriver> = match self.fan {
            Some(fan) => fan,
            None => {
                log::warn!("No fan specified, using default {}", DEFAULT_FAN);
                Box::new(TpFan::new(PathBuf::from(DEFAULT_FAN), settings))
            }
        };

        let mut sensors = self.sensors;
        if sensors.is_empty() {
            log::warn!("No sensors specified, using default {}", DEFAULT_SENSOR);
            sensors.push(Box::new(TpThermalSensor::new(
                PathBuf::from(DEFAULT_SENSOR),
                Vec::new(),
            )?));
        }
        let num_temps = sensors.iter().map(|s| s.num_temps()).sum();

        for (idx, level) in self.levels.iter().enumerate() {
            check_level(level, num_temps, settings)?;
            if idx > 0 {
                check_consecutive(&self.levels[idx - 1], level, settings)?;
            }
            fan.check_level(level)?;
        }

        Ok(Config {
            sensors,
            levels: self.levels,
            fan,
            num_temps,
        })
    }
}

fn check_level(level: &Level, num_temps: usize, settings: &Settings) -> Result<(), ConfigError> {
    if let Limits::Complex { lower, upper } = &level.limits {
        if lower.len() != upper.len() {
            settings.sanity(ConfigError::LimitLength)?;
        }
        let got = lower.len().min(upper.len());
        if got != num_temps {
            return Err(ConfigError::LevelWidth {
                speed: level.speed.to_string(),
                got,
                expected: num_temps,
            });
        }
    }
    let inverted = level
        .lower_limits()
        .iter()
        .zip(level.upper_limits())
        .any(|(l, u)| l >= u);
    if inverted {
        settings.sanity(ConfigError::LowerNotBelowUpper {
            speed: level.speed.to_string(),
        })?;
    }
    Ok(())
}

fn check_consecutive(prev: &Level, level: &Level, settings: &Settings) -> Result<(), ConfigError> {
    if !prev.speed.is_special() && !level.speed.is_special() {
        if let (Some(a), Some(b)) = (prev.speed.num(), level.speed.num()) {
            if a >= b {
                settings.sanity(ConfigError::LevelOrder)?;
            }
        }
    }
    if prev.upper_limits().len() != level.upper_limits().len() {
        settings.sanity(ConfigError::LimitLength)?;
    }
    let gap = prev
        .upper_limits()
        .iter()
        .zip(level.lower_limits())
        .any(|(u, l)| u < l);
    if gap {
        settings.sanity(ConfigError::LimitGap)?;
    }
    Ok(())
}

struct Patterns {
    fan: Regex,
    sensor: Regex,
    simple: Regex,
    complex: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        fan: Regex::new(r"^(?<kind>tp_fan|pwm_fan)\s+(?<path>\S+)$").unwrap(),
        sensor: Regex::new(r"^(?<kind>hwmon|tp_thermal)\s+(?<path>[^\s(]+)(?:\s*\((?<corr>[^)]*)\))?$")
            .unwrap(),
        simple: Regex::new(r#"^\(\s*(?<speed>"[^"]*"|-?\d+)\s*,\s*(?<lower>-?\d+)\s*,\s*(?<upper>-?\d+)\s*\)$"#)
            .unwrap(),
        complex: Regex::new(
            r#"^\(\s*(?<speed>"[^"]*"|-?\d+)\s*,\s*\((?<lower>[^)]*)\)\s*,\s*\((?<upper>[^)]*)\)\s*\)$"#,
        )
        .unwrap(),
    })
}

/// Parses the line-based config format into a validated `Config`.
pub fn parse(path: &Path, text: &str, settings: &Settings) -> Result<Config, ConfigError> {
    let re = patterns();
    let mut builder = ConfigBuilder::default();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let syntax = || ConfigError::Syntax {
            path: path.to_path_buf(),
            line: idx + 1,
            text: line.to_string(),
        };

        if let Some(c) = re.fan.captures(line) {
            let fan_path = PathBuf::from(&c["path"]);
            builder = match &c["kind"] {
                "tp_fan" => builder.fan(Box::new(TpFan::new(fan_path, settings))),
                _ => builder.fan(Box::new(PwmFan::new(fan_path))),
            };
        } else if let Some(c) = re.sensor.captures(line) {
            let sensor_path = PathBuf::from(&c["path"]);
            let correction = match c.name("corr") {
                Some(m) => parse_ints(m.as_str()).ok_or_else(syntax)?,
                None => Vec::new(),
            };
            builder = match &c["kind"] {
                "hwmon" => {
                    if correction.len() > 1 {
                        return Err(syntax());
                    }
                    let corr = correction.first().copied().unwrap_or(0);
                    builder.sensor(Box::new(HwmonSensor::new(sensor_path, corr)))
                }
                _ => builder.sensor(Box::new(TpThermalSensor::new(sensor_path, correction)?)),
            };
        } else if let Some(c) = re.simple.captures(line) {
            let speed = parse_speed(&c["speed"], settings)?;
            let lower = c["lower"].parse().map_err(|_| syntax())?;
            let upper = c["upper"].parse().map_err(|_| syntax())?;
            builder = builder.level(Level::simple(speed, lower, upper));
        } else if let Some(c) = re.complex.captures(line) {
            let speed = parse_speed(&c["speed"], settings)?;
            let lower = parse_ints(&c["lower"]).ok_or_else(syntax)?;
            let upper = parse_ints(&c["upper"]).ok_or_else(syntax)?;
            builder = builder.level(Level::complex(speed, lower, upper));
        } else {
            return Err(syntax());
        }
    }

    builder.build(settings)
}

fn parse_ints(list: &str) -> Option<Vec<i32>> {
    list.split(',').map(|v| v.trim().parse().ok()).collect()
}

fn parse_speed(token: &str, settings: &Settings) -> Result<FanSpeed, ConfigError> {
    let Some(name) = token.strip_prefix('"').and_then(|t| t.strip_suffix('"')) else {
        return token
            .parse()
            .map(FanSpeed::Numeric)
            .map_err(|_| ConfigError::LevelFormat(token.to_string()));
    };

    if SPECIAL_LEVELS.contains(&name) {
        return Ok(FanSpeed::Named(name.to_string()));
    }
    if let Ok(n) = name.trim().parse() {
        return Ok(FanSpeed::Numeric(n));
    }
    let speed = FanSpeed::Named(name.to_string());
    if speed.num().is_none() {
        settings.sanity(ConfigError::LevelFormat(name.to_string()))?;
    }
    Ok(speed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join("temp1_input"), "45000\n").unwrap();
            fs::write(dir.path().join("temp2_input"), "51000\n").unwrap();
            fs::write(dir.path().join("thermal"), "temperatures:\t40 41 42\n").unwrap();
            Self { dir }
        }

        fn path(&self, name: &str) -> String {
            self.dir.path().join(name).display().to_string()
        }

        fn parse(&self, text: &str, settings: &Settings) -> Result<Config, ConfigError> {
            parse(&self.dir.path().join("thinkfan.conf"), text, settings)
        }
    }

    #[test]
    fn parses_simple_config() {
        let fx = Fixture::new();
        let text = format!(
            "# fan config\n\
             pwm_fan {pwm}\n\
             hwmon {t1}\n\
             hwmon {t2} (5)   # corrected\n\
             \n\
             (0, 0, 55)\n\
             (128, 50, 70)\n\
             (255, 65, 32767)\n",
            pwm = fx.path("pwm1"),
            t1 = fx.path("temp1_input"),
            t2 = fx.path("temp2_input"),
        );
        let config = fx.parse(&text, &Settings::default()).unwrap();
        assert_eq!(config.num_temps(), 2);
        assert_eq!(config.sensors().len(), 2);
        assert_eq!(config.levels().len(), 3);
        assert_eq!(config.levels()[1], Level::simple(FanSpeed::Numeric(128), 50, 70));
    }

    #[test]
    fn parses_complex_levels_and_names() {
        let fx = Fixture::new();
        let text = format!(
            "tp_fan {fan}\n\
             tp_thermal {thermal} (0, 2, 0)\n\
             (0, (0, 0, 0), (50, 52, 54))\n\
             (\"level 2\", (45, 47, 49), (60, 62, 64))\n\
             (\"level full-speed\", (58, 60, 62), (32767, 32767, 32767))\n",
            fan = fx.path("fan"),
            thermal = fx.path("thermal"),
        );
        let config = fx.parse(&text, &Settings::default()).unwrap();
        assert_eq!(config.num_temps(), 3);
        assert_eq!(
            config.levels()[1],
            Level::complex(
                FanSpeed::Named("level 2".into()),
                vec![45, 47, 49],
                vec![60, 62, 64]
            )
        );
        assert!(config.levels()[2].speed.is_special());
    }

    #[test]
    fn quoted_number_becomes_numeric() {
        assert_eq!(
            parse_speed("\"4\"", &Settings::default()).unwrap(),
            FanSpeed::Numeric(4)
        );
        assert!(matches!(
            parse_speed("\"turbo\"", &Settings::default()),
            Err(ConfigError::LevelFormat(_))
        ));
    }

    #[test]
    fn reports_syntax_errors_with_line() {
        let fx = Fixture::new();
        let text = format!("hwmon {}\n(0, 0, 55)\nfrobnicate\n", fx.path("temp1_input"));
        match fx.parse(&text, &Settings::default()) {
            Err(ConfigError::Syntax { line, text, .. }) => {
                assert_eq!(line, 3);
                assert_eq!(text, "frobnicate");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn requires_levels() {
        let fx = Fixture::new();
        let text = format!("pwm_fan {}\nhwmon {}\n", fx.path("pwm1"), fx.path("temp1_input"));
        assert!(matches!(
            fx.parse(&text, &Settings::default()),
            Err(ConfigError::NoLevels)
        ));
    }

    #[test]
    fn sanity_warnings_fail_unless_dangerous() {
        let fx = Fixture::new();
        // levels out of order and a gap between 55 and 60
        let text = format!(
            "pwm_fan {}\nhwmon {}\n(100, 0, 55)\n(50, 60, 32767)\n",
            fx.path("pwm1"),
            fx.path("temp1_input")
        );
        assert!(matches!(
            fx.parse(&text, &Settings::default()),
            Err(ConfigError::LevelOrder)
        ));

        let dangerous = Settings {
            chk_sanity: false,
            ..Settings::default()
        };
        assert_eq!(fx.parse(&text, &dangerous).unwrap().levels().len(), 2);
    }

    #[test]
    fn detects_gaps_between_levels() {
        let fx = Fixture::new();
        let text = format!(
            "pwm_fan {}\nhwmon {}\n(0, 0, 55)\n(50, 60, 32767)\n",
            fx.path("pwm1"),
            fx.path("temp1_input")
        );
        assert!(matches!(
            fx.parse(&text, &Settings::default()),
            Err(ConfigError::LimitGap)
        ));
    }

    #[test]
    fn complex_width_must_match_sensors() {
        let fx = Fixture::new();
        let text = format!(
            "pwm_fan {}\nhwmon {}\n(0, (0, 0), (50, 50))\n",
            fx.path("pwm1"),
            fx.path("temp1_input")
        );
        assert!(matches!(
            fx.parse(&text, &Settings::default()),
            Err(ConfigError::LevelWidth {
                got: 2,
                expected: 1,
                ..
            })
        ));
    }

    #[test]
    fn pwm_fan_needs_numeric_levels() {
        let fx = Fixture::new();
        let text = format!(
            "pwm_fan {}\nhwmon {}\n(\"level auto\", 0, 55)\n",
            fx.path("pwm1"),
            fx.path("temp1_input")
        );
        assert!(matches!(
            fx.parse(&text, &Settings::default()),
            Err(ConfigError::PwmLevel { .. })
        ));
    }

    #[test]
    fn multiple_fans_is_a_sanity_warning() {
        let fx = Fixture::new();
        let text = format!(
            "pwm_fan {}\npwm_fan {}\nhwmon {}\n(0, 0, 55)\n",
            fx.path("pwm1"),
            fx.path("pwm2"),
            fx.path("temp1_input")
        );
        assert!(matches!(
            fx.parse(&text, &Settings::default()),
            Err(ConfigError::MultipleFans)
        ));
    }

    #[test]
    fn load_missing_file() {
        let fx = Fixture::new();
        assert!(matches!(
            Config::load(&fx.dir.path().join("nope.conf"), &Settings::default()),
            Err(ConfigError::Io { .. })
        ));
    }
}
