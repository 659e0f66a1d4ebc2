mod config;
mod control;
mod error;
mod fans;
mod level;
mod sensors;
mod signals;
mod supervisor;
mod temperature;
mod util;

use std::{path::PathBuf, process, time::Duration};

use clap::Parser;

use config::{Config, Settings};
use error::Error;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const MSG_BUG: &str = "This is probably a bug. Please report it together with the messages above.";

/// Hysteretic fan control daemon
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Config file
    #[arg(short, long, default_value = config::DEFAULT_CONFIG)]
    config: PathBuf,

    /// Seconds between temperature polls
    #[arg(short, long, default_value_t = config::DEFAULT_SLEEPTIME_S as i64, allow_hyphen_values = true)]
    sleeptime: i64,

    /// How strongly sudden temperature rises bias the reading, -10 to 30
    #[arg(short, long, default_value_t = config::DEFAULT_BIAS_INPUT, allow_hyphen_values = true)]
    bias: f32,

    /// Briefly disengage the fan for this many seconds on every idle poll
    #[arg(short = 'p', long, num_args = 0..=1, default_missing_value = "0.5", allow_hyphen_values = true)]
    depulse: Option<f32>,

    /// DANGEROUS: only warn about insane settings instead of refusing them
    #[arg(short = 'D', long)]
    dangerous: bool,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Log every level change
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn settings(&self) -> Result<Settings, Error> {
        let mut settings = Settings {
            chk_sanity: !self.dangerous,
            ..Settings::default()
        };

        if self.sleeptime < 0 {
            return Err(Error::Invocation("Negative sleep time? Seriously?".to_string()));
        }
        if self.sleeptime > 15 {
            settings.sanity(Error::Invocation(format!(
                "Sleep time {}s is above 15s, temperature changes may be missed",
                self.sleeptime
            )))?;
        } else if self.sleeptime < 1 {
            settings.sanity(Error::Invocation(format!(
                "Sleep time {}s is below 1s, this causes high load",
                self.sleeptime
            )))?;
        }
        settings.sleeptime = Duration::from_secs(self.sleeptime as u64);

        if !self.bias.is_finite() {
            return Err(Error::Invocation(format!("invalid bias level {}", self.bias)));
        }
        if !(-10. ..=30.).contains(&self.bias) {
            settings.sanity(Error::Invocation(format!(
                "Bias level {} is outside of [-10, 30]",
                self.bias
            )))?;
        }
        settings.bias_level = self.bias / 10.;

        if let Some(depulse) = self.depulse {
            if !depulse.is_finite() || depulse < 0. {
                return Err(Error::Invocation(format!("invalid depulse delay {}", depulse)));
            }
            if depulse > 10. {
                settings.sanity(Error::Invocation(format!(
                    "Depulse delay {}s is above 10s",
                    depulse
                )))?;
            }
            settings.depulse = Duration::try_from_secs_f32(depulse).map_err(|err| {
                Error::Invocation(format!("invalid depulse delay {}: {}", depulse, err))
            })?;
        }

        Ok(settings)
    }

    fn log_filter(&self) -> &'static str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

/// Parses the command line. Help and version output exit right away;
/// every other parse failure is an invocation error.
fn parse_args<I, T>(args: I) -> Result<Cli, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|err| {
        if !err.use_stderr() {
            err.exit();
        }
        Error::Invocation(err.to_string().trim_end().to_string())
    })
}

fn main() {
    let cli = match parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(err.exit_code());
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .init();

    std::panic::set_hook(Box::new(|info| {
        log::error!("{}", info);
        log::error!("{}", MSG_BUG);
        log::logger().flush();
        process::exit(2);
    }));

    log::info!("Starting ({})...", VERSION);

    if let Err(err) = run(&cli) {
        log::error!("{}", err);
        if let Error::Bug(_) = err {
            log::error!("{}", MSG_BUG);
        }
        log::logger().flush();
        process::exit(err.exit_code());
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    let settings = cli.settings()?;
    if !settings.depulse.is_zero() {
        log::info!(
            "Depulsing fan for {:.1}s every {}s",
            settings.depulse.as_secs_f32(),
            settings.sleeptime.as_secs()
        );
    }

    signals::install()?;
    supervisor::supervise(|| Config::load(&cli.config, &settings), &settings)
}
