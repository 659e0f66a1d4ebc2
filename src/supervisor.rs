use crate::{
    config::{Config, Settings},
    control,
    error::{ConfigError, Error},
    signals::{self, Interrupt},
};

/// Runs control loop generations until termination.
///
/// A reload request ends the current generation; the new config only
/// replaces the running one if it loads successfully. A kept config resumes
/// at the level and bias it had.
pub fn supervise<L>(mut load: L, settings: &Settings) -> Result<(), Error>
where
    L: FnMut() -> Result<Config, ConfigError>,
{
    let mut config = load()?;
    let mut resume = None;
    loop {
        let last = control::run(&config, settings, resume.take())?;
        match signals::take() {
            Some(Interrupt::Reload) => {
                log::info!("Received SIGHUP: reloading config...");
                match load() {
                    Ok(new_config) => config = new_config,
                    Err(err) => {
                        log::error!("{}", err);
                        log::error!("Error reloading config, keeping the old one.");
                        resume = Some(last);
                    }
                }
            }
            Some(Interrupt::Fault) => {
                return Err(Error::Bug("fatal fault signal received".to_string()));
            }
            _ => break,
        }
    }
    log::info!("Terminating.");
    Ok(())
}
