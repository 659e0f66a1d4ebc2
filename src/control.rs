//! The control loop: poll sensors, pick a level with hysteresis, drive the fan.

use std::{thread, time::Duration};

use crate::{
    config::{Config, Settings},
    error::{ControlError, SensorError},
    level::Level,
    signals,
    temperature::TemperatureState,
};

/// Two preallocated snapshots. One is current, the other holds the
/// previous iteration; `swap` flips which is which.
#[derive(Debug)]
pub struct StatePair {
    slots: [TemperatureState; 2],
    current: usize,
}

impl StatePair {
    pub fn new(num_temps: usize) -> Self {
        Self {
            slots: [
                TemperatureState::new(num_temps),
                TemperatureState::new(num_temps),
            ],
            current: 0,
        }
    }

    pub fn swap(&mut self) {
        self.current ^= 1;
    }

    #[cfg(test)]
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &TemperatureState {
        &self.slots[self.current]
    }

    pub fn previous(&self) -> &TemperatureState {
        &self.slots[self.current ^ 1]
    }

    /// Mutable current slot alongside the read-only previous one.
    pub fn split(&mut self) -> (&mut TemperatureState, &TemperatureState) {
        let (a, b) = self.slots.split_at_mut(1);
        if self.current == 0 {
            (&mut a[0], &b[0])
        } else {
            (&mut b[0], &a[0])
        }
    }

    /// Makes the previous slot an exact copy of the current readings.
    fn prime(&mut self) {
        let snapshot = self.current().clone();
        self.slots[self.current ^ 1].copy_readings_from(&snapshot);
    }
}

/// Outcome of evaluating the level cursor against a fresh snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Up(usize),
    Down(usize),
    Steady,
}

/// First level, scanning up from the bottom, whose ceiling covers `state`.
pub fn initial_level(levels: &[Level], state: &TemperatureState) -> usize {
    let mut idx = 0;
    while idx + 1 < levels.len() && levels[idx].is_exceeded_by(state) {
        idx += 1;
    }
    idx
}

/// Hysteretic step from level `cur`.
///
/// Moves up past every level whose ceiling is reached, or down past every
/// level whose floor is undercut, so a multi-band jump lands in one step.
pub fn next_level(levels: &[Level], cur: usize, state: &TemperatureState) -> Transition {
    if levels[cur].is_exceeded_by(state) {
        let mut idx = cur;
        while idx + 1 < levels.len() && levels[idx].is_exceeded_by(state) {
            idx += 1;
        }
        if idx != cur {
            return Transition::Up(idx);
        }
    } else if levels[cur].is_undercut_by(state) {
        let mut idx = cur;
        while idx > 0 && levels[idx].is_undercut_by(state) {
            idx -= 1;
        }
        if idx != cur {
            return Transition::Down(idx);
        }
    }
    Transition::Steady
}

/// Level cursor and bias handed from one generation to the next when the
/// running config is kept across a reload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resume {
    pub level: usize,
    pub bias: f32,
}

/// State of one control loop generation, borrowed from its `Config`.
pub struct ControlLoop<'a> {
    config: &'a Config,
    settings: &'a Settings,
    states: StatePair,
    cur_lvl: usize,
    tmp_sleeptime: Duration,
}

impl<'a> ControlLoop<'a> {
    /// Primes both snapshots, initialises the fan and sets the starting level.
    #[cfg(test)]
    pub fn start(config: &'a Config, settings: &'a Settings) -> Result<Self, ControlError> {
        Self::resume(config, settings, None)
    }

    /// Like `start`, but continues from `from` instead of scanning for the
    /// initial level. Out of range cursors fall back to the scan.
    pub fn resume(
        config: &'a Config,
        settings: &'a Settings,
        from: Option<Resume>,
    ) -> Result<Self, ControlError> {
        let mut ctl = Self {
            config,
            settings,
            states: StatePair::new(config.num_temps()),
            cur_lvl: 0,
            tmp_sleeptime: settings.sleeptime,
        };

        ctl.poll()?;
        ctl.states.prime();

        config.fan().init()?;
        match from {
            Some(from) if from.level < config.levels().len() => {
                ctl.cur_lvl = from.level;
                ctl.states.split().0.bias = from.bias;
            }
            _ => ctl.cur_lvl = initial_level(config.levels(), ctl.states.current()),
        }
        ctl.log_tstat();
        config.fan().set_speed(ctl.level())?;
        Ok(ctl)
    }

    pub fn level(&self) -> &'a Level {
        &self.config.levels()[self.cur_lvl]
    }

    #[cfg(test)]
    pub fn level_index(&self) -> usize {
        self.cur_lvl
    }

    #[cfg(test)]
    pub fn states(&self) -> &StatePair {
        &self.states
    }

    #[cfg(test)]
    pub fn tmp_sleeptime(&self) -> Duration {
        self.tmp_sleeptime
    }

    /// Reads every sensor into the current snapshot.
    fn poll(&mut self) -> Result<(), ControlError> {
        let expected = self.config.num_temps();
        let (current, _) = self.states.split();
        current.restart();
        for sensor in self.config.sensors() {
            sensor.read_temps(current).map_err(|e| match e {
                SensorError::Overflow { capacity } => ControlError::SensorLost {
                    expected: capacity,
                    got: capacity + 1,
                },
                e => e.into(),
            })?;
        }
        if !current.is_complete() {
            return Err(ControlError::SensorLost {
                expected,
                got: current.filled(),
            });
        }
        Ok(())
    }

    /// Swap, poll and move the level cursor. No sleeping.
    pub fn step(&mut self) -> Result<Transition, ControlError> {
        self.states.swap();
        let (current, previous) = self.states.split();
        current.bias = previous.bias;

        self.poll()?;
        let (current, previous) = self.states.split();
        current.apply_spike_bias(previous.tmax(), self.settings.bias_level);

        let transition = next_level(self.config.levels(), self.cur_lvl, self.states.current());
        match transition {
            Transition::Up(idx) => {
                self.cur_lvl = idx;
                self.log_tstat();
                self.config.fan().set_speed(self.level())?;
            }
            Transition::Down(idx) => {
                self.cur_lvl = idx;
                self.log_tstat();
                self.config.fan().set_speed(self.level())?;
                self.tmp_sleeptime = self.settings.sleeptime;
            }
            Transition::Steady => self.config.fan().ping_watchdog_and_depulse(self.level())?,
        }
        Ok(transition)
    }

    /// One full iteration: step, sleep, then let the bias decay.
    pub fn iterate(&mut self) -> Result<Transition, ControlError> {
        let transition = self.step()?;
        thread::sleep(self.settings.sleeptime);
        let (current, _) = self.states.split();
        current.decay_bias(self.settings.bias_level);
        Ok(transition)
    }

    /// Cursor and bias to carry into a restarted generation.
    pub fn snapshot(&self) -> Resume {
        Resume {
            level: self.cur_lvl,
            bias: self.states.current().bias,
        }
    }

    pub fn report_tstat(&self) -> String {
        self.states.current().report()
    }

    fn log_tstat(&self) {
        let current = self.states.current();
        log::debug!(
            "sleeptime={}, tmax={}, last_tmax={}, biased_tmax={:.1} -> {}",
            self.tmp_sleeptime.as_secs(),
            current.tmax(),
            self.states.previous().tmax(),
            current.b_tmax(),
            self.level()
        );
    }
}

/// Runs one generation of the control loop until an interrupt is pending.
/// The fan is left at its last commanded level.
pub fn run(
    config: &Config,
    settings: &Settings,
    from: Option<Resume>,
) -> Result<Resume, ControlError> {
    let mut ctl = ControlLoop::resume(config, settings, from)?;
    while signals::pending().is_none() {
        if signals::take_report_request() {
            log::info!("{}", ctl.report_tstat());
        }
        ctl.iterate()?;
    }
    Ok(ctl.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::FanSpeed;

    fn levels() -> Vec<Level> {
        vec![
            Level::simple(FanSpeed::Numeric(10), i32::MIN, 50),
            Level::simple(FanSpeed::Numeric(50), 50, 70),
            Level::simple(FanSpeed::Numeric(100), 70, i32::MAX),
        ]
    }

    fn state(tmax: i32, bias: f32) -> TemperatureState {
        let mut state = TemperatureState::new(1);
        state.add_temp(tmax).unwrap();
        state.bias = bias;
        state
    }

    #[test]
    fn pair_swaps_by_index() {
        let mut pair = StatePair::new(1);
        assert_eq!(pair.current_index(), 0);
        pair.split().0.add_temp(42).unwrap();
        pair.swap();
        assert_eq!(pair.current_index(), 1);
        assert_eq!(pair.previous().temps(), &[42]);
        pair.swap();
        assert_eq!(pair.current().temps(), &[42]);
    }

    #[test]
    fn prime_copies_readings_only() {
        let mut pair = StatePair::new(2);
        {
            let (current, _) = pair.split();
            current.add_temp(40).unwrap();
            current.add_temp(45).unwrap();
        }
        pair.prime();
        assert_eq!(pair.previous().temps(), &[40, 45]);
        assert_eq!(pair.previous().tmax(), 45);
        assert_eq!(pair.previous().bias, 0.);
    }

    #[test]
    fn initial_level_scans_up() {
        assert_eq!(initial_level(&levels(), &state(20, 0.)), 0);
        assert_eq!(initial_level(&levels(), &state(60, 0.)), 1);
        assert_eq!(initial_level(&levels(), &state(95, 0.)), 2);
    }

    #[test]
    fn jumps_several_bands_at_once() {
        assert_eq!(next_level(&levels(), 0, &state(90, 0.)), Transition::Up(2));
        assert_eq!(next_level(&levels(), 2, &state(30, 0.)), Transition::Down(0));
    }

    #[test]
    fn steady_inside_band() {
        assert_eq!(next_level(&levels(), 1, &state(60, 0.)), Transition::Steady);
        // top level cannot go further up
        assert_eq!(next_level(&levels(), 2, &state(i32::MAX, 1.)), Transition::Steady);
        assert_eq!(next_level(&levels(), 0, &state(-40, 0.)), Transition::Steady);
    }

    #[test]
    fn overlapping_bands_hold_level() {
        let levels = vec![
            Level::simple(FanSpeed::Numeric(0), 0, 55),
            Level::simple(FanSpeed::Numeric(1), 50, 65),
            Level::simple(FanSpeed::Numeric(2), 60, 32767),
        ];
        let mut cur = 0;
        let mut trace = Vec::new();
        for t in [54, 56, 52, 51, 49, 54] {
            if let Transition::Up(i) | Transition::Down(i) = next_level(&levels, cur, &state(t, 0.)) {
                cur = i;
            }
            trace.push(cur);
        }
        assert_eq!(trace, vec![0, 1, 1, 1, 0, 0]);
    }

    #[test]
    fn bias_pushes_level_up() {
        assert_eq!(next_level(&levels(), 0, &state(45, 6.)), Transition::Up(1));
    }

    #[test]
    fn monotonic_under_rising_and_falling_temps() {
        let lv = levels();
        let mut cur = 0;
        let mut last = cur;
        for t in (0..120).step_by(3) {
            if let Transition::Up(i) | Transition::Down(i) = next_level(&lv, cur, &state(t, 0.)) {
                cur = i;
            }
            assert!(cur >= last);
            last = cur;
        }
        for t in (0..120).rev().step_by(3) {
            if let Transition::Up(i) | Transition::Down(i) = next_level(&lv, cur, &state(t, 0.)) {
                cur = i;
            }
            assert!(cur <= last);
            last = cur;
        }
        assert_eq!(cur, 0);
    }
}
