use crate::error::SensorError;

/// Below any reading a sensor can report.
pub const TMAX_SENTINEL: i32 = -128;

/// Temperature jump (degrees per poll) above which a spike bias is applied.
pub const SPIKE_THRESHOLD: i32 = 2;

/// Decay fraction used where `bias_level / 2` would not shrink the bias.
pub const MIN_DECAY_FRACTION: f32 = 0.1;

/// Snapshot of one poll over all configured sensors.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureState {
    temps: Vec<i32>,
    cursor: usize,
    tmax: i32,
    pub bias: f32,
}

impl TemperatureState {
    pub fn new(num_temps: usize) -> Self {
        Self {
            temps: vec![TMAX_SENTINEL; num_temps],
            cursor: 0,
            tmax: TMAX_SENTINEL,
            bias: 0.,
        }
    }

    /// Rewinds the write cursor and forgets the previous maximum.
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.tmax = TMAX_SENTINEL;
    }

    /// Called by sensor drivers, once per temperature they provide.
    pub fn add_temp(&mut self, temp: i32) -> Result<(), SensorError> {
        let capacity = self.temps.len();
        let slot = self
            .temps
            .get_mut(self.cursor)
            .ok_or(SensorError::Overflow { capacity })?;
        *slot = temp;
        self.cursor += 1;
        self.tmax = self.tmax.max(temp);
        Ok(())
    }

    pub fn temps(&self) -> &[i32] {
        &self.temps
    }

    /// Number of temperatures written since the last restart.
    pub fn filled(&self) -> usize {
        self.cursor
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == self.temps.len()
    }

    pub fn tmax(&self) -> i32 {
        self.tmax
    }

    pub fn b_tmax(&self) -> f32 {
        self.tmax as f32 + self.bias
    }

    /// Copies readings and cursor position from `other`, keeping our own bias.
    pub fn copy_readings_from(&mut self, other: &TemperatureState) {
        self.temps.clone_from(&other.temps);
        self.cursor = other.cursor;
        self.tmax = other.tmax;
    }

    /// Raises the bias after a sudden temperature increase.
    pub fn apply_spike_bias(&mut self, last_tmax: i32, bias_level: f32) {
        let diff = self.tmax - last_tmax;
        if diff > SPIKE_THRESHOLD {
            let spike = diff as f32 * bias_level;
            if spike > self.bias {
                self.bias = spike;
            }
        }
    }

    pub fn decay_bias(&mut self, bias_level: f32) {
        self.bias = decay_bias(self.bias, bias_level);
    }

    pub fn report(&self) -> String {
        let temps: Vec<String> = self.temps.iter().map(|t| t.to_string()).collect();
        format!("Current temperatures: {}", temps.join(", "))
    }
}

/// One step of returning `bias` to zero.
///
/// Magnitudes below 0.5 snap to zero. A positive bias shrinks by
/// `bias / 2 * bias_level`, with the fraction capped at 1 and replaced by
/// `MIN_DECAY_FRACTION` when `bias_level <= 0`. A negative bias shrinks by
/// the same fraction, never less than `MIN_DECAY_FRACTION`, so it moves
/// toward zero instead of away from it.
pub fn decay_bias(bias: f32, bias_level: f32) -> f32 {
    let fraction = bias_level / 2.;
    let fraction = if fraction > 0. {
        fraction.min(1.)
    } else {
        MIN_DECAY_FRACTION
    };
    if bias > 0. {
        if bias < 0.5 {
            0.
        } else {
            bias - bias * fraction
        }
    } else if bias < 0. {
        if bias > -0.5 {
            0.
        } else {
            bias - bias * fraction.max(MIN_DECAY_FRACTION)
        }
    } else {
        bias
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(temps: &[i32]) -> TemperatureState {
        let mut state = TemperatureState::new(temps.len());
        state.restart();
        for &t in temps {
            state.add_temp(t).unwrap();
        }
        state
    }

    #[test]
    fn tracks_running_max() {
        let state = filled(&[41, 57, 49]);
        assert_eq!(state.tmax(), 57);
        assert!(state.is_complete());
        assert_eq!(state.temps(), &[41, 57, 49]);
    }

    #[test]
    fn restart_resets_cursor_and_max() {
        let mut state = filled(&[60, 70]);
        state.restart();
        assert_eq!(state.filled(), 0);
        assert_eq!(state.tmax(), TMAX_SENTINEL);
        assert!(!state.is_complete());
    }

    #[test]
    fn overflow_is_reported() {
        let mut state = filled(&[30]);
        match state.add_temp(31) {
            Err(SensorError::Overflow { capacity }) => assert_eq!(capacity, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn biased_tmax() {
        let mut state = filled(&[50, 52]);
        state.bias = 3.5;
        assert_eq!(state.b_tmax(), 55.5);
    }

    #[test]
    fn spike_bias_only_on_large_jumps() {
        let mut state = filled(&[52]);
        state.apply_spike_bias(50, 0.5);
        assert_eq!(state.bias, 0.);

        state.apply_spike_bias(40, 0.5);
        assert_eq!(state.bias, 6.);

        // never lowers an existing bias
        state.apply_spike_bias(48, 0.5);
        assert_eq!(state.bias, 6.);
    }

    #[test]
    fn decay_snaps_small_values() {
        assert_eq!(decay_bias(0.49, 0.5), 0.);
        assert_eq!(decay_bias(-0.49, 0.5), 0.);
        assert_eq!(decay_bias(0., 0.5), 0.);
    }

    #[test]
    fn decay_follows_bias_level() {
        assert_eq!(decay_bias(8., 0.5), 6.);
        assert_eq!(decay_bias(-8., 0.5), -6.);
        assert_eq!(decay_bias(8., 1.), 4.);
    }

    #[test]
    fn decay_uses_plain_rate_for_small_levels() {
        assert!((decay_bias(10., 0.1) - 9.5).abs() < 1e-5);
        assert!((decay_bias(10., 2.) - 0.).abs() < 1e-5);
        // negative biases keep the minimum rate
        assert!((decay_bias(-10., 0.1) + 9.).abs() < 1e-5);
        // non-positive levels still converge
        assert!((decay_bias(10., 0.) - 9.).abs() < 1e-5);
        assert!((decay_bias(10., -1.) - 9.).abs() < 1e-5);
    }

    #[test]
    fn decay_converges_without_sign_change() {
        for &level in &[-1.0f32, -0.5, 0., 0.1, 0.5, 1., 2., 2.5, 3.] {
            for &start in &[0.7f32, 3., 45., -0.7, -3., -45.] {
                let mut bias = start;
                let mut steps = 0;
                while bias != 0. {
                    let next = decay_bias(bias, level);
                    assert!(next == 0. || next.signum() == start.signum());
                    assert!(next.abs() < bias.abs());
                    bias = next;
                    steps += 1;
                    assert!(steps < 1000, "no convergence for {} at {}", start, level);
                }
            }
        }
    }

    #[test]
    fn report_lists_all_temps() {
        let state = filled(&[45, 0, 51]);
        assert_eq!(state.report(), "Current temperatures: 45, 0, 51");
    }
}
