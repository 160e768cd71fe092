//! Frequency lock
//!
//! A proportional controller that retunes the external synthesizer after
//! each sweep point to cancel the measured delta frequency.
use miniconf::Tree;
use num_traits::Float;

use crate::{Error, Synthesizer};

#[derive(Copy, Clone, Debug, Tree)]
pub struct LockSettings {
    /// Enable the frequency lock.
    pub enabled: bool,

    /// Nominal synthesizer frequency in Hz.
    pub frequency: u64,

    /// Proportional gain (Hz of correction per Hz of delta frequency).
    pub gain: f32,

    /// Both channel levels must exceed this (dBFS) for the lock to act.
    pub min_level: f32,

    /// Delta frequency errors below this many cycles per dwell are ignored.
    pub deadband: f32,

    /// Maximum correction change per sweep point in Hz.
    pub max_step: f32,

    /// Maximum absolute correction in Hz.
    pub max_correction: f32,

    /// Correction changes smaller than this (Hz) are not applied.
    pub min_step: f32,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: 10_000_000,
            gain: 1.,
            min_level: -70.,
            deadband: 0.05,
            max_step: 1_000.,
            max_correction: 30_000.,
            min_step: 0.5,
        }
    }
}

/// Outcome of a lock update.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LockAction {
    /// No retuning.
    Hold,
    /// Levels below the floor: the correction was reset to zero.
    Reset,
    /// The synthesizer was retuned with the new correction (Hz).
    Corrected(f32),
}

#[derive(Clone, Debug)]
pub struct FrequencyLock {
    settings: LockSettings,
    correction: f32,
}

impl FrequencyLock {
    pub fn new(settings: LockSettings) -> Self {
        Self {
            settings,
            correction: 0.,
        }
    }

    /// Replace the settings. The correction is kept within the new bounds.
    pub fn set_settings(&mut self, settings: LockSettings) {
        self.settings = settings;
        let max = settings.max_correction.abs();
        self.correction = self.correction.clamp(-max, max);
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// Current synthesizer frequency correction in Hz.
    pub fn correction(&self) -> f32 {
        self.correction
    }

    /// Update the lock with a finished sweep point.
    ///
    /// # Args
    /// * `levels` - Reference and sample levels in dBFS.
    /// * `delta_frequency` - Measured delta frequency in Hz.
    /// * `dwell` - Dwell duration of the point in seconds.
    /// * `synthesizer` - Synthesizer to retune.
    ///
    /// # Returns
    /// The action taken or an error if the synthesizer rejected the new
    /// frequency. The correction is unchanged on error.
    pub fn update<S: Synthesizer>(
        &mut self,
        levels: [f32; 2],
        delta_frequency: f32,
        dwell: f32,
        synthesizer: &mut S,
    ) -> Result<LockAction, Error> {
        let s = &self.settings;
        if !s.enabled {
            return Ok(LockAction::Hold);
        }

        if levels.iter().any(|l| !(*l > s.min_level)) {
            if self.correction == 0. {
                return Ok(LockAction::Hold);
            }
            self.retune(0., synthesizer)?;
            return Ok(LockAction::Reset);
        }

        if !delta_frequency.is_finite()
            || (delta_frequency * dwell).abs() < s.deadband
        {
            return Ok(LockAction::Hold);
        }

        let max_step = s.max_step.abs();
        let max_correction = s.max_correction.abs();
        let step = (-s.gain * delta_frequency).clamp(-max_step, max_step);
        let correction =
            (self.correction + step).clamp(-max_correction, max_correction);
        if (correction - self.correction).abs() < s.min_step {
            return Ok(LockAction::Hold);
        }
        self.retune(correction, synthesizer)?;
        Ok(LockAction::Corrected(correction))
    }

    fn retune<S: Synthesizer>(
        &mut self,
        correction: f32,
        synthesizer: &mut S,
    ) -> Result<(), Error> {
        let frequency = (self.settings.frequency as f64 + correction as f64)
            .round()
            .max(0.) as u64;
        if synthesizer.set_frequency(frequency) {
            self.correction = correction;
            Ok(())
        } else {
            Err(Error::Synthesizer { frequency })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Synth {
        frequency: Option<u64>,
        fail: bool,
    }

    impl Synthesizer for Synth {
        fn set_frequency(&mut self, frequency: u64) -> bool {
            if self.fail {
                return false;
            }
            self.frequency = Some(frequency);
            true
        }
    }

    fn lock() -> FrequencyLock {
        FrequencyLock::new(LockSettings {
            enabled: true,
            frequency: 1_000_000,
            gain: 0.5,
            max_step: 20.,
            max_correction: 50.,
            ..Default::default()
        })
    }

    const LEVELS: [f32; 2] = [-10., -20.];

    #[test]
    fn disabled() {
        let mut l = FrequencyLock::new(LockSettings::default());
        let mut s = Synth::default();
        assert_eq!(l.update(LEVELS, 10., 1., &mut s), Ok(LockAction::Hold));
        assert_eq!(s.frequency, None);
    }

    #[test]
    fn deadband() {
        let mut l = lock();
        let mut s = Synth::default();
        // 0.4 Hz over 0.1 s is 0.04 cycles
        assert_eq!(l.update(LEVELS, 0.4, 0.1, &mut s), Ok(LockAction::Hold));
        assert_eq!(s.frequency, None);
        assert_eq!(
            l.update(LEVELS, f32::NAN, 0.1, &mut s),
            Ok(LockAction::Hold)
        );
    }

    #[test]
    fn proportional() {
        let mut l = lock();
        let mut s = Synth::default();
        assert_eq!(
            l.update(LEVELS, 10., 0.1, &mut s),
            Ok(LockAction::Corrected(-5.))
        );
        assert_eq!(s.frequency, Some(999_995));
        // Step limit
        assert_eq!(
            l.update(LEVELS, 100., 0.1, &mut s),
            Ok(LockAction::Corrected(-25.))
        );
        // Absolute limit
        l.update(LEVELS, 100., 0.1, &mut s).unwrap();
        assert_eq!(
            l.update(LEVELS, 100., 0.1, &mut s),
            Ok(LockAction::Corrected(-50.))
        );
        assert_eq!(
            l.update(LEVELS, 100., 0.1, &mut s),
            Ok(LockAction::Hold)
        );
        assert_eq!(l.correction(), -50.);
        assert_eq!(s.frequency, Some(999_950));
    }

    #[test]
    fn min_step() {
        let mut l = lock();
        let mut s = Synth::default();
        // 0.8 Hz over 1 s is outside the deadband, the step is not.
        assert_eq!(l.update(LEVELS, 0.8, 1., &mut s), Ok(LockAction::Hold));
        assert_eq!(s.frequency, None);
    }

    #[test]
    fn floor() {
        let mut l = lock();
        let mut s = Synth::default();
        l.update(LEVELS, 10., 0.1, &mut s).unwrap();
        assert_eq!(
            l.update([-80., -10.], 10., 0.1, &mut s),
            Ok(LockAction::Reset)
        );
        assert_eq!(l.correction(), 0.);
        assert_eq!(s.frequency, Some(1_000_000));
        assert_eq!(
            l.update([-10., f32::NAN], 10., 0.1, &mut s),
            Ok(LockAction::Hold)
        );
    }

    #[test]
    fn failure() {
        let mut l = lock();
        let mut s = Synth {
            fail: true,
            ..Default::default()
        };
        assert_eq!(
            l.update(LEVELS, 10., 0.1, &mut s),
            Err(Error::Synthesizer { frequency: 999_995 })
        );
        assert_eq!(l.correction(), 0.);
    }
}
