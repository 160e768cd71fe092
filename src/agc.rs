//! Automatic gain control
//!
//! Steers the codec input gains so that both channels sit near a target
//! level. Gains are in half dB steps.

/// Target ADC level in dBFS.
pub const TARGET_LEVEL: f32 = -30.;

/// Maximum codec gain in half dB steps.
pub const GAIN_MAX: u8 = 90;

/// Gain changes of this many steps or less are not applied.
const HYSTERESIS: u8 = 2;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Agc {
    target: f32,
    gains: [u8; 2],
}

impl Default for Agc {
    fn default() -> Self {
        Self::new(TARGET_LEVEL)
    }
}

impl Agc {
    pub fn new(target: f32) -> Self {
        Self {
            target,
            gains: [0; 2],
        }
    }

    /// Current reference and sample channel gains.
    pub fn gains(&self) -> [u8; 2] {
        self.gains
    }

    /// Update the gains with the measured ADC levels.
    ///
    /// # Args
    /// * `levels` - Reference and sample levels in dBFS as seen by the ADC
    ///   (including the current gain).
    ///
    /// # Returns
    /// The new gains if either channel changed by more than the hysteresis.
    pub fn update(&mut self, levels: [f32; 2]) -> Option<[u8; 2]> {
        let mut gains = self.gains;
        for (gain, level) in gains.iter_mut().zip(levels) {
            if !level.is_finite() {
                continue;
            }
            let g = *gain as f32 - 2. * (level - self.target);
            *gain = g.clamp(0., GAIN_MAX as f32) as u8;
        }
        let changed = gains
            .iter()
            .zip(self.gains)
            .any(|(new, old)| new.abs_diff(old) > HYSTERESIS);
        if changed {
            log::debug!("AGC gains {:?} -> {:?}", self.gains, gains);
            self.gains = gains;
            Some(gains)
        } else {
            None
        }
    }
}
