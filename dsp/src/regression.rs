use serde::{Deserialize, Serialize};

/// Minimum number of samples for the least squares fit.
pub const REGRESSION_MIN: u32 = 10;

/// Streaming least squares frequency estimator.
///
/// Fits a line to the unwrapped phase (in turns) against the sample index.
/// The slope is scaled to a frequency by the sample rate of the phase
/// sequence.
#[derive(Copy, Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Regression {
    scale: f64,
    previous: f64,
    n: u32,
    x: f64,
    y: f64,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_xy: f64,
}

impl Regression {
    /// # Args
    /// * `scale` - Rate of the phase samples in Hz.
    pub fn new(scale: f64) -> Self {
        Self {
            scale,
            ..Default::default()
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.scale);
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }

    /// Number of samples added since the last reset.
    pub fn count(&self) -> u32 {
        self.n
    }

    /// Add a phase sample.
    ///
    /// # Args
    /// * `phase` - Raw phase in turns. Steps of more than half a turn
    ///   between consecutive samples are taken as wraps.
    pub fn add(&mut self, phase: f64) {
        if self.n > 0 {
            let mut delta = phase - self.previous;
            if delta > 0.5 {
                delta -= 1.;
            } else if delta < -0.5 {
                delta += 1.;
            }
            self.x += 1.;
            self.y += delta;
            self.sum_x += self.x;
            self.sum_y += self.y;
            self.sum_xx += self.x * self.x;
            self.sum_xy += self.x * self.y;
        }
        self.previous = phase;
        self.n += 1;
    }

    /// Frequency estimate in Hz.
    ///
    /// The least squares slope with at least [REGRESSION_MIN] samples and a
    /// non-degenerate fit, else the total phase advance over the elapsed
    /// samples. Zero if there is nothing to estimate from.
    pub fn finalize(&self) -> f64 {
        if self.n >= REGRESSION_MIN {
            let m = (self.n - 1) as f64;
            let divisor = m * self.sum_xx - self.sum_x * self.sum_x;
            if divisor != 0. {
                return (m * self.sum_xy - self.sum_x * self.sum_y) / divisor
                    * self.scale;
            }
        }
        if self.x == 0. {
            0.
        } else {
            self.y / self.x * self.scale
        }
    }
}
