use serde::{Deserialize, Serialize};

/// Wrap a phase into the half open interval (-1, 1].
///
/// Phases are in half turns. Non-finite inputs map to zero.
pub fn wrap(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.;
    }
    let mut r = (1. - x) % 2.;
    if r < 0. {
        r += 2.;
    }
    // `r` may round up to the modulus
    if r >= 2. {
        r = 0.;
    }
    1. - r
}

/// Phase unwrapper.
///
/// Tracks a continuous phase trajectory through the half turn wrapped
/// samples of a sequence.
#[derive(Copy, Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Unwrapper {
    // last output
    y: f64,
}

impl Unwrapper {
    /// Unwrap a new sample from a phase sequence and update the
    /// unwrapper state.
    ///
    /// Args:
    /// * `x`: New phase sample
    ///
    /// Returns:
    /// The representative of `x` (modulo a full turn) closest to the
    /// previous output.
    pub fn update(&mut self, x: f64) -> f64 {
        self.y += wrap(x - self.y);
        self.y
    }

    /// The current unwrapped phase.
    pub fn phase(&self) -> f64 {
        self.y
    }
}
