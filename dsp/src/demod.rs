use super::LoTable;
use core::f64::consts::PI;
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Right shift applied to each sample-coefficient product before it is
/// accumulated.
pub const SHIFT: u32 = 4;

/// Physical input channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    /// Reference input (first sample of each interleaved pair).
    Reference,
    /// Measurement input (second sample of each interleaved pair).
    Sample,
}

/// Which channels are demodulated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capture {
    /// Both channels.
    #[default]
    Dual,
    /// Only one channel. The sums of the other channel are left untouched.
    Single(Channel),
}

impl Capture {
    fn includes(&self, channel: Channel) -> bool {
        match self {
            Self::Dual => true,
            Self::Single(c) => *c == channel,
        }
    }
}

/// Quadrature correlation sums of both channels against one carrier.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    pub reference_sin: i64,
    pub reference_cos: i64,
    pub sample_sin: i64,
    pub sample_cos: i64,
}

impl Correlation {
    fn update(
        &mut self,
        block: &[i32],
        table: &LoTable,
        capture: Capture,
    ) {
        let reference = capture.includes(Channel::Reference);
        let sample = capture.includes(Channel::Sample);
        for (x, [s, c]) in block.chunks_exact(2).zip(table.coefficients()) {
            if reference {
                self.reference_sin += mac(x[0], *s);
                self.reference_cos += mac(x[0], *c);
            }
            if sample {
                self.sample_sin += mac(x[1], *s);
                self.sample_cos += mac(x[1], *c);
            }
        }
    }

    /// Reference angle in half turns.
    pub fn reference_angle(&self) -> f64 {
        (self.reference_sin as f64).atan2(self.reference_cos as f64) / PI
    }

    /// Sample angle in half turns.
    pub fn sample_angle(&self) -> f64 {
        (self.sample_sin as f64).atan2(self.sample_cos as f64) / PI
    }

    /// Angle between the sample and the reference in half turns.
    ///
    /// Computed from the cross terms with a single `atan2()`. This is offset
    /// by a quarter turn from `sample_angle() - reference_angle()`.
    pub fn delta_angle(&self) -> f64 {
        let (rs, rc) = (self.reference_sin as f64, self.reference_cos as f64);
        let (ss, sc) = (self.sample_sin as f64, self.sample_cos as f64);
        -(sc * rc + ss * rs).atan2(ss * rc - sc * rs) / PI
    }

    pub fn reference_amplitude(&self) -> f64 {
        (self.reference_sin as f64).hypot(self.reference_cos as f64)
    }

    pub fn sample_amplitude(&self) -> f64 {
        (self.sample_sin as f64).hypot(self.sample_cos as f64)
    }
}

// Rounding bias, half up
#[inline]
fn mac(x: i32, a: i16) -> i64 {
    (x as i64 * a as i64 + (1 << (SHIFT - 1))) >> SHIFT
}

/// Correlation accumulator for one group of blocks.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accumulator {
    /// Sums against the main carrier.
    pub main: Correlation,
    /// Sums against the side channel carrier.
    pub side: Correlation,
    /// Number of blocks accumulated.
    pub blocks: u32,
}

impl Accumulator {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Demodulate one block of interleaved `[reference, sample]` codes.
    ///
    /// # Args
    /// * `block` - Interleaved samples, two per table entry.
    /// * `table` - Main carrier.
    /// * `side` - Optional side channel carrier.
    /// * `capture` - Channel selection.
    pub fn demodulate(
        &mut self,
        block: &[i32],
        table: &LoTable,
        side: Option<&LoTable>,
        capture: Capture,
    ) {
        self.main.update(block, table, capture);
        if let Some(side) = side {
            self.side.update(block, side, capture);
        }
        self.blocks += 1;
    }
}
