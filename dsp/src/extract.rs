use super::{wrap, Accumulator, Correlation, Regression, Unwrapper, SHIFT};
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Dwell length above which the delta frequency is estimated by regression.
pub const REGRESSION_TAU: u32 = 10;

/// Side channel bias change (half turns) above which the bias is replaced
/// instead of averaged.
const SIDE_SNAP: f64 = 0.001;

/// Measurement window geometry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// ADC sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per channel in a block.
    pub samples: u32,
    /// Blocks correlated per group.
    pub bandwidth: u32,
    /// Blocks skipped after each group.
    pub overhead: u32,
    /// Groups per dwell.
    pub tau: u32,
    /// Phase averaging depth divisor.
    pub decimation: u32,
}

impl Window {
    /// Number of groups averaged for phase.
    pub fn decimated_tau(&self) -> u32 {
        (self.tau / self.decimation.max(1)).max(1)
    }

    /// Group rate in Hz.
    pub fn group_rate(&self) -> f64 {
        self.sample_rate as f64
            / (self.bandwidth.saturating_add(self.overhead).max(1) as f64
                * self.samples.max(1) as f64)
    }

    /// Dwell duration in seconds.
    pub fn dwell(&self) -> f64 {
        self.tau as f64 / self.group_rate()
    }
}

/// Finished dwell measurement.
///
/// Phases are wrapped half turns, frequencies are in Hz and amplitudes are
/// relative to ADC full scale.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Gamma {
    pub reference_phase: f32,
    pub delta_phase: f32,
    pub reference_frequency: f32,
    pub sample_frequency: f32,
    pub delta_frequency: f32,
    pub side_phase: Option<f32>,
    /// Reference and sample amplitudes of the last group.
    pub amplitudes: [f32; 2],
}

/// Convert an amplitude relative to full scale to dBFS.
pub fn level(amplitude: f32) -> f32 {
    20. * amplitude.max(1e-10).log10()
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Track {
    // Kept across dwells, cleared on discontinuities.
    last: Option<f64>,
    unwrapper: Unwrapper,
    sum: f64,
    increments: f64,
    steps: u32,
}

impl Track {
    fn update(&mut self, angle: f64, average: bool) {
        if let Some(last) = self.last {
            self.increments += wrap(angle - last);
            self.steps += 1;
        }
        self.last = Some(angle);
        let angle = self.unwrapper.update(angle);
        if average {
            self.sum += angle;
        }
    }

    fn reset(&mut self) {
        *self = Self {
            last: self.last,
            ..Default::default()
        };
    }

    /// Increments per group in half turns.
    fn rate(&self) -> f64 {
        if self.steps == 0 {
            0.
        } else {
            self.increments / self.steps as f64
        }
    }
}

/// Phase and frequency extractor.
///
/// Turns the correlation sums of each completed group into angles and
/// reduces a dwell of groups into a [Gamma].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Extractor {
    window: Window,
    null_phase: f64,
    side_floor: Option<f32>,
    full_scale: f64,
    reference: Track,
    sample: Track,
    delta: Track,
    side: Track,
    side_bias: f64,
    side_level: f32,
    amplitudes: [f64; 2],
    groups: u32,
    regression: Regression,
}

impl Extractor {
    /// # Args
    /// * `window` - Window geometry.
    /// * `gain` - Carrier table gain, see [crate::LoTable::gain].
    /// * `adc_full_scale` - Full scale ADC code.
    pub fn new(window: Window, gain: f64, adc_full_scale: f64) -> Self {
        Self {
            window,
            null_phase: 0.5,
            side_floor: None,
            full_scale: Self::scale(&window, gain, adc_full_scale),
            reference: Track::default(),
            sample: Track::default(),
            delta: Track::default(),
            side: Track::default(),
            side_bias: 0.,
            side_level: f32::NEG_INFINITY,
            amplitudes: [0.; 2],
            groups: 0,
            regression: Regression::new(window.group_rate()),
        }
    }

    fn scale(window: &Window, gain: f64, adc_full_scale: f64) -> f64 {
        (gain * window.bandwidth as f64 * adc_full_scale
            / (1u32 << SHIFT) as f64)
            .max(f64::MIN_POSITIVE)
    }

    /// Change the window geometry and gain. Averaging state is reset.
    pub fn configure(
        &mut self,
        window: Window,
        gain: f64,
        adc_full_scale: f64,
    ) {
        self.window = window;
        self.full_scale = Self::scale(&window, gain, adc_full_scale);
        self.regression.set_scale(window.group_rate());
        self.reset();
    }

    /// Phase offset added to the delta phase in half turns.
    ///
    /// `0.5` reports the delta phase as sample minus reference.
    pub fn set_null_phase(&mut self, null_phase: f64) {
        self.null_phase = null_phase;
    }

    /// Enable side channel correction.
    ///
    /// # Args
    /// * `floor` - Side reference level in dBFS above which the side channel
    ///   bias is subtracted from the delta phase. `None` disables the side
    ///   channel.
    pub fn set_side_floor(&mut self, floor: Option<f32>) {
        self.side_floor = floor;
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Groups completed in the current dwell.
    pub fn groups(&self) -> u32 {
        self.groups
    }

    /// Latest reference and sample amplitudes relative to full scale.
    pub fn amplitudes(&self) -> [f32; 2] {
        self.amplitudes.map(|a| a as f32)
    }

    /// Clear averaging state for a new dwell.
    pub fn reset(&mut self) {
        self.reference.reset();
        self.sample.reset();
        self.delta.reset();
        self.side.reset();
        self.groups = 0;
        self.regression.reset();
    }

    /// Forget the angles of the previous group.
    ///
    /// Call when the next group does not directly follow the previous one.
    /// The first group after this contributes no frequency increment.
    pub fn discontinuity(&mut self) {
        self.reference.last = None;
        self.sample.last = None;
        self.delta.last = None;
        self.side.last = None;
    }

    /// Process the sums of a completed group.
    pub fn group(&mut self, accumulator: &Accumulator) {
        let average = self.groups < self.window.decimated_tau();
        let main = &accumulator.main;
        self.reference.update(main.reference_angle(), average);
        self.sample.update(main.sample_angle(), average);
        let delta = main.delta_angle();
        self.delta.update(delta, average);
        if self.window.tau > REGRESSION_TAU {
            self.regression.add(delta / 2.);
        }
        self.amplitudes = [
            main.reference_amplitude() / self.full_scale,
            main.sample_amplitude() / self.full_scale,
        ];
        if self.side_floor.is_some() {
            self.side_group(&accumulator.side);
        }
        self.groups += 1;
    }

    fn side_group(&mut self, side: &Correlation) {
        self.side.update(side.delta_angle(), true);
        self.side_level =
            level((side.reference_amplitude() / self.full_scale) as f32);
    }

    /// Reduce the completed groups of the dwell.
    pub fn finish(&mut self) -> Gamma {
        let groups = self.groups.max(1) as f64;
        let averaged =
            self.window.decimated_tau().min(self.groups).max(1) as f64;
        // Half turns per group to Hz
        let rate = self.window.group_rate() / 2.;

        let mut delta = self.delta.sum / averaged + self.null_phase;
        let side_phase = self.side_floor.map(|floor| {
            if self.side_level > floor {
                delta -= self.side_bias;
            }
            let t = wrap(self.side.sum / groups);
            if (t - self.side_bias).abs() > SIDE_SNAP {
                self.side_bias = t;
            } else {
                self.side_bias = (self.side_bias * 3. + t) / 4.;
            }
            self.side_bias as f32
        });

        let delta_frequency = if self.window.tau > REGRESSION_TAU {
            self.regression.finalize()
        } else {
            self.delta.rate() * rate
        };

        Gamma {
            reference_phase: wrap(self.reference.sum / averaged) as f32,
            delta_phase: wrap(delta) as f32,
            reference_frequency: (self.reference.rate() * rate) as f32,
            sample_frequency: (self.sample.rate() * rate) as f32,
            delta_frequency: delta_frequency as f32,
            side_phase,
            amplitudes: self.amplitudes(),
        }
    }
}
