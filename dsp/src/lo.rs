use heapless::Vec;
use num_traits::Float;

/// Maximum number of samples per block (and local oscillator table length).
pub const SAMPLES_MAX: usize = 256;

/// Peak local oscillator coefficient.
const AMPLITUDE: i64 = 32610;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Samples per block out of range")]
    Samples,
    #[error("Intermediate frequency not below Nyquist")]
    Nyquist,
    #[error("Block does not span an integer number of carrier periods")]
    Periods,
}

/// Local oscillator table.
///
/// One block worth of Hann windowed `[sin, cos]` coefficient pairs of the
/// conjugate carrier. Correlating a tone `cos(w t + p)` at the carrier
/// frequency against the table yields an angle of `+p`.
#[derive(Clone, Debug, PartialEq)]
pub struct LoTable {
    coefficients: Vec<[i16; 2], SAMPLES_MAX>,
    frequency: u32,
    sample_rate: u32,
}

impl LoTable {
    /// Generate the table for the main carrier.
    ///
    /// # Args
    /// * `sample_rate` - ADC sample rate in Hz.
    /// * `frequency` - Intermediate (carrier) frequency in Hz.
    /// * `samples` - Number of samples per channel in a block.
    ///
    /// # Returns
    /// The table or an error if the block would not span an integer number of
    /// carrier periods below Nyquist.
    pub fn new(
        sample_rate: u32,
        frequency: u32,
        samples: usize,
    ) -> Result<Self, Error> {
        if samples == 0 || samples > SAMPLES_MAX {
            return Err(Error::Samples);
        }
        if frequency == 0 || frequency as u64 * 2 >= sample_rate as u64 {
            return Err(Error::Nyquist);
        }
        if (frequency as u64 * samples as u64) % sample_rate as u64 != 0 {
            return Err(Error::Periods);
        }
        Ok(Self::generate(sample_rate, frequency, samples))
    }

    /// Generate the side channel table at two thirds of the carrier.
    ///
    /// The side carrier is not required to be periodic over the block.
    pub fn side(
        sample_rate: u32,
        frequency: u32,
        samples: usize,
    ) -> Result<Self, Error> {
        Self::new(sample_rate, frequency, samples)?;
        Ok(Self::generate(sample_rate, frequency * 2 / 3, samples))
    }

    fn generate(sample_rate: u32, frequency: u32, samples: usize) -> Self {
        let coefficients = (0..samples as u64)
            .map(|i| {
                let phase = (((i * frequency as u64) % sample_rate as u64)
                    << 32)
                    / sample_rate as u64;
                let (cos, sin) = idsp::cossin((phase as i32).wrapping_neg());

                // Hann window, 0 to 1 << 31
                let hann = ((i << 32) / samples as u64) as i32;
                let w = ((1i64 << 31) - idsp::cossin(hann).0 as i64) >> 1;

                let scale = |x: i32| {
                    let x = (x as i64 * w) >> 31;
                    ((x * AMPLITUDE) >> 31) as i16
                };
                [scale(sin), scale(cos)]
            })
            .collect();
        Self {
            coefficients,
            frequency,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// Carrier frequency in Hz.
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn coefficients(&self) -> &[[i16; 2]] {
        &self.coefficients
    }

    /// Correlation magnitude of a unit amplitude tone at the carrier
    /// accumulated over one block (before the accumulator shift).
    pub fn gain(&self) -> f64 {
        0.5 * self
            .coefficients
            .iter()
            .map(|[s, c]| (*s as f64).hypot(*c as f64))
            .sum::<f64>()
    }
}
