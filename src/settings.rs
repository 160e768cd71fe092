//! Measurement settings
//!
//! # Design
//! All run-time configurable parameters of the measurement core live in one
//! [Settings] tree. The tree is validated and clamped by
//! [crate::sweep::Consumer::configure] and handed to the producer, where it
//! takes effect at the start of the next dwell.
//!
//! Out of range window parameters are clamped, not rejected. Only oscillator
//! parameters that cannot produce a valid carrier table are an error.
use dsp::{Capture, LoTable, Window};
use miniconf::{Leaf, Tree};
use serde::{Deserialize, Serialize};

use crate::lock::LockSettings;

/// Maximum number of sweep points.
pub const POINTS_MAX: usize = 401;

/// Minimum number of sweep points.
pub const POINTS_MIN: usize = 2;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Discrete sweeps from the first to the last point.
    #[default]
    Sweep,
    /// Continuous strip: the point array is shifted left for each new
    /// measurement once it is full.
    Scrolling,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum SideChannel {
    #[default]
    Off,
    /// Correct the delta phase by the side channel bias while the side
    /// channel reference level (dBFS) exceeds `floor`.
    On { floor: f32 },
}

#[derive(Clone, Debug, Tree)]
pub struct Settings {
    /// ADC sample rate in Hz.
    pub sample_rate: u32,

    /// Samples per channel in each delivered block.
    pub samples: u32,

    /// Intermediate (carrier) frequency in Hz.
    ///
    /// Each block must span an integer number of carrier periods.
    pub intermediate_frequency: u32,

    /// ADC full scale code. Amplitudes and levels are relative to this.
    pub adc_full_scale: f32,

    /// Number of blocks correlated per group (at least 1).
    pub bandwidth: u32,

    /// Number of blocks skipped after each group.
    pub sample_overhead: u32,

    /// Number of groups per sweep point (at least 1).
    pub tau: u32,

    /// Phase averaging depth divisor (1 to `tau`).
    pub decimation: u32,

    /// Delta phase offset in half turns.
    ///
    /// `0.5` reports the delta phase as sample minus reference.
    pub null_phase: f32,

    /// Number of sweep points (2 to 401).
    pub points: u32,

    /// Sweep mode.
    pub mode: Leaf<Mode>,

    /// Channel capture policy.
    pub capture: Leaf<Capture>,

    /// Side channel calibration.
    pub side_channel: Leaf<SideChannel>,

    /// Frequency lock.
    pub lock: LockSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            samples: 48,
            intermediate_frequency: 5_000,
            adc_full_scale: ((1 << 15) - 1) as f32,
            bandwidth: 10,
            sample_overhead: 0,
            tau: 10,
            decimation: 1,
            null_phase: 0.5,
            points: 101,
            mode: Leaf(Mode::Sweep),
            capture: Leaf(Capture::Dual),
            side_channel: Leaf(SideChannel::Off),
            lock: LockSettings::default(),
        }
    }
}

impl Settings {
    /// Clamp the window and sweep parameters into range.
    pub fn clamp(&mut self) {
        self.bandwidth = self.bandwidth.max(1);
        self.tau = self.tau.max(1);
        self.decimation = self.decimation.clamp(1, self.tau);
        self.points = self.points.clamp(POINTS_MIN as _, POINTS_MAX as _);
        if !self.adc_full_scale.is_finite() || self.adc_full_scale <= 0. {
            self.adc_full_scale = 1.;
        }
    }

    pub fn window(&self) -> Window {
        Window {
            sample_rate: self.sample_rate,
            samples: self.samples,
            bandwidth: self.bandwidth.max(1),
            overhead: self.sample_overhead,
            tau: self.tau.max(1),
            decimation: self.decimation.max(1),
        }
    }

    /// Generate the main and (if enabled) side oscillator tables.
    pub fn tables(&self) -> Result<(LoTable, Option<LoTable>), dsp::Error> {
        let samples = self.samples as usize;
        let table = LoTable::new(
            self.sample_rate,
            self.intermediate_frequency,
            samples,
        )?;
        let side = self
            .side_floor()
            .map(|_| {
                LoTable::side(
                    self.sample_rate,
                    self.intermediate_frequency,
                    samples,
                )
            })
            .transpose()?;
        Ok((table, side))
    }

    /// Side channel floor in dBFS if the side channel is enabled.
    pub fn side_floor(&self) -> Option<f32> {
        match *self.side_channel {
            SideChannel::Off => None,
            SideChannel::On { floor } => Some(floor),
        }
    }

    /// Group rate in Hz.
    pub fn bandwidth_frequency(&self) -> f32 {
        self.window().group_rate() as f32
    }

    /// Dwell time per sweep point in seconds.
    pub fn tau_seconds(&self) -> f32 {
        self.window().dwell() as f32
    }

    /// Set the dwell time.
    ///
    /// # Args
    /// * `seconds` - Dwell time. Rounded up to whole groups, at least one.
    pub fn set_tau_seconds(&mut self, seconds: f32) {
        let bandwidth = self.bandwidth.max(1) as f32;
        let blocks =
            seconds * self.sample_rate as f32 / self.samples.max(1) as f32;
        let tau = (blocks + bandwidth - 1.) / bandwidth;
        self.tau = if tau.is_finite() && tau >= 1. {
            tau.min(u32::MAX as f32) as u32
        } else {
            1
        };
        self.decimation = self.decimation.clamp(1, self.tau);
    }

    /// Change the number of blocks per group while keeping the dwell time.
    pub fn set_bandwidth(&mut self, bandwidth: u32) {
        let tau = self.tau_seconds();
        self.bandwidth = bandwidth.max(1);
        self.set_tau_seconds(tau);
    }

    /// Adjust the null phase by an offset in degrees.
    pub fn set_null_phase_degrees(&mut self, degrees: f32) {
        self.null_phase += degrees / 180.;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping() {
        let mut s = Settings {
            bandwidth: 0,
            tau: 0,
            decimation: 7,
            points: 1000,
            ..Default::default()
        };
        s.clamp();
        assert_eq!(s.bandwidth, 1);
        assert_eq!(s.tau, 1);
        assert_eq!(s.decimation, 1);
        assert_eq!(s.points, POINTS_MAX as u32);

        s.points = 0;
        s.decimation = 0;
        s.clamp();
        assert_eq!(s.points, POINTS_MIN as u32);
        assert_eq!(s.decimation, 1);
    }

    #[test]
    fn tau_seconds() {
        let mut s = Settings::default();
        // 48 samples at 48 kHz, 10 blocks per group
        assert!((s.tau_seconds() - 0.1).abs() < 1e-6);
        assert!((s.bandwidth_frequency() - 100.).abs() < 1e-3);

        s.set_tau_seconds(0.5);
        assert_eq!(s.tau, 50);
        // Rounded up to whole groups
        s.set_tau_seconds(0.0525);
        assert_eq!(s.tau, 6);
        s.set_tau_seconds(0.);
        assert_eq!(s.tau, 1);
        s.set_tau_seconds(f32::NAN);
        assert_eq!(s.tau, 1);

        s.decimation = 1;
        s.set_tau_seconds(1.);
        s.decimation = 20;
        s.set_bandwidth(20);
        assert_eq!(s.tau, 50);
        assert_eq!(s.decimation, 20);
        s.set_bandwidth(1000);
        assert_eq!(s.tau, 1);
        assert_eq!(s.decimation, 1);
    }

    #[test]
    fn side_floor() {
        let mut s = Settings::default();
        assert_eq!(s.side_floor(), None);
        s.side_channel = Leaf(SideChannel::On { floor: -30. });
        assert_eq!(s.side_floor(), Some(-30.));
    }

    #[test]
    fn tables() {
        let mut s = Settings::default();
        let (table, side) = s.tables().unwrap();
        assert_eq!(table.len(), 48);
        assert_eq!(side, None);
        s.side_channel = Leaf(SideChannel::On { floor: -40. });
        let (_, side) = s.tables().unwrap();
        assert_eq!(side.map(|t| t.frequency()), Some(5_000 * 2 / 3));
        s.intermediate_frequency = 4_900;
        assert_eq!(s.tables(), Err(dsp::Error::Periods));
    }

    #[test]
    fn tree() {
        use miniconf::{json_core, Path};

        let mut s = Settings::default();
        json_core::set_by_key(&mut s, Path::<_, '/'>("/tau"), b"20").unwrap();
        assert_eq!(s.tau, 20);
        json_core::set_by_key(
            &mut s,
            Path::<_, '/'>("/mode"),
            b"\"Scrolling\"",
        )
        .unwrap();
        assert_eq!(*s.mode, Mode::Scrolling);
        json_core::set_by_key(&mut s, Path::<_, '/'>("/lock/enabled"), b"true")
            .unwrap();
        assert!(s.lock.enabled);

        let mut buf = [0u8; 64];
        let len = json_core::get_by_key(
            &s,
            Path::<_, '/'>("/side_channel"),
            &mut buf,
        )
        .unwrap();
        assert_eq!(&buf[..len], b"\"Off\"");
    }

    #[test]
    fn null_phase() {
        let mut s = Settings::default();
        s.set_null_phase_degrees(-90.);
        assert!((s.null_phase - 0.).abs() < 1e-6);
    }
}
