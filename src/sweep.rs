//! Sweep scheduling
//!
//! The [Consumer] drains finished dwell measurements from the ring into the
//! sweep point array, runs the frequency lock and summarizes completed
//! sweeps. [Control] raises the cancel and pause requests from any context.
use core::sync::atomic::Ordering;

use dsp::{level, wrap, Gamma, Regression, Unwrapper, REGRESSION_TAU};
use heapless::{spsc, Vec};
use serde::Serialize;

use crate::{
    engine::{Command, Flags, COMMANDS},
    lock::{FrequencyLock, LockAction},
    ring::Ring,
    settings::{Mode, Settings, POINTS_MAX},
    telemetry::{Telemetry, TelemetryBuffer},
    Error, Idle, Synthesizer,
};

/// A single sweep point. Phases in half turns, frequencies in Hz.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct SweepPoint {
    pub reference_phase: f32,
    pub delta_phase: f32,
    pub reference_frequency: f32,
    pub sample_frequency: f32,
    pub delta_frequency: f32,
    pub side_phase: Option<f32>,
}

impl From<&Gamma> for SweepPoint {
    fn from(gamma: &Gamma) -> Self {
        Self {
            reference_phase: gamma.reference_phase,
            delta_phase: gamma.delta_phase,
            reference_frequency: gamma.reference_frequency,
            sample_frequency: gamma.sample_frequency,
            delta_frequency: gamma.delta_frequency,
            side_phase: gamma.side_phase,
        }
    }
}

/// Why [Consumer::sweep] returned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    /// All points of a sweep were filled.
    Complete,
    /// Scrolling mode: new points were appended and the ring is drained.
    Updated,
    /// The sweep was cancelled. Filled points are kept.
    Cancelled,
    /// Sweeping is paused.
    Paused,
}

/// Statistics of a completed sweep or of the scrolling strip.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct Summary {
    /// Mean delta phase in half turns.
    pub delta_phase: f32,
    /// Delta phase of the newest point.
    pub last_delta_phase: f32,
    /// Delta frequency over the points in Hz.
    ///
    /// Mean of all but the newest point for short dwells, regression over
    /// the delta phase of all points for long dwells.
    pub delta_frequency: f32,
    /// Delta frequency of the point before the newest in Hz.
    pub last_delta_frequency: f32,
}

/// Cancel and pause requests.
#[derive(Copy, Clone)]
pub struct Control<'a> {
    flags: &'a Flags,
}

impl<'a> Control<'a> {
    pub(crate) fn new(flags: &'a Flags) -> Self {
        Self { flags }
    }

    /// Abort the running sweep. It restarts from the first point on the
    /// next [Consumer::sweep].
    pub fn cancel(&self) {
        self.flags.cancel.store(true, Ordering::Release);
    }

    pub fn pause(&self) {
        self.flags.pause.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.flags.pause.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.flags.pause.load(Ordering::Acquire)
    }
}

fn blank(points: u32) -> Vec<SweepPoint, POINTS_MAX> {
    core::iter::repeat(SweepPoint::default())
        .take((points as usize).min(POINTS_MAX))
        .collect()
}

pub struct Consumer<'a> {
    ring: &'a Ring,
    flags: &'a Flags,
    commands: spsc::Producer<'a, Command, COMMANDS>,
    settings: Settings,
    points: Vec<SweepPoint, POINTS_MAX>,
    index: usize,
    running: bool,
    lock: FrequencyLock,
    summary: Option<Summary>,
    synthesizer_fault: bool,
    telemetry: TelemetryBuffer,
}

impl<'a> Consumer<'a> {
    pub(crate) fn new(
        ring: &'a Ring,
        flags: &'a Flags,
        commands: spsc::Producer<'a, Command, COMMANDS>,
        settings: Settings,
    ) -> Self {
        Self {
            ring,
            flags,
            commands,
            lock: FrequencyLock::new(settings.lock),
            points: blank(settings.points),
            settings,
            index: 0,
            running: false,
            summary: None,
            synthesizer_fault: false,
            telemetry: TelemetryBuffer::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Apply new settings.
    ///
    /// The settings are clamped and validated here. The producer switches
    /// to them at the next dwell start, discarding the dwell in progress.
    /// The sweep restarts with blank points.
    ///
    /// # Returns
    /// An error if the oscillator table can not be generated or the command
    /// queue is full. Nothing is changed on error.
    pub fn configure(&mut self, mut settings: Settings) -> Result<(), Error> {
        settings.clamp();
        settings.tables()?;
        self.commands
            .enqueue(Command::Configure(settings.clone()))
            .map_err(|_| Error::Busy)?;
        self.points = blank(settings.points);
        self.lock.set_settings(settings.lock);
        log::info!(
            "Configured: {} Hz IF, {} blocks per group, {} groups ({} s)",
            settings.intermediate_frequency,
            settings.bandwidth,
            settings.tau,
            settings.tau_seconds()
        );
        self.settings = settings;
        self.reset_sweep();
        Ok(())
    }

    /// Restart the sweep at the first point and discard unread
    /// measurements.
    pub fn reset_sweep(&mut self) {
        self.index = 0;
        self.running = false;
        self.ring.reset();
    }

    /// Discard the partial correlation sums of the current group.
    pub fn reset_accumulator(&mut self) -> Result<(), Error> {
        self.commands
            .enqueue(Command::ResetAccumulator)
            .map_err(|_| Error::Busy)
    }

    /// Restart the current dwell.
    pub fn reset_averaging(&mut self) -> Result<(), Error> {
        self.commands
            .enqueue(Command::ResetAveraging)
            .map_err(|_| Error::Busy)
    }

    /// Fill sweep points from finished measurements.
    ///
    /// In sweep mode this returns once every point is filled. In scrolling
    /// mode it returns once the ring is drained after at least one new
    /// point. While waiting for measurements `idle` is called.
    pub fn sweep<I: Idle, S: Synthesizer>(
        &mut self,
        idle: &mut I,
        synthesizer: &mut S,
    ) -> SweepOutcome {
        let scrolling = *self.settings.mode == Mode::Scrolling;
        if !scrolling && !self.running {
            self.reset_sweep();
            self.running = true;
        }

        let mut updated = false;
        loop {
            if self.flags.cancel.swap(false, Ordering::AcqRel) {
                self.running = false;
                log::info!("Sweep cancelled at point {}", self.index);
                return SweepOutcome::Cancelled;
            }
            if self.flags.pause.load(Ordering::Acquire) {
                return SweepOutcome::Paused;
            }

            let Some(gamma) = self.ring.pop() else {
                if updated {
                    if let Some(summary) = self.summarize() {
                        self.summary = Some(summary);
                    }
                    return SweepOutcome::Updated;
                }
                idle.wait();
                continue;
            };

            self.record(&gamma, synthesizer);
            if scrolling {
                updated = true;
            } else if self.index >= self.points.len() {
                self.running = false;
                self.summary = self.summarize();
                if let Some(summary) = &self.summary {
                    log::info!(
                        "Sweep complete: delta phase {}, delta frequency {} Hz",
                        summary.delta_phase,
                        summary.delta_frequency
                    );
                }
                return SweepOutcome::Complete;
            }
        }
    }

    fn record<S: Synthesizer>(&mut self, gamma: &Gamma, synthesizer: &mut S) {
        let point = SweepPoint::from(gamma);
        if let Some(p) = self.points.get_mut(self.index) {
            *p = point;
            self.index += 1;
        } else {
            self.points.rotate_left(1);
            if let Some(last) = self.points.last_mut() {
                *last = point;
            }
        }

        let levels = gamma.amplitudes.map(level);
        match self.lock.update(
            levels,
            gamma.delta_frequency,
            self.settings.tau_seconds(),
            synthesizer,
        ) {
            Ok(LockAction::Hold) => {}
            Ok(LockAction::Reset) => log::info!("Frequency lock reset"),
            Ok(LockAction::Corrected(correction)) => {
                log::debug!("Frequency lock correction {correction} Hz")
            }
            Err(err) => {
                log::warn!("Frequency lock: {err}");
                self.synthesizer_fault = true;
            }
        }

        self.telemetry.latest = *gamma;
        self.telemetry.correction = self.lock.correction();
    }

    /// Summarize the filled points. At least two are required.
    fn summarize(&self) -> Option<Summary> {
        let filled = self.points.get(..self.index)?;
        let [.., previous, last] = filled else {
            return None;
        };
        let window = self.settings.window();
        let mut unwrapper = Unwrapper::default();
        let mut regression =
            Regression::new(window.group_rate() / window.tau as f64);
        let mut phase = 0.;
        for p in filled {
            phase += unwrapper.update(p.delta_phase as f64);
            regression.add(p.delta_phase as f64 / 2.);
        }
        let delta_frequency = if window.tau > REGRESSION_TAU {
            regression.finalize()
        } else {
            // Newest point excluded
            let older = &filled[..filled.len() - 1];
            older.iter().map(|p| p.delta_frequency as f64).sum::<f64>()
                / older.len() as f64
        };
        Some(Summary {
            delta_phase: wrap(phase / filled.len() as f64) as f32,
            last_delta_phase: last.delta_phase,
            delta_frequency: delta_frequency as f32,
            last_delta_frequency: previous.delta_frequency,
        })
    }

    /// Sweep points. Points at and after [Consumer::index] are from the
    /// previous sweep.
    pub fn points(&self) -> &[SweepPoint] {
        &self.points
    }

    /// Next point to be filled.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Summary of the last completed sweep or the latest scrolling update.
    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    /// Reference and sample amplitudes of the latest measurement relative to
    /// full scale.
    pub fn amplitudes(&self) -> [f32; 2] {
        self.telemetry.latest.amplitudes
    }

    /// Reference and sample levels of the latest measurement in dBFS.
    pub fn levels(&self) -> [f32; 2] {
        self.amplitudes().map(level)
    }

    /// Current frequency lock correction in Hz.
    pub fn correction(&self) -> f32 {
        self.lock.correction()
    }

    /// Whether samples or measurements were lost since the last call.
    pub fn take_missing_samples(&mut self) -> bool {
        self.flags.missing.swap(false, Ordering::AcqRel)
    }

    /// Whether the synthesizer rejected a frequency since the last call.
    pub fn take_synthesizer_fault(&mut self) -> bool {
        core::mem::take(&mut self.synthesizer_fault)
    }

    pub fn telemetry(&self) -> Telemetry {
        let mut buffer = self.telemetry.clone();
        buffer.missing_samples = self.flags.missing.load(Ordering::Acquire);
        buffer.finalize()
    }
}
