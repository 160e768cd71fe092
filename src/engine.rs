//! Sample processing
//!
//! The [Producer] runs in the sample delivery context (DMA interrupt) once
//! per block and must finish before the next block arrives. It owns the
//! correlation accumulator and the extractor. Finished dwells are handed to
//! the [Consumer] through the [Ring]. Control requests travel the other way
//! through a command queue and are applied between blocks. Configuration
//! changes restart the dwell.
use core::sync::atomic::{AtomicBool, Ordering};

use dsp::{Accumulator, Extractor, LoTable};
use heapless::spsc;

use crate::{
    ring::Ring,
    settings::Settings,
    sweep::{Consumer, Control},
    Error,
};

/// Command queue size (one less usable entry).
pub(crate) const COMMANDS: usize = 4;

pub(crate) enum Command {
    Configure(Settings),
    ResetAccumulator,
    ResetAveraging,
}

#[derive(Default)]
pub(crate) struct Flags {
    pub missing: AtomicBool,
    pub cancel: AtomicBool,
    pub pause: AtomicBool,
}

/// State shared between the producer and consumer handles.
///
/// Place it in a `static` (or leak it) and [Shared::split] it once.
pub struct Shared {
    ring: Ring,
    flags: Flags,
    commands: spsc::Queue<Command, COMMANDS>,
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    pub const fn new() -> Self {
        Self {
            ring: Ring::new(),
            flags: Flags {
                missing: AtomicBool::new(false),
                cancel: AtomicBool::new(false),
                pause: AtomicBool::new(false),
            },
            commands: spsc::Queue::new(),
        }
    }

    /// Split into the sample processing, sweep and control handles.
    ///
    /// # Args
    /// * `settings` - Initial settings. Clamped.
    ///
    /// # Returns
    /// The handles or an error if the oscillator table can not be
    /// generated.
    pub fn split(
        &mut self,
        mut settings: Settings,
    ) -> Result<(Producer<'_>, Consumer<'_>, Control<'_>), Error> {
        settings.clamp();
        let (tx, rx) = self.commands.split();
        let producer =
            Producer::new(&self.ring, &self.flags, rx, settings.clone())?;
        let consumer = Consumer::new(&self.ring, &self.flags, tx, settings);
        Ok((producer, consumer, Control::new(&self.flags)))
    }
}

/// Sample block processor.
pub struct Producer<'a> {
    ring: &'a Ring,
    flags: &'a Flags,
    commands: spsc::Consumer<'a, Command, COMMANDS>,
    settings: Settings,
    pending: Option<Settings>,
    table: LoTable,
    side: Option<LoTable>,
    accumulator: Accumulator,
    extractor: Extractor,
    // Blocks remaining in the current group
    blocks: u32,
    // Groups remaining in the current dwell
    groups: u32,
    // Blocks to skip before the next group
    skip: u32,
    half: Option<bool>,
}

impl<'a> Producer<'a> {
    fn new(
        ring: &'a Ring,
        flags: &'a Flags,
        commands: spsc::Consumer<'a, Command, COMMANDS>,
        settings: Settings,
    ) -> Result<Self, Error> {
        let (table, side) = settings.tables()?;
        let mut extractor = Extractor::new(
            settings.window(),
            table.gain(),
            settings.adc_full_scale as f64,
        );
        extractor.set_null_phase(settings.null_phase as f64);
        extractor.set_side_floor(settings.side_floor());
        Ok(Self {
            ring,
            flags,
            commands,
            settings,
            pending: None,
            table,
            side,
            accumulator: Accumulator::default(),
            extractor,
            blocks: 0,
            groups: 0,
            skip: 0,
            half: None,
        })
    }

    /// Active settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Process a block of interleaved `[reference, sample]` codes.
    ///
    /// # Args
    /// * `block` - Samples, two per table entry.
    /// * `is_upper_half` - Whether the block is from the upper half of the
    ///   DMA double buffer. Consecutive blocks from the same half indicate a
    ///   lost block.
    pub fn deliver_sample_block(&mut self, block: &[i32], is_upper_half: bool) {
        if self.half == Some(is_upper_half) {
            self.flags.missing.store(true, Ordering::Relaxed);
            self.extractor.discontinuity();
        }
        self.half = Some(is_upper_half);

        while let Some(command) = self.commands.dequeue() {
            match command {
                Command::Configure(settings) => {
                    self.pending = Some(settings);
                    self.restart();
                }
                Command::ResetAccumulator => {
                    self.accumulator.reset();
                    self.extractor.discontinuity();
                    self.blocks = 0;
                    self.skip = 0;
                }
                Command::ResetAveraging => self.restart(),
            }
        }

        if self.skip > 0 {
            self.skip -= 1;
            return;
        }

        if self.blocks == 0 {
            if self.groups == 0 {
                if let Some(settings) = self.pending.take() {
                    self.apply(settings);
                }
                self.extractor.reset();
                self.groups = self.settings.tau.max(1);
            }
            self.accumulator.reset();
            self.blocks = self.settings.bandwidth.max(1);
        }

        self.accumulator.demodulate(
            block,
            &self.table,
            self.side.as_ref(),
            *self.settings.capture,
        );
        self.blocks -= 1;
        if self.blocks > 0 {
            return;
        }

        self.extractor.group(&self.accumulator);
        self.skip = self.settings.sample_overhead;
        self.groups -= 1;
        if self.groups == 0 {
            let gamma = self.extractor.finish();
            if self.ring.push(&gamma) {
                self.flags.missing.store(true, Ordering::Relaxed);
            }
        }
    }

    fn restart(&mut self) {
        self.extractor.discontinuity();
        self.blocks = 0;
        self.groups = 0;
        self.skip = 0;
    }

    fn apply(&mut self, settings: Settings) {
        if self.table.frequency() != settings.intermediate_frequency
            || self.table.sample_rate() != settings.sample_rate
            || self.table.len() != settings.samples as usize
            || self.side.is_some() != settings.side_floor().is_some()
        {
            // Settings are validated before they are queued.
            let Ok((table, side)) = settings.tables() else {
                return;
            };
            self.table = table;
            self.side = side;
        }
        self.extractor.configure(
            settings.window(),
            self.table.gain(),
            settings.adc_full_scale as f64,
        );
        self.extractor.set_null_phase(settings.null_phase as f64);
        self.extractor.set_side_floor(settings.side_floor());
        self.settings = settings;
    }
}
