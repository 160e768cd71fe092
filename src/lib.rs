#![cfg_attr(not(test), no_std)]
//! Phase meter measurement core
//!
//! Sample blocks are demodulated in the sample delivery context by the
//! [Producer]. Finished dwell measurements are handed to the [Consumer]
//! which fills sweep points and runs the frequency lock.
//!
//! ```ignore
//! static mut SHARED: Shared = Shared::new();
//! let (producer, consumer, control) = SHARED.split(Settings::default())?;
//! ```

pub mod agc;
pub mod engine;
pub mod lock;
pub mod ring;
pub mod settings;
pub mod sweep;
pub mod telemetry;

pub use engine::{Producer, Shared};
pub use settings::Settings;
pub use sweep::{Consumer, Control, Summary, SweepOutcome, SweepPoint};

#[derive(Debug, Copy, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Oscillator table: {0}")]
    Table(#[from] dsp::Error),
    #[error("Command queue full")]
    Busy,
    #[error("Synthesizer rejected {frequency} Hz")]
    Synthesizer { frequency: u64 },
}

/// Called by the sweep loop while no measurement is available.
pub trait Idle {
    fn wait(&mut self);
}

/// External frequency synthesizer retuned by the frequency lock.
pub trait Synthesizer {
    /// Set the output frequency in Hz.
    ///
    /// # Returns
    /// False if the synthesizer did not accept the frequency.
    fn set_frequency(&mut self, frequency: u64) -> bool;
}

/// Sleep until the next interrupt.
#[cfg(target_os = "none")]
pub struct Wfi;

#[cfg(target_os = "none")]
impl Idle for Wfi {
    fn wait(&mut self) {
        cortex_m::asm::wfi();
    }
}
