#![cfg_attr(not(test), no_std)]

mod lo;
pub use lo::*;
mod demod;
pub use demod::*;
mod unwrap;
pub use unwrap::*;
mod regression;
pub use regression::*;
mod extract;
pub use extract::*;

#[cfg(test)]
pub mod testing;
