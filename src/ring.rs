//! Measurement ring buffer
//!
//! Single producer, single consumer queue of finished dwell measurements.
//! The producer owns the write index, the consumer owns the read index. When
//! the producer catches up with the consumer the whole unread backlog is
//! dropped.
//!
//! The read index carries an overflow epoch in its upper bits. The producer
//! bumps the epoch when it drops the backlog, which makes a consumer copy
//! that raced the overflow fail its index update and retry. Slots are atomic
//! words so a raced copy is never undefined behavior, only discarded.
use core::sync::atomic::{fence, AtomicU32, AtomicUsize, Ordering};

use dsp::Gamma;

/// Ring buffer capacity.
pub const CAPACITY: usize = 64;

const INDEX_BITS: u32 = 8;
const INDEX_MASK: usize = (1 << INDEX_BITS) - 1;
const WORDS: usize = 8;

type Slot = [AtomicU32; WORDS];

fn pack(gamma: &Gamma) -> [u32; WORDS] {
    [
        gamma.reference_phase.to_bits(),
        gamma.delta_phase.to_bits(),
        gamma.reference_frequency.to_bits(),
        gamma.sample_frequency.to_bits(),
        gamma.delta_frequency.to_bits(),
        gamma.side_phase.unwrap_or(f32::NAN).to_bits(),
        gamma.amplitudes[0].to_bits(),
        gamma.amplitudes[1].to_bits(),
    ]
}

fn unpack(words: &[u32; WORDS]) -> Gamma {
    let side = f32::from_bits(words[5]);
    Gamma {
        reference_phase: f32::from_bits(words[0]),
        delta_phase: f32::from_bits(words[1]),
        reference_frequency: f32::from_bits(words[2]),
        sample_frequency: f32::from_bits(words[3]),
        delta_frequency: f32::from_bits(words[4]),
        side_phase: (!side.is_nan()).then_some(side),
        amplitudes: [f32::from_bits(words[6]), f32::from_bits(words[7])],
    }
}

pub struct Ring {
    slots: [Slot; CAPACITY],
    write: AtomicUsize,
    read: AtomicUsize,
}

impl Default for Ring {
    fn default() -> Self {
        Self::new()
    }
}

impl Ring {
    pub const fn new() -> Self {
        Self {
            slots: [const { [const { AtomicU32::new(0) }; WORDS] }; CAPACITY],
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    /// Push a measurement. Producer only.
    ///
    /// # Returns
    /// True if the buffer was full and the backlog was dropped.
    pub fn push(&self, gamma: &Gamma) -> bool {
        let write = self.write.load(Ordering::Relaxed);
        for (slot, word) in self.slots[write].iter().zip(pack(gamma)) {
            slot.store(word, Ordering::Relaxed);
        }
        let next = (write + 1) % CAPACITY;
        let mut read = self.read.load(Ordering::Acquire);
        // Empty after the overflow: `read == write` once `write` is stored.
        let overflow = loop {
            if read & INDEX_MASK != next {
                break false;
            }
            match self.read.compare_exchange_weak(
                read,
                read.wrapping_add(1 << INDEX_BITS),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break true,
                Err(r) => read = r,
            }
        };
        if overflow {
            fence(Ordering::Release);
        }
        self.write.store(next, Ordering::Release);
        overflow
    }

    /// Pop the oldest unread measurement. Consumer only.
    pub fn pop(&self) -> Option<Gamma> {
        loop {
            let read = self.read.load(Ordering::Acquire);
            let index = read & INDEX_MASK;
            if index == self.write.load(Ordering::Acquire) {
                return None;
            }
            let words: [u32; WORDS] = core::array::from_fn(|i| {
                self.slots[index][i].load(Ordering::Relaxed)
            });
            fence(Ordering::Acquire);
            let next = (read & !INDEX_MASK) | ((index + 1) % CAPACITY);
            if self
                .read
                .compare_exchange(
                    read,
                    next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Some(unpack(&words));
            }
        }
    }

    /// Discard the unread backlog. Consumer only.
    pub fn reset(&self) {
        let write = self.write.load(Ordering::Acquire);
        let _ = self.read.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |read| Some((read & !INDEX_MASK) | write),
        );
    }

    /// Current `(read, write)` indices.
    pub fn indices(&self) -> (usize, usize) {
        (
            self.read.load(Ordering::Acquire) & INDEX_MASK,
            self.write.load(Ordering::Acquire),
        )
    }

    /// Number of unread measurements.
    pub fn len(&self) -> usize {
        let (read, write) = self.indices();
        (write + CAPACITY - read) % CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gamma(i: usize) -> Gamma {
        Gamma {
            delta_phase: i as f32,
            side_phase: (i % 2 == 0).then_some(-(i as f32)),
            ..Default::default()
        }
    }

    #[test]
    fn order() {
        let ring = Ring::new();
        assert_eq!(ring.pop(), None);
        for i in 0..10 {
            assert!(!ring.push(&gamma(i)));
        }
        assert_eq!(ring.len(), 10);
        for i in 0..10 {
            assert_eq!(ring.pop(), Some(gamma(i)));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn wrap_around() {
        let ring = Ring::new();
        for i in 0..5 * CAPACITY {
            assert!(!ring.push(&gamma(i)));
            assert_eq!(ring.pop(), Some(gamma(i)));
            let (read, write) = ring.indices();
            assert!(read < CAPACITY && write < CAPACITY);
        }
    }

    #[test]
    fn overflow() {
        let ring = Ring::new();
        let missing = (0..CAPACITY)
            .map(|i| ring.push(&gamma(i)))
            .fold(false, |a, b| a | b);
        assert!(missing);
        let (read, write) = ring.indices();
        assert_eq!(read, write);
        assert!(read < CAPACITY);
        assert!(ring.is_empty());

        // Only post-overflow entries survive.
        assert!(!ring.push(&gamma(CAPACITY)));
        let (read, write) = ring.indices();
        assert!(read < CAPACITY && write < CAPACITY);
        assert_eq!(ring.pop(), Some(gamma(CAPACITY)));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn reset() {
        let ring = Ring::new();
        for i in 0..7 {
            ring.push(&gamma(i));
        }
        ring.pop();
        ring.reset();
        assert!(ring.is_empty());
        ring.push(&gamma(9));
        assert_eq!(ring.pop(), Some(gamma(9)));
    }

    #[test]
    fn concurrent() {
        use std::sync::atomic::AtomicBool;

        let ring = Ring::new();
        let done = AtomicBool::new(false);
        const N: usize = 100_000;
        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..N {
                    let mut g = gamma(i);
                    g.reference_phase = i as f32;
                    g.amplitudes = [i as f32; 2];
                    ring.push(&g);
                }
                done.store(true, Ordering::Release);
            });
            let mut last = None;
            loop {
                let finished = done.load(Ordering::Acquire);
                match ring.pop() {
                    Some(g) => {
                        // Never torn, always in order
                        let i = g.delta_phase as usize;
                        assert_eq!(g.reference_phase, g.delta_phase);
                        assert_eq!(g.amplitudes, [g.delta_phase; 2]);
                        assert!(last.map(|l| i > l).unwrap_or(true));
                        last = Some(i);
                    }
                    None if finished => break,
                    None => {}
                }
            }
            assert!(last.is_some());
        });
    }
}
