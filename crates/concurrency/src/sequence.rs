//! Out-of-order completion sequence
//!
//! Numbers are offered in any order by many threads. The sequence reports
//! the highest number `X` such that every number up to `X` has been
//! offered, together with the metadata offered with `X`.
//!
//! ## Layout
//!
//! A ring of `capacity` slots. Offering `n` writes its metadata into slot
//! `n % capacity`, publishes the number, then tries to move the gap-free
//! watermark forward over every consecutive slot that is filled. Whichever
//! thread fills the last gap does the advancing; nobody waits for their own
//! number to become visible.
//!
//! An offer more than `capacity` ahead of the watermark would overwrite a
//! slot still needed, so it spins until the watermark catches up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

/// Ring size used unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 1024;

struct Slot<const N: usize> {
    number: AtomicU64,
    meta: [AtomicU64; N],
}

impl<const N: usize> Slot<N> {
    fn new() -> Self {
        Slot {
            number: AtomicU64::new(0),
            meta: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn read_meta(&self) -> [u64; N] {
        std::array::from_fn(|i| self.meta[i].load(Ordering::Acquire))
    }

    fn write(&self, number: u64, meta: [u64; N]) {
        for (cell, value) in self.meta.iter().zip(meta) {
            cell.store(value, Ordering::Relaxed);
        }
        self.number.store(number, Ordering::SeqCst);
    }
}

/// Gap-free watermark over numbers completed out of order, each carrying
/// `N` words of metadata.
pub struct OutOfOrderSequence<const N: usize> {
    slots: Box<[Slot<N>]>,
    mask: u64,
    highest: AtomicU64,
}

/// Watermark together with the numbers completed above it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSnapshot<const N: usize> {
    /// Highest gap-free number
    pub highest: u64,
    /// Metadata offered with `highest`
    pub meta: [u64; N],
    /// Numbers above `highest` already offered, ascending
    pub out_of_order: Vec<u64>,
}

impl<const N: usize> OutOfOrderSequence<N> {
    /// Sequence starting at `initial` with `initial_meta`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn new(initial: u64, initial_meta: [u64; N], capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "out-of-order capacity must be a power of two, got {}",
            capacity
        );
        let slots: Box<[Slot<N>]> = (0..capacity).map(|_| Slot::new()).collect();
        let sequence = OutOfOrderSequence {
            slots,
            mask: capacity as u64 - 1,
            highest: AtomicU64::new(initial),
        };
        sequence.slot(initial).write(initial, initial_meta);
        sequence
    }

    /// Ring size.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, number: u64) -> &Slot<N> {
        &self.slots[(number & self.mask) as usize]
    }

    /// Mark `number` as completed with `meta`.
    ///
    /// Blocks (spinning) while `number` is a full ring ahead of the
    /// watermark. Returns whether the watermark moved.
    pub fn offer(&self, number: u64, meta: [u64; N]) -> bool {
        loop {
            let highest = self.highest.load(Ordering::SeqCst);
            debug_assert!(
                number > highest,
                "number {} offered twice or below the watermark {}",
                number,
                highest
            );
            if number <= highest {
                return false;
            }
            if number - highest < self.slots.len() as u64 {
                break;
            }
            thread::yield_now();
        }
        self.slot(number).write(number, meta);
        self.advance()
    }

    fn advance(&self) -> bool {
        let mut moved = false;
        loop {
            let highest = self.highest.load(Ordering::SeqCst);
            let next = highest + 1;
            if self.slot(next).number.load(Ordering::SeqCst) != next {
                return moved;
            }
            if self
                .highest
                .compare_exchange(highest, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                moved = true;
            }
        }
    }

    /// Highest gap-free number.
    pub fn highest_gapless(&self) -> u64 {
        self.highest.load(Ordering::SeqCst)
    }

    /// Highest gap-free number and its metadata, read consistently.
    pub fn get(&self) -> (u64, [u64; N]) {
        loop {
            let highest = self.highest.load(Ordering::SeqCst);
            let meta = self.slot(highest).read_meta();
            if self.highest.load(Ordering::SeqCst) == highest
                && self.slot(highest).number.load(Ordering::SeqCst) == highest
            {
                return (highest, meta);
            }
            thread::yield_now();
        }
    }

    /// Overwrite the watermark. Not safe against concurrent offers.
    pub fn set(&self, number: u64, meta: [u64; N]) {
        for slot in self.slots.iter() {
            slot.number.store(0, Ordering::SeqCst);
        }
        self.slot(number).write(number, meta);
        self.highest.store(number, Ordering::SeqCst);
    }

    /// Watermark plus every number completed above it.
    pub fn snapshot(&self) -> SequenceSnapshot<N> {
        let (highest, meta) = self.get();
        let mut out_of_order: Vec<u64> = self
            .slots
            .iter()
            .map(|slot| slot.number.load(Ordering::SeqCst))
            .filter(|&number| number > highest)
            .collect();
        out_of_order.sort_unstable();
        SequenceSnapshot {
            highest,
            meta,
            out_of_order,
        }
    }
}

impl<const N: usize> std::fmt::Debug for OutOfOrderSequence<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutOfOrderSequence")
            .field("highest", &self.highest_gapless())
            .field("capacity", &self.capacity())
            .finish()
    }
}
