//! Lock-free floating-point accumulator.
//!
//! Absorbed-luminosity tallies are commutative sums updated from many
//! transport workers at once; a compare-and-swap add on the bit pattern with
//! relaxed ordering is all that is needed.

use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` cell supporting concurrent additive updates.
#[derive(Debug, Default)]
pub struct AtomicF64 {
  bits: AtomicU64,
}

impl AtomicF64 {
  /// Create a cell holding `value`.
  pub fn new(value: f64) -> Self {
    Self { bits: AtomicU64::new(value.to_bits()) }
  }

  /// Read the current value.
  #[inline]
  pub fn load(&self) -> f64 {
    f64::from_bits(self.bits.load(Ordering::Relaxed))
  }

  /// Overwrite the current value.
  #[inline]
  pub fn store(&self, value: f64) {
    self.bits.store(value.to_bits(), Ordering::Relaxed);
  }

  /// Add `delta` atomically.
  pub fn fetch_add(&self, delta: f64) {
    let mut current = self.bits.load(Ordering::Relaxed);
    loop {
      let next = (f64::from_bits(current) + delta).to_bits();
      match self
        .bits
        .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
      {
        Ok(_) => return,
        Err(actual) => current = actual,
      }
    }
  }
}
