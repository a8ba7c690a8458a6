//! Seeded random streams for the transport workers.
//!
//! Every worker owns an independent `RandomStream`; disjointness comes from
//! the ChaCha stream index, so a run with a fixed base seed is reproducible
//! bit for bit regardless of how chunks are interleaved across threads.

use glam::DVec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::geometry::Aabb;

/// A counter-based random stream with the draws the transport loop needs.
pub struct RandomStream {
  rng: ChaCha8Rng,
}

impl RandomStream {
  /// Create the stream for a given worker from the shared base seed.
  pub fn new(base_seed: u64, stream: u64) -> Self {
    let mut rng = ChaCha8Rng::seed_from_u64(base_seed);
    rng.set_stream(stream);
    Self { rng }
  }

  /// Uniform deviate in [0, 1).
  #[inline]
  pub fn uniform(&mut self) -> f64 {
    self.rng.random::<f64>()
  }

  /// Uniform position inside a box.
  #[inline]
  pub fn position(&mut self, aabb: &Aabb) -> DVec3 {
    aabb.frac_position(self.uniform(), self.uniform(), self.uniform())
  }

  /// Isotropic unit direction.
  pub fn direction(&mut self) -> DVec3 {
    let cos_theta = 2.0 * self.uniform() - 1.0;
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = 2.0 * std::f64::consts::PI * self.uniform();
    DVec3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta)
  }

  /// Draw from p(τ) ∝ exp(−τ) truncated at `tau_max`.
  ///
  /// For very small cutoffs the distribution degenerates towards uniform on
  /// [0, tau_max]; the series expansion below keeps the draw finite there.
  pub fn expon_cutoff(&mut self, tau_max: f64) -> f64 {
    if tau_max <= 0.0 {
      return 0.0;
    }
    let x = self.uniform();
    if tau_max > 1e-4 {
      let tau = -(1.0 - x * (1.0 - (-tau_max).exp())).ln();
      tau.min(tau_max)
    } else {
      // 1 - exp(-t) ≈ t for tiny t
      x * tau_max
    }
  }

  /// Index drawn from the discrete distribution with (unnormalized) weights.
  ///
  /// Returns 0 when all weights vanish.
  pub fn weighted_index(&mut self, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
      return 0;
    }
    let target = self.uniform() * total;
    let mut acc = 0.0;
    for (i, w) in weights.iter().enumerate() {
      acc += w;
      if target < acc {
        return i;
      }
    }
    weights.len() - 1
  }
}

/// Locate `x` in the monotone cumulative table `cdf`, clipped to the valid
/// index range. The table holds the running sums of the underlying weights.
pub fn locate_clip(cdf: &[f64], x: f64) -> usize {
  let n = cdf.len();
  debug_assert!(n > 0);
  let mut lo = 0usize;
  let mut hi = n;
  while hi - lo > 0 {
    let mid = (lo + hi) / 2;
    if x >= cdf[mid] {
      lo = mid + 1;
    } else {
      hi = mid;
    }
  }
  lo.min(n - 1)
}

/// Build the cumulative table for `weights` in place of a fresh vector.
pub fn cumulative(weights: &[f64]) -> Vec<f64> {
  let mut acc = 0.0;
  weights
    .iter()
    .map(|w| {
      acc += w;
      acc
    })
    .collect()
}
