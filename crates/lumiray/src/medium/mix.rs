//! Dust mixtures: opacities and scattering phase functions.
//!
//! The concrete physics of specific dust compositions (opacity tables) stays
//! behind this trait; the engine only needs per-wavelength coefficients and
//! a normalized phase function it can evaluate and sample.

use glam::DVec3;

use crate::rng::RandomStream;

/// Optical properties of one dust component.
///
/// The phase function is normalized so its average over all outgoing
/// directions is one: ∫ Φ(k_in, k_out) dΩ / 4π = 1.
pub trait DustMix: Send + Sync {
  /// Absorption mass coefficient at wavelength bin `ell`.
  fn kappa_abs(&self, ell: usize) -> f64;

  /// Extinction mass coefficient at wavelength bin `ell`.
  fn kappa_ext(&self, ell: usize) -> f64;

  /// Scattering mass coefficient: extinction minus absorption.
  fn kappa_sca(&self, ell: usize) -> f64 {
    self.kappa_ext(ell) - self.kappa_abs(ell)
  }

  /// Scattering albedo; zero when there is no extinction.
  fn albedo(&self, ell: usize) -> f64 {
    let ext = self.kappa_ext(ell);
    if ext > 0.0 {
      self.kappa_sca(ell) / ext
    } else {
      0.0
    }
  }

  /// Phase function value for scattering from `k_in` into `k_out`.
  fn phase(&self, ell: usize, k_in: DVec3, k_out: DVec3) -> f64;

  /// Draw a scattered direction for a packet arriving along `k_in`.
  fn sample_phase(&self, ell: usize, k_in: DVec3, rng: &mut RandomStream) -> DVec3;
}

/// Wavelength-independent mix with isotropic scattering.
pub struct GrayMix {
  kappa_abs: f64,
  kappa_sca: f64,
}

impl GrayMix {
  /// Create a gray mix from its absorption and scattering coefficients.
  pub fn new(kappa_abs: f64, kappa_sca: f64) -> Self {
    Self { kappa_abs, kappa_sca }
  }
}

impl DustMix for GrayMix {
  fn kappa_abs(&self, _ell: usize) -> f64 {
    self.kappa_abs
  }

  fn kappa_ext(&self, _ell: usize) -> f64 {
    self.kappa_abs + self.kappa_sca
  }

  fn phase(&self, _ell: usize, _k_in: DVec3, _k_out: DVec3) -> f64 {
    1.0
  }

  fn sample_phase(&self, _ell: usize, _k_in: DVec3, rng: &mut RandomStream) -> DVec3 {
    rng.direction()
  }
}

/// Mix with per-wavelength coefficient tables and a Henyey–Greenstein phase
/// function with per-wavelength asymmetry.
pub struct HenyeyGreensteinMix {
  kappa_abs: Vec<f64>,
  kappa_sca: Vec<f64>,
  g: Vec<f64>,
}

impl HenyeyGreensteinMix {
  /// Create the mix from per-wavelength tables; `g` in (−1, 1), zero means
  /// isotropic.
  pub fn new(kappa_abs: Vec<f64>, kappa_sca: Vec<f64>, g: Vec<f64>) -> Self {
    debug_assert_eq!(kappa_abs.len(), kappa_sca.len());
    debug_assert_eq!(kappa_abs.len(), g.len());
    Self { kappa_abs, kappa_sca, g }
  }

  /// Convenience constructor for wavelength-independent values.
  pub fn constant(kappa_abs: f64, kappa_sca: f64, g: f64, n_lambda: usize) -> Self {
    Self::new(vec![kappa_abs; n_lambda], vec![kappa_sca; n_lambda], vec![g; n_lambda])
  }

  fn phase_cos(g: f64, cos_theta: f64) -> f64 {
    let denom = 1.0 + g * g - 2.0 * g * cos_theta;
    (1.0 - g * g) / denom.powf(1.5)
  }
}

impl DustMix for HenyeyGreensteinMix {
  fn kappa_abs(&self, ell: usize) -> f64 {
    self.kappa_abs[ell]
  }

  fn kappa_ext(&self, ell: usize) -> f64 {
    self.kappa_abs[ell] + self.kappa_sca[ell]
  }

  fn kappa_sca(&self, ell: usize) -> f64 {
    self.kappa_sca[ell]
  }

  fn phase(&self, ell: usize, k_in: DVec3, k_out: DVec3) -> f64 {
    let g = self.g[ell];
    if g.abs() < 1e-6 {
      return 1.0;
    }
    Self::phase_cos(g, k_in.dot(k_out))
  }

  fn sample_phase(&self, ell: usize, k_in: DVec3, rng: &mut RandomStream) -> DVec3 {
    let g = self.g[ell];
    if g.abs() < 1e-6 {
      return rng.direction();
    }
    // standard inversion of the HG cumulative distribution
    let f = (1.0 - g * g) / (1.0 - g + 2.0 * g * rng.uniform());
    let cos_theta = ((1.0 + g * g - f * f) / (2.0 * g)).clamp(-1.0, 1.0);
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = 2.0 * std::f64::consts::PI * rng.uniform();

    // rotate (sinθ cosφ, sinθ sinφ, cosθ) from the frame aligned with k_in
    let (u, v) = orthonormal_basis(k_in);
    (u * (sin_theta * phi.cos()) + v * (sin_theta * phi.sin()) + k_in * cos_theta).normalize()
  }
}

/// Two unit vectors completing `w` (unit length) to an orthonormal frame.
fn orthonormal_basis(w: DVec3) -> (DVec3, DVec3) {
  let u = if w.x.abs() > 0.9 { DVec3::Y } else { DVec3::X };
  let u = (u - w * u.dot(w)).normalize();
  let v = w.cross(u);
  (u, v)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_gray_mix_coefficients() {
    let mix = GrayMix::new(0.6, 0.4);
    assert_eq!(mix.kappa_ext(0), 1.0);
    assert_eq!(mix.kappa_sca(0), 0.4);
    assert!((mix.albedo(0) - 0.4).abs() < 1e-12);
  }

  #[test]
  fn test_hg_phase_normalization() {
    // ∫ Φ(cosθ) dΩ / 4π = 1, checked by quadrature over cosθ
    let g = 0.5;
    let n = 100_000;
    let mut sum = 0.0;
    for i in 0..n {
      let cos_theta = -1.0 + 2.0 * (i as f64 + 0.5) / n as f64;
      sum += HenyeyGreensteinMix::phase_cos(g, cos_theta);
    }
    let avg = sum / n as f64;
    assert!((avg - 1.0).abs() < 1e-6, "avg = {avg}");
  }

  #[test]
  fn test_hg_sampling_matches_phase() {
    // empirical mean of cosθ equals the asymmetry parameter g
    let n_lambda = 1;
    let g = 0.3;
    let mix = HenyeyGreensteinMix::constant(0.5, 0.5, g, n_lambda);
    let mut rng = RandomStream::new(2, 0);
    let k_in = DVec3::new(0.0, 0.0, 1.0);
    let n = 200_000;
    let mean_cos: f64 = (0..n)
      .map(|_| mix.sample_phase(0, k_in, &mut rng).dot(k_in))
      .sum::<f64>()
      / n as f64;
    assert!((mean_cos - g).abs() < 5e-3, "mean cos = {mean_cos}");
  }

  #[test]
  fn test_hg_sampling_histogram() {
    // bin the sampled scattering angle in 1° bins and compare against the
    // analytic distribution p(θ) = Φ(cosθ)·sinθ/2 with a χ² test
    let g = 0.6;
    let mix = HenyeyGreensteinMix::constant(0.5, 0.5, g, 1);
    let mut rng = RandomStream::new(3, 0);
    let k_in = DVec3::new(1.0, 0.0, 0.0);
    let n = 1_000_000usize;
    let bins = 180;
    let mut counts = vec![0usize; bins];
    for _ in 0..n {
      let c = mix.sample_phase(0, k_in, &mut rng).dot(k_in).clamp(-1.0, 1.0);
      let theta = c.acos();
      let b = ((theta / std::f64::consts::PI * bins as f64) as usize).min(bins - 1);
      counts[b] += 1;
    }
    let mut chi2 = 0.0;
    let mut dof = 0usize;
    let dtheta = std::f64::consts::PI / bins as f64;
    for (b, &count) in counts.iter().enumerate() {
      let theta = (b as f64 + 0.5) * dtheta;
      let expected = n as f64 * HenyeyGreensteinMix::phase_cos(g, theta.cos()) / 2.0 * theta.sin() * dtheta;
      // the χ² statistic is only meaningful for adequately filled bins
      if expected >= 5.0 {
        chi2 += (count as f64 - expected).powi(2) / expected;
        dof += 1;
      }
    }
    // the 99% χ² quantile is approximately dof + 2.33·√(2·dof)
    let limit = dof as f64 + 2.33 * (2.0 * dof as f64).sqrt();
    assert!(chi2 < limit, "chi² = {chi2:.1} over {dof} bins (limit {limit:.1})");
  }

  #[test]
  fn test_sampled_directions_are_unit() {
    let mix = HenyeyGreensteinMix::constant(1.0, 1.0, -0.4, 1);
    let mut rng = RandomStream::new(4, 0);
    let k_in = DVec3::new(0.6, -0.8, 0.0);
    for _ in 0..1000 {
      let k = mix.sample_phase(0, k_in, &mut rng);
      assert!((k.length() - 1.0).abs() < 1e-9);
    }
  }
}
