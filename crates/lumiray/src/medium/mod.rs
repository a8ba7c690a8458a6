//! Medium model: per-cell densities, opacities and absorption bookkeeping.
//!
//! # Module Structure
//!
//! - [`mix`]: dust mixture trait and concrete mixes
//! - [`distribution`]: analytic density distributions
//! - [`accumulator`]: atomic f64 used for the absorbed-luminosity tallies
//!
//! After setup the medium is immutable except for the absorbed-luminosity
//! accumulators, which take commutative additive contributions from any
//! transport worker.

pub mod accumulator;
pub mod distribution;
pub mod mix;

pub use accumulator::AtomicF64;
pub use distribution::{
  DustDistribution, ParticleCloudDistribution, PowerLawSphereDistribution, UniformBoxDistribution,
};
pub use mix::{DustMix, GrayMix, HenyeyGreensteinMix};

use std::sync::Arc;
use std::sync::Mutex;

use rayon::prelude::*;
use tracing::info;

use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::path::TracePath;
use crate::rng::RandomStream;
use crate::wavelength::WavelengthGrid;

/// Stream offset reserved for the per-cell density sampling draws.
const DENSITY_STREAM_BASE: u64 = 1 << 32;

/// Options controlling medium setup.
#[derive(Clone, Copy, Debug)]
pub struct MediumOptions {
  /// Random density samples per cell when the grid offers no direct
  /// density interface.
  pub sample_count: usize,
  /// Base seed for the sampling streams.
  pub seed: u64,
  /// Keep a histogram of cells crossed per traced path.
  pub record_crossed: bool,
}

impl Default for MediumOptions {
  fn default() -> Self {
    Self { sample_count: 100, seed: 0, record_crossed: false }
  }
}

/// The absorbing and scattering medium discretized on a grid.
pub struct Medium {
  grid: Arc<dyn Grid>,
  distribution: Arc<dyn DustDistribution>,
  mixes: Vec<Arc<dyn DustMix>>,
  lambda: WavelengthGrid,
  n_cells: usize,
  n_comp: usize,
  volumes: Vec<f64>,
  densities: Vec<f64>,
  l_abs_stellar: Vec<AtomicF64>,
  l_abs_dust: Vec<AtomicF64>,
  crossed: Mutex<Vec<u64>>,
  record_crossed: bool,
}

impl Medium {
  /// Set up the medium: cell volumes from the grid, cell densities from the
  /// grid's direct interface or from random sampling of the distribution.
  pub fn new(
    grid: Arc<dyn Grid>,
    distribution: Arc<dyn DustDistribution>,
    mixes: Vec<Arc<dyn DustMix>>,
    lambda: WavelengthGrid,
    options: MediumOptions,
  ) -> Result<Self> {
    let n_comp = distribution.n_comp();
    if mixes.len() != n_comp {
      return Err(Error::config(format!(
        "the medium needs one mix per density component: {} mixes for {} components",
        mixes.len(),
        n_comp
      )));
    }
    if options.sample_count < 10 {
      return Err(Error::config("the number of density samples per cell must be at least 10"));
    }
    let n_cells = grid.cell_count();
    let n_lambda = lambda.n_lambda();

    info!(cells = n_cells, components = n_comp, "calculating cell volumes and densities");

    let volumes: Vec<f64> = (0..n_cells)
      .map(|m| if grid.weight(m) > 0.0 { grid.volume(m) } else { 0.0 })
      .collect();

    let densities: Vec<f64> = if let Some(direct) = grid.density_interface() {
      // the grid aligns with the density structure; no sampling needed
      let mut densities = Vec::with_capacity(n_cells * n_comp);
      for m in 0..n_cells {
        for h in 0..n_comp {
          densities.push(grid.weight(m) * direct.direct_density(h, m));
        }
      }
      densities
    } else {
      let rows: Vec<Vec<f64>> = (0..n_cells)
        .into_par_iter()
        .map(|m| -> Result<Vec<f64>> {
          let weight = grid.weight(m);
          if weight <= 0.0 {
            return Ok(vec![0.0; n_comp]);
          }
          let mut rng = RandomStream::new(options.seed, DENSITY_STREAM_BASE + m as u64);
          let mut sums = vec![0.0; n_comp];
          for _ in 0..options.sample_count {
            let r = grid.random_position_in(m, &mut rng)?;
            for (h, sum) in sums.iter_mut().enumerate() {
              *sum += distribution.density(h, r);
            }
          }
          Ok(sums.into_iter().map(|s| weight * s / options.sample_count as f64).collect())
        })
        .collect::<Result<Vec<_>>>()?;
      rows.into_iter().flatten().collect()
    };

    let l_abs_stellar = (0..n_cells * n_lambda).map(|_| AtomicF64::new(0.0)).collect();
    let l_abs_dust = (0..n_cells * n_lambda).map(|_| AtomicF64::new(0.0)).collect();

    Ok(Self {
      grid,
      distribution,
      mixes,
      lambda,
      n_cells,
      n_comp,
      volumes,
      densities,
      l_abs_stellar,
      l_abs_dust,
      crossed: Mutex::new(Vec::new()),
      record_crossed: options.record_crossed,
    })
  }

  /// Number of cells.
  #[inline]
  pub fn n_cells(&self) -> usize {
    self.n_cells
  }

  /// Number of dust components.
  #[inline]
  pub fn n_comp(&self) -> usize {
    self.n_comp
  }

  /// The underlying grid.
  pub fn grid(&self) -> &dyn Grid {
    self.grid.as_ref()
  }

  /// The theoretical density distribution.
  pub fn distribution(&self) -> &dyn DustDistribution {
    self.distribution.as_ref()
  }

  /// The mix of component `h`.
  pub fn mix(&self, h: usize) -> &dyn DustMix {
    self.mixes[h].as_ref()
  }

  /// The wavelength grid.
  pub fn lambda_grid(&self) -> &WavelengthGrid {
    &self.lambda
  }

  /// Volume of cell `m`.
  #[inline]
  pub fn volume(&self, m: usize) -> f64 {
    self.volumes[m]
  }

  /// Density of component `h` in cell `m`.
  #[inline]
  pub fn density(&self, m: usize, h: usize) -> f64 {
    self.densities[m * self.n_comp + h]
  }

  /// Total density in cell `m`.
  pub fn density_total(&self, m: usize) -> f64 {
    self.densities[m * self.n_comp..(m + 1) * self.n_comp].iter().sum()
  }

  /// Extinction opacity κρ of cell `m` at wavelength bin `ell`.
  pub fn kappa_rho_ext(&self, ell: usize, m: usize) -> f64 {
    (0..self.n_comp)
      .map(|h| self.mixes[h].kappa_ext(ell) * self.density(m, h))
      .sum()
  }

  /// Local scattering albedo of cell `m` at wavelength bin `ell`, weighted
  /// over the components by density.
  pub fn local_albedo(&self, ell: usize, m: usize) -> f64 {
    let mut ksca = 0.0;
    let mut kext = 0.0;
    for h in 0..self.n_comp {
      let rho = self.density(m, h);
      ksca += self.mixes[h].kappa_sca(ell) * rho;
      kext += self.mixes[h].kappa_ext(ell) * rho;
    }
    if kext > 0.0 {
      ksca / kext
    } else {
      0.0
    }
  }

  /// Per-component scattering weights κ_sca(h)·ρ(m,h), written into `out`.
  pub fn scattering_weights(&self, ell: usize, m: usize, out: &mut Vec<f64>) {
    out.clear();
    out.extend((0..self.n_comp).map(|h| self.mixes[h].kappa_sca(ell) * self.density(m, h)));
  }

  /// Trace the packet path on the grid and fill its optical-depth tables;
  /// returns the total optical depth.
  pub fn fill_path(&self, ell: usize, path: &mut TracePath) -> Result<f64> {
    self.grid.trace(path)?;
    if self.record_crossed {
      self.record_crossing(path.len());
    }
    path.fill_optical_depth(|m| self.kappa_rho_ext(ell, m))
  }

  /// Add absorbed luminosity to cell `m`, to the stellar or dust tally.
  pub fn absorb(&self, m: usize, ell: usize, delta: f64, stellar: bool) {
    let idx = m * self.lambda.n_lambda() + ell;
    if stellar {
      self.l_abs_stellar[idx].fetch_add(delta);
    } else {
      self.l_abs_dust[idx].fetch_add(delta);
    }
  }

  /// Absorbed stellar luminosity in cell `m`, bin `ell`.
  pub fn l_abs_stellar(&self, m: usize, ell: usize) -> f64 {
    self.l_abs_stellar[m * self.lambda.n_lambda() + ell].load()
  }

  /// Absorbed dust luminosity in cell `m`, bin `ell`.
  pub fn l_abs_dust(&self, m: usize, ell: usize) -> f64 {
    self.l_abs_dust[m * self.lambda.n_lambda() + ell].load()
  }

  /// Total absorbed luminosity in cell `m`, bin `ell`.
  pub fn l_abs(&self, m: usize, ell: usize) -> f64 {
    self.l_abs_stellar(m, ell) + self.l_abs_dust(m, ell)
  }

  /// Bolometric absorbed luminosity of cell `m`: Σ_ℓ L_abs(m,ℓ)·Δλ_ℓ.
  pub fn bolometric_absorbed(&self, m: usize) -> f64 {
    (0..self.lambda.n_lambda())
      .map(|ell| self.l_abs(m, ell) * self.lambda.dlambda(ell))
      .sum()
  }

  /// Total absorbed stellar luminosity over all cells and bins.
  pub fn l_abs_stellar_total(&self) -> f64 {
    self.l_abs_stellar.iter().map(|a| a.load()).sum()
  }

  /// Total absorbed dust luminosity over all cells and bins.
  pub fn l_abs_dust_total(&self) -> f64 {
    self.l_abs_dust.iter().map(|a| a.load()).sum()
  }

  /// Zero the dust absorption tallies; the stellar tallies are preserved.
  pub fn reboot_dust_absorption(&self) {
    for cell in &self.l_abs_dust {
      cell.store(0.0);
    }
  }

  /// Mean radiation field intensity J_ℓ in cell `m`.
  ///
  /// Cells where both the absorbed luminosity and the opacity vanish report
  /// zero instead of NaN.
  pub fn mean_intensity(&self, m: usize) -> Vec<f64> {
    let n_lambda = self.lambda.n_lambda();
    let fac = 4.0 * std::f64::consts::PI * self.volume(m);
    (0..n_lambda)
      .map(|ell| {
        let kappa_abs_rho: f64 = (0..self.n_comp)
          .map(|h| self.mixes[h].kappa_abs(ell) * self.density(m, h))
          .sum();
        let j = self.l_abs(m, ell) / (kappa_abs_rho * fac) / self.lambda.dlambda(ell);
        if j.is_finite() {
          j
        } else {
          0.0
        }
      })
      .collect()
  }

  /// Record one traced path in the cells-crossed histogram, growing it as
  /// needed.
  fn record_crossing(&self, n_crossed: usize) {
    let mut crossed = self.crossed.lock().expect("crossed histogram lock");
    if n_crossed >= crossed.len() {
      crossed.resize(n_crossed + 1, 0);
    }
    crossed[n_crossed] += 1;
  }

  /// Snapshot of the cells-crossed histogram.
  pub fn crossed_histogram(&self) -> Vec<u64> {
    self.crossed.lock().expect("crossed histogram lock").clone()
  }
}

#[cfg(test)]
#[path = "medium_test.rs"]
mod medium_test;
