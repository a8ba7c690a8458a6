//! Dust-system diagnostics: convergence check, density maps, quality
//! metrics, cell properties, crossed-cells histogram and observer cubes.
//!
//! File names follow `<prefix>_<kind>`, e.g. `run_ds_convergence.dat` or
//! `run_ds_trhoxy.fits`.

use std::path::Path;

use glam::DVec3;
use rayon::prelude::*;
use tracing::info;

use crate::error::Result;
use crate::grid::GridExtents;
use crate::medium::Medium;
use crate::observer::ObserverSet;
use crate::path::TracePath;
use crate::rng::RandomStream;

use super::fits::write_fits;
use super::text::{write_grid_plots, TextFile};

/// Options for the diagnostics suite.
#[derive(Clone, Debug)]
pub struct DiagnosticsOptions {
  /// Pixels per axis of the density maps.
  pub map_pixels: usize,
  /// Random probes for the quality metrics.
  pub quality_samples: usize,
  /// Reference opacity for the cell optical-depth statistics.
  pub reference_opacity: f64,
  /// Seed for the probe streams.
  pub seed: u64,
}

impl Default for DiagnosticsOptions {
  fn default() -> Self {
    Self { map_pixels: 1024, quality_samples: 100, reference_opacity: 2600.0, seed: 0 }
  }
}

/// Surface density along ±`direction` through the center, integrated over
/// the gridded cell densities.
fn traced_sigma(medium: &Medium, direction: DVec3) -> Result<f64> {
  let mut sigma = 0.0;
  let mut path = TracePath::new();
  for k in [direction, -direction] {
    path.start(DVec3::ZERO, k);
    medium.grid().trace(&mut path)?;
    for seg in path.segments() {
      if let Some(m) = seg.cell {
        sigma += seg.ds * medium.density_total(m);
      }
    }
  }
  Ok(sigma)
}

/// Write the grid convergence check: integrated surface densities and the
/// total mass against the theoretical distribution.
pub fn write_convergence(medium: &Medium, dir: &Path, prefix: &str) -> Result<()> {
  info!("performing a convergence check on the grid");
  let mass: f64 = (0..medium.n_cells()).map(|m| medium.density_total(m) * medium.volume(m)).sum();
  let sigma_x = traced_sigma(medium, DVec3::X)?;
  let sigma_y = traced_sigma(medium, DVec3::Y)?;
  let sigma_z = traced_sigma(medium, DVec3::Z)?;

  let path = dir.join(format!("{prefix}_ds_convergence.dat"));
  let mut file = TextFile::create(&path)?;
  file.line("Convergence check on the grid:")?;
  let dist = medium.distribution();
  match dist.dimension() {
    1 => {
      file.line("   - radial (r-axis) surface density")?;
      file.line(format!("         expected value = {:e}", 0.5 * dist.sigma_x()))?;
      file.line(format!("         actual value =   {:e}", 0.5 * sigma_x))?;
    }
    2 => {
      file.line("   - edge-on (R-axis) surface density")?;
      file.line(format!("         expected value = {:e}", 0.5 * dist.sigma_x()))?;
      file.line(format!("         actual value =   {:e}", 0.5 * sigma_x))?;
      file.line("   - face-on (Z-axis) surface density")?;
      file.line(format!("         expected value = {:e}", dist.sigma_z()))?;
      file.line(format!("         actual value =   {:e}", sigma_z))?;
    }
    _ => {
      for (axis, expected, actual) in [
        ("X", dist.sigma_x(), sigma_x),
        ("Y", dist.sigma_y(), sigma_y),
        ("Z", dist.sigma_z(), sigma_z),
      ] {
        file.line(format!("   - {axis}-axis surface density"))?;
        file.line(format!("         expected value = {expected:e}"))?;
        file.line(format!("         actual value =   {actual:e}"))?;
      }
    }
  }
  file.line("   - total dust mass")?;
  file.line(format!("         expected value = {:e}", dist.total_mass()))?;
  file.line(format!("         actual value =   {:e}", mass))?;
  file.finish()?;
  info!(file = %path.display(), "wrote convergence check");
  Ok(())
}

/// Write the theoretical and gridded density maps in the coordinate planes
/// to FITS files (`ds_trho*` / `ds_grho*`).
pub fn write_density_maps(medium: &Medium, dir: &Path, prefix: &str, np: usize) -> Result<()> {
  let grid = medium.grid();
  let (xmax, ymax, zmax) = (grid.xmax(), grid.ymax(), grid.zmax());
  let dim = medium.distribution().dimension();

  // plane selector flags follow the distribution's symmetry
  let mut planes = vec![(true, true, false, "xy")];
  if dim >= 2 {
    planes.push((true, false, true, "xz"));
  }
  if dim == 3 {
    planes.push((false, true, true, "yz"));
  }

  for (xd, yd, zd, plane) in planes {
    info!(plane, "calculating density map");
    let xres = 2.0 * xmax / np as f64;
    let yres = 2.0 * ymax / np as f64;
    let zres = 2.0 * zmax / np as f64;
    let xbase = -xmax + 0.5 * xres;
    let ybase = -ymax + 0.5 * yres;
    let zbase = -zmax + 0.5 * zres;

    // one row of the two maps per parallel task
    let rows: Vec<(Vec<f64>, Vec<f64>)> = (0..np)
      .into_par_iter()
      .map(|j| {
        let z = if zd { zbase + j as f64 * zres } else { 0.0 };
        let mut trow = Vec::with_capacity(np);
        let mut grow = Vec::with_capacity(np);
        for i in 0..np {
          let x = if xd { xbase + i as f64 * xres } else { 0.0 };
          let y = if yd {
            ybase + (if zd { i } else { j }) as f64 * yres
          } else {
            0.0
          };
          let r = DVec3::new(x, y, z);
          trow.push(medium.distribution().density_total(r));
          grow.push(match medium.grid().cell_of(r) {
            Some(m) => medium.density_total(m),
            None => 0.0,
          });
        }
        (trow, grow)
      })
      .collect();

    let trho: Vec<f64> = rows.iter().flat_map(|(t, _)| t.iter().copied()).collect();
    let grho: Vec<f64> = rows.iter().flat_map(|(_, g)| g.iter().copied()).collect();
    let res1 = if xd { xres } else { yres };
    let res2 = if zd { zres } else { yres };
    for (label, data) in [("trho", &trho), ("grho", &grho)] {
      let path = dir.join(format!("{prefix}_ds_{label}{plane}.fits"));
      write_fits(&path, data, np, np, 1, res1, res2, "kg/m3", "m")?;
      info!(file = %path.display(), "wrote density map");
    }
  }
  Ok(())
}

/// Write the grid quality metrics: statistics of the density and
/// optical-depth deltas between the gridded and theoretical medium.
pub fn write_quality(medium: &Medium, dir: &Path, prefix: &str, options: &DiagnosticsOptions) -> Result<()> {
  let extent = medium.grid().extent();
  let n = options.quality_samples.max(2);
  let mut rng = RandomStream::new(options.seed, 0x71a1);

  info!("calculating quality metric for the grid density");
  let mut density_deltas = Vec::with_capacity(n);
  for _ in 0..n {
    let r = rng.position(&extent);
    let grid_rho = match medium.grid().cell_of(r) {
      Some(m) => medium.density_total(m),
      None => 0.0,
    };
    density_deltas.push((grid_rho - medium.distribution().density_total(r)).abs());
  }
  let (rho_mean, rho_stddev) = mean_stddev(&density_deltas);

  info!("calculating quality metric for the optical depth in the grid");
  let kappa: f64 = (0..medium.n_comp()).map(|h| medium.mix(h).kappa_ext(0)).sum();
  let mut depth_deltas = Vec::with_capacity(n);
  let mut path = TracePath::new();
  for _ in 0..n {
    let r = rng.position(&extent);
    let k = rng.direction();
    path.start(r, k);
    medium.grid().trace(&mut path)?;
    let tau_grid = kappa
      * path
        .segments()
        .iter()
        .filter_map(|seg| seg.cell.map(|m| seg.ds * medium.density_total(m)))
        .sum::<f64>();

    // fine midpoint integration of the theoretical density over the chord
    let length = path.total_length();
    let steps = 1000;
    let ds = length / steps as f64;
    let tau_theory = kappa
      * (0..steps)
        .map(|s| medium.distribution().density_total(r + k * ((s as f64 + 0.5) * ds)) * ds)
        .sum::<f64>();
    depth_deltas.push((tau_grid - tau_theory).abs());
  }
  let (tau_mean, tau_stddev) = mean_stddev(&depth_deltas);

  let path = dir.join(format!("{prefix}_ds_quality.dat"));
  let mut file = TextFile::create(&path)?;
  file.line(format!("Mean value of density delta: {rho_mean:e}"))?;
  file.line(format!("Standard deviation of density delta: {rho_stddev:e}"))?;
  file.line(format!("Mean value of optical depth delta: {tau_mean:e}"))?;
  file.line(format!("Standard deviation of optical depth delta: {tau_stddev:e}"))?;
  file.finish()?;
  info!(file = %path.display(), "wrote quality metrics");
  Ok(())
}

/// Write per-cell properties and the optical-depth statistics.
pub fn write_cell_properties(medium: &Medium, dir: &Path, prefix: &str, options: &DiagnosticsOptions) -> Result<()> {
  let path = dir.join(format!("{prefix}_ds_cellprops.dat"));
  let mut file = TextFile::create(&path)?;
  file.comment("column 1: volume (m3)")?;
  file.comment("column 2: density (kg/m3)")?;
  file.comment("column 3: mass fraction")?;
  file.comment("column 4: optical depth")?;

  let total_mass: f64 = (0..medium.n_cells()).map(|m| medium.density_total(m) * medium.volume(m)).sum();
  let mut tauv = Vec::with_capacity(medium.n_cells());
  for m in 0..medium.n_cells() {
    let rho = medium.density_total(m);
    let volume = medium.volume(m);
    let delta = if total_mass > 0.0 { rho * volume / total_mass } else { 0.0 };
    let tau = options.reference_opacity * rho * volume.cbrt();
    file.row(&[volume, rho, delta, tau])?;
    tauv.push(tau);
  }

  let tau_min = tauv.iter().cloned().fold(f64::MAX, f64::min);
  let tau_max = tauv.iter().cloned().fold(f64::MIN, f64::max);
  let tau_avg = tauv.iter().sum::<f64>() / tauv.len() as f64;

  // 90th percentile from a fixed-bin histogram
  let bins = 500usize;
  let mut counts = vec![0usize; bins + 1];
  let span = (tau_max - tau_min).max(f64::MIN_POSITIVE);
  for &tau in &tauv {
    let index = (((tau - tau_min) / span * bins as f64) as usize).min(bins);
    counts[index] += 1;
  }
  let mut count = 0usize;
  let mut index = 0usize;
  while index < bins {
    count += counts[index];
    if count as f64 > 0.9 * tauv.len() as f64 {
      break;
    }
    index += 1;
  }
  let tau90 = tau_min + index as f64 * span / bins as f64;

  file.comment(format!("smallest optical depth: {tau_min:e}"))?;
  file.comment(format!("largest optical depth:  {tau_max:e}"))?;
  file.comment(format!("average optical depth:  {tau_avg:e}"))?;
  file.comment(format!("90 % of the cells have optical depth smaller than: {tau90:e}"))?;
  file.finish()?;

  info!(tau_min, tau_max, tau_avg, tau90, "cell optical depth statistics");
  info!(file = %path.display(), "wrote cell properties");
  Ok(())
}

/// Write the histogram of cells crossed per traced path.
pub fn write_crossed(medium: &Medium, dir: &Path, prefix: &str) -> Result<()> {
  let histogram = medium.crossed_histogram();
  let path = dir.join(format!("{prefix}_ds_crossed.dat"));
  let mut file = TextFile::create(&path)?;
  file.comment(format!("total number of cells in grid: {}", medium.n_cells()))?;
  file.comment("column 1: number of cells crossed")?;
  file.comment("column 2: number of paths that crossed this number of cells")?;
  for (crossed, &count) in histogram.iter().enumerate() {
    file.line(format!("{crossed}\t{count}"))?;
  }
  file.finish()?;
  info!(file = %path.display(), "wrote cells-crossed histogram");
  Ok(())
}

/// Write the grid structure plot files.
pub fn write_grid_structure(medium: &Medium, dir: &Path, prefix: &str) -> Result<()> {
  let data = medium.grid().plot_data();
  if data.is_empty() {
    return Ok(());
  }
  write_grid_plots(&data, dir, prefix)
}

/// Write one FITS cube per observer.
pub fn write_observer_cubes(observers: &ObserverSet, dir: &Path, prefix: &str) -> Result<()> {
  observers.flush();
  for (o, observer) in observers.observers().iter().enumerate() {
    let (nx, ny) = observer.shape();
    let (dx, dy) = observer.pixel_size();
    let cube = observers.cube(o);
    let path = dir.join(format!("{prefix}_{}.fits", observer.name()));
    write_fits(&path, &cube, nx, ny, observers.n_lambda(), dx, dy, "W/m", "m")?;
    info!(file = %path.display(), "wrote observer cube");
  }
  Ok(())
}

fn mean_stddev(values: &[f64]) -> (f64, f64) {
  let n = values.len() as f64;
  let mean = values.iter().sum::<f64>() / n;
  let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
  (mean, var.sqrt())
}

#[cfg(test)]
#[path = "diagnostics_test.rs"]
mod diagnostics_test;
