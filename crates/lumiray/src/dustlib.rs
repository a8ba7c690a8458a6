//! Dust library: amortizes emission-spectrum computation over cells.
//!
//! Many cells see nearly the same radiation field; the library maps each
//! cell `m` to an entry `n` of a smaller set, averages the mean intensity
//! over the cells of an entry, and computes one emission spectrum per entry
//! (or per cell when several dust components weight it differently). The
//! mapping strategy is caller-provided; the identity mapping reproduces a
//! per-cell computation.

use std::sync::{Mutex, RwLock};

use tracing::info;

use crate::error::Result;
use crate::medium::{DustMix, Medium};
use crate::parallel::{parallel_call, Communicator, StaggeredAssigner};
use crate::wavelength::WavelengthGrid;

/// Strategy that assigns each cell to a library entry.
pub trait LibraryMapping: Send + Sync {
  /// Number of library entries for a grid of `n_cells` cells.
  fn n_entries(&self, n_cells: usize) -> usize;

  /// Entry for cell `m`; `None` leaves the cell without an emission
  /// spectrum.
  fn entry_of(&self, m: usize) -> Option<usize>;
}

/// The identity mapping: every cell is its own entry.
pub struct IdentityMapping;

impl LibraryMapping for IdentityMapping {
  fn n_entries(&self, n_cells: usize) -> usize {
    n_cells
  }

  fn entry_of(&self, m: usize) -> Option<usize> {
    Some(m)
  }
}

/// Round-robin compression onto a fixed number of entries. A stand-in for
/// smarter field-binning strategies, which plug in through the same trait.
pub struct ModuloMapping {
  entries: usize,
}

impl ModuloMapping {
  /// Map cells onto `entries` entries by index modulo.
  pub fn new(entries: usize) -> Self {
    Self { entries: entries.max(1) }
  }
}

impl LibraryMapping for ModuloMapping {
  fn n_entries(&self, n_cells: usize) -> usize {
    self.entries.min(n_cells.max(1))
  }

  fn entry_of(&self, m: usize) -> Option<usize> {
    Some(m % self.entries)
  }
}

/// Computes the emissivity spectrum of a dust mix exposed to a mean
/// radiation field. The concrete emission physics stays behind this trait.
pub trait DustEmissivity: Send + Sync {
  /// Emissivity per wavelength bin for `mix` in the field `j`.
  fn emissivity(&self, mix: &dyn DustMix, j: &[f64], lambda: &WavelengthGrid) -> Vec<f64>;
}

/// Emissivity with a fixed spectral shape scaled by the absorbed power,
/// sufficient wherever only the normalized spectrum matters.
pub struct TemplateEmissivity {
  template: Vec<f64>,
}

impl TemplateEmissivity {
  /// Create the emissivity from a per-wavelength template.
  pub fn new(template: Vec<f64>) -> Self {
    Self { template }
  }

  /// Flat template over `n_lambda` bins.
  pub fn flat(n_lambda: usize) -> Self {
    Self::new(vec![1.0; n_lambda])
  }
}

impl DustEmissivity for TemplateEmissivity {
  fn emissivity(&self, mix: &dyn DustMix, j: &[f64], lambda: &WavelengthGrid) -> Vec<f64> {
    // absorbed power per unit mass sets the level, the template the shape
    let power: f64 = (0..lambda.n_lambda())
      .map(|ell| mix.kappa_abs(ell) * j[ell] * lambda.dlambda(ell))
      .sum();
    self.template.iter().map(|&t| t * power).collect()
  }
}

/// The dust library itself.
pub struct DustLib {
  mapping: Box<dyn LibraryMapping>,
  emissivity: Box<dyn DustEmissivity>,
  /// Normalized emission spectra, indexed per cell (several components) or
  /// per entry (single component); filled by `calculate`.
  spectra: RwLock<Vec<Vec<f64>>>,
  entry_of_cell: RwLock<Vec<i64>>,
  entries_used: RwLock<usize>,
}

impl DustLib {
  /// Create the library with the given mapping and emissivity strategies.
  pub fn new(mapping: Box<dyn LibraryMapping>, emissivity: Box<dyn DustEmissivity>) -> Self {
    Self {
      mapping,
      emissivity,
      spectra: RwLock::new(Vec::new()),
      entry_of_cell: RwLock::new(Vec::new()),
      entries_used: RwLock::new(0),
    }
  }

  /// Identity mapping with a flat template, the all-defaults library.
  pub fn identity(n_lambda: usize) -> Self {
    Self::new(Box::new(IdentityMapping), Box::new(TemplateEmissivity::flat(n_lambda)))
  }

  /// Number of library entries used by at least one cell in the last
  /// `calculate` run.
  pub fn entries_used(&self) -> usize {
    *self.entries_used.read().expect("library stats lock")
  }

  /// Recompute the normalized emission spectra from the medium's current
  /// absorption state.
  pub fn calculate(&self, medium: &Medium, comm: &dyn Communicator) -> Result<()> {
    let n_cells = medium.n_cells();
    let n_comp = medium.n_comp();
    let lambda = medium.lambda_grid();
    let n_lambda = lambda.n_lambda();
    let n_lib = self.mapping.n_entries(n_cells);

    // mapping vector and its inverse
    let entry_of_cell: Vec<i64> = (0..n_cells)
      .map(|m| self.mapping.entry_of(m).map_or(-1, |n| n as i64))
      .collect();
    let mut cells_of_entry: Vec<Vec<usize>> = vec![Vec::new(); n_lib];
    for (m, &n) in entry_of_cell.iter().enumerate() {
      if n >= 0 {
        cells_of_entry[n as usize].push(m);
      }
    }
    let used = cells_of_entry.iter().filter(|c| !c.is_empty()).count();
    info!(used, total = n_lib, "library entries in use");

    // one output row per cell with several components, per entry otherwise
    let n_out = if n_comp > 1 { n_cells } else { n_lib };
    let rows: Vec<Mutex<Vec<f64>>> = (0..n_out).map(|_| Mutex::new(Vec::new())).collect();

    // every process computes a staggered subset of the entries; rows of
    // distinct entries never overlap, so the row locks are uncontended
    let assigner = StaggeredAssigner::new(n_lib, comm.rank(), comm.size());
    parallel_call(&assigner, |n| {
      let mv = &cells_of_entry[n];
      if mv.is_empty() {
        return Ok(());
      }

      // average radiation field over the cells mapping to this entry
      let mut j = vec![0.0; n_lambda];
      for &m in mv {
        for (ell, jm) in medium.mean_intensity(m).into_iter().enumerate() {
          j[ell] += jm;
        }
      }
      for jl in &mut j {
        *jl /= mv.len() as f64;
      }

      if n_comp > 1 {
        // component emissivities combined per cell, weighted by density
        let evv: Vec<Vec<f64>> =
          (0..n_comp).map(|h| self.emissivity.emissivity(medium.mix(h), &j, lambda)).collect();
        for &m in mv {
          let mut row = vec![0.0; n_lambda];
          for (h, ev) in evv.iter().enumerate() {
            let rho = medium.density(m, h);
            for (ell, value) in row.iter_mut().enumerate() {
              *value += ev[ell] * rho;
            }
          }
          normalize(&mut row, lambda);
          *rows[m].lock().expect("library row lock") = row;
        }
      } else {
        let mut row = self.emissivity.emissivity(medium.mix(0), &j, lambda);
        normalize(&mut row, lambda);
        *rows[n].lock().expect("library row lock") = row;
      }
      Ok(())
    })?;

    comm.wait("the emission spectra calculation");

    // gather the rows; with several processes each row is completed by the
    // process that owns its entry and broadcast to the others
    let mut spectra: Vec<Vec<f64>> = rows
      .into_iter()
      .map(|row| {
        let row = row.into_inner().expect("library row lock");
        if row.is_empty() {
          vec![0.0; n_lambda]
        } else {
          row
        }
      })
      .collect();
    if comm.is_multi_proc() {
      for (idx, row) in spectra.iter_mut().enumerate() {
        let entry = if n_comp > 1 { entry_of_cell[idx].max(0) as usize } else { idx };
        comm.broadcast(row, assigner.rank_for_index(entry));
      }
    }

    *self.spectra.write().expect("library spectra lock") = spectra;
    *self.entry_of_cell.write().expect("library mapping lock") = entry_of_cell;
    *self.entries_used.write().expect("library stats lock") = used;
    Ok(())
  }

  /// Normalized emission luminosity of cell `m` at wavelength bin `ell`;
  /// zero before the first `calculate` run.
  pub fn luminosity(&self, m: usize, ell: usize) -> f64 {
    let spectra = self.spectra.read().expect("library spectra lock");
    if spectra.is_empty() {
      return 0.0;
    }
    let entry_of_cell = self.entry_of_cell.read().expect("library mapping lock");
    if spectra.len() == entry_of_cell.len() {
      // indexed on the cells
      spectra[m][ell]
    } else {
      match entry_of_cell.get(m).copied().unwrap_or(-1) {
        n if n >= 0 => spectra[n as usize][ell],
        _ => 0.0,
      }
    }
  }
}

/// Convert an emissivity row to luminosities and normalize it to unit sum.
fn normalize(row: &mut [f64], lambda: &WavelengthGrid) {
  for (ell, value) in row.iter_mut().enumerate() {
    *value *= lambda.dlambda(ell);
  }
  let total: f64 = row.iter().sum();
  if total > 0.0 {
    for value in row.iter_mut() {
      *value /= total;
    }
  }
}

#[cfg(test)]
#[path = "dustlib_test.rs"]
mod dustlib_test;
