use std::sync::Arc;

use glam::DVec3;

use crate::geometry::Aabb;
use crate::grid::cartesian::{AxisMesh, CartesianGrid};
use crate::medium::{GrayMix, Medium, MediumOptions, UniformBoxDistribution};
use crate::parallel::SingleProcess;
use crate::wavelength::WavelengthGrid;

use super::*;

fn medium_with_bins(n_lambda: usize) -> Medium {
  let extent = Aabb::from_half_extents(DVec3::splat(1.0));
  let grid = Arc::new(
    CartesianGrid::new(extent, (2, 1, 1), (AxisMesh::Linear, AxisMesh::Linear, AxisMesh::Linear)).unwrap(),
  );
  let distribution = Arc::new(UniformBoxDistribution::new(extent, 1.0));
  let mix = Arc::new(GrayMix::new(1.0, 0.0));
  let lambda = WavelengthGrid::logarithmic(1e-6, 1e-4, n_lambda).unwrap();
  Medium::new(grid, distribution, vec![mix], lambda, MediumOptions::default()).unwrap()
}

#[test]
fn test_identity_mapping() {
  let mapping = IdentityMapping;
  assert_eq!(mapping.n_entries(7), 7);
  assert_eq!(mapping.entry_of(3), Some(3));
}

#[test]
fn test_spectra_are_normalized() {
  let medium = medium_with_bins(4);
  medium.absorb(0, 1, 2.0, true);
  medium.absorb(1, 2, 1.0, true);

  let lib = DustLib::identity(4);
  lib.calculate(&medium, &SingleProcess).unwrap();
  assert_eq!(lib.entries_used(), 2);

  for m in 0..2 {
    let total: f64 = (0..4).map(|ell| lib.luminosity(m, ell)).sum();
    assert!((total - 1.0).abs() < 1e-12, "cell {m} total {total}");
  }
}

#[test]
fn test_template_shape_carries_through() {
  let medium = medium_with_bins(3);
  medium.absorb(0, 0, 1.0, true);
  medium.absorb(1, 0, 1.0, true);

  // template concentrated in the last bin: the normalized spectrum must be
  // a delta there, whatever the radiation field
  let lib = DustLib::new(Box::new(IdentityMapping), Box::new(TemplateEmissivity::new(vec![0.0, 0.0, 5.0])));
  lib.calculate(&medium, &SingleProcess).unwrap();
  assert_eq!(lib.luminosity(0, 0), 0.0);
  assert_eq!(lib.luminosity(0, 1), 0.0);
  assert!((lib.luminosity(0, 2) - 1.0).abs() < 1e-12);
}

#[test]
fn test_unabsorbing_cells_have_empty_spectra() {
  let medium = medium_with_bins(3);
  // no absorption at all: the absorbed power is zero everywhere, spectra
  // normalize to zero rows
  let lib = DustLib::identity(3);
  lib.calculate(&medium, &SingleProcess).unwrap();
  for ell in 0..3 {
    assert_eq!(lib.luminosity(0, ell), 0.0);
  }
}

/// Mapping that folds all cells onto one entry.
struct AllToOne;

impl LibraryMapping for AllToOne {
  fn n_entries(&self, _n_cells: usize) -> usize {
    1
  }

  fn entry_of(&self, _m: usize) -> Option<usize> {
    Some(0)
  }
}

#[test]
fn test_shared_entry_averages_field() {
  let medium = medium_with_bins(3);
  medium.absorb(0, 1, 4.0, true);
  // cell 1 absorbs nothing; both share entry 0

  let lib = DustLib::new(Box::new(AllToOne), Box::new(TemplateEmissivity::flat(3)));
  lib.calculate(&medium, &SingleProcess).unwrap();
  assert_eq!(lib.entries_used(), 1);

  // single component: the spectrum is stored per entry, so both cells see
  // the same normalized spectrum
  for ell in 0..3 {
    assert_eq!(lib.luminosity(0, ell), lib.luminosity(1, ell));
  }
  let total: f64 = (0..3).map(|ell| lib.luminosity(0, ell)).sum();
  assert!((total - 1.0).abs() < 1e-12);
}
