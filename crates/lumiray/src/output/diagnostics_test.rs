use std::sync::Arc;

use glam::DVec3;

use crate::geometry::Aabb;
use crate::grid::cartesian::{AxisMesh, CartesianGrid};
use crate::medium::{GrayMix, Medium, MediumOptions, UniformBoxDistribution};
use crate::observer::{DistantObserver, ObserverSet};
use crate::path::TracePath;
use crate::wavelength::WavelengthGrid;

use super::*;

fn test_medium(record_crossed: bool) -> Medium {
  let extent = Aabb::from_half_extents(DVec3::splat(1.0));
  let grid = Arc::new(
    CartesianGrid::new(extent, (4, 4, 4), (AxisMesh::Linear, AxisMesh::Linear, AxisMesh::Linear)).unwrap(),
  );
  let distribution = Arc::new(UniformBoxDistribution::new(extent, 2.0));
  let mix = Arc::new(GrayMix::new(0.5, 0.5));
  let lambda = WavelengthGrid::new(vec![1e-6], vec![1e-7]).unwrap();
  Medium::new(
    grid,
    distribution,
    vec![mix],
    lambda,
    MediumOptions { record_crossed, ..Default::default() },
  )
  .unwrap()
}

#[test]
fn test_convergence_file_matches_uniform_medium() {
  let medium = test_medium(false);
  let dir = tempfile::tempdir().unwrap();
  write_convergence(&medium, dir.path(), "run").unwrap();

  let text = std::fs::read_to_string(dir.path().join("run_ds_convergence.dat")).unwrap();
  assert!(text.contains("X-axis surface density"));
  assert!(text.contains("total dust mass"));
  // expected mass 2·8 = 16; the gridded value matches for a uniform medium
  assert!(text.contains("1.6e1"));
}

#[test]
fn test_density_maps_written() {
  let medium = test_medium(false);
  let dir = tempfile::tempdir().unwrap();
  write_density_maps(&medium, dir.path(), "run", 16).unwrap();
  for name in [
    "run_ds_trhoxy.fits",
    "run_ds_grhoxy.fits",
    "run_ds_trhoxz.fits",
    "run_ds_grhoxz.fits",
    "run_ds_trhoyz.fits",
    "run_ds_grhoyz.fits",
  ] {
    assert!(dir.path().join(name).exists(), "{name} missing");
  }
  // the gridded map of a uniform medium is flat at ρ = 2
  let bytes = std::fs::read(dir.path().join("run_ds_grhoxy.fits")).unwrap();
  let first = f64::from_be_bytes(bytes[2880..2888].try_into().unwrap());
  assert_eq!(first, 2.0);
}

#[test]
fn test_quality_metrics_vanish_for_exact_grid() {
  let medium = test_medium(false);
  let dir = tempfile::tempdir().unwrap();
  let options = DiagnosticsOptions { quality_samples: 50, ..Default::default() };
  write_quality(&medium, dir.path(), "run", &options).unwrap();
  let text = std::fs::read_to_string(dir.path().join("run_ds_quality.dat")).unwrap();
  // the sampled grid reproduces the uniform density exactly, so both mean
  // deltas are tiny
  for line in text.lines().filter(|l| l.starts_with("Mean")) {
    let value: f64 = line.rsplit(' ').next().unwrap().parse().unwrap();
    assert!(value.abs() < 1e-6, "line: {line}");
  }
}

#[test]
fn test_cell_properties_and_stats() {
  let medium = test_medium(false);
  let dir = tempfile::tempdir().unwrap();
  write_cell_properties(&medium, dir.path(), "run", &DiagnosticsOptions::default()).unwrap();
  let text = std::fs::read_to_string(dir.path().join("run_ds_cellprops.dat")).unwrap();
  let rows = text.lines().filter(|l| !l.starts_with('#')).count();
  assert_eq!(rows, 64);
  assert!(text.contains("90 % of the cells"));
}

#[test]
fn test_crossed_histogram_file() {
  let medium = test_medium(true);
  let mut path = TracePath::new();
  path.start(DVec3::new(-0.9, 0.1, 0.1), DVec3::X);
  medium.fill_path(0, &mut path).unwrap();
  let dir = tempfile::tempdir().unwrap();
  write_crossed(&medium, dir.path(), "run").unwrap();
  let text = std::fs::read_to_string(dir.path().join("run_ds_crossed.dat")).unwrap();
  assert!(text.contains("4\t1"));
}

#[test]
fn test_grid_structure_files() {
  let medium = test_medium(false);
  let dir = tempfile::tempdir().unwrap();
  write_grid_structure(&medium, dir.path(), "run").unwrap();
  assert!(dir.path().join("run_gridxy.dat").exists());
  assert!(dir.path().join("run_gridxyz.dat").exists());
}

#[test]
fn test_observer_cube_files() {
  let observers = ObserverSet::new(
    vec![DistantObserver::new("faceon", 0.0, 0.0, (8, 8), (1.0, 1.0)).unwrap()],
    1,
  );
  let dir = tempfile::tempdir().unwrap();
  write_observer_cubes(&observers, dir.path(), "run").unwrap();
  let path = dir.path().join("run_faceon.fits");
  assert!(path.exists());
  // 8×8 doubles fit in one data block after the header
  assert_eq!(std::fs::read(path).unwrap().len(), 2880 * 2);
}
