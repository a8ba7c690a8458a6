use std::sync::Arc;

use glam::DVec3;

use crate::dustlib::DustLib;
use crate::geometry::Aabb;
use crate::grid::cartesian::{AxisMesh, CartesianGrid};
use crate::medium::{GrayMix, Medium, MediumOptions, UniformBoxDistribution};
use crate::observer::{DistantObserver, ObserverSet};
use crate::rng::RandomStream;
use crate::source::PointSource;
use crate::wavelength::WavelengthGrid;

use super::*;

struct Setup {
  engine: PhotonEngine,
}

fn build(
  extent: Aabb,
  shape: (usize, usize, usize),
  kappa_abs: f64,
  kappa_sca: f64,
  rho: f64,
  source_position: DVec3,
  config: TransportConfig,
  observers: Vec<DistantObserver>,
) -> Setup {
  let grid = Arc::new(
    CartesianGrid::new(extent, shape, (AxisMesh::Linear, AxisMesh::Linear, AxisMesh::Linear)).unwrap(),
  );
  let distribution = Arc::new(UniformBoxDistribution::new(extent, rho));
  let mix = Arc::new(GrayMix::new(kappa_abs, kappa_sca));
  let lambda = WavelengthGrid::new(vec![1e-6], vec![1e-7]).unwrap();
  let medium = Arc::new(
    Medium::new(grid, distribution, vec![mix], lambda, MediumOptions::default()).unwrap(),
  );
  let source = Arc::new(PointSource::new(source_position, vec![1.0]));
  let observer_set = Arc::new(ObserverSet::new(observers, 1));
  let dustlib = DustLib::identity(1);
  let engine = PhotonEngine::new(medium, vec![source], observer_set, Some(dustlib), config).unwrap();
  Setup { engine }
}

fn serial_config() -> TransportConfig {
  TransportConfig {
    n_packets: 1000.0,
    seed: 42,
    serial: true,
    dust_emission: false,
    ..Default::default()
  }
}

#[test]
fn test_empty_domain_single_packet() {
  // 2×2×2 grid, zero density: the packet crosses two unit cells and escapes
  let setup = build(
    Aabb::from_half_extents(DVec3::splat(1.0)),
    (2, 2, 2),
    0.5,
    0.5,
    0.0,
    DVec3::ZERO,
    serial_config(),
    vec![],
  );
  let engine = &setup.engine;

  let mut packet = Packet::default();
  packet.launch(1.0, 0, DVec3::new(-1.0, -0.5, -0.5), DVec3::X, true);
  let mut path = crate::path::TracePath::new();
  path.start(packet.position, packet.direction);
  let tau = engine.medium().fill_path(0, &mut path).unwrap();
  assert_eq!(tau, 0.0);
  assert_eq!(path.len(), 2);
  assert!((path.segments()[0].ds - 1.0).abs() < 1e-9);
  assert!((path.segments()[1].ds - 1.0).abs() < 1e-9);

  engine.split_escape_absorption(&mut packet, &path);
  // escape = 1, absorbed = 0, scattered = 0
  assert_eq!(packet.luminosity, 0.0);
  assert_eq!(engine.medium().l_abs_stellar_total(), 0.0);
}

#[test]
fn test_uniform_slab_absorption_profile() {
  // 10 unit cells of κρ = 1, pure absorption: cell i absorbs
  // e^{−i}·(1 − e^{−1}), and e^{−10} escapes
  let setup = build(
    Aabb::new(DVec3::ZERO, DVec3::new(10.0, 1.0, 1.0)),
    (10, 1, 1),
    1.0,
    0.0,
    1.0,
    DVec3::new(1e-9, 0.5, 0.5),
    serial_config(),
    vec![],
  );
  let engine = &setup.engine;

  let mut packet = Packet::default();
  packet.launch(1.0, 0, DVec3::new(1e-9, 0.5, 0.5), DVec3::X, true);
  let mut path = crate::path::TracePath::new();
  let mut obs_path = crate::path::TracePath::new();
  let mut rng = RandomStream::new(1, 0);
  engine
    .life_cycle(&mut packet, &mut path, &mut obs_path, &mut rng, 1e-4, false)
    .unwrap();

  let factor = 1.0 - (-1.0f64).exp();
  let mut absorbed = 0.0;
  for i in 0..10 {
    let expected = (-(i as f64)).exp() * factor;
    let actual = engine.medium().l_abs_stellar(i, 0);
    assert!(
      (actual - expected).abs() < 1e-6 * expected,
      "cell {i}: {actual} vs {expected}"
    );
    absorbed += actual;
  }
  // everything that did not escape was absorbed
  assert!((absorbed + (-10.0f64).exp() - 1.0).abs() < 1e-8);
}

#[test]
fn test_energy_conservation_per_path() {
  let setup = build(
    Aabb::from_half_extents(DVec3::splat(1.0)),
    (4, 4, 4),
    0.4,
    0.6,
    0.7,
    DVec3::ZERO,
    serial_config(),
    vec![],
  );
  let engine = &setup.engine;

  let mut rng = RandomStream::new(7, 0);
  for _ in 0..50 {
    let position = rng.position(&engine.medium().grid().extent());
    let direction = rng.direction();
    let mut packet = Packet::default();
    packet.launch(1.0, 0, position, direction, true);

    let before = engine.medium().l_abs_stellar_total();
    let mut path = crate::path::TracePath::new();
    path.start(position, direction);
    let tau_path = engine.medium().fill_path(0, &mut path).unwrap();
    engine.split_escape_absorption(&mut packet, &path);
    let absorbed = engine.medium().l_abs_stellar_total() - before;
    let escaped = (-tau_path).exp();

    // the series stabilization below dτ = 10⁻³ costs O(dτ³) per segment
    assert!(
      (escaped + absorbed + packet.luminosity - 1.0).abs() < 1e-9,
      "escape {escaped} + absorbed {absorbed} + scattered {}",
      packet.luminosity
    );
  }
}

#[test]
fn test_stellar_phase_conserves_energy() {
  // all launched luminosity is either absorbed or escapes; with pure
  // absorption the absorbed total plus the mean escape fraction is exact
  let setup = build(
    Aabb::from_half_extents(DVec3::splat(1.0)),
    (3, 3, 3),
    1.0,
    0.0,
    1.0,
    DVec3::ZERO,
    serial_config(),
    vec![],
  );
  let engine = &setup.engine;
  engine.run_stellar_emission().unwrap();

  let absorbed = engine.medium().l_abs_stellar_total();
  // τ from the center to a wall is at least 1 (face) and at most √3
  // (corner): the absorbed fraction must sit between the two bounds
  let lo = 1.0 - (-1.0f64).exp();
  let hi = 1.0 - (-3.0f64.sqrt()).exp();
  assert!(absorbed > lo - 0.05 && absorbed < hi + 0.05, "absorbed {absorbed}");
}

#[test]
fn test_optically_thin_self_absorption_converges_fast() {
  let mut config = serial_config();
  config.dust_emission = true;
  // enough packets that cycle-to-cycle Monte Carlo noise sits well below
  // the convergence tolerance
  config.n_packets = 50_000.0;
  let setup = build(
    Aabb::from_half_extents(DVec3::splat(1.0)),
    (2, 2, 2),
    1e-3,
    0.0,
    1.0,
    DVec3::ZERO,
    config,
    vec![],
  );
  let engine = &setup.engine;
  engine.run_stellar_emission().unwrap();
  assert!(engine.medium().l_abs_stellar_total() > 0.0);

  // an optically thin medium re-absorbs almost nothing: the first cycle
  // sets the level, the second confirms it
  let cycles = engine.run_self_absorption().unwrap();
  assert!(cycles <= 2, "took {cycles} cycles");
}

#[test]
fn test_dust_emission_scales_linearly_with_absorption() {
  let run_with_boost = |boost: f64| -> f64 {
    let mut config = serial_config();
    config.dust_emission = true;
    let setup = build(
      Aabb::from_half_extents(DVec3::splat(1.0)),
      (2, 1, 1),
      0.5,
      0.0,
      1.0,
      DVec3::ZERO,
      config,
      vec![],
    );
    let engine = &setup.engine;
    engine.medium().absorb(0, 0, boost, true);
    engine.medium().absorb(1, 0, 0.5 * boost, true);
    let labsbol = engine.prepare_dust_emission().unwrap();
    assert!((labsbol[0] - 2.0 * labsbol[1]).abs() < 1e-12 * labsbol[0]);

    let progress = Progress::new("test", 1000);
    engine.run_dust_chunks(&labsbol, false, &progress).unwrap();
    engine.medium().l_abs_dust_total()
  };

  let base = run_with_boost(1.0);
  let doubled = run_with_boost(2.0);
  assert!(base > 0.0);
  // identical seeds make the runs statistically identical, so the ratio is
  // exact up to round-off
  assert!((doubled / base - 2.0).abs() < 1e-9, "ratio {}", doubled / base);
}

#[test]
fn test_emission_peel_off_attenuation() {
  // face-on observer along +z: the peel-off from a central packet arrives
  // attenuated by e^{−τ}, τ = κρ·(distance to the wall) = 1
  let observer = DistantObserver::new("o", 0.0, 0.0, (5, 5), (2.0, 2.0)).unwrap();
  let setup = build(
    Aabb::from_half_extents(DVec3::splat(1.0)),
    (2, 2, 2),
    1.0,
    0.0,
    1.0,
    DVec3::ZERO,
    serial_config(),
    vec![observer],
  );
  let engine = &setup.engine;

  let mut packet = Packet::default();
  packet.launch(1.0, 0, DVec3::ZERO, DVec3::X, true);
  let mut obs_path = crate::path::TracePath::new();
  engine.peel_off_emission(&packet, &mut obs_path).unwrap();
  engine.observers().flush();

  let cube = engine.observers().cube(0);
  let total: f64 = cube.iter().sum();
  assert!((total - (-1.0f64).exp()).abs() < 1e-9, "total {total}");
}

#[test]
fn test_rejects_bad_packet_counts() {
  let extent = Aabb::from_half_extents(DVec3::splat(1.0));
  let mut config = serial_config();
  config.n_packets = -1.0;
  let grid = Arc::new(
    CartesianGrid::new(extent, (2, 2, 2), (AxisMesh::Linear, AxisMesh::Linear, AxisMesh::Linear)).unwrap(),
  );
  let distribution = Arc::new(UniformBoxDistribution::new(extent, 1.0));
  let mix = Arc::new(GrayMix::new(0.5, 0.5));
  let lambda = WavelengthGrid::new(vec![1e-6], vec![1e-7]).unwrap();
  let medium =
    Arc::new(Medium::new(grid, distribution, vec![mix], lambda, MediumOptions::default()).unwrap());
  let source = Arc::new(PointSource::new(DVec3::ZERO, vec![1.0]));
  let observers = Arc::new(ObserverSet::new(vec![], 1));
  let err = PhotonEngine::new(medium, vec![source], observers, None, config);
  assert!(err.is_err());
}

#[test]
fn test_dust_emission_requires_library() {
  let extent = Aabb::from_half_extents(DVec3::splat(1.0));
  let mut config = serial_config();
  config.dust_emission = true;
  let grid = Arc::new(
    CartesianGrid::new(extent, (2, 2, 2), (AxisMesh::Linear, AxisMesh::Linear, AxisMesh::Linear)).unwrap(),
  );
  let distribution = Arc::new(UniformBoxDistribution::new(extent, 1.0));
  let mix = Arc::new(GrayMix::new(0.5, 0.5));
  let lambda = WavelengthGrid::new(vec![1e-6], vec![1e-7]).unwrap();
  let medium =
    Arc::new(Medium::new(grid, distribution, vec![mix], lambda, MediumOptions::default()).unwrap());
  let source = Arc::new(PointSource::new(DVec3::ZERO, vec![1.0]));
  let observers = Arc::new(ObserverSet::new(vec![], 1));
  let err = PhotonEngine::new(medium, vec![source], observers, None, config);
  assert!(err.is_err());
}
