use glam::DVec3;

use crate::geometry::Aabb;
use crate::grid::Grid;
use crate::path::TracePath;
use crate::rng::RandomStream;

use super::*;

fn domain() -> Aabb {
  Aabb::from_half_extents(DVec3::splat(2.0))
}

fn uniform_grid(count: usize, seed: u64) -> VoronoiGrid {
  let mut rng = RandomStream::new(seed, 0);
  VoronoiGrid::new(domain(), GeneratorDistribution::Uniform { count }, None, &mut rng).unwrap()
}

#[test]
fn test_two_cell_trace() {
  let grid = VoronoiGrid::from_points(
    domain(),
    vec![DVec3::new(-1.0, 0.0, 0.0), DVec3::new(1.0, 0.0, 0.0)],
  )
  .unwrap();
  assert_eq!(grid.cell_count(), 2);

  let mut path = TracePath::new();
  path.start(DVec3::new(-1.5, 0.1, 0.0), DVec3::new(1.0, 0.0, 0.0));
  grid.trace(&mut path).unwrap();

  // the bisector plane sits at x = 0 and the wall at x = 2
  assert_eq!(path.len(), 2);
  assert_eq!(path.segments()[0].cell, Some(0));
  assert!((path.segments()[0].ds - 1.5).abs() < 1e-9);
  assert_eq!(path.segments()[1].cell, Some(1));
  assert!((path.segments()[1].ds - 2.0).abs() < 1e-9);
  assert!((path.total_length() - 3.5).abs() < 1e-9);
}

#[test]
fn test_volumes_sum_to_domain() {
  let grid = uniform_grid(60, 11);
  let total: f64 = (0..grid.cell_count()).map(|m| grid.volume(m)).sum();
  assert!(
    (total - domain().volume()).abs() < 1e-8 * domain().volume(),
    "total {total} vs {}",
    domain().volume()
  );
}

#[test]
fn test_cell_of_is_nearest_generator() {
  let grid = uniform_grid(60, 13);
  let mut rng = RandomStream::new(99, 0);
  for _ in 0..10_000 {
    let r = rng.position(&domain());
    let m = grid.cell_of(r).expect("in-domain point");
    let nearest = (0..grid.cell_count())
      .min_by(|&a, &b| {
        (r - grid.generator(a))
          .length_squared()
          .partial_cmp(&(r - grid.generator(b)).length_squared())
          .unwrap()
      })
      .unwrap();
    assert_eq!(
      (r - grid.generator(m)).length_squared(),
      (r - grid.generator(nearest)).length_squared()
    );
  }
  assert_eq!(grid.cell_of(DVec3::splat(3.0)), None);
}

#[test]
fn test_cell_distribution_matches_volume() {
  let grid = uniform_grid(20, 17);
  let mut rng = RandomStream::new(5, 0);
  let n = 20_000;
  let mut counts = vec![0usize; grid.cell_count()];
  for _ in 0..n {
    counts[grid.cell_of(rng.position(&domain())).unwrap()] += 1;
  }
  for m in 0..grid.cell_count() {
    let expected = n as f64 * grid.volume(m) / domain().volume();
    let sigma = expected.sqrt().max(1.0);
    assert!(
      (counts[m] as f64 - expected).abs() < 6.0 * sigma,
      "cell {m}: {} vs {expected}",
      counts[m]
    );
  }
}

#[test]
fn test_trace_covers_chord() {
  let grid = uniform_grid(40, 19);
  let mut rng = RandomStream::new(23, 0);
  let mut path = TracePath::new();
  for _ in 0..200 {
    let r0 = rng.position(&domain());
    let k = rng.direction();
    path.start(r0, k);
    grid.trace(&mut path).unwrap();
    assert!(!path.is_empty());

    // chord length to the domain wall
    let mut expected = f64::INFINITY;
    for axis in 0..3 {
      let (kc, rc, lo, hi) = match axis {
        0 => (k.x, r0.x, -2.0, 2.0),
        1 => (k.y, r0.y, -2.0, 2.0),
        _ => (k.z, r0.z, -2.0, 2.0),
      };
      if kc.abs() > 1e-15 {
        expected = expected.min(((if kc > 0.0 { hi } else { lo }) - rc) / kc);
      }
    }
    // the walker advances by ε per crossing, so allow a few ulps per segment
    let tol = 1e-7 * (1.0 + path.len() as f64);
    assert!(
      (path.total_length() - expected).abs() < tol,
      "length {} vs chord {expected}",
      path.total_length()
    );

    // every segment's midpoint lies in the recorded cell
    let mut s_prev = 0.0;
    for seg in path.segments() {
      assert!(seg.ds > 0.0);
      // skip ε-scale slivers near cell vertices where the midpoint test
      // is not meaningful
      if seg.ds > 1e-9 {
        let mid = r0 + k * (s_prev + 0.5 * seg.ds);
        assert_eq!(grid.cell_of(mid), seg.cell);
      }
      s_prev = seg.s;
    }
  }
}

#[test]
fn test_random_position_in_cell() {
  let grid = uniform_grid(30, 29);
  let mut rng = RandomStream::new(31, 0);
  for m in 0..grid.cell_count() {
    for _ in 0..50 {
      let r = grid.random_position_in(m, &mut rng).unwrap();
      assert_eq!(grid.cell_of(r), Some(m));
    }
  }
}

#[test]
fn test_central_peak_generators() {
  let mut rng = RandomStream::new(41, 0);
  let grid = VoronoiGrid::new(domain(), GeneratorDistribution::CentralPeak { count: 100 }, None, &mut rng).unwrap();
  assert_eq!(grid.cell_count(), 100);
  // the first generator stays at the origin, and the point density is
  // centrally concentrated: cells near the origin are smaller than average
  let m0 = grid.cell_of(DVec3::ZERO).unwrap();
  assert!(grid.generator(m0).length() < 1e-12);
  let avg = domain().volume() / 100.0;
  assert!(grid.volume(m0) < avg);
}

#[test]
fn test_points_outside_domain_are_discarded() {
  let grid = VoronoiGrid::from_points(
    domain(),
    vec![
      DVec3::new(-1.0, 0.0, 0.0),
      DVec3::new(1.0, 0.0, 0.0),
      DVec3::new(9.0, 0.0, 0.0),
    ],
  )
  .unwrap();
  assert_eq!(grid.cell_count(), 2);
}

#[test]
fn test_rejects_too_few_generators() {
  let mut rng = RandomStream::new(1, 0);
  assert!(VoronoiGrid::new(domain(), GeneratorDistribution::Uniform { count: 5 }, None, &mut rng).is_err());
  assert!(VoronoiGrid::from_points(domain(), vec![DVec3::ZERO]).is_err());
}

#[test]
fn test_density_distribution_requires_sampler() {
  let mut rng = RandomStream::new(1, 0);
  let err = VoronoiGrid::new(domain(), GeneratorDistribution::DustDensity { count: 20 }, None, &mut rng);
  assert!(err.is_err());
}

#[test]
fn test_neighbor_lists_are_symmetric() {
  let grid = uniform_grid(40, 43);
  for m in 0..grid.cell_count() {
    for &n in grid.neighbors(m) {
      if n >= 0 {
        assert!(
          grid.neighbors(n as usize).contains(&(m as i32)),
          "cell {n} missing back-reference to {m}"
        );
      }
    }
  }
}
