use glam::DVec3;

use super::*;

fn unit_x() -> DVec3 {
  DVec3::new(1.0, 0.0, 0.0)
}

#[test]
fn test_add_segment_skips_degenerate() {
  let mut path = TracePath::new();
  path.start(DVec3::ZERO, unit_x());
  path.add_segment(Some(0), 0.0);
  path.add_segment(Some(0), -1.0);
  assert!(path.is_empty());
  path.add_segment(Some(0), 2.0);
  path.add_segment(Some(1), 3.0);
  assert_eq!(path.len(), 2);
  assert_eq!(path.total_length(), 5.0);
  assert_eq!(path.segments()[1].s, 5.0);
}

#[test]
fn test_move_inside_from_outside() {
  let domain = Aabb::from_half_extents(DVec3::splat(1.0));
  let mut path = TracePath::new();
  path.start(DVec3::new(-3.0, 0.2, 0.0), unit_x());
  let r = path.move_inside(&domain, 1e-12);
  assert!(domain.contains(r));
  assert!((r.x - (-1.0)).abs() < 1e-9);
  // the outside travel is recorded as a single None segment of length 2
  assert_eq!(path.len(), 1);
  assert_eq!(path.segments()[0].cell, None);
  assert!((path.segments()[0].ds - 2.0).abs() < 1e-12);
}

#[test]
fn test_move_inside_miss() {
  let domain = Aabb::from_half_extents(DVec3::splat(1.0));
  let mut path = TracePath::new();
  // moving away from the box
  path.start(DVec3::new(-3.0, 0.0, 0.0), -unit_x());
  assert_eq!(path.move_inside(&domain, 1e-12), OUTSIDE);

  // passes above the box: clipping x lands outside y
  let mut path = TracePath::new();
  path.start(DVec3::new(-3.0, 5.0, 0.0), unit_x());
  assert_eq!(path.move_inside(&domain, 1e-12), OUTSIDE);
}

#[test]
fn test_move_inside_noop_when_inside() {
  let domain = Aabb::from_half_extents(DVec3::splat(1.0));
  let mut path = TracePath::new();
  path.start(DVec3::new(0.5, 0.5, 0.5), unit_x());
  let r = path.move_inside(&domain, 1e-12);
  assert_eq!(r, DVec3::new(0.5, 0.5, 0.5));
  assert!(path.is_empty());
}

#[test]
fn test_fill_optical_depth_uniform() {
  // single cell of uniform κρ = 2 crossed over length 3 → τ = 6
  let mut path = TracePath::new();
  path.start(DVec3::ZERO, unit_x());
  path.add_segment(None, 1.0);
  path.add_segment(Some(0), 3.0);
  let tau = path.fill_optical_depth(|_| 2.0).unwrap();
  assert!((tau - 6.0).abs() < 1e-12);
  assert_eq!(path.dtau(0), 0.0);
  assert!((path.dtau(1) - 6.0).abs() < 1e-12);
  assert!((path.total_optical_depth() - 6.0).abs() < 1e-12);
}

#[test]
fn test_fill_optical_depth_rejects_nan() {
  let mut path = TracePath::new();
  path.start(DVec3::ZERO, unit_x());
  path.add_segment(Some(0), 1.0);
  assert!(path.fill_optical_depth(|_| f64::NAN).is_err());
  assert!(path.fill_optical_depth(|_| f64::INFINITY).is_err());
}

#[test]
fn test_path_length_inverse() {
  // κρ = 2 per unit length → s(τ) = τ/2, exact to round-off
  let mut path = TracePath::new();
  path.start(DVec3::ZERO, unit_x());
  path.add_segment(Some(0), 1.0);
  path.add_segment(Some(1), 1.0);
  path.add_segment(Some(2), 1.0);
  path.fill_optical_depth(|_| 2.0).unwrap();
  for tau in [0.0, 0.5, 1.0, 2.5, 5.9, 6.0] {
    let s = path.path_length(tau).unwrap();
    assert!((s - tau / 2.0).abs() < 1e-10, "tau {tau} -> s {s}");
  }
}

#[test]
fn test_path_length_range_errors() {
  let mut path = TracePath::new();
  path.start(DVec3::ZERO, unit_x());
  assert!(path.path_length(0.5).is_err());

  path.add_segment(Some(0), 1.0);
  path.fill_optical_depth(|_| 1.0).unwrap();
  assert!(path.path_length(-0.1).is_err());
  assert!(path.path_length(2.0).is_err());
}

#[test]
fn test_monotone_cumulative_tau() {
  let mut path = TracePath::new();
  path.start(DVec3::ZERO, unit_x());
  for m in 0..10 {
    path.add_segment(Some(m), 0.5);
  }
  path.fill_optical_depth(|m| m as f64 * 0.3).unwrap();
  for n in 1..path.len() {
    assert!(path.tau(n) >= path.tau(n - 1));
  }
}
