//! Voronoi cell construction by half-space clipping.
//!
//! The cell of a generator is the domain box clipped by the bisector plane
//! of every relevant other generator. Candidates are processed nearest
//! first; once half the distance to the next candidate exceeds the farthest
//! remaining vertex, no later bisector can cut the polyhedron and clipping
//! stops (the security-radius bound).

use glam::DVec3;

use crate::error::{Error, Result};
use crate::geometry::Aabb;

/// Wall ids for the six domain planes, in the order xmin, xmax, ymin, ymax,
/// zmin, zmax. Stored alongside non-negative neighbor cell ids.
pub const WALL_IDS: [i32; 6] = [-1, -2, -3, -4, -5, -6];

/// One face of the clipped polyhedron: its polygon and the id of whatever
/// lies on the other side (a neighbor cell, or a negative wall id).
#[derive(Clone, Debug)]
struct Face {
  beyond: i32,
  verts: Vec<DVec3>,
}

/// Completed Voronoi cell data.
#[derive(Clone, Debug)]
pub struct VoronoiCell {
  /// Generator point of this cell.
  pub generator: DVec3,
  /// Volume centroid.
  pub centroid: DVec3,
  /// Cell volume.
  pub volume: f64,
  /// Box enclosing the cell.
  pub bounds: Aabb,
  /// Ids of neighboring cells; −1..−6 encode the domain walls.
  pub neighbors: Vec<i32>,
}

impl VoronoiCell {
  /// Squared distance from the generator to `r`.
  #[inline]
  pub fn squared_distance_to(&self, r: DVec3) -> f64 {
    (r - self.generator).length_squared()
  }
}

/// Mutable polyhedron being clipped.
struct Poly {
  faces: Vec<Face>,
  eps: f64,
}

impl Poly {
  /// The six faces of the domain box, tagged with the wall ids.
  fn from_box(extent: &Aabb, eps: f64) -> Self {
    let lo = extent.min;
    let hi = extent.max;
    let v = |x: f64, y: f64, z: f64| DVec3::new(x, y, z);
    let faces = vec![
      // xmin, xmax
      Face { beyond: WALL_IDS[0], verts: vec![v(lo.x, lo.y, lo.z), v(lo.x, hi.y, lo.z), v(lo.x, hi.y, hi.z), v(lo.x, lo.y, hi.z)] },
      Face { beyond: WALL_IDS[1], verts: vec![v(hi.x, lo.y, lo.z), v(hi.x, hi.y, lo.z), v(hi.x, hi.y, hi.z), v(hi.x, lo.y, hi.z)] },
      // ymin, ymax
      Face { beyond: WALL_IDS[2], verts: vec![v(lo.x, lo.y, lo.z), v(hi.x, lo.y, lo.z), v(hi.x, lo.y, hi.z), v(lo.x, lo.y, hi.z)] },
      Face { beyond: WALL_IDS[3], verts: vec![v(lo.x, hi.y, lo.z), v(hi.x, hi.y, lo.z), v(hi.x, hi.y, hi.z), v(lo.x, hi.y, hi.z)] },
      // zmin, zmax
      Face { beyond: WALL_IDS[4], verts: vec![v(lo.x, lo.y, lo.z), v(hi.x, lo.y, lo.z), v(hi.x, hi.y, lo.z), v(lo.x, hi.y, lo.z)] },
      Face { beyond: WALL_IDS[5], verts: vec![v(lo.x, lo.y, hi.z), v(hi.x, lo.y, hi.z), v(hi.x, hi.y, hi.z), v(lo.x, hi.y, hi.z)] },
    ];
    Self { faces, eps }
  }

  /// Squared distance from `origin` to the farthest vertex.
  fn max_squared_radius(&self, origin: DVec3) -> f64 {
    let mut max = 0.0f64;
    for face in &self.faces {
      for &v in &face.verts {
        max = max.max((v - origin).length_squared());
      }
    }
    max
  }

  /// Clip by the half-space `n·(x − p) <= 0`, tagging any new cap face with
  /// `beyond`. Returns true when the plane actually cut the polyhedron.
  fn clip(&mut self, n: DVec3, p: DVec3, beyond: i32) -> bool {
    let signed = |v: DVec3| n.dot(v - p);

    // quick containment scan
    let mut any_out = false;
    let mut any_in = false;
    for face in &self.faces {
      for &v in &face.verts {
        if signed(v) > self.eps {
          any_out = true;
        } else {
          any_in = true;
        }
      }
    }
    if !any_out {
      return false;
    }
    if !any_in {
      // the whole polyhedron lies beyond the plane; leave one empty marker
      self.faces.clear();
      return true;
    }

    // Sutherland–Hodgman clip of every face, collecting the points where
    // edges pierce the plane; those become the vertices of the cap face
    let mut cap_points: Vec<DVec3> = Vec::new();
    let eps = self.eps;
    for face in &mut self.faces {
      let old = std::mem::take(&mut face.verts);
      let count = old.len();
      let mut kept = Vec::with_capacity(count + 2);
      for i in 0..count {
        let a = old[i];
        let b = old[(i + 1) % count];
        let da = signed(a);
        let db = signed(b);
        if da <= eps {
          kept.push(a);
        }
        if (da > eps && db < -eps) || (da < -eps && db > eps) {
          let t = da / (da - db);
          let x = a + (b - a) * t;
          kept.push(x);
          cap_points.push(x);
        }
      }
      face.verts = kept;
    }
    self.faces.retain(|f| f.verts.len() >= 3);

    if cap_points.len() >= 3 {
      if let Some(cap) = build_cap(cap_points, n, eps) {
        self.faces.push(Face { beyond, verts: cap });
      }
    }
    true
  }
}

/// Order the cap intersection points into a convex polygon around their
/// centroid, dropping near-duplicates.
fn build_cap(mut points: Vec<DVec3>, n: DVec3, eps: f64) -> Option<Vec<DVec3>> {
  // dedupe
  let mut unique: Vec<DVec3> = Vec::with_capacity(points.len());
  let eps_sq = (10.0 * eps) * (10.0 * eps);
  for p in points.drain(..) {
    if unique.iter().all(|&q| (p - q).length_squared() > eps_sq) {
      unique.push(p);
    }
  }
  if unique.len() < 3 {
    return None;
  }

  // angular sort in the plane basis
  let center = unique.iter().copied().sum::<DVec3>() / unique.len() as f64;
  let u = n.cross(if n.x.abs() < 0.9 { DVec3::X } else { DVec3::Y }).normalize();
  let v = n.cross(u).normalize();
  unique.sort_by(|&a, &b| {
    let pa = (u.dot(a - center)).atan2(v.dot(a - center));
    let pb = (u.dot(b - center)).atan2(v.dot(b - center));
    pa.partial_cmp(&pb).unwrap_or(std::cmp::Ordering::Equal)
  });
  Some(unique)
}

/// Compute the Voronoi cell of generator `m` by clipping the domain box
/// against the bisector planes of the candidate generators, supplied as
/// indices sorted by increasing distance from `m`.
pub fn compute_cell(
  extent: &Aabb,
  generators: &[DVec3],
  m: usize,
  candidates_by_distance: &[usize],
  eps: f64,
) -> Result<VoronoiCell> {
  let g = generators[m];
  let mut poly = Poly::from_box(extent, eps);
  let mut max_radius_sq = poly.max_squared_radius(g);

  for &i in candidates_by_distance {
    debug_assert_ne!(i, m);
    let gi = generators[i];
    let half_dist_sq = 0.25 * (gi - g).length_squared();
    // nothing farther than twice the current radius can cut the cell
    if half_dist_sq > max_radius_sq {
      break;
    }
    let n = gi - g;
    let p = 0.5 * (gi + g);
    if poly.clip(n, p, i as i32) {
      if poly.faces.is_empty() {
        return Err(Error::numerical(format!(
          "Voronoi cell {m} vanished while clipping against generator {i}"
        )));
      }
      max_radius_sq = poly.max_squared_radius(g);
    }
  }

  // reduce the face soup to volume, centroid, bounds and neighbor ids
  let mut volume = 0.0;
  let mut centroid = DVec3::ZERO;
  let mut lo = DVec3::splat(f64::MAX);
  let mut hi = DVec3::splat(f64::MIN);
  let mut neighbors: Vec<i32> = Vec::new();
  for face in &poly.faces {
    if !neighbors.contains(&face.beyond) {
      neighbors.push(face.beyond);
    }
    for &v in &face.verts {
      lo = lo.min(v);
      hi = hi.max(v);
    }
    // fan of tetrahedra with apex at the generator
    let a = face.verts[0];
    for w in face.verts.windows(2).skip(1) {
      let (b, c) = (w[0], w[1]);
      let vol = ((a - g).cross(b - g).dot(c - g) / 6.0).abs();
      volume += vol;
      centroid += vol * (g + a + b + c) / 4.0;
    }
  }
  if volume <= 0.0 {
    return Err(Error::numerical(format!("Voronoi cell {m} has vanishing volume")));
  }
  centroid /= volume;

  Ok(VoronoiCell {
    generator: g,
    centroid,
    volume,
    bounds: Aabb::new(lo, hi),
    neighbors,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unclipped_cell_is_domain() {
    let extent = Aabb::from_half_extents(DVec3::splat(1.0));
    let cell = compute_cell(&extent, &[DVec3::ZERO], 0, &[], 1e-12).unwrap();
    assert!((cell.volume - 8.0).abs() < 1e-10);
    assert!(cell.centroid.length() < 1e-10);
    assert_eq!(cell.neighbors.len(), 6);
    assert!(cell.neighbors.iter().all(|&n| n < 0));
  }

  #[test]
  fn test_two_cell_split() {
    let extent = Aabb::from_half_extents(DVec3::splat(2.0));
    let generators = [DVec3::new(-1.0, 0.0, 0.0), DVec3::new(1.0, 0.0, 0.0)];
    let cell0 = compute_cell(&extent, &generators, 0, &[1], 1e-12).unwrap();
    let cell1 = compute_cell(&extent, &generators, 1, &[0], 1e-12).unwrap();
    // each half of the 4×4×4 box
    assert!((cell0.volume - 32.0).abs() < 1e-9);
    assert!((cell1.volume - 32.0).abs() < 1e-9);
    assert!(cell0.neighbors.contains(&1));
    assert!(cell1.neighbors.contains(&0));
    // cell 0 spans x ∈ [−2, 0]
    assert!((cell0.bounds.max.x).abs() < 1e-9);
    assert!((cell0.centroid.x + 1.0).abs() < 1e-9);
  }

  #[test]
  fn test_oblique_bisector() {
    let extent = Aabb::from_half_extents(DVec3::splat(1.0));
    let generators = [DVec3::new(-0.3, -0.3, -0.3), DVec3::new(0.3, 0.3, 0.3)];
    let cell0 = compute_cell(&extent, &generators, 0, &[1], 1e-12).unwrap();
    let cell1 = compute_cell(&extent, &generators, 1, &[0], 1e-12).unwrap();
    // symmetric generators split the volume evenly
    assert!((cell0.volume + cell1.volume - extent.volume()).abs() < 1e-9);
    assert!((cell0.volume - cell1.volume).abs() < 1e-9);
  }
}
