//! Double-precision axis-aligned box for the simulation domain and grid cells.

use glam::DVec3;

/// Double-precision axis-aligned bounding box.
///
/// Used for the simulation domain, tree node extents and Voronoi cell bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
  /// Minimum corner (inclusive).
  pub min: DVec3,
  /// Maximum corner (inclusive).
  pub max: DVec3,
}

impl Aabb {
  /// Create a new box from min and max corners.
  ///
  /// # Panics
  /// Debug-asserts that min <= max on all axes.
  pub fn new(min: DVec3, max: DVec3) -> Self {
    debug_assert!(
      min.x <= max.x && min.y <= max.y && min.z <= max.z,
      "box min must be <= max on all axes"
    );
    Self { min, max }
  }

  /// Create a box symmetric around the origin from positive half-extents.
  pub fn from_half_extents(half_extents: DVec3) -> Self {
    Self {
      min: -half_extents,
      max: half_extents,
    }
  }

  /// Check if this box contains a point (boundary inclusive).
  #[inline]
  pub fn contains(&self, point: DVec3) -> bool {
    point.x >= self.min.x
      && point.x <= self.max.x
      && point.y >= self.min.y
      && point.y <= self.max.y
      && point.z >= self.min.z
      && point.z <= self.max.z
  }

  /// Get the size of the box (max - min).
  #[inline]
  pub fn widths(&self) -> DVec3 {
    self.max - self.min
  }

  /// Get the center of the box.
  #[inline]
  pub fn center(&self) -> DVec3 {
    (self.min + self.max) * 0.5
  }

  /// Get the volume of the box.
  #[inline]
  pub fn volume(&self) -> f64 {
    let w = self.widths();
    w.x * w.y * w.z
  }

  /// Position inside the box at the given fraction along each axis.
  ///
  /// The fractions must be in [0, 1]; this is not checked.
  #[inline]
  pub fn frac_position(&self, fx: f64, fy: f64, fz: f64) -> DVec3 {
    self.min + self.widths() * DVec3::new(fx, fy, fz)
  }

  /// Cell indices for a point, assuming the box were partitioned into
  /// `nx * ny * nz` equal cells. Indices are clamped to the valid range, so
  /// points on (or just beyond) the upper boundary land in the last cell.
  #[inline]
  pub fn cell_indices(&self, point: DVec3, nx: usize, ny: usize, nz: usize) -> (usize, usize, usize) {
    let w = self.widths();
    let i = ((nx as f64 * (point.x - self.min.x) / w.x) as i64).clamp(0, nx as i64 - 1);
    let j = ((ny as f64 * (point.y - self.min.y) / w.y) as i64).clamp(0, ny as i64 - 1);
    let k = ((nz as f64 * (point.z - self.min.z) / w.z) as i64).clamp(0, nz as i64 - 1);
    (i as usize, j as usize, k as usize)
  }

  /// Check if this box overlaps another (boundary contact counts).
  #[inline]
  pub fn overlaps(&self, other: &Aabb) -> bool {
    self.min.x <= other.max.x
      && self.max.x >= other.min.x
      && self.min.y <= other.max.y
      && self.max.y >= other.min.y
      && self.min.z <= other.max.z
      && self.max.z >= other.min.z
  }

  /// Length of the diagonal, used to derive traversal epsilons.
  #[inline]
  pub fn diagonal(&self) -> f64 {
    self.widths().length()
  }
}
