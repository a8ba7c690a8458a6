//! Regular cartesian grid with configurable axis meshes.
//!
//! Cells are addressed `(i,j,k) ↔ m = k + nz·(j + ny·i)`. Point location is
//! a binary search per axis; traversal is the standard slab-crossing walk.
//! The two-phase variant assigns each cell a weight drawn from a two-point
//! distribution so a smooth density becomes a clumpy medium.

use glam::DVec3;

use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::path::{TracePath, OUTSIDE};
use crate::rng::RandomStream;

use super::Grid;

/// Distribution of the grid points along one axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AxisMesh {
  /// Equally spaced bins.
  Linear,
  /// Symmetric power-law bins: the ratio of the outermost to the innermost
  /// bin width is `ratio`, with bins growing geometrically from the center
  /// outward. Requires a domain symmetric around zero on that axis.
  PowerLaw {
    /// Outermost-to-innermost bin width ratio.
    ratio: f64,
  },
}

impl AxisMesh {
  /// Generate the `n + 1` grid points covering `[min, max]`.
  fn points(&self, min: f64, max: f64, n: usize) -> Result<Vec<f64>> {
    if n == 0 {
      return Err(Error::config("each axis needs at least one bin"));
    }
    if max <= min {
      return Err(Error::config("axis extent must satisfy min < max"));
    }
    match *self {
      AxisMesh::Linear => {
        let width = max - min;
        Ok((0..=n).map(|i| min + width * i as f64 / n as f64).collect())
      }
      AxisMesh::PowerLaw { ratio } => {
        if ratio <= 0.0 {
          return Err(Error::config("power-law bin width ratio must be positive"));
        }
        if (min + max).abs() > 1e-12 * (max - min) {
          return Err(Error::config("power-law meshes require an axis symmetric around zero"));
        }
        // near-unit ratios and too few bins degenerate to the linear mesh
        if (ratio - 1.0).abs() < 1e-3 || n < 4 {
          return AxisMesh::Linear.points(min, max, n);
        }
        let mut xv = vec![0.0; n + 1];
        if n % 2 == 0 {
          // even number of bins: the central point sits at zero
          let m = n / 2;
          let q = ratio.powf(1.0 / (m as f64 - 1.0));
          xv[m] = 0.0;
          for i in 1..=m {
            let x = (1.0 - q.powi(i as i32)) / (1.0 - q.powi(m as i32)) * max;
            xv[m + i] = x;
            xv[m - i] = -x;
          }
        } else {
          // odd number of bins: the central bin straddles zero
          let m = (n + 1) / 2;
          let q = ratio.powf(1.0 / (m as f64 - 1.0));
          let norm = 0.5 + 0.5 * q - q.powi(m as i32);
          for i in 1..=m {
            let x = (0.5 + 0.5 * q - q.powi(i as i32)) / norm * max;
            xv[m - 1 + i] = x;
            xv[m - i] = -x;
          }
        }
        xv[0] = min;
        xv[n] = max;
        Ok(xv)
      }
    }
  }
}

/// Parameters of the two-phase weight field.
#[derive(Clone, Copy, Debug)]
pub struct TwoPhaseParams {
  /// Volume filling factor of the high-density phase, in (0, 1).
  pub filling_factor: f64,
  /// Density contrast between the phases, positive.
  pub contrast: f64,
}

/// Regular cartesian grid.
pub struct CartesianGrid {
  extent: Aabb,
  nx: usize,
  ny: usize,
  nz: usize,
  xv: Vec<f64>,
  yv: Vec<f64>,
  zv: Vec<f64>,
  weightv: Option<Vec<f64>>,
  eps: f64,
}

impl CartesianGrid {
  /// Build a grid over `extent` with the given bin counts and meshes.
  pub fn new(
    extent: Aabb,
    (nx, ny, nz): (usize, usize, usize),
    (mx, my, mz): (AxisMesh, AxisMesh, AxisMesh),
  ) -> Result<Self> {
    let xv = mx.points(extent.min.x, extent.max.x, nx)?;
    let yv = my.points(extent.min.y, extent.max.y, ny)?;
    let zv = mz.points(extent.min.z, extent.max.z, nz)?;
    let eps = 1e-12 * extent.diagonal();
    Ok(Self {
      extent,
      nx,
      ny,
      nz,
      xv,
      yv,
      zv,
      weightv: None,
      eps,
    })
  }

  /// Build a linear grid and assign every cell a two-phase weight.
  ///
  /// The weight is `C/(C·ff+1−ff)` with probability `ff` and
  /// `1/(C·ff+1−ff)` otherwise, so the volume-averaged weight is unity.
  pub fn two_phase(
    extent: Aabb,
    (nx, ny, nz): (usize, usize, usize),
    params: TwoPhaseParams,
    rng: &mut RandomStream,
  ) -> Result<Self> {
    let TwoPhaseParams { filling_factor: ff, contrast: c } = params;
    if !(0.0..1.0).contains(&ff) || ff == 0.0 {
      return Err(Error::config("the volume filling factor must lie strictly between 0 and 1"));
    }
    if c <= 0.0 {
      return Err(Error::config("the density contrast must be positive"));
    }
    let mut grid = Self::new(extent, (nx, ny, nz), (AxisMesh::Linear, AxisMesh::Linear, AxisMesh::Linear))?;
    let norm = c * ff + 1.0 - ff;
    let weightv = (0..grid.cell_count())
      .map(|_| if rng.uniform() < ff { c / norm } else { 1.0 / norm })
      .collect();
    grid.weightv = Some(weightv);
    Ok(grid)
  }

  /// Linear cell index for `(i,j,k)`.
  #[inline]
  fn index(&self, i: usize, j: usize, k: usize) -> usize {
    k + self.nz * (j + self.ny * i)
  }

  /// Cell box for linear index `m`.
  fn cell_box(&self, m: usize) -> Aabb {
    let i = m / (self.nz * self.ny);
    let j = (m / self.nz) % self.ny;
    let k = m % self.nz;
    Aabb::new(
      DVec3::new(self.xv[i], self.yv[j], self.zv[k]),
      DVec3::new(self.xv[i + 1], self.yv[j + 1], self.zv[k + 1]),
    )
  }

  /// Bin counts along the axes.
  pub fn shape(&self) -> (usize, usize, usize) {
    (self.nx, self.ny, self.nz)
  }

  /// Grid points along x; `shape().0 + 1` entries.
  pub fn x_points(&self) -> &[f64] {
    &self.xv
  }

  /// Grid points along y.
  pub fn y_points(&self) -> &[f64] {
    &self.yv
  }

  /// Grid points along z.
  pub fn z_points(&self) -> &[f64] {
    &self.zv
  }
}

/// Bisection into a monotone point table: the bin index `i` with
/// `table[i] <= x <= table[i+1]`, or `None` outside the table.
fn locate(table: &[f64], x: f64) -> Option<usize> {
  let n = table.len() - 1;
  if x < table[0] || x > table[n] {
    return None;
  }
  if x >= table[n] {
    return Some(n - 1);
  }
  let mut lo = 0usize;
  let mut hi = n;
  while hi - lo > 1 {
    let mid = (lo + hi) / 2;
    if x >= table[mid] {
      lo = mid;
    } else {
      hi = mid;
    }
  }
  Some(lo)
}

impl Grid for CartesianGrid {
  fn cell_count(&self) -> usize {
    self.nx * self.ny * self.nz
  }

  fn cell_of(&self, position: DVec3) -> Option<usize> {
    let i = locate(&self.xv, position.x)?;
    let j = locate(&self.yv, position.y)?;
    let k = locate(&self.zv, position.z)?;
    Some(self.index(i, j, k))
  }

  fn volume(&self, m: usize) -> f64 {
    self.cell_box(m).volume()
  }

  fn random_position_in(&self, m: usize, rng: &mut RandomStream) -> Result<DVec3> {
    Ok(rng.position(&self.cell_box(m)))
  }

  fn trace(&self, path: &mut TracePath) -> Result<()> {
    path.clear();
    let k = path.direction();

    // clip an outside start onto the domain; a miss yields an empty path
    let r = path.move_inside(&self.extent, self.eps);
    if r == OUTSIDE {
      path.clear();
      return Ok(());
    }

    let (mut x, mut y, mut z) = (r.x, r.y, r.z);
    let mut i = locate(&self.xv, x).ok_or_else(|| Error::numerical("path start escaped the grid after move_inside"))? as i64;
    let mut j = locate(&self.yv, y).ok_or_else(|| Error::numerical("path start escaped the grid after move_inside"))? as i64;
    let mut kk = locate(&self.zv, z).ok_or_else(|| Error::numerical("path start escaped the grid after move_inside"))? as i64;

    loop {
      let m = self.index(i as usize, j as usize, kk as usize);
      let xe = if k.x < 0.0 { self.xv[i as usize] } else { self.xv[i as usize + 1] };
      let ye = if k.y < 0.0 { self.yv[j as usize] } else { self.yv[j as usize + 1] };
      let ze = if k.z < 0.0 { self.zv[kk as usize] } else { self.zv[kk as usize + 1] };
      let dsx = if k.x.abs() > 1e-15 { (xe - x) / k.x } else { f64::MAX };
      let dsy = if k.y.abs() > 1e-15 { (ye - y) / k.y } else { f64::MAX };
      let dsz = if k.z.abs() > 1e-15 { (ze - z) / k.z } else { f64::MAX };

      // on ties the x crossing wins over y, and y over z
      if dsx <= dsy && dsx <= dsz {
        path.add_segment(Some(m), dsx);
        i += if k.x < 0.0 { -1 } else { 1 };
        if i < 0 || i >= self.nx as i64 {
          return Ok(());
        }
        x = xe;
        y += k.y * dsx;
        z += k.z * dsx;
      } else if dsy < dsx && dsy <= dsz {
        path.add_segment(Some(m), dsy);
        j += if k.y < 0.0 { -1 } else { 1 };
        if j < 0 || j >= self.ny as i64 {
          return Ok(());
        }
        x += k.x * dsy;
        y = ye;
        z += k.z * dsy;
      } else {
        path.add_segment(Some(m), dsz);
        kk += if k.z < 0.0 { -1 } else { 1 };
        if kk < 0 || kk >= self.nz as i64 {
          return Ok(());
        }
        x += k.x * dsz;
        y += k.y * dsz;
        z = ze;
      }
    }
  }

  fn extent(&self) -> Aabb {
    self.extent
  }

  fn weight(&self, m: usize) -> f64 {
    match &self.weightv {
      Some(weightv) => weightv[m],
      None => 1.0,
    }
  }

  fn plot_data(&self) -> crate::output::text::GridPlotData {
    let mut data = crate::output::text::GridPlotData::default();
    let lo = self.extent.min;
    let hi = self.extent.max;
    for &x in &self.xv {
      data.xy.push([x, lo.y, x, hi.y]);
      data.xz.push([x, lo.z, x, hi.z]);
    }
    for &y in &self.yv {
      data.xy.push([lo.x, y, hi.x, y]);
      data.yz.push([y, lo.z, y, hi.z]);
    }
    for &z in &self.zv {
      data.xz.push([lo.x, z, hi.x, z]);
      data.yz.push([lo.y, z, hi.y, z]);
    }
    for &x in &self.xv {
      for &y in &self.yv {
        data.xyz.push([x, y, lo.z, x, y, hi.z]);
      }
      for &z in &self.zv {
        data.xyz.push([x, lo.y, z, x, hi.y, z]);
      }
    }
    for &y in &self.yv {
      for &z in &self.zv {
        data.xyz.push([lo.x, y, z, hi.x, y, z]);
      }
    }
    data
  }
}

#[cfg(test)]
#[path = "cartesian_test.rs"]
mod cartesian_test;
