//! Voronoi grid: cells are the regions closest to a set of generator points.
//!
//! # Module Structure
//!
//! - [`cell`]: half-space clipping that turns generator points into cells
//!   (volume, centroid, bounds, neighbor ids)
//! - [`search`]: uniform block partition plus per-block k-d trees backing
//!   `cell_of` nearest-generator queries
//!
//! Ray traversal walks from cell to cell through the bisector planes of the
//! current cell's neighbors; domain walls are encoded as ids −1..−6.

pub mod cell;
pub mod search;

use glam::DVec3;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::path::{TracePath, OUTSIDE};
use crate::rng::RandomStream;

use self::cell::{compute_cell, VoronoiCell};
use self::search::BlockIndex;
use super::Grid;

/// Bounded retries for rejection sampling inside a cell.
const MAX_POSITION_TRIES: usize = 10_000;

/// A spatial distribution that can draw generator positions, implemented by
/// the medium's density distributions.
pub trait PositionSampler: Send + Sync {
  /// Draw a position from the distribution.
  fn generate_position(&self, rng: &mut RandomStream) -> DVec3;
}

/// How the generator points of the tesselation are obtained.
pub enum GeneratorDistribution {
  /// Uniform random points over the domain.
  Uniform {
    /// Number of generator points.
    count: usize,
  },
  /// Random points with a central-peak 1/r radial profile.
  CentralPeak {
    /// Number of generator points.
    count: usize,
  },
  /// Points drawn from the medium's density distribution.
  DustDensity {
    /// Number of generator points.
    count: usize,
  },
  /// Explicit generator positions (e.g. imported particle locations).
  /// Points outside the domain are silently discarded.
  Points(Vec<DVec3>),
}

/// Voronoi tesselation grid.
pub struct VoronoiGrid {
  extent: Aabb,
  generators: Vec<DVec3>,
  cells: Vec<VoronoiCell>,
  index: BlockIndex,
  eps: f64,
}

impl VoronoiGrid {
  /// Build the tesselation for the configured generator distribution.
  ///
  /// `sampler` supplies density-drawn positions and is required for
  /// [`GeneratorDistribution::DustDensity`].
  pub fn new(
    extent: Aabb,
    distribution: GeneratorDistribution,
    sampler: Option<&dyn PositionSampler>,
    rng: &mut RandomStream,
  ) -> Result<Self> {
    if extent.volume() <= 0.0 {
      return Err(Error::config("the Voronoi domain extent must have positive volume"));
    }
    let points = Self::generate_points(&extent, distribution, sampler, rng)?;
    Self::from_points(extent, points)
  }

  /// Build the tesselation directly from generator points.
  pub fn from_points(extent: Aabb, mut generators: Vec<DVec3>) -> Result<Self> {
    let eps = 1e-12 * extent.widths().length();

    // coincident generators would produce degenerate bisectors
    let before = generators.len();
    generators = dedupe_points(generators, eps);
    if generators.len() < before {
      warn!(dropped = before - generators.len(), "dropped coincident generator points");
    }
    if generators.len() < 2 {
      return Err(Error::config("a Voronoi grid needs at least two distinct generator points"));
    }

    info!(cells = generators.len(), "computing Voronoi tesselation");
    let cells: Vec<VoronoiCell> = generators
      .par_iter()
      .enumerate()
      .map(|(m, &g)| {
        // candidates sorted by increasing distance; the clip loop stops at
        // the security radius so only nearby ones are actually used
        let mut order: Vec<usize> = (0..generators.len()).filter(|&i| i != m).collect();
        order.sort_by(|&a, &b| {
          let da = (generators[a] - g).length_squared();
          let db = (generators[b] - g).length_squared();
          da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });
        compute_cell(&extent, &generators, m, &order, eps)
      })
      .collect::<Result<Vec<_>>>()?;

    let bounds: Vec<Aabb> = cells.iter().map(|c| c.bounds).collect();
    let index = BlockIndex::build(extent, &generators, &bounds, eps);

    let neighbor_stats = {
      let counts: Vec<usize> = cells.iter().map(|c| c.neighbors.len()).collect();
      let total: usize = counts.iter().sum();
      (
        total as f64 / counts.len() as f64,
        counts.iter().copied().min().unwrap_or(0),
        counts.iter().copied().max().unwrap_or(0),
      )
    };
    debug!(
      avg = format!("{:.1}", neighbor_stats.0),
      min = neighbor_stats.1,
      max = neighbor_stats.2,
      "neighbors per cell"
    );
    let blocks = index.block_stats();
    let trees = index.tree_stats();
    debug!(
      nb = index.blocks_per_axis(),
      avg = format!("{:.1}", blocks.average),
      min = blocks.minimum,
      max = blocks.maximum,
      "cells per block"
    );
    debug!(count = trees.count, avg = format!("{:.1}", trees.average), "blocks with search trees");

    Ok(Self { extent, generators, cells, index, eps })
  }

  fn generate_points(
    extent: &Aabb,
    distribution: GeneratorDistribution,
    sampler: Option<&dyn PositionSampler>,
    rng: &mut RandomStream,
  ) -> Result<Vec<DVec3>> {
    match distribution {
      GeneratorDistribution::Uniform { count } => {
        if count < 10 {
          return Err(Error::config("the number of generator points should be at least 10"));
        }
        Ok((0..count).map(|_| rng.position(extent)).collect())
      }
      GeneratorDistribution::CentralPeak { count } => {
        if count < 10 {
          return Err(Error::config("the number of generator points should be at least 10"));
        }
        // steepness of the peak; the central 1/a portion is not covered
        let a: f64 = 1000.0;
        let rscale = extent.max.length();
        let mut points = vec![DVec3::ZERO; count];
        for p in points.iter_mut().skip(1) {
          *p = loop {
            let r = rscale * (1.0 / a).powf(rng.uniform());
            let candidate = r * rng.direction();
            if extent.contains(candidate) {
              break candidate;
            }
          };
        }
        Ok(points)
      }
      GeneratorDistribution::DustDensity { count } => {
        if count < 10 {
          return Err(Error::config("the number of generator points should be at least 10"));
        }
        let sampler = sampler
          .ok_or_else(|| Error::config("a density-drawn Voronoi grid needs a density distribution"))?;
        Ok(
          (0..count)
            .map(|_| loop {
              let p = sampler.generate_position(rng);
              if extent.contains(p) {
                break p;
              }
            })
            .collect(),
        )
      }
      GeneratorDistribution::Points(points) => {
        Ok(points.into_iter().filter(|p| extent.contains(*p)).collect())
      }
    }
  }

  /// Generator point of cell `m`.
  pub fn generator(&self, m: usize) -> DVec3 {
    self.cells[m].generator
  }

  /// Volume centroid of cell `m`.
  pub fn centroid(&self, m: usize) -> DVec3 {
    self.cells[m].centroid
  }

  /// Neighbor ids of cell `m`; −1..−6 encode the domain walls.
  pub fn neighbors(&self, m: usize) -> &[i32] {
    &self.cells[m].neighbors
  }

  /// True when `r` is closer to cell `m`'s generator than to any of the
  /// generators on `ids` (negative wall entries are skipped).
  fn is_point_closest_to(&self, r: DVec3, m: usize, ids: &[i32]) -> bool {
    let target = self.cells[m].squared_distance_to(r);
    ids
      .iter()
      .filter(|&&id| id >= 0)
      .all(|&id| self.cells[id as usize].squared_distance_to(r) >= target)
  }
}

impl Grid for VoronoiGrid {
  fn cell_count(&self) -> usize {
    self.cells.len()
  }

  fn cell_of(&self, position: DVec3) -> Option<usize> {
    self.index.nearest_generator(position, &self.generators)
  }

  fn volume(&self, m: usize) -> f64 {
    self.cells[m].volume
  }

  fn random_position_in(&self, m: usize, rng: &mut RandomStream) -> Result<DVec3> {
    let cell = &self.cells[m];
    for _ in 0..MAX_POSITION_TRIES {
      let r = rng.position(&cell.bounds);
      if self.is_point_closest_to(r, m, &cell.neighbors) {
        return Ok(r);
      }
    }
    Err(Error::numerical(format!("can't find a random position in Voronoi cell {m}")))
  }

  fn trace(&self, path: &mut TracePath) -> Result<()> {
    path.clear();
    let k = path.direction();
    let mut r = path.move_inside(&self.extent, self.eps);
    if r == OUTSIDE {
      path.clear();
      return Ok(());
    }
    let Some(mut mr) = self.cell_of(r) else {
      path.clear();
      return Ok(());
    };

    let mut stagnations = 0u32;
    loop {
      let cell = &self.cells[mr];
      let pr = cell.generator;

      // smallest positive intersection distance over the neighbor planes
      let mut sq = f64::MAX;
      let mut mq: Option<i32> = None;
      for &mi in &cell.neighbors {
        let si = if mi >= 0 {
          // bisector plane between this generator and the neighbor's
          let pi = self.cells[mi as usize].generator;
          let n = pi - pr;
          let ndotk = n.dot(k);
          if ndotk > 0.0 {
            let p = 0.5 * (pi + pr);
            n.dot(p - r) / ndotk
          } else {
            0.0
          }
        } else {
          // domain wall plane
          match mi {
            -1 => (self.extent.min.x - r.x) / k.x,
            -2 => (self.extent.max.x - r.x) / k.x,
            -3 => (self.extent.min.y - r.y) / k.y,
            -4 => (self.extent.max.y - r.y) / k.y,
            -5 => (self.extent.min.z - r.z) / k.z,
            -6 => (self.extent.max.z - r.z) / k.z,
            _ => return Err(Error::numerical(format!("invalid neighbor id {mi} in Voronoi cell {mr}"))),
          }
        };
        if si > 0.0 && si < sq {
          sq = si;
          mq = Some(mi);
        }
      }

      match mq {
        None => {
          // no exit plane ahead: nudge along the ray and relocate
          stagnations += 1;
          if stagnations >= 2 {
            warn!(cell = mr, "packet stuck in the same Voronoi cell twice in a row; ending path");
            return Ok(());
          }
          r += k * self.eps;
          match self.cell_of(r) {
            Some(m) => mr = m,
            None => return Ok(()),
          }
        }
        Some(next) => {
          stagnations = 0;
          path.add_segment(Some(mr), sq);
          r += (sq + self.eps) * k;
          if next < 0 {
            return Ok(());
          }
          mr = next as usize;
        }
      }
    }
  }

  fn extent(&self) -> Aabb {
    self.extent
  }

  fn plot_data(&self) -> crate::output::text::GridPlotData {
    use crate::output::text::GridPlotData;
    // the exact cell polyhedra are not retained after construction; the
    // bounding rectangles of the cells straddling each plane still give a
    // usable impression of the tesselation
    let mut data = GridPlotData::default();
    for (m, cell) in self.cells.iter().enumerate() {
      let b = cell.bounds;
      if b.min.z <= 0.0 && b.max.z >= 0.0 {
        GridPlotData::push_rect(&mut data.xy, b.min.x, b.min.y, b.max.x, b.max.y);
      }
      if b.min.y <= 0.0 && b.max.y >= 0.0 {
        GridPlotData::push_rect(&mut data.xz, b.min.x, b.min.z, b.max.x, b.max.z);
      }
      if b.min.x <= 0.0 && b.max.x >= 0.0 {
        GridPlotData::push_rect(&mut data.yz, b.min.y, b.min.z, b.max.y, b.max.z);
      }
      // a short tripod marks each generator in the 3D file
      if m <= 1000 {
        let g = cell.generator;
        let d = 0.02 * self.extent.widths().length() / 3.0f64.sqrt();
        data.xyz.push([g.x - d, g.y, g.z, g.x + d, g.y, g.z]);
        data.xyz.push([g.x, g.y - d, g.z, g.x, g.y + d, g.z]);
        data.xyz.push([g.x, g.y, g.z - d, g.x, g.y, g.z + d]);
      }
    }
    data
  }
}

/// Drop points that coincide within `eps` with an earlier point.
fn dedupe_points(points: Vec<DVec3>, eps: f64) -> Vec<DVec3> {
  let eps_sq = eps * eps;
  let mut kept: Vec<DVec3> = Vec::with_capacity(points.len());
  for p in points {
    if kept.iter().all(|&q| (p - q).length_squared() > eps_sq) {
      kept.push(p);
    }
  }
  kept
}

#[cfg(test)]
#[path = "voronoi_test.rs"]
mod voronoi_test;
