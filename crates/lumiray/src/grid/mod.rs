//! Spatial grids: the uniform traversal contract and its implementations.
//!
//! A grid partitions the simulation domain into cells that exactly cover the
//! extent with no overlap. After construction a grid is immutable; traversal
//! state lives entirely in the caller-owned [`TracePath`].
//!
//! # Module Structure
//!
//! - [`cartesian`]: regular grid with linear / power-law meshes and an
//!   optional two-phase weight field
//! - [`tree`]: adaptive octree / k-d tree with per-wall neighbor lists
//! - [`voronoi`]: Voronoi tesselation with block + k-d point location

pub mod cartesian;
pub mod tree;
pub mod voronoi;

pub use cartesian::{AxisMesh, CartesianGrid, TwoPhaseParams};
pub use tree::{SplitAxisPolicy, SplitPointPolicy, TraversalMethod, TreeGrid, TreeKind};
pub use voronoi::{GeneratorDistribution, VoronoiGrid};

use glam::DVec3;

use crate::error::Result;
use crate::geometry::Aabb;
use crate::path::TracePath;
use crate::rng::RandomStream;

/// Per-cell density supplied directly by a grid that aligns with the density
/// structure, bypassing random sampling during medium setup.
pub trait DirectDensity {
  /// Density of component `h` in cell `m`.
  fn direct_density(&self, h: usize, m: usize) -> f64;
}

/// Minimal contract required from every concrete grid.
pub trait Grid: Send + Sync {
  /// Total number of cells.
  fn cell_count(&self) -> usize;

  /// The cell containing `position`, or `None` when outside the domain.
  fn cell_of(&self, position: DVec3) -> Option<usize>;

  /// Volume of cell `m`.
  fn volume(&self, m: usize) -> f64;

  /// Uniform random position inside cell `m`.
  fn random_position_in(&self, m: usize, rng: &mut RandomStream) -> Result<DVec3>;

  /// Trace the ray described by the path's start position and direction
  /// through the grid, appending one segment per cell crossed. Out-of-domain
  /// travel before entry is recorded with a `None` cell id.
  fn trace(&self, path: &mut TracePath) -> Result<()>;

  /// The domain extent.
  fn extent(&self) -> Aabb;

  /// Grid dimensionality (1, 2, or 3) for convergence-diagnostic output.
  fn dimension(&self) -> usize {
    3
  }

  /// Multiplier applied to the theoretical density sample in cell `m`.
  ///
  /// Unity except for the two-phase cartesian variant.
  fn weight(&self, m: usize) -> f64 {
    let _ = m;
    1.0
  }

  /// Optional capability: density taken directly from the grid structure.
  fn density_interface(&self) -> Option<&dyn DirectDensity> {
    None
  }

  /// Wall segments for the grid plot files; empty when the grid offers no
  /// plottable structure.
  fn plot_data(&self) -> crate::output::text::GridPlotData {
    Default::default()
  }
}

/// Domain half-extent accessors shared by diagnostics writers.
pub trait GridExtents {
  /// Maximum extent along x.
  fn xmax(&self) -> f64;
  /// Maximum extent along y.
  fn ymax(&self) -> f64;
  /// Maximum extent along z.
  fn zmax(&self) -> f64;
}

impl<G: Grid + ?Sized> GridExtents for G {
  fn xmax(&self) -> f64 {
    self.extent().max.x
  }
  fn ymax(&self) -> f64 {
    self.extent().max.y
  }
  fn zmax(&self) -> f64 {
    self.extent().max.z
  }
}

/// The six walls of a cuboidal node, in storage order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wall {
  /// xmin wall.
  Back = 0,
  /// xmax wall.
  Front = 1,
  /// ymin wall.
  Left = 2,
  /// ymax wall.
  Right = 3,
  /// zmin wall.
  Bottom = 4,
  /// zmax wall.
  Top = 5,
}

impl Wall {
  /// The wall facing this one on a neighboring node.
  pub fn complement(self) -> Wall {
    match self {
      Wall::Back => Wall::Front,
      Wall::Front => Wall::Back,
      Wall::Left => Wall::Right,
      Wall::Right => Wall::Left,
      Wall::Bottom => Wall::Top,
      Wall::Top => Wall::Bottom,
    }
  }

  /// All walls in storage order.
  pub const ALL: [Wall; 6] = [Wall::Back, Wall::Front, Wall::Left, Wall::Right, Wall::Bottom, Wall::Top];
}
