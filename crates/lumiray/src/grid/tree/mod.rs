//! Adaptive tree grid: octree or binary k-d tree over a cuboidal domain.
//!
//! The root node encloses the whole domain; nodes subdivide recursively until
//! the refinement criteria are satisfied, and the childless nodes become the
//! grid cells. Nodes live in a contiguous arena with index links.
//!
//! # Module Structure
//!
//! - [`node`]: arena node type, child-box construction, neighbor machinery
//! - [`build`]: subdivision loop and criteria
//!
//! Three interchangeable ray-traversal strategies are supported: re-descend
//! from the root each step (`TopDown`), follow precomputed per-wall neighbor
//! lists (`Neighbor`), or derive the successor from octant arithmetic on the
//! arena indices (`Bookkeeping`, midpoint-split octrees only).

pub mod build;
pub mod node;

use std::sync::Arc;

use glam::DVec3;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::path::{TracePath, OUTSIDE};
use crate::rng::RandomStream;

use self::node::{NodeId, TreeNode};
use super::{DirectDensity, Grid, Wall};

/// Octree (eight-way) or binary k-d (two-way) subdivision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeKind {
  /// Eight children per subdivided node.
  Octree,
  /// Two children per subdivided node, split along one axis.
  BinTree,
}

/// How the successor cell is located during traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraversalMethod {
  /// Re-descend the tree from the root at every segment.
  TopDown,
  /// Look up candidate successors on the exit wall's neighbor list.
  Neighbor,
  /// Jump to the neighbor through octant index arithmetic.
  Bookkeeping,
}

/// Where a subdivided node is split.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitPointPolicy {
  /// Geometric center of the node.
  Center,
  /// Mass-weighted centroid, estimated from the density samples.
  Barycenter,
}

/// How a k-d node chooses its split axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitAxisPolicy {
  /// Cycle x, y, z by node level.
  Alternating,
  /// The axis along which the barycenter sits closest to a wall, in
  /// normalized units.
  Barycentric,
}

/// Density evaluation interface the tree builder needs from the medium.
pub trait TreeDensitySource: Send + Sync {
  /// Number of density components.
  fn n_comp(&self) -> usize {
    1
  }

  /// Density of component `h` at `r`.
  fn density(&self, h: usize, r: DVec3) -> f64;

  /// Total density at `r`.
  fn density_total(&self, r: DVec3) -> f64 {
    (0..self.n_comp()).map(|h| self.density(h, r)).sum()
  }

  /// Analytically integrated mass of component `h` inside `aabb`, when the
  /// distribution supports it.
  fn mass_in_box(&self, h: usize, aabb: &Aabb) -> Option<f64> {
    let _ = (h, aabb);
    None
  }

  /// Total mass of the distribution.
  fn total_mass(&self) -> f64;
}

/// Configuration of the tree grid builder.
#[derive(Clone, Debug)]
pub struct TreeGridConfig {
  /// Subdivision arity.
  pub kind: TreeKind,
  /// Nodes below this level always subdivide.
  pub min_level: u32,
  /// Nodes at this level never subdivide.
  pub max_level: u32,
  /// Successor search strategy during traversal.
  pub traversal: TraversalMethod,
  /// Split point placement.
  pub split_point: SplitPointPolicy,
  /// Split axis selection (k-d trees only).
  pub split_axis: SplitAxisPolicy,
  /// Random density samples per subdivision decision.
  pub sample_count: usize,
  /// Maximum estimated mean optical depth per cell; zero disables.
  pub max_optical_depth: f64,
  /// Maximum fraction of the total mass per cell; zero disables.
  pub max_mass_fraction: f64,
  /// Maximum density dispersion per cell, as a fraction of the reference
  /// density; zero disables.
  pub max_dens_disp_fraction: f64,
  /// Reference opacity κ for the optical-depth criterion.
  pub reference_opacity: f64,
}

impl Default for TreeGridConfig {
  fn default() -> Self {
    Self {
      kind: TreeKind::Octree,
      min_level: 2,
      max_level: 6,
      traversal: TraversalMethod::Neighbor,
      split_point: SplitPointPolicy::Center,
      split_axis: SplitAxisPolicy::Alternating,
      sample_count: 100,
      max_optical_depth: 0.0,
      max_mass_fraction: 1e-6,
      max_dens_disp_fraction: 0.0,
      reference_opacity: 2600.0,
    }
  }
}

/// Adaptive tree grid.
pub struct TreeGrid {
  extent: Aabb,
  nodes: Vec<TreeNode>,
  leaf_ids: Vec<NodeId>,
  cell_of_node: Vec<i64>,
  traversal: TraversalMethod,
  kind: TreeKind,
  eps: f64,
  // kept for the direct-density capability when analytic masses exist
  source: Arc<dyn TreeDensitySource>,
  direct_density: bool,
}

impl TreeGrid {
  /// Build the tree over `extent` by recursive subdivision of `source`.
  pub fn new(
    extent: Aabb,
    config: TreeGridConfig,
    source: Arc<dyn TreeDensitySource>,
    rng: &mut RandomStream,
  ) -> Result<Self> {
    if config.max_level < config.min_level {
      return Err(Error::config("the maximum tree level must not be below the minimum level"));
    }
    if config.sample_count < 10 {
      return Err(Error::config("the number of density samples per cell must be at least 10"));
    }
    if config.traversal == TraversalMethod::Bookkeeping {
      if config.kind == TreeKind::BinTree {
        return Err(Error::config("the bookkeeping traversal method is not compatible with a binary tree"));
      }
      if config.split_point == SplitPointPolicy::Barycenter {
        return Err(Error::config("the bookkeeping traversal method requires midpoint splits"));
      }
    }

    let result = build::build_tree(extent, &config, source.as_ref(), rng)?;
    let direct_density = config.split_point == SplitPointPolicy::Center
      && config.split_axis != SplitAxisPolicy::Barycentric
      && (0..source.n_comp()).all(|h| source.mass_in_box(h, &extent).is_some());

    let max_level = result.nodes.iter().map(|n| n.level).max().unwrap_or(0);
    debug!(
      nodes = result.nodes.len(),
      cells = result.leaf_ids.len(),
      max_level,
      "constructed tree grid"
    );

    Ok(Self {
      extent,
      nodes: result.nodes,
      leaf_ids: result.leaf_ids,
      cell_of_node: result.cell_of_node,
      traversal: config.traversal,
      kind: config.kind,
      eps: 1e-12 * extent.diagonal(),
      source,
      direct_density,
    })
  }

  /// Number of nodes in the arena (leaves and internal nodes).
  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  /// The arena node backing cell `m`.
  pub fn leaf(&self, m: usize) -> &TreeNode {
    &self.nodes[self.leaf_ids[m]]
  }

  /// Level of the node backing cell `m`.
  pub fn leaf_level(&self, m: usize) -> u32 {
    self.leaf(m).level
  }

  /// Descend from `start` to the leaf containing `r`.
  fn descend(&self, start: NodeId, r: DVec3) -> Option<NodeId> {
    if !self.nodes[start].extent.contains(r) {
      return None;
    }
    let mut id = start;
    while !self.nodes[id].is_leaf() {
      let node = &self.nodes[id];
      let first = node.first_child.expect("non-leaf has children");
      id = match self.kind {
        TreeKind::Octree => node.oct_child_containing(self.nodes[first].extent.max, r),
        TreeKind::BinTree => {
          let split = match node.split_dir {
            0 => self.nodes[first].extent.max.x,
            1 => self.nodes[first].extent.max.y,
            _ => self.nodes[first].extent.max.z,
          };
          node.kd_child_containing(split, r)
        }
      };
    }
    Some(id)
  }

  /// The leaf containing `r`, or `None` outside the domain.
  fn leaf_containing(&self, r: DVec3) -> Option<NodeId> {
    self.descend(0, r)
  }

  /// Successor lookup through the exit wall's neighbor list, trying the
  /// largest-overlap candidates first.
  fn neighbor_successor(&self, id: NodeId, wall: Wall, r: DVec3) -> Option<NodeId> {
    self.nodes[id].neighbors[wall as usize]
      .iter()
      .copied()
      .find(|&n| self.nodes[n].extent.contains(r))
  }

  /// Successor lookup by octant arithmetic: climb to the first ancestor
  /// whose octant can flip toward the exit wall, jump to that sibling, and
  /// descend to the leaf containing `r`.
  fn bookkeeping_successor(&self, leaf: NodeId, wall: Wall, r: DVec3) -> Option<NodeId> {
    let (bit, toward_upper) = match wall {
      Wall::Back => (0u8, false),
      Wall::Front => (0, true),
      Wall::Left => (1, false),
      Wall::Right => (1, true),
      Wall::Bottom => (2, false),
      Wall::Top => (2, true),
    };
    let mut id = leaf;
    loop {
      let node = &self.nodes[id];
      let parent = node.parent?;
      let in_upper = (node.child_rank >> bit) & 1 == 1;
      if in_upper != toward_upper {
        let sibling_rank = node.child_rank ^ (1 << bit);
        let first = self.nodes[parent].first_child.expect("parent of a child node");
        return self.descend(first + sibling_rank as usize, r);
      }
      id = parent;
    }
  }
}

impl Grid for TreeGrid {
  fn cell_count(&self) -> usize {
    self.leaf_ids.len()
  }

  fn cell_of(&self, position: DVec3) -> Option<usize> {
    let leaf = self.leaf_containing(position)?;
    Some(self.cell_of_node[leaf] as usize)
  }

  fn volume(&self, m: usize) -> f64 {
    self.leaf(m).extent.volume()
  }

  fn random_position_in(&self, m: usize, rng: &mut RandomStream) -> Result<DVec3> {
    Ok(rng.position(&self.leaf(m).extent))
  }

  fn trace(&self, path: &mut TracePath) -> Result<()> {
    path.clear();
    let k = path.direction();
    let mut r = path.move_inside(&self.extent, self.eps);
    if r == OUTSIDE {
      path.clear();
      return Ok(());
    }
    let Some(mut id) = self.leaf_containing(r) else {
      path.clear();
      return Ok(());
    };

    let mut stagnations = 0u32;
    loop {
      let extent = self.nodes[id].extent;

      // candidate distances to the walls ahead of the ray; a wall already
      // behind the point (possible after an ε nudge) is not a candidate
      let candidate = |lo: f64, hi: f64, pos: f64, dir: f64| -> f64 {
        if dir.abs() > 1e-15 {
          let target = if dir < 0.0 { lo } else { hi };
          let ds = (target - pos) / dir;
          if ds > 0.0 {
            ds
          } else {
            f64::INFINITY
          }
        } else {
          f64::INFINITY
        }
      };
      let dsx = candidate(extent.min.x, extent.max.x, r.x, k.x);
      let dsy = candidate(extent.min.y, extent.max.y, r.y, k.y);
      let dsz = candidate(extent.min.z, extent.max.z, r.z, k.z);

      let (ds, wall) = if dsx <= dsy && dsx <= dsz {
        (dsx, if k.x < 0.0 { Wall::Back } else { Wall::Front })
      } else if dsy < dsx && dsy <= dsz {
        (dsy, if k.y < 0.0 { Wall::Left } else { Wall::Right })
      } else {
        (dsz, if k.z < 0.0 { Wall::Bottom } else { Wall::Top })
      };
      if !ds.is_finite() {
        warn!(cell = self.cell_of_node[id], "tree traversal found no forward wall; ending path");
        return Ok(());
      }

      let m = self.cell_of_node[id] as usize;
      path.add_segment(Some(m), ds);

      let next_r = r + (ds + self.eps) * k;
      if !self.extent.contains(next_r) {
        return Ok(());
      }

      let next = match self.traversal {
        TraversalMethod::TopDown => self.leaf_containing(next_r),
        TraversalMethod::Neighbor => self
          .neighbor_successor(id, wall, next_r)
          .or_else(|| self.leaf_containing(next_r)),
        TraversalMethod::Bookkeeping => self
          .bookkeeping_successor(id, wall, next_r)
          .or_else(|| self.leaf_containing(next_r)),
      };

      match next {
        None => return Ok(()),
        Some(next_id) if next_id == id => {
          // floating-point stagnation: nudge once, then give up
          stagnations += 1;
          if stagnations >= 2 {
            warn!(cell = m, "packet stuck in the same cell twice in a row; ending path");
            return Ok(());
          }
          r = next_r + self.eps * k;
        }
        Some(next_id) => {
          id = next_id;
          r = next_r;
          stagnations = 0;
        }
      }
    }
  }

  fn extent(&self) -> Aabb {
    self.extent
  }

  fn density_interface(&self) -> Option<&dyn DirectDensity> {
    if self.direct_density {
      Some(self)
    } else {
      None
    }
  }

  fn plot_data(&self) -> crate::output::text::GridPlotData {
    use crate::output::text::GridPlotData;
    let mut data = GridPlotData::default();
    // keep the 3D output readable by limiting it to the shallow levels
    let max_plot_level = 3u32;
    for &id in &self.leaf_ids {
      let e = self.nodes[id].extent;
      if e.min.z <= 0.0 && e.max.z >= 0.0 {
        GridPlotData::push_rect(&mut data.xy, e.min.x, e.min.y, e.max.x, e.max.y);
      }
      if e.min.y <= 0.0 && e.max.y >= 0.0 {
        GridPlotData::push_rect(&mut data.xz, e.min.x, e.min.z, e.max.x, e.max.z);
      }
      if e.min.x <= 0.0 && e.max.x >= 0.0 {
        GridPlotData::push_rect(&mut data.yz, e.min.y, e.min.z, e.max.y, e.max.z);
      }
      if self.nodes[id].level <= max_plot_level {
        push_box_edges(&mut data.xyz, &e);
      }
    }
    data
  }
}

/// The twelve edges of a box as 3D plot segments.
fn push_box_edges(list: &mut Vec<[f64; 6]>, e: &Aabb) {
  let (lo, hi) = (e.min, e.max);
  for (y, z) in [(lo.y, lo.z), (hi.y, lo.z), (lo.y, hi.z), (hi.y, hi.z)] {
    list.push([lo.x, y, z, hi.x, y, z]);
  }
  for (x, z) in [(lo.x, lo.z), (hi.x, lo.z), (lo.x, hi.z), (hi.x, hi.z)] {
    list.push([x, lo.y, z, x, hi.y, z]);
  }
  for (x, y) in [(lo.x, lo.y), (hi.x, lo.y), (lo.x, hi.y), (hi.x, hi.y)] {
    list.push([x, y, lo.z, x, y, hi.z]);
  }
}

impl DirectDensity for TreeGrid {
  fn direct_density(&self, h: usize, m: usize) -> f64 {
    let extent = self.leaf(m).extent;
    match self.source.mass_in_box(h, &extent) {
      Some(mass) => mass / extent.volume(),
      None => 0.0,
    }
  }
}
