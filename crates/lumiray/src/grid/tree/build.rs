//! Recursive subdivision of the tree grid.
//!
//! Nodes are processed in creation order; a node below `min_level` is always
//! subdivided, one at `max_level` never is, and in between a node splits when
//! any enabled criterion (mass fraction, estimated optical depth, density
//! dispersion) exceeds its threshold. A zero threshold disables a criterion.

use glam::DVec3;

use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::rng::RandomStream;

use super::node::{
  delete_neighbor, half_boxes, make_neighbors, octant_boxes, sort_neighbors, NodeId, TreeNode,
};
use super::{SplitAxisPolicy, SplitPointPolicy, TreeDensitySource, TreeGridConfig, TreeKind};
use crate::grid::Wall;

/// Density summary for one node, from analytic integration or sampling.
struct NodeDensityStats {
  mass: f64,
  barycenter: DVec3,
  dispersion: f64,
}

/// Estimate mass, barycenter and density dispersion from `n` random samples.
fn sample_stats(
  source: &dyn TreeDensitySource,
  extent: &Aabb,
  n: usize,
  rng: &mut RandomStream,
) -> NodeDensityStats {
  let mut rho_sum = 0.0;
  let mut rho_sq_sum = 0.0;
  let mut weighted = DVec3::ZERO;
  for _ in 0..n {
    let r = rng.position(extent);
    let rho = source.density_total(r);
    rho_sum += rho;
    rho_sq_sum += rho * rho;
    weighted += rho * r;
  }
  let mean = rho_sum / n as f64;
  let variance = (rho_sq_sum / n as f64 - mean * mean).max(0.0);
  NodeDensityStats {
    mass: extent.volume() * mean,
    barycenter: if rho_sum > 0.0 { weighted / rho_sum } else { extent.center() },
    dispersion: variance.sqrt(),
  }
}

/// Total mass in a box through the analytic interface, if every component
/// supports it.
fn analytic_mass(source: &dyn TreeDensitySource, extent: &Aabb) -> Option<f64> {
  let mut mass = 0.0;
  for h in 0..source.n_comp() {
    mass += source.mass_in_box(h, extent)?;
  }
  Some(mass)
}

pub(super) struct BuildResult {
  pub nodes: Vec<TreeNode>,
  pub leaf_ids: Vec<NodeId>,
  pub cell_of_node: Vec<i64>,
}

/// Run the subdivision loop and, when the neighbor traversal is configured,
/// maintain and finally sort the per-wall neighbor lists.
pub(super) fn build_tree(
  extent: Aabb,
  config: &TreeGridConfig,
  source: &dyn TreeDensitySource,
  rng: &mut RandomStream,
) -> Result<BuildResult> {
  let use_neighbors = config.traversal == super::TraversalMethod::Neighbor;
  let use_analytic_mass = config.split_point == SplitPointPolicy::Center
    && config.split_axis != SplitAxisPolicy::Barycentric;
  let total_mass = source.total_mass();
  if total_mass <= 0.0 {
    return Err(Error::config("the density distribution carries no mass; the tree has nothing to resolve"));
  }
  let rho_ref = total_mass / extent.volume();

  let mut nodes = vec![TreeNode::new(extent, 0, None, 0)];
  let mut next = 0usize;
  while next < nodes.len() {
    let id = next;
    next += 1;

    let level = nodes[id].level;
    if level >= config.max_level {
      continue;
    }

    // density statistics are needed for the criteria above min_level and for
    // barycentric splitting at any level
    let needs_stats = level >= config.min_level
      || config.split_point == SplitPointPolicy::Barycenter
      || config.split_axis == SplitAxisPolicy::Barycentric;
    let stats = if needs_stats {
      let node_extent = nodes[id].extent;
      let analytic = if use_analytic_mass { analytic_mass(source, &node_extent) } else { None };
      let mut stats = sample_stats(source, &node_extent, config.sample_count, rng);
      if let Some(mass) = analytic {
        stats.mass = mass;
      }
      Some(stats)
    } else {
      None
    };

    let subdivide = if level < config.min_level {
      true
    } else {
      let stats = stats.as_ref().expect("stats computed above min_level");
      let volume = nodes[id].extent.volume();
      let mass_exceeded =
        config.max_mass_fraction > 0.0 && stats.mass / total_mass > config.max_mass_fraction;
      let tau_exceeded = config.max_optical_depth > 0.0
        && config.reference_opacity * stats.mass / volume.powf(2.0 / 3.0) > config.max_optical_depth;
      let disp_exceeded = config.max_dens_disp_fraction > 0.0
        && stats.dispersion / rho_ref > config.max_dens_disp_fraction;
      mass_exceeded || tau_exceeded || disp_exceeded
    };
    if !subdivide {
      continue;
    }

    let split_point = match config.split_point {
      SplitPointPolicy::Center => nodes[id].extent.center(),
      SplitPointPolicy::Barycenter => {
        let b = stats.as_ref().expect("stats computed for barycentric split").barycenter;
        // a barycenter on a wall would create a degenerate child
        clamp_into(&nodes[id].extent, b)
      }
    };

    match config.kind {
      TreeKind::Octree => {
        let first = nodes.len();
        let boxes = octant_boxes(&nodes[id].extent, split_point);
        for (l, child_box) in boxes.into_iter().enumerate() {
          nodes.push(TreeNode::new(child_box, level + 1, Some(id), l as u8));
        }
        nodes[id].first_child = Some(first);
        nodes[id].child_count = 8;
        if use_neighbors {
          add_oct_neighbors(&mut nodes, id, split_point);
        }
      }
      TreeKind::BinTree => {
        let dir = match config.split_axis {
          SplitAxisPolicy::Alternating => (level % 3) as u8,
          SplitAxisPolicy::Barycentric => {
            let b = stats.as_ref().expect("stats computed for barycentric axis").barycenter;
            nearest_wall_axis(&nodes[id].extent, b)
          }
        };
        let first = nodes.len();
        let boxes = half_boxes(&nodes[id].extent, dir);
        for (l, child_box) in boxes.into_iter().enumerate() {
          nodes.push(TreeNode::new(child_box, level + 1, Some(id), l as u8));
        }
        nodes[id].first_child = Some(first);
        nodes[id].child_count = 2;
        nodes[id].split_dir = dir;
        if use_neighbors {
          add_kd_neighbors(&mut nodes, id, dir);
        }
      }
    }
  }

  if use_neighbors {
    for id in 0..nodes.len() {
      sort_neighbors(&mut nodes, id);
    }
  }

  // leaves become the dust cells, in arena order
  let mut leaf_ids = Vec::new();
  let mut cell_of_node = vec![-1i64; nodes.len()];
  for (id, node) in nodes.iter().enumerate() {
    if node.is_leaf() {
      cell_of_node[id] = leaf_ids.len() as i64;
      leaf_ids.push(id);
    }
  }

  Ok(BuildResult { nodes, leaf_ids, cell_of_node })
}

/// Pull a split point strictly inside the node so no child degenerates.
fn clamp_into(extent: &Aabb, r: DVec3) -> DVec3 {
  let w = extent.widths() * 1e-3;
  r.clamp(extent.min + w, extent.max - w)
}

/// Axis along which `b` sits closest to a wall of `extent`, in normalized
/// units.
fn nearest_wall_axis(extent: &Aabb, b: DVec3) -> u8 {
  let w = extent.widths();
  let dx = (b.x - extent.min.x).min(extent.max.x - b.x) / w.x;
  let dy = (b.y - extent.min.y).min(extent.max.y - b.y) / w.y;
  let dz = (b.z - extent.min.z).min(extent.max.z - b.z) / w.z;
  if dx < dy {
    if dx < dz {
      0
    } else {
      2
    }
  } else if dy < dz {
    1
  } else {
    2
  }
}

/// After an octree split, wire the internal sibling relations and hand the
/// parent's external neighbors down to the children whose wall projections
/// overlap them.
fn add_oct_neighbors(nodes: &mut Vec<TreeNode>, parent: NodeId, split: DVec3) {
  let first = nodes[parent].first_child.expect("parent was just split");
  let c = |l: usize| first + l;

  // internal neighbors: each child touches three siblings
  make_neighbors(nodes, Wall::Front, c(0), c(1));
  make_neighbors(nodes, Wall::Right, c(0), c(2));
  make_neighbors(nodes, Wall::Top, c(0), c(4));
  make_neighbors(nodes, Wall::Right, c(1), c(3));
  make_neighbors(nodes, Wall::Top, c(1), c(5));
  make_neighbors(nodes, Wall::Front, c(2), c(3));
  make_neighbors(nodes, Wall::Top, c(2), c(6));
  make_neighbors(nodes, Wall::Top, c(3), c(7));
  make_neighbors(nodes, Wall::Front, c(4), c(5));
  make_neighbors(nodes, Wall::Right, c(4), c(6));
  make_neighbors(nodes, Wall::Right, c(5), c(7));
  make_neighbors(nodes, Wall::Front, c(6), c(7));

  let (xc, yc, zc) = (split.x, split.y, split.z);

  // children on each parent wall, with the overlap test against the
  // neighbor's extent perpendicular to that wall
  type Pick = fn(&Aabb, f64, f64) -> [bool; 4];
  let yz: Pick = |e, yc, zc| {
    [
      e.min.y <= yc && e.min.z <= zc,
      e.max.y >= yc && e.min.z <= zc,
      e.min.y <= yc && e.max.z >= zc,
      e.max.y >= yc && e.max.z >= zc,
    ]
  };
  let xz: Pick = |e, xc, zc| {
    [
      e.min.x <= xc && e.min.z <= zc,
      e.max.x >= xc && e.min.z <= zc,
      e.min.x <= xc && e.max.z >= zc,
      e.max.x >= xc && e.max.z >= zc,
    ]
  };
  let xy: Pick = |e, xc, yc| {
    [
      e.min.x <= xc && e.min.y <= yc,
      e.max.x >= xc && e.min.y <= yc,
      e.min.x <= xc && e.max.y >= yc,
      e.max.x >= xc && e.max.y >= yc,
    ]
  };

  let walls: [(Wall, [usize; 4], Pick, f64, f64); 6] = [
    (Wall::Back, [0, 2, 4, 6], yz, yc, zc),
    (Wall::Front, [1, 3, 5, 7], yz, yc, zc),
    (Wall::Left, [0, 1, 4, 5], xz, xc, zc),
    (Wall::Right, [2, 3, 6, 7], xz, xc, zc),
    (Wall::Bottom, [0, 1, 2, 3], xy, xc, yc),
    (Wall::Top, [4, 5, 6, 7], xy, xc, yc),
  ];

  for (wall, children, pick, c1, c2) in walls {
    let external: Vec<NodeId> = nodes[parent].neighbors[wall as usize].iter().copied().collect();
    for neighbor in external {
      delete_neighbor(nodes, wall.complement(), neighbor, parent);
      let flags = pick(&nodes[neighbor].extent, c1, c2);
      for (slot, &child) in children.iter().enumerate() {
        if flags[slot] {
          make_neighbors(nodes, wall.complement(), neighbor, c(child));
        }
      }
    }
  }
}

/// After a k-d split, wire the sibling relation and redistribute the
/// parent's external neighbors; along the split axis each side inherits one
/// wall wholesale, on the other walls inheritance follows the overlap test.
fn add_kd_neighbors(nodes: &mut Vec<TreeNode>, parent: NodeId, dir: u8) {
  let first = nodes[parent].first_child.expect("parent was just split");
  let (c0, c1) = (first, first + 1);

  // the parent walls perpendicular to the split axis go wholesale; the other
  // four are split by the overlap test on the split coordinate
  let (inner_wall, lo_wall, hi_wall, split_coord): (Wall, Wall, Wall, f64) = match dir {
    0 => (Wall::Front, Wall::Back, Wall::Front, nodes[c0].extent.max.x),
    1 => (Wall::Right, Wall::Left, Wall::Right, nodes[c0].extent.max.y),
    _ => (Wall::Top, Wall::Bottom, Wall::Top, nodes[c0].extent.max.z),
  };
  make_neighbors(nodes, inner_wall, c0, c1);

  for wall in Wall::ALL {
    let external: Vec<NodeId> = nodes[parent].neighbors[wall as usize].iter().copied().collect();
    for neighbor in external {
      delete_neighbor(nodes, wall.complement(), neighbor, parent);
      if wall == lo_wall {
        make_neighbors(nodes, wall.complement(), neighbor, c0);
      } else if wall == hi_wall {
        make_neighbors(nodes, wall.complement(), neighbor, c1);
      } else {
        let e = nodes[neighbor].extent;
        let (e_lo, e_hi) = match dir {
          0 => (e.min.x, e.max.x),
          1 => (e.min.y, e.max.y),
          _ => (e.min.z, e.max.z),
        };
        if e_lo <= split_coord {
          make_neighbors(nodes, wall.complement(), neighbor, c0);
        }
        if e_hi >= split_coord {
          make_neighbors(nodes, wall.complement(), neighbor, c1);
        }
      }
    }
  }
}
