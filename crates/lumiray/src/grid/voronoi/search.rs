//! Point location acceleration for the Voronoi grid.
//!
//! The domain is cut into a uniform grid of cuboidal blocks; every block
//! lists the cells whose bounding boxes overlap it. Blocks with more than a
//! handful of entries additionally get a k-d search tree over the generator
//! points, so `cell_of` is a nearest-generator query either way.

use glam::DVec3;

use crate::geometry::Aabb;

/// Blocks with more than this many cells get a search tree.
const TREE_THRESHOLD: usize = 5;

/// Lexicographic comparison of generator points starting at `axis`.
///
/// The strict ordering breaks ties between equal coordinates so the k-d
/// median split is well defined.
fn less_than(p1: DVec3, p2: DVec3, axis: usize) -> bool {
  let key = |p: DVec3| match axis {
    0 => [p.x, p.y, p.z],
    1 => [p.y, p.z, p.x],
    _ => [p.z, p.x, p.y],
  };
  key(p1) < key(p2)
}

/// Node of a k-d tree stored in an arena.
struct KdNode {
  /// Generator index defining the split at this node.
  m: u32,
  /// Split axis, cycling with depth.
  axis: u8,
  left: i32,
  right: i32,
}

/// K-d search tree over a subset of the generator points.
pub struct KdTree {
  nodes: Vec<KdNode>,
  root: i32,
}

impl KdTree {
  /// Build a balanced tree over the generator indices in `ids`.
  pub fn build(ids: &mut [usize], points: &[DVec3]) -> Self {
    let mut nodes = Vec::with_capacity(ids.len());
    let root = Self::build_subtree(ids, points, 0, &mut nodes);
    Self { nodes, root }
  }

  fn build_subtree(ids: &mut [usize], points: &[DVec3], depth: usize, nodes: &mut Vec<KdNode>) -> i32 {
    if ids.is_empty() {
      return -1;
    }
    let axis = depth % 3;
    let median = ids.len() / 2;
    ids.select_nth_unstable_by(median, |&a, &b| {
      if less_than(points[a], points[b], axis) {
        std::cmp::Ordering::Less
      } else {
        std::cmp::Ordering::Greater
      }
    });
    let m = ids[median] as u32;
    let (lo, rest) = ids.split_at_mut(median);
    let hi = &mut rest[1..];
    let left = Self::build_subtree(lo, points, depth + 1, nodes);
    let right = Self::build_subtree(hi, points, depth + 1, nodes);
    nodes.push(KdNode { m, axis: axis as u8, left, right });
    nodes.len() as i32 - 1
  }

  /// Generator index nearest to `r`.
  pub fn nearest(&self, r: DVec3, points: &[DVec3]) -> usize {
    let mut best = usize::MAX;
    let mut best_sq = f64::MAX;
    self.nearest_in(self.root, r, points, &mut best, &mut best_sq);
    best
  }

  fn nearest_in(&self, node: i32, r: DVec3, points: &[DVec3], best: &mut usize, best_sq: &mut f64) {
    if node < 0 {
      return;
    }
    let n = &self.nodes[node as usize];
    let p = points[n.m as usize];
    let d_sq = (r - p).length_squared();
    if d_sq < *best_sq {
      *best = n.m as usize;
      *best_sq = d_sq;
    }
    let delta = match n.axis {
      0 => r.x - p.x,
      1 => r.y - p.y,
      _ => r.z - p.z,
    };
    let (near, far) = if less_than(r, p, n.axis as usize) {
      (n.left, n.right)
    } else {
      (n.right, n.left)
    };
    self.nearest_in(near, r, points, best, best_sq);
    // only cross the split plane when a closer point could lie beyond it
    if delta * delta < *best_sq {
      self.nearest_in(far, r, points, best, best_sq);
    }
  }
}

/// Statistics of the block lists or trees, for construction logging.
#[derive(Clone, Copy, Debug, Default)]
pub struct OccupancyStats {
  /// Number of populated containers considered.
  pub count: usize,
  /// Average entries per container.
  pub average: f64,
  /// Minimum entries.
  pub minimum: usize,
  /// Maximum entries.
  pub maximum: usize,
}

/// Uniform block partition of the domain with per-block cell lists and
/// optional k-d trees.
pub struct BlockIndex {
  extent: Aabb,
  nb: usize,
  lists: Vec<Vec<usize>>,
  trees: Vec<Option<KdTree>>,
}

impl BlockIndex {
  /// Build the index from the per-cell bounding boxes.
  pub fn build(extent: Aabb, generators: &[DVec3], cell_bounds: &[Aabb], eps: f64) -> Self {
    let n_cells = generators.len();
    let nb = ((3.0 * (n_cells as f64).cbrt()) as usize).clamp(3, 1000);
    let mut lists = vec![Vec::new(); nb * nb * nb];

    // a cell joins every block its (slightly inflated) bounding box touches;
    // a precise intersection test would not speed up the queries
    let margin = DVec3::splat(eps);
    for (m, bounds) in cell_bounds.iter().enumerate() {
      let (i1, j1, k1) = extent.cell_indices(bounds.min - margin, nb, nb, nb);
      let (i2, j2, k2) = extent.cell_indices(bounds.max + margin, nb, nb, nb);
      for i in i1..=i2 {
        for j in j1..=j2 {
          for k in k1..=k2 {
            lists[(i * nb + j) * nb + k].push(m);
          }
        }
      }
    }

    let trees = lists
      .iter()
      .map(|list| {
        if list.len() > TREE_THRESHOLD {
          let mut ids = list.clone();
          Some(KdTree::build(&mut ids, generators))
        } else {
          None
        }
      })
      .collect();

    Self { extent, nb, lists, trees }
  }

  /// Number of blocks along one axis.
  pub fn blocks_per_axis(&self) -> usize {
    self.nb
  }

  /// The generator nearest to `r`, or `None` when `r` is outside the domain
  /// or its block is empty.
  pub fn nearest_generator(&self, r: DVec3, generators: &[DVec3]) -> Option<usize> {
    if !self.extent.contains(r) {
      return None;
    }
    let (i, j, k) = self.extent.cell_indices(r, self.nb, self.nb, self.nb);
    let b = (i * self.nb + j) * self.nb + k;

    if let Some(tree) = &self.trees[b] {
      return Some(tree.nearest(r, generators));
    }
    let mut best = None;
    let mut best_sq = f64::MAX;
    for &m in &self.lists[b] {
      let d_sq = (r - generators[m]).length_squared();
      if d_sq < best_sq {
        best = Some(m);
        best_sq = d_sq;
      }
    }
    best
  }

  /// Occupancy of the block lists.
  pub fn block_stats(&self) -> OccupancyStats {
    Self::stats(self.lists.iter().map(|l| l.len()))
  }

  /// Occupancy of the blocks that carry a search tree.
  pub fn tree_stats(&self) -> OccupancyStats {
    Self::stats(
      self
        .lists
        .iter()
        .zip(&self.trees)
        .filter(|(_, t)| t.is_some())
        .map(|(l, _)| l.len()),
    )
  }

  fn stats(sizes: impl Iterator<Item = usize>) -> OccupancyStats {
    let mut stats = OccupancyStats { minimum: usize::MAX, ..Default::default() };
    let mut total = 0usize;
    for len in sizes {
      stats.count += 1;
      total += len;
      stats.minimum = stats.minimum.min(len);
      stats.maximum = stats.maximum.max(len);
    }
    if stats.count == 0 {
      stats.minimum = 0;
    } else {
      stats.average = total as f64 / stats.count as f64;
    }
    stats
  }
}
