//! Tree node storage and the per-wall neighbor machinery.
//!
//! All nodes of a tree grid live in a single contiguous arena; parent, child
//! and neighbor links are indices into that arena, so there are no ownership
//! cycles. Children of one subdivision are created back to back, which the
//! bookkeeping walker relies on.

use glam::DVec3;
use smallvec::SmallVec;

use crate::geometry::Aabb;
use crate::grid::Wall;

/// Index of a node in the tree arena.
pub type NodeId = usize;

/// Per-wall neighbor lists; most walls touch only a handful of nodes.
pub type NeighborList = SmallVec<[NodeId; 6]>;

/// One node of an octree or k-d tree.
#[derive(Clone, Debug)]
pub struct TreeNode {
  /// Spatial extent of this node.
  pub extent: Aabb,
  /// Subdivision level; the root is at level 0.
  pub level: u32,
  /// Parent node, `None` for the root. Non-owning back-reference.
  pub parent: Option<NodeId>,
  /// First child in the arena; children are contiguous. `None` for leaves.
  pub first_child: Option<NodeId>,
  /// Number of children (0, 2 or 8).
  pub child_count: u8,
  /// Which child of the parent this node is (octant bits or k-d side).
  pub child_rank: u8,
  /// Split axis used to create this node's children (k-d trees only).
  pub split_dir: u8,
  /// Per-wall neighbor lists, ordered by descending overlap after setup.
  pub neighbors: [NeighborList; 6],
}

impl TreeNode {
  /// Create a fresh childless node.
  pub fn new(extent: Aabb, level: u32, parent: Option<NodeId>, child_rank: u8) -> Self {
    Self {
      extent,
      level,
      parent,
      first_child: None,
      child_count: 0,
      child_rank,
      split_dir: 0,
      neighbors: Default::default(),
    }
  }

  /// True when this node has no children.
  #[inline]
  pub fn is_leaf(&self) -> bool {
    self.child_count == 0
  }

  /// The child ids of this node.
  pub fn children(&self) -> impl Iterator<Item = NodeId> {
    let first = self.first_child.unwrap_or(0);
    (0..self.child_count as usize).map(move |l| first + l)
  }

  /// The child that contains `r`, for an octree node split at the maximum
  /// corner of child 0.
  #[inline]
  pub fn oct_child_containing(&self, split: DVec3, r: DVec3) -> NodeId {
    let first = self.first_child.expect("child lookup on a leaf");
    let l = (r.x >= split.x) as usize + 2 * (r.y >= split.y) as usize + 4 * (r.z >= split.z) as usize;
    first + l
  }

  /// The child that contains `r`, for a k-d node split along `split_dir`.
  #[inline]
  pub fn kd_child_containing(&self, split: f64, r: DVec3) -> NodeId {
    let first = self.first_child.expect("child lookup on a leaf");
    let coord = match self.split_dir {
      0 => r.x,
      1 => r.y,
      _ => r.z,
    };
    if coord < split {
      first
    } else {
      first + 1
    }
  }
}

/// The eight octant boxes produced by splitting `extent` at `r`.
///
/// Octant `l` has bit 0 set for the upper x half, bit 1 for y, bit 2 for z,
/// matching the point-location arithmetic in `oct_child_containing`.
pub fn octant_boxes(extent: &Aabb, r: DVec3) -> [Aabb; 8] {
  let lo = extent.min;
  let hi = extent.max;
  [
    Aabb::new(DVec3::new(lo.x, lo.y, lo.z), DVec3::new(r.x, r.y, r.z)),
    Aabb::new(DVec3::new(r.x, lo.y, lo.z), DVec3::new(hi.x, r.y, r.z)),
    Aabb::new(DVec3::new(lo.x, r.y, lo.z), DVec3::new(r.x, hi.y, r.z)),
    Aabb::new(DVec3::new(r.x, r.y, lo.z), DVec3::new(hi.x, hi.y, r.z)),
    Aabb::new(DVec3::new(lo.x, lo.y, r.z), DVec3::new(r.x, r.y, hi.z)),
    Aabb::new(DVec3::new(r.x, lo.y, r.z), DVec3::new(hi.x, r.y, hi.z)),
    Aabb::new(DVec3::new(lo.x, r.y, r.z), DVec3::new(r.x, hi.y, hi.z)),
    Aabb::new(DVec3::new(r.x, r.y, r.z), DVec3::new(hi.x, hi.y, hi.z)),
  ]
}

/// The two half boxes produced by bisecting `extent` along `dir`.
pub fn half_boxes(extent: &Aabb, dir: u8) -> [Aabb; 2] {
  let lo = extent.min;
  let hi = extent.max;
  match dir {
    0 => {
      let xc = 0.5 * (lo.x + hi.x);
      [
        Aabb::new(lo, DVec3::new(xc, hi.y, hi.z)),
        Aabb::new(DVec3::new(xc, lo.y, lo.z), hi),
      ]
    }
    1 => {
      let yc = 0.5 * (lo.y + hi.y);
      [
        Aabb::new(lo, DVec3::new(hi.x, yc, hi.z)),
        Aabb::new(DVec3::new(lo.x, yc, lo.z), hi),
      ]
    }
    _ => {
      let zc = 0.5 * (lo.z + hi.z);
      [
        Aabb::new(lo, DVec3::new(hi.x, hi.y, zc)),
        Aabb::new(DVec3::new(lo.x, lo.y, zc), hi),
      ]
    }
  }
}

/// Area of overlap between the projections of two boxes onto `wall`.
pub fn wall_overlap(a: &Aabb, b: &Aabb, wall: Wall) -> f64 {
  fn overlap_1d(a_lo: f64, a_hi: f64, b_lo: f64, b_hi: f64) -> f64 {
    (a_hi.min(b_hi) - a_lo.max(b_lo)).max(0.0)
  }
  match wall {
    Wall::Back | Wall::Front => {
      overlap_1d(a.min.y, a.max.y, b.min.y, b.max.y) * overlap_1d(a.min.z, a.max.z, b.min.z, b.max.z)
    }
    Wall::Left | Wall::Right => {
      overlap_1d(a.min.x, a.max.x, b.min.x, b.max.x) * overlap_1d(a.min.z, a.max.z, b.min.z, b.max.z)
    }
    Wall::Bottom | Wall::Top => {
      overlap_1d(a.min.x, a.max.x, b.min.x, b.max.x) * overlap_1d(a.min.y, a.max.y, b.min.y, b.max.y)
    }
  }
}

/// Register `a` and `b` as neighbors across `wall` (the wall as seen from
/// `a`; `b` records the complement).
pub fn make_neighbors(nodes: &mut [TreeNode], wall: Wall, a: NodeId, b: NodeId) {
  nodes[a].neighbors[wall as usize].push(b);
  nodes[b].neighbors[wall.complement() as usize].push(a);
}

/// Remove `b` from `a`'s neighbor list at `wall`.
pub fn delete_neighbor(nodes: &mut [TreeNode], wall: Wall, a: NodeId, b: NodeId) {
  let list = &mut nodes[a].neighbors[wall as usize];
  if let Some(pos) = list.iter().position(|&id| id == b) {
    list.remove(pos);
  }
}

/// Sort every wall's neighbor list of `node` by descending overlap area, so
/// traversal tries the most likely successor first.
pub fn sort_neighbors(nodes: &mut [TreeNode], node: NodeId) {
  let base = nodes[node].extent;
  for wall in Wall::ALL {
    let mut list = std::mem::take(&mut nodes[node].neighbors[wall as usize]);
    list.sort_by(|&n1, &n2| {
      let o1 = wall_overlap(&base, &nodes[n1].extent, wall);
      let o2 = wall_overlap(&base, &nodes[n2].extent, wall);
      o2.partial_cmp(&o1).unwrap_or(std::cmp::Ordering::Equal)
    });
    nodes[node].neighbors[wall as usize] = list;
  }
}
