//! Mutable record of a single ray traversal through a grid.
//!
//! A `TracePath` is scratch state owned by one transport worker: the grid
//! traversal fills it with (cell, ds, s) segments, the medium augments it
//! with per-segment optical depths, and the life-cycle engine reads it to
//! split the packet into escaping, absorbed and scattered luminosity. The
//! buffers are cleared and reused between packets.

use glam::DVec3;

use crate::error::{Error, Result};
use crate::geometry::Aabb;

/// A sentinel position that is certainly not inside any domain box,
/// returned by [`TracePath::move_inside`] when the ray misses the domain.
pub const OUTSIDE: DVec3 = DVec3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);

/// One traversal segment: the cell crossed (`None` while outside the
/// domain), its length, and the cumulative length at its far end.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PathSegment {
  /// Cell crossed by this segment; `None` encodes travel outside the domain.
  pub cell: Option<usize>,
  /// Segment length, strictly positive.
  pub ds: f64,
  /// Cumulative path length at the end of this segment.
  pub s: f64,
}

/// Reusable ray-traversal record with optional optical-depth tables.
#[derive(Clone, Debug, Default)]
pub struct TracePath {
  position: DVec3,
  direction: DVec3,
  segments: Vec<PathSegment>,
  s: f64,
  // filled by fill_optical_depth; same length as segments when present
  dtauv: Vec<f64>,
  tauv: Vec<f64>,
}

impl TracePath {
  /// Create an empty path.
  pub fn new() -> Self {
    Self::default()
  }

  /// Reset the path for a new traversal from `position` along `direction`.
  ///
  /// `direction` must be unit length.
  pub fn start(&mut self, position: DVec3, direction: DVec3) {
    debug_assert!((direction.length() - 1.0).abs() < 1e-9);
    self.position = position;
    self.direction = direction;
    self.segments.clear();
    self.dtauv.clear();
    self.tauv.clear();
    self.s = 0.0;
  }

  /// Starting position of the traversal.
  #[inline]
  pub fn position(&self) -> DVec3 {
    self.position
  }

  /// Direction of the traversal (unit length).
  #[inline]
  pub fn direction(&self) -> DVec3 {
    self.direction
  }

  /// Segments recorded so far.
  #[inline]
  pub fn segments(&self) -> &[PathSegment] {
    &self.segments
  }

  /// Number of segments.
  #[inline]
  pub fn len(&self) -> usize {
    self.segments.len()
  }

  /// True when no segments were recorded.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }

  /// Total geometric length recorded so far.
  #[inline]
  pub fn total_length(&self) -> f64 {
    self.s
  }

  /// Discard all segments but keep the start position and direction.
  pub fn clear(&mut self) {
    self.segments.clear();
    self.dtauv.clear();
    self.tauv.clear();
    self.s = 0.0;
  }

  /// Append a segment crossing `cell` with length `ds`.
  ///
  /// Zero or negative lengths are ignored, so callers can pass raw wall
  /// distances without filtering degenerate crossings.
  pub fn add_segment(&mut self, cell: Option<usize>, ds: f64) {
    if ds > 0.0 {
      self.s += ds;
      self.segments.push(PathSegment { cell, ds, s: self.s });
    }
  }

  /// If the start position lies outside `domain`, advance it along the
  /// direction to the first wall intersection, recording the outside travel
  /// as a `None` segment, and return the position nudged `eps` inside the
  /// wall. Returns [`OUTSIDE`] when the ray misses the domain entirely; the
  /// caller then produces an empty path.
  pub fn move_inside(&mut self, domain: &Aabb, eps: f64) -> DVec3 {
    let k = self.direction;
    let mut r = self.position;

    // clip against each slab in turn; each clip may move the start point
    if r.x <= domain.min.x {
      if k.x <= 0.0 {
        return OUTSIDE;
      }
      let ds = (domain.min.x - r.x) / k.x;
      self.add_segment(None, ds);
      r += k * ds;
      r.x = domain.min.x + eps;
    } else if r.x >= domain.max.x {
      if k.x >= 0.0 {
        return OUTSIDE;
      }
      let ds = (domain.max.x - r.x) / k.x;
      self.add_segment(None, ds);
      r += k * ds;
      r.x = domain.max.x - eps;
    }

    if r.y <= domain.min.y {
      if k.y <= 0.0 {
        return OUTSIDE;
      }
      let ds = (domain.min.y - r.y) / k.y;
      self.add_segment(None, ds);
      r += k * ds;
      r.y = domain.min.y + eps;
    } else if r.y >= domain.max.y {
      if k.y >= 0.0 {
        return OUTSIDE;
      }
      let ds = (domain.max.y - r.y) / k.y;
      self.add_segment(None, ds);
      r += k * ds;
      r.y = domain.max.y - eps;
    }

    if r.z <= domain.min.z {
      if k.z <= 0.0 {
        return OUTSIDE;
      }
      let ds = (domain.min.z - r.z) / k.z;
      self.add_segment(None, ds);
      r += k * ds;
      r.z = domain.min.z + eps;
    } else if r.z >= domain.max.z {
      if k.z >= 0.0 {
        return OUTSIDE;
      }
      let ds = (domain.max.z - r.z) / k.z;
      self.add_segment(None, ds);
      r += k * ds;
      r.z = domain.max.z - eps;
    }

    // clipping one slab can push the point past another; in that rare case
    // the point is still outside and the caller gets the sentinel
    if !domain.contains(r) {
      return OUTSIDE;
    }
    r
  }

  /// Compute per-segment and cumulative optical depths using the supplied
  /// per-cell opacity `κρ` callback, and return the total optical depth.
  ///
  /// Outside segments contribute nothing. A non-finite or negative result is
  /// a numerical anomaly and fatal.
  pub fn fill_optical_depth(&mut self, kappa_rho: impl Fn(usize) -> f64) -> Result<f64> {
    self.dtauv.clear();
    self.tauv.clear();
    let mut tau = 0.0;
    for seg in &self.segments {
      let dtau = match seg.cell {
        Some(m) => kappa_rho(m) * seg.ds,
        None => 0.0,
      };
      tau += dtau;
      self.dtauv.push(dtau);
      self.tauv.push(tau);
    }
    if tau < 0.0 || !tau.is_finite() {
      return Err(Error::numerical(format!(
        "optical depth along the path is not a positive number: tau = {tau}"
      )));
    }
    Ok(tau)
  }

  /// Total optical depth of the path; zero when the optical-depth tables
  /// have not been filled.
  #[inline]
  pub fn total_optical_depth(&self) -> f64 {
    self.tauv.last().copied().unwrap_or(0.0)
  }

  /// Optical depth accumulated through segment `n` (inclusive).
  #[inline]
  pub fn tau(&self, n: usize) -> f64 {
    self.tauv[n]
  }

  /// Optical depth of segment `n` alone.
  #[inline]
  pub fn dtau(&self, n: usize) -> f64 {
    self.dtauv[n]
  }

  /// Invert the monotone τ table: the geometric path length at which the
  /// cumulative optical depth reaches `tau`, by linear interpolation inside
  /// the containing segment.
  ///
  /// Errors when `tau` is negative, exceeds the total, or the path is empty.
  pub fn path_length(&self, tau: f64) -> Result<f64> {
    if tau < 0.0 {
      return Err(Error::numerical(format!("path length requested for negative tau = {tau}")));
    }
    if self.segments.is_empty() || self.tauv.is_empty() {
      return Err(Error::numerical("path length requested for an empty path"));
    }
    if tau == 0.0 {
      return Ok(0.0);
    }
    for (n, seg) in self.segments.iter().enumerate() {
      if self.tauv[n] > tau {
        let (s_lo, tau_lo) = if n == 0 {
          (0.0, 0.0)
        } else {
          (self.segments[n - 1].s, self.tauv[n - 1])
        };
        let (s_hi, tau_hi) = (seg.s, self.tauv[n]);
        return Ok(s_lo + (tau - tau_lo) / (tau_hi - tau_lo) * (s_hi - s_lo));
      }
    }
    // a tau equal to the total (up to round-off from the truncated
    // exponential draw) maps onto the far end of the path
    let total = self.total_optical_depth();
    if tau <= total {
      return Ok(self.s);
    }
    Err(Error::numerical(format!(
      "tau = {tau} exceeds the total optical depth {total} of the path"
    )))
  }
}

#[cfg(test)]
#[path = "path_test.rs"]
mod path_test;
