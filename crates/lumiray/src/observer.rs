//! Observers: distant frames that collect peeled-off packets.
//!
//! Each observer is a parallel projection along a fixed line of sight with a
//! wavelength × pixel data cube. Recording goes through per-thread queues of
//! pending (address, value) pairs that are drained into the shared cube
//! inside a single lock acquisition, so workers almost never contend.

use glam::DVec3;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::parallel::{current_thread_index, thread_slot_count};
use crate::transport::Packet;

/// Length of the per-thread record queues.
const QUEUE_LEN: usize = 10_000;

/// A distant observer with a pixel frame.
pub struct DistantObserver {
  name: String,
  /// Unit direction from the system toward the observer.
  direction: DVec3,
  /// Frame basis spanning the projection plane.
  e_x: DVec3,
  e_y: DVec3,
  nx: usize,
  ny: usize,
  /// Half-extents of the field of view in the frame basis.
  half_fov_x: f64,
  half_fov_y: f64,
}

impl DistantObserver {
  /// Create an observer looking from the direction given by the polar
  /// angles (inclination θ, azimuth φ), with an `nx × ny` frame covering
  /// ±`half_fov` around the origin.
  pub fn new(
    name: impl Into<String>,
    inclination: f64,
    azimuth: f64,
    (nx, ny): (usize, usize),
    (half_fov_x, half_fov_y): (f64, f64),
  ) -> Result<Self> {
    if nx == 0 || ny == 0 {
      return Err(Error::config("observer frames need at least one pixel per axis"));
    }
    if half_fov_x <= 0.0 || half_fov_y <= 0.0 {
      return Err(Error::config("the observer field of view must be positive"));
    }
    let (st, ct) = inclination.sin_cos();
    let (sp, cp) = azimuth.sin_cos();
    let direction = DVec3::new(st * cp, st * sp, ct);
    // frame x axis perpendicular to the line of sight in the xy plane,
    // frame y axis completing the right-handed set
    let e_x = DVec3::new(-sp, cp, 0.0);
    let e_y = direction.cross(e_x);
    Ok(Self {
      name: name.into(),
      direction,
      e_x,
      e_y,
      nx,
      ny,
      half_fov_x,
      half_fov_y,
    })
  }

  /// Observer name, used for output files.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Direction from `position` toward the observer; constant for a distant
  /// observer.
  #[inline]
  pub fn direction_to(&self, _position: DVec3) -> DVec3 {
    self.direction
  }

  /// Frame shape `(nx, ny)`.
  pub fn shape(&self) -> (usize, usize) {
    (self.nx, self.ny)
  }

  /// Pixel sizes `(dx, dy)`.
  pub fn pixel_size(&self) -> (f64, f64) {
    (
      2.0 * self.half_fov_x / self.nx as f64,
      2.0 * self.half_fov_y / self.ny as f64,
    )
  }

  /// Frame pixel receiving a packet at `position`, or `None` outside the
  /// field of view.
  pub fn pixel_of(&self, position: DVec3) -> Option<usize> {
    let x = self.e_x.dot(position);
    let y = self.e_y.dot(position);
    if x.abs() >= self.half_fov_x || y.abs() >= self.half_fov_y {
      return None;
    }
    let i = ((x + self.half_fov_x) / (2.0 * self.half_fov_x) * self.nx as f64) as usize;
    let j = ((y + self.half_fov_y) / (2.0 * self.half_fov_y) * self.ny as f64) as usize;
    Some(j.min(self.ny - 1) * self.nx + i.min(self.nx - 1))
  }
}

/// The set of observers with the shared recording machinery.
pub struct ObserverSet {
  observers: Vec<DistantObserver>,
  /// Base offset of each observer's cube in the flat data vector.
  offsets: Vec<usize>,
  n_lambda: usize,
  data: Mutex<Vec<f64>>,
  queues: Vec<Mutex<Vec<(usize, f64)>>>,
}

impl ObserverSet {
  /// Create the set for `n_lambda` wavelength bins.
  pub fn new(observers: Vec<DistantObserver>, n_lambda: usize) -> Self {
    let mut offsets = Vec::with_capacity(observers.len());
    let mut total = 0usize;
    for obs in &observers {
      offsets.push(total);
      total += n_lambda * obs.nx * obs.ny;
    }
    let queues = (0..thread_slot_count())
      .map(|_| Mutex::new(Vec::with_capacity(QUEUE_LEN)))
      .collect();
    Self {
      observers,
      offsets,
      n_lambda,
      data: Mutex::new(vec![0.0; total]),
      queues,
    }
  }

  /// The observers in the set.
  pub fn observers(&self) -> &[DistantObserver] {
    &self.observers
  }

  /// Number of wavelength bins per cube.
  pub fn n_lambda(&self) -> usize {
    self.n_lambda
  }

  /// True when no observers are configured.
  pub fn is_empty(&self) -> bool {
    self.observers.is_empty()
  }

  /// Record a peeled-off packet at observer `obs`; `value` is the packet
  /// luminosity already weighted and attenuated along the line of sight.
  pub fn detect(&self, obs: usize, packet: &Packet, value: f64) {
    if value <= 0.0 {
      return;
    }
    let observer = &self.observers[obs];
    let Some(pixel) = observer.pixel_of(packet.position) else {
      return;
    };
    let address = self.offsets[obs] + packet.ell * observer.nx * observer.ny + pixel;
    self.record(address, value);
  }

  /// Queue one record for this thread; a full queue is drained into the
  /// shared cube inside a single lock acquisition.
  fn record(&self, address: usize, value: f64) {
    let slot = current_thread_index();
    let mut queue = self.queues[slot].lock().expect("record queue lock");
    queue.push((address, value));
    if queue.len() >= QUEUE_LEN {
      let mut data = self.data.lock().expect("observer data lock");
      for (addr, v) in queue.drain(..) {
        data[addr] += v;
      }
    }
  }

  /// Drain all remaining queues; call before reading or writing frames.
  pub fn flush(&self) {
    let mut data = self.data.lock().expect("observer data lock");
    for queue in &self.queues {
      let mut queue = queue.lock().expect("record queue lock");
      for (addr, v) in queue.drain(..) {
        data[addr] += v;
      }
    }
  }

  /// Snapshot of observer `obs`'s cube, `n_lambda × ny × nx` in row-major
  /// order. Flush first for complete data.
  pub fn cube(&self, obs: usize) -> Vec<f64> {
    let observer = &self.observers[obs];
    let len = self.n_lambda * observer.nx * observer.ny;
    let data = self.data.lock().expect("observer data lock");
    data[self.offsets[obs]..self.offsets[obs] + len].to_vec()
  }
}

#[cfg(test)]
#[path = "observer_test.rs"]
mod observer_test;
