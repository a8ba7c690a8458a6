//! Packet sources: where stellar emission enters the simulation.

use std::sync::Arc;

use glam::DVec3;

use crate::grid::voronoi::PositionSampler;
use crate::rng::RandomStream;
use crate::transport::Packet;

/// Emits packets with positions drawn from a spatial distribution and
/// isotropic directions.
pub trait Source: Send + Sync {
  /// Source luminosity in wavelength bin `ell`.
  fn luminosity(&self, ell: usize) -> f64;

  /// Launch a packet of the given luminosity in bin `ell`.
  ///
  /// The packet is marked stellar, its scatter count reset.
  fn emit(&self, ell: usize, luminosity: f64, rng: &mut RandomStream, packet: &mut Packet);
}

/// A point source at a fixed position.
pub struct PointSource {
  position: DVec3,
  luminosities: Vec<f64>,
}

impl PointSource {
  /// Create a point source with per-wavelength luminosities.
  pub fn new(position: DVec3, luminosities: Vec<f64>) -> Self {
    Self { position, luminosities }
  }
}

impl Source for PointSource {
  fn luminosity(&self, ell: usize) -> f64 {
    self.luminosities[ell]
  }

  fn emit(&self, ell: usize, luminosity: f64, rng: &mut RandomStream, packet: &mut Packet) {
    packet.launch(luminosity, ell, self.position, rng.direction(), true);
  }
}

/// A source distributed in space, drawing emission positions from a
/// density-like sampler.
pub struct GeometricSource {
  sampler: Arc<dyn PositionSampler>,
  luminosities: Vec<f64>,
}

impl GeometricSource {
  /// Create a source emitting from `sampler` with per-wavelength
  /// luminosities.
  pub fn new(sampler: Arc<dyn PositionSampler>, luminosities: Vec<f64>) -> Self {
    Self { sampler, luminosities }
  }
}

impl Source for GeometricSource {
  fn luminosity(&self, ell: usize) -> f64 {
    self.luminosities[ell]
  }

  fn emit(&self, ell: usize, luminosity: f64, rng: &mut RandomStream, packet: &mut Packet) {
    let position = self.sampler.generate_position(rng);
    packet.launch(luminosity, ell, position, rng.direction(), true);
  }
}
