//! The Monte Carlo token: a discrete parcel of luminosity in flight.

use glam::DVec3;

/// A photon packet at a single wavelength.
///
/// Packets are scratch state owned by one transport worker; the peel-off
/// copies sent toward observers are derived values, never shared.
#[derive(Clone, Copy, Debug, Default)]
pub struct Packet {
  /// Wavelength bin index.
  pub ell: usize,
  /// Remaining luminosity; non-negative.
  pub luminosity: f64,
  /// Current position.
  pub position: DVec3,
  /// Propagation direction, unit length.
  pub direction: DVec3,
  /// Number of scattering events so far.
  pub n_scatt: u32,
  /// True for packets born at a stellar source, false for dust re-emission.
  pub stellar: bool,
}

impl Packet {
  /// (Re)initialize the packet for a fresh life cycle.
  pub fn launch(&mut self, luminosity: f64, ell: usize, position: DVec3, direction: DVec3, stellar: bool) {
    debug_assert!(luminosity >= 0.0);
    self.ell = ell;
    self.luminosity = luminosity;
    self.position = position;
    self.direction = direction;
    self.n_scatt = 0;
    self.stellar = stellar;
  }

  /// Advance the packet a distance `s` along its direction.
  #[inline]
  pub fn propagate(&mut self, s: f64) {
    self.position += self.direction * s;
  }

  /// Deflect the packet into direction `k`, counting the scattering event.
  #[inline]
  pub fn scatter(&mut self, k: DVec3) {
    self.n_scatt += 1;
    self.direction = k;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_launch_resets_state() {
    let mut packet = Packet::default();
    packet.n_scatt = 5;
    packet.launch(2.0, 3, DVec3::ZERO, DVec3::X, false);
    assert_eq!(packet.n_scatt, 0);
    assert_eq!(packet.ell, 3);
    assert!(!packet.stellar);
  }

  #[test]
  fn test_propagate_and_scatter() {
    let mut packet = Packet::default();
    packet.launch(1.0, 0, DVec3::ZERO, DVec3::X, true);
    packet.propagate(2.5);
    assert_eq!(packet.position, DVec3::new(2.5, 0.0, 0.0));
    packet.scatter(DVec3::Y);
    assert_eq!(packet.n_scatt, 1);
    packet.propagate(1.0);
    assert_eq!(packet.position, DVec3::new(2.5, 1.0, 0.0));
  }
}
