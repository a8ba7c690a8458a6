//! Analytic dust density distributions.
//!
//! A distribution describes the theoretical density field the grids
//! discretize. It doubles as the density probe for the tree builder and as
//! the position sampler for density-drawn Voronoi generators and geometric
//! sources.

use glam::DVec3;

use crate::geometry::Aabb;
use crate::grid::tree::TreeDensitySource;
use crate::grid::voronoi::PositionSampler;
use crate::rng::RandomStream;

/// Sample count for the numeric surface-density fallback.
const SIGMA_SAMPLES: usize = 10_000;

/// A dust density distribution with the probes the engine needs.
pub trait DustDistribution: TreeDensitySource + PositionSampler {
  /// Dimension of the distribution's symmetry (1, 2 or 3), reported in the
  /// convergence diagnostics.
  fn dimension(&self) -> usize {
    3
  }

  /// X-axis surface density through the center: ∫ ρ dx along the x axis.
  ///
  /// The default integrates numerically just off the axis, which also
  /// handles distributions that diverge on the axis itself.
  fn sigma_x(&self) -> f64 {
    self.numeric_sigma(0)
  }

  /// Y-axis surface density through the center.
  fn sigma_y(&self) -> f64 {
    self.numeric_sigma(1)
  }

  /// Z-axis surface density through the center.
  fn sigma_z(&self) -> f64 {
    self.numeric_sigma(2)
  }

  /// Extent outside of which the density vanishes.
  fn envelope(&self) -> Aabb;

  /// Midpoint-rule surface density along `axis`, sampled at a tiny offset
  /// from the other axes.
  fn numeric_sigma(&self, axis: usize) -> f64 {
    let envelope = self.envelope();
    let (lo, hi) = match axis {
      0 => (envelope.min.x, envelope.max.x),
      1 => (envelope.min.y, envelope.max.y),
      _ => (envelope.min.z, envelope.max.z),
    };
    let eps = 1e-12 * envelope.widths().length();
    let mut sum = 0.0;
    for k in 0..SIGMA_SAMPLES {
      let c = lo + (k as f64 + 0.5) * (hi - lo) / SIGMA_SAMPLES as f64;
      let r = match axis {
        0 => DVec3::new(c, eps, eps),
        1 => DVec3::new(eps, c, eps),
        _ => DVec3::new(eps, eps, c),
      };
      sum += self.density_total(r);
    }
    sum / SIGMA_SAMPLES as f64 * (hi - lo)
  }
}

/// Constant density inside a box.
pub struct UniformBoxDistribution {
  extent: Aabb,
  rho: f64,
}

impl UniformBoxDistribution {
  /// Create a uniform distribution of density `rho` filling `extent`.
  pub fn new(extent: Aabb, rho: f64) -> Self {
    Self { extent, rho }
  }
}

impl TreeDensitySource for UniformBoxDistribution {
  fn density(&self, _h: usize, r: DVec3) -> f64 {
    if self.extent.contains(r) {
      self.rho
    } else {
      0.0
    }
  }

  fn mass_in_box(&self, _h: usize, aabb: &Aabb) -> Option<f64> {
    let lo = aabb.min.max(self.extent.min);
    let hi = aabb.max.min(self.extent.max);
    let w = (hi - lo).max(DVec3::ZERO);
    Some(self.rho * w.x * w.y * w.z)
  }

  fn total_mass(&self) -> f64 {
    self.rho * self.extent.volume()
  }
}

impl PositionSampler for UniformBoxDistribution {
  fn generate_position(&self, rng: &mut RandomStream) -> DVec3 {
    rng.position(&self.extent)
  }
}

impl DustDistribution for UniformBoxDistribution {
  fn envelope(&self) -> Aabb {
    self.extent
  }

  fn sigma_x(&self) -> f64 {
    self.rho * self.extent.widths().x
  }

  fn sigma_y(&self) -> f64 {
    self.rho * self.extent.widths().y
  }

  fn sigma_z(&self) -> f64 {
    self.rho * self.extent.widths().z
  }
}

/// Spherical distribution with density `rho_ref · R / r` inside radius `R`,
/// peaked at the center.
pub struct PowerLawSphereDistribution {
  radius: f64,
  rho_ref: f64,
}

impl PowerLawSphereDistribution {
  /// Create the sphere with outer radius `radius` and density `rho_ref` at
  /// that radius.
  pub fn new(radius: f64, rho_ref: f64) -> Self {
    Self { radius, rho_ref }
  }
}

impl TreeDensitySource for PowerLawSphereDistribution {
  fn density(&self, _h: usize, r: DVec3) -> f64 {
    let d = r.length();
    if d > 0.0 && d < self.radius {
      self.rho_ref * self.radius / d
    } else {
      0.0
    }
  }

  fn total_mass(&self) -> f64 {
    // ∫ ρ_ref R / r · 4π r² dr = 2π ρ_ref R³
    2.0 * std::f64::consts::PI * self.rho_ref * self.radius.powi(3)
  }
}

impl PositionSampler for PowerLawSphereDistribution {
  fn generate_position(&self, rng: &mut RandomStream) -> DVec3 {
    // M(<r) ∝ r², so the radius inverts as R√X
    let r = self.radius * rng.uniform().sqrt();
    r * rng.direction()
  }
}

impl DustDistribution for PowerLawSphereDistribution {
  fn dimension(&self) -> usize {
    1
  }

  fn envelope(&self) -> Aabb {
    Aabb::from_half_extents(DVec3::splat(self.radius))
  }
}

/// Particle cloud with per-particle masses, smoothed onto a cloud-in-cell
/// helper lattice so the tree builder can probe a finite density.
pub struct ParticleCloudDistribution {
  envelope: Aabb,
  lattice: Vec<f64>,
  n: usize,
  total_mass: f64,
  particles: Vec<DVec3>,
  cdf: Vec<f64>,
}

impl ParticleCloudDistribution {
  /// Build the cloud from particle positions and masses; particles outside
  /// `envelope` are silently discarded.
  pub fn new(envelope: Aabb, particles: Vec<DVec3>, masses: Vec<f64>) -> Self {
    debug_assert_eq!(particles.len(), masses.len());
    let kept: Vec<(DVec3, f64)> = particles
      .into_iter()
      .zip(masses)
      .filter(|(p, _)| envelope.contains(*p))
      .collect();

    // density on a modest lattice; enough for subdivision decisions
    let n = 32usize;
    let mut lattice = vec![0.0; n * n * n];
    let cell_volume = envelope.volume() / (n * n * n) as f64;
    let mut total_mass = 0.0;
    for &(p, mass) in &kept {
      let (i, j, k) = envelope.cell_indices(p, n, n, n);
      lattice[(i * n + j) * n + k] += mass / cell_volume;
      total_mass += mass;
    }

    let mut acc = 0.0;
    let cdf = kept
      .iter()
      .map(|&(_, mass)| {
        acc += mass;
        acc
      })
      .collect();
    let particles = kept.into_iter().map(|(p, _)| p).collect();
    Self { envelope, lattice, n, total_mass, particles, cdf }
  }

  /// Load the cloud from an ASCII particle file; the first field column is
  /// the particle mass, defaulting to unit mass when absent.
  pub fn from_file(envelope: Aabb, path: &std::path::Path) -> crate::error::Result<Self> {
    let mut reader = crate::import::ParticleReader::open(path)?;
    let mut particles = Vec::new();
    let mut masses = Vec::new();
    while let Some(record) = reader.read()? {
      particles.push(record.position);
      masses.push(record.value(0).unwrap_or(1.0));
    }
    Ok(Self::new(envelope, particles, masses))
  }

  /// The retained particle positions.
  pub fn particles(&self) -> &[DVec3] {
    &self.particles
  }
}

impl TreeDensitySource for ParticleCloudDistribution {
  fn density(&self, _h: usize, r: DVec3) -> f64 {
    if !self.envelope.contains(r) {
      return 0.0;
    }
    let (i, j, k) = self.envelope.cell_indices(r, self.n, self.n, self.n);
    self.lattice[(i * self.n + j) * self.n + k]
  }

  fn total_mass(&self) -> f64 {
    self.total_mass
  }
}

impl PositionSampler for ParticleCloudDistribution {
  fn generate_position(&self, rng: &mut RandomStream) -> DVec3 {
    if self.particles.is_empty() {
      return self.envelope.center();
    }
    let x = rng.uniform() * self.total_mass;
    let m = crate::rng::locate_clip(&self.cdf, x);
    self.particles[m]
  }
}

impl DustDistribution for ParticleCloudDistribution {
  fn envelope(&self) -> Aabb {
    self.envelope
  }
}
