//! Configuration tree for a complete simulation run.
//!
//! Every configurable option of the engine appears here as a strongly-typed
//! leaf; the CLI deserializes this tree from a TOML run file. Validation
//! beyond shape (ranges, option compatibility) happens while the simulation
//! is assembled.

use serde::Deserialize;

/// Top-level configuration of one simulation run.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
  /// Base RNG seed.
  #[serde(default)]
  pub seed: u64,
  /// Photon packets per wavelength bin.
  pub packets: f64,
  /// Keep the transport loops on the calling thread (reproducible output).
  #[serde(default)]
  pub serial: bool,
  /// Thread count; defaults to the machine's logical cores.
  #[serde(default)]
  pub threads: Option<usize>,
  /// Simulation domain.
  pub domain: DomainConfig,
  /// Wavelength grid.
  pub wavelengths: WavelengthConfig,
  /// Spatial grid.
  pub grid: GridConfig,
  /// Medium: density distribution and dust components.
  pub medium: MediumConfig,
  /// Emitting sources.
  pub sources: Vec<SourceConfig>,
  /// Observers recording the escaping radiation.
  #[serde(default)]
  pub observers: Vec<ObserverConfig>,
  /// Dust emission and self-absorption controls.
  #[serde(default)]
  pub dust: DustConfig,
  /// Output files and diagnostics toggles.
  #[serde(default)]
  pub output: OutputConfig,
}

/// The cuboidal simulation domain, symmetric around the origin.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainConfig {
  /// Domain half-extents along x, y, z.
  pub half_extent: [f64; 3],
}

/// Wavelength grid specification.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WavelengthConfig {
  /// Logarithmically spaced bins.
  Logarithmic {
    /// Shortest wavelength.
    min: f64,
    /// Longest wavelength.
    max: f64,
    /// Number of bins.
    bins: usize,
  },
  /// Explicit wavelengths and bin widths.
  Explicit {
    /// Bin center wavelengths, strictly increasing.
    lambdas: Vec<f64>,
    /// Bin widths.
    widths: Vec<f64>,
  },
}

/// Mesh along one axis of the regular grid.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeshConfig {
  /// Equally spaced bins.
  #[default]
  Linear,
  /// Symmetric power-law bins with the given width ratio.
  PowerLaw {
    /// Outermost-to-innermost bin width ratio.
    ratio: f64,
  },
}

/// Spatial grid specification.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridConfig {
  /// Regular cartesian grid.
  Cartesian {
    /// Bins along x, y, z.
    shape: [usize; 3],
    /// Axis meshes.
    #[serde(default)]
    mesh_x: MeshConfig,
    /// Axis meshes.
    #[serde(default)]
    mesh_y: MeshConfig,
    /// Axis meshes.
    #[serde(default)]
    mesh_z: MeshConfig,
    /// Two-phase weight field.
    #[serde(default)]
    two_phase: Option<TwoPhaseConfig>,
  },
  /// Adaptive tree grid.
  Tree {
    /// Octree or binary k-d tree.
    #[serde(default)]
    tree_kind: TreeKindConfig,
    /// Minimum subdivision level.
    #[serde(default = "default_min_level")]
    min_level: u32,
    /// Maximum subdivision level.
    #[serde(default = "default_max_level")]
    max_level: u32,
    /// Traversal strategy.
    #[serde(default)]
    traversal: TraversalConfig,
    /// Split point placement.
    #[serde(default)]
    split_point: SplitPointConfig,
    /// Split axis selection (k-d only).
    #[serde(default)]
    split_axis: SplitAxisConfig,
    /// Density samples per subdivision decision.
    #[serde(default = "default_sample_count")]
    sample_count: usize,
    /// Optical-depth criterion threshold; zero disables.
    #[serde(default)]
    max_optical_depth: f64,
    /// Mass-fraction criterion threshold; zero disables.
    #[serde(default = "default_max_mass_fraction")]
    max_mass_fraction: f64,
    /// Density-dispersion criterion threshold; zero disables.
    #[serde(default)]
    max_dens_disp_fraction: f64,
    /// Reference opacity for the optical-depth criterion.
    #[serde(default = "default_reference_opacity")]
    reference_opacity: f64,
  },
  /// Voronoi tesselation.
  Voronoi {
    /// How the generator points are drawn.
    #[serde(default)]
    generators: VoronoiGeneratorConfig,
    /// Number of generator points (for the random distributions).
    #[serde(default = "default_generator_count")]
    count: usize,
  },
}

/// Two-phase weight field parameters.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TwoPhaseConfig {
  /// Volume filling factor of the high-density phase.
  pub filling_factor: f64,
  /// Density contrast between the phases.
  pub contrast: f64,
}

/// Tree arity.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TreeKindConfig {
  /// Eight-way subdivision.
  #[default]
  Octree,
  /// Two-way subdivision along alternating or chosen axes.
  BinTree,
}

/// Tree traversal strategy.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraversalConfig {
  /// Re-descend from the root each step.
  TopDown,
  /// Per-wall neighbor lists.
  #[default]
  Neighbor,
  /// Octant index arithmetic.
  Bookkeeping,
}

/// Tree split point placement.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SplitPointConfig {
  /// Geometric center.
  #[default]
  Center,
  /// Mass-weighted centroid.
  Barycenter,
}

/// Tree split axis selection.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SplitAxisConfig {
  /// Cycle x, y, z by level.
  #[default]
  Alternating,
  /// Axis with the barycenter closest to a wall.
  Barycentric,
}

/// Voronoi generator distribution.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoronoiGeneratorConfig {
  /// Uniform random points.
  #[default]
  Uniform,
  /// Centrally peaked 1/r profile.
  CentralPeak,
  /// Drawn from the medium's density distribution.
  DustDensity,
}

/// Medium specification.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediumConfig {
  /// Theoretical density distribution.
  pub distribution: DistributionConfig,
  /// One dust component per entry.
  pub components: Vec<MixConfig>,
  /// Density samples per cell during setup.
  #[serde(default = "default_sample_count")]
  pub sample_count: usize,
  /// Keep the cells-crossed histogram.
  #[serde(default)]
  pub record_crossed: bool,
}

/// Density distribution specification.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistributionConfig {
  /// Constant density filling the domain.
  Uniform {
    /// Mass density.
    rho: f64,
  },
  /// 1/r sphere.
  PowerLawSphere {
    /// Outer radius.
    radius: f64,
    /// Density at the outer radius.
    rho_ref: f64,
  },
}

/// Dust component specification.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MixConfig {
  /// Gray opacity, isotropic scattering.
  Gray {
    /// Absorption mass coefficient.
    kappa_abs: f64,
    /// Scattering mass coefficient.
    kappa_sca: f64,
  },
  /// Gray opacity with a Henyey–Greenstein phase function.
  HenyeyGreenstein {
    /// Absorption mass coefficient.
    kappa_abs: f64,
    /// Scattering mass coefficient.
    kappa_sca: f64,
    /// Asymmetry parameter in (−1, 1).
    g: f64,
  },
}

/// Source specification.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
  /// Point source at a fixed position, flat in wavelength.
  Point {
    /// Source position.
    position: [f64; 3],
    /// Luminosity per wavelength bin.
    luminosity: f64,
  },
  /// Source distributed like the medium's density.
  Geometric {
    /// Luminosity per wavelength bin.
    luminosity: f64,
  },
}

/// Observer specification.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObserverConfig {
  /// Observer (and output file) name.
  pub name: String,
  /// Inclination angle in radians.
  #[serde(default)]
  pub inclination: f64,
  /// Azimuth angle in radians.
  #[serde(default)]
  pub azimuth: f64,
  /// Frame pixels along the two frame axes.
  pub pixels: [usize; 2],
  /// Frame half-extents along the two frame axes.
  pub field_of_view: [f64; 2],
}

/// Dust emission controls.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DustConfig {
  /// Run a dust emission phase.
  #[serde(default = "default_true")]
  pub emission: bool,
  /// Iterate the self-absorption loop first.
  #[serde(default = "default_true")]
  pub self_absorption: bool,
  /// Convergence tolerance on the absorbed dust luminosity.
  #[serde(default = "default_tolerance")]
  pub tolerance: f64,
  /// Self-absorption cycle cap.
  #[serde(default = "default_max_cycles")]
  pub max_cycles: usize,
  /// Compress the emission spectra onto this many library entries; absent
  /// means one entry per cell.
  #[serde(default)]
  pub library_entries: Option<usize>,
}

impl Default for DustConfig {
  fn default() -> Self {
    Self {
      emission: true,
      self_absorption: true,
      tolerance: default_tolerance(),
      max_cycles: default_max_cycles(),
      library_entries: None,
    }
  }
}

/// Output destinations and diagnostics toggles.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
  /// Output directory.
  #[serde(default = "default_directory")]
  pub directory: String,
  /// File name prefix.
  #[serde(default = "default_prefix")]
  pub prefix: String,
  /// Write the grid convergence check.
  #[serde(default = "default_true")]
  pub write_convergence: bool,
  /// Write the density maps.
  #[serde(default = "default_true")]
  pub write_density: bool,
  /// Write the grid quality metrics.
  #[serde(default)]
  pub write_quality: bool,
  /// Write the per-cell properties.
  #[serde(default)]
  pub write_cell_properties: bool,
  /// Write the cells-crossed histogram.
  #[serde(default)]
  pub write_cells_crossed: bool,
  /// Write the grid structure plot files.
  #[serde(default)]
  pub write_grid: bool,
  /// Pixels per axis of the density maps.
  #[serde(default = "default_map_pixels")]
  pub map_pixels: usize,
  /// Random probes for the quality metrics.
  #[serde(default = "default_sample_count")]
  pub quality_samples: usize,
}

impl Default for OutputConfig {
  fn default() -> Self {
    Self {
      directory: default_directory(),
      prefix: default_prefix(),
      write_convergence: true,
      write_density: true,
      write_quality: false,
      write_cell_properties: false,
      write_cells_crossed: false,
      write_grid: false,
      map_pixels: default_map_pixels(),
      quality_samples: default_sample_count(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_min_level() -> u32 {
  2
}

fn default_max_level() -> u32 {
  6
}

fn default_sample_count() -> usize {
  100
}

fn default_max_mass_fraction() -> f64 {
  1e-6
}

fn default_reference_opacity() -> f64 {
  2600.0
}

fn default_generator_count() -> usize {
  500
}

fn default_tolerance() -> f64 {
  0.005
}

fn default_max_cycles() -> usize {
  100
}

fn default_directory() -> String {
  ".".to_string()
}

fn default_prefix() -> String {
  "run".to_string()
}

fn default_map_pixels() -> usize {
  1024
}
