//! Simulation assembly: turn a configuration tree into a runnable engine.

use std::path::PathBuf;
use std::sync::Arc;

use glam::DVec3;
use tracing::info;

use crate::config::{
  DistributionConfig, GridConfig, MeshConfig, MixConfig, ObserverConfig, SimulationConfig,
  SourceConfig, SplitAxisConfig, SplitPointConfig, TraversalConfig, TreeKindConfig,
  VoronoiGeneratorConfig, WavelengthConfig,
};
use crate::dustlib::{DustLib, IdentityMapping, ModuloMapping, TemplateEmissivity};
use crate::error::{Error, Result};
use crate::geometry::Aabb;
use crate::grid::cartesian::{AxisMesh, CartesianGrid, TwoPhaseParams};
use crate::grid::tree::{
  SplitAxisPolicy, SplitPointPolicy, TraversalMethod, TreeGrid, TreeGridConfig, TreeKind,
};
use crate::grid::voronoi::{GeneratorDistribution, VoronoiGrid};
use crate::grid::Grid;
use crate::medium::{
  DustDistribution, DustMix, GrayMix, HenyeyGreensteinMix, Medium, MediumOptions,
  PowerLawSphereDistribution, UniformBoxDistribution,
};
use crate::observer::{DistantObserver, ObserverSet};
use crate::output::diagnostics::{
  write_cell_properties, write_convergence, write_crossed, write_density_maps,
  write_grid_structure, write_observer_cubes, write_quality,
};
use crate::output::DiagnosticsOptions;
use crate::rng::RandomStream;
use crate::source::{GeometricSource, PointSource, Source};
use crate::transport::{PhotonEngine, SelfAbsorptionConfig, TransportConfig};
use crate::wavelength::WavelengthGrid;

/// Stream reserved for grid construction draws.
const GRID_STREAM: u64 = 0xC0DE;

/// A fully assembled simulation.
pub struct Simulation {
  engine: PhotonEngine,
  medium: Arc<Medium>,
  observers: Arc<ObserverSet>,
  config: SimulationConfig,
}

impl Simulation {
  /// Build every component from the configuration tree.
  pub fn build(config: SimulationConfig) -> Result<Self> {
    if config.domain.half_extent.iter().any(|&h| h <= 0.0) {
      return Err(Error::config("the domain half-extents must be positive"));
    }
    let extent = Aabb::from_half_extents(DVec3::from_array(config.domain.half_extent));

    let lambda = match &config.wavelengths {
      WavelengthConfig::Logarithmic { min, max, bins } => WavelengthGrid::logarithmic(*min, *max, *bins)?,
      WavelengthConfig::Explicit { lambdas, widths } => WavelengthGrid::new(lambdas.clone(), widths.clone())?,
    };
    let n_lambda = lambda.n_lambda();

    let distribution: Arc<dyn DustDistribution> = match &config.medium.distribution {
      DistributionConfig::Uniform { rho } => Arc::new(UniformBoxDistribution::new(extent, *rho)),
      DistributionConfig::PowerLawSphere { radius, rho_ref } => {
        Arc::new(PowerLawSphereDistribution::new(*radius, *rho_ref))
      }
    };

    let mut rng = RandomStream::new(config.seed, GRID_STREAM);
    let grid: Arc<dyn Grid> = match &config.grid {
      GridConfig::Cartesian { shape, mesh_x, mesh_y, mesh_z, two_phase } => {
        let meshes = (axis_mesh(*mesh_x), axis_mesh(*mesh_y), axis_mesh(*mesh_z));
        match two_phase {
          Some(tp) => {
            if meshes != (AxisMesh::Linear, AxisMesh::Linear, AxisMesh::Linear) {
              return Err(Error::config("the two-phase grid uses linear meshes"));
            }
            Arc::new(CartesianGrid::two_phase(
              extent,
              (shape[0], shape[1], shape[2]),
              TwoPhaseParams { filling_factor: tp.filling_factor, contrast: tp.contrast },
              &mut rng,
            )?)
          }
          None => Arc::new(CartesianGrid::new(extent, (shape[0], shape[1], shape[2]), meshes)?),
        }
      }
      GridConfig::Tree {
        tree_kind,
        min_level,
        max_level,
        traversal,
        split_point,
        split_axis,
        sample_count,
        max_optical_depth,
        max_mass_fraction,
        max_dens_disp_fraction,
        reference_opacity,
      } => {
        let tree_config = TreeGridConfig {
          kind: match tree_kind {
            TreeKindConfig::Octree => TreeKind::Octree,
            TreeKindConfig::BinTree => TreeKind::BinTree,
          },
          min_level: *min_level,
          max_level: *max_level,
          traversal: match traversal {
            TraversalConfig::TopDown => TraversalMethod::TopDown,
            TraversalConfig::Neighbor => TraversalMethod::Neighbor,
            TraversalConfig::Bookkeeping => TraversalMethod::Bookkeeping,
          },
          split_point: match split_point {
            SplitPointConfig::Center => SplitPointPolicy::Center,
            SplitPointConfig::Barycenter => SplitPointPolicy::Barycenter,
          },
          split_axis: match split_axis {
            SplitAxisConfig::Alternating => SplitAxisPolicy::Alternating,
            SplitAxisConfig::Barycentric => SplitAxisPolicy::Barycentric,
          },
          sample_count: *sample_count,
          max_optical_depth: *max_optical_depth,
          max_mass_fraction: *max_mass_fraction,
          max_dens_disp_fraction: *max_dens_disp_fraction,
          reference_opacity: *reference_opacity,
        };
        let density_source: Arc<dyn crate::grid::tree::TreeDensitySource> = distribution.clone();
        Arc::new(TreeGrid::new(extent, tree_config, density_source, &mut rng)?)
      }
      GridConfig::Voronoi { generators, count } => {
        let generator_distribution = match generators {
          VoronoiGeneratorConfig::Uniform => GeneratorDistribution::Uniform { count: *count },
          VoronoiGeneratorConfig::CentralPeak => GeneratorDistribution::CentralPeak { count: *count },
          VoronoiGeneratorConfig::DustDensity => GeneratorDistribution::DustDensity { count: *count },
        };
        let sampler: &dyn crate::grid::voronoi::PositionSampler = distribution.as_ref();
        Arc::new(VoronoiGrid::new(extent, generator_distribution, Some(sampler), &mut rng)?)
      }
    };

    let mixes: Vec<Arc<dyn DustMix>> = config
      .medium
      .components
      .iter()
      .map(|mix| -> Result<Arc<dyn DustMix>> {
        match mix {
          MixConfig::Gray { kappa_abs, kappa_sca } => {
            if *kappa_abs < 0.0 || *kappa_sca < 0.0 {
              return Err(Error::config("opacities must be non-negative"));
            }
            Ok(Arc::new(GrayMix::new(*kappa_abs, *kappa_sca)))
          }
          MixConfig::HenyeyGreenstein { kappa_abs, kappa_sca, g } => {
            if g.abs() >= 1.0 {
              return Err(Error::config("the asymmetry parameter must lie in (-1, 1)"));
            }
            Ok(Arc::new(HenyeyGreensteinMix::constant(*kappa_abs, *kappa_sca, *g, n_lambda)))
          }
        }
      })
      .collect::<Result<Vec<_>>>()?;

    let medium = Arc::new(Medium::new(
      grid,
      distribution.clone(),
      mixes,
      lambda,
      MediumOptions {
        sample_count: config.medium.sample_count,
        seed: config.seed,
        record_crossed: config.medium.record_crossed,
      },
    )?);

    if config.sources.is_empty() {
      return Err(Error::config("at least one source is required"));
    }
    let sources: Vec<Arc<dyn Source>> = config
      .sources
      .iter()
      .map(|source| -> Arc<dyn Source> {
        match source {
          SourceConfig::Point { position, luminosity } => Arc::new(PointSource::new(
            DVec3::from_array(*position),
            vec![*luminosity; n_lambda],
          )),
          SourceConfig::Geometric { luminosity } => {
            let sampler: Arc<dyn crate::grid::voronoi::PositionSampler> = distribution.clone();
            Arc::new(GeometricSource::new(sampler, vec![*luminosity; n_lambda]))
          }
        }
      })
      .collect();

    let observers = Arc::new(ObserverSet::new(
      config
        .observers
        .iter()
        .map(build_observer)
        .collect::<Result<Vec<_>>>()?,
      n_lambda,
    ));

    let dustlib = if config.dust.emission || config.dust.self_absorption {
      let mapping: Box<dyn crate::dustlib::LibraryMapping> = match config.dust.library_entries {
        Some(entries) => Box::new(ModuloMapping::new(entries)),
        None => Box::new(IdentityMapping),
      };
      Some(DustLib::new(mapping, Box::new(TemplateEmissivity::flat(n_lambda))))
    } else {
      None
    };

    let engine = PhotonEngine::new(
      medium.clone(),
      sources,
      observers.clone(),
      dustlib,
      TransportConfig {
        n_packets: config.packets,
        seed: config.seed,
        serial: config.serial,
        self_absorption: SelfAbsorptionConfig {
          enabled: config.dust.self_absorption,
          tolerance: config.dust.tolerance,
          max_cycles: config.dust.max_cycles,
        },
        dust_emission: config.dust.emission,
      },
    )?;

    Ok(Self { engine, medium, observers, config })
  }

  /// The transport engine.
  pub fn engine(&self) -> &PhotonEngine {
    &self.engine
  }

  /// The medium.
  pub fn medium(&self) -> &Medium {
    &self.medium
  }

  /// Run all phases and write the configured outputs.
  pub fn run(&self) -> Result<()> {
    self.engine.run()?;
    self.write()?;
    info!("simulation finished");
    Ok(())
  }

  /// Write diagnostics and observer cubes per the output configuration.
  pub fn write(&self) -> Result<()> {
    let out = &self.config.output;
    let dir = PathBuf::from(&out.directory);
    std::fs::create_dir_all(&dir)?;
    let prefix = out.prefix.as_str();

    let options = DiagnosticsOptions {
      map_pixels: out.map_pixels,
      quality_samples: out.quality_samples,
      seed: self.config.seed,
      ..Default::default()
    };

    if out.write_convergence {
      write_convergence(&self.medium, &dir, prefix)?;
    }
    if out.write_density {
      write_density_maps(&self.medium, &dir, prefix, options.map_pixels)?;
    }
    if out.write_quality {
      write_quality(&self.medium, &dir, prefix, &options)?;
    }
    if out.write_cell_properties {
      write_cell_properties(&self.medium, &dir, prefix, &options)?;
    }
    if out.write_cells_crossed {
      write_crossed(&self.medium, &dir, prefix)?;
    }
    if out.write_grid {
      write_grid_structure(&self.medium, &dir, prefix)?;
    }
    if !self.observers.is_empty() {
      write_observer_cubes(&self.observers, &dir, prefix)?;
    }
    Ok(())
  }
}

fn axis_mesh(mesh: MeshConfig) -> AxisMesh {
  match mesh {
    MeshConfig::Linear => AxisMesh::Linear,
    MeshConfig::PowerLaw { ratio } => AxisMesh::PowerLaw { ratio },
  }
}

fn build_observer(config: &ObserverConfig) -> Result<DistantObserver> {
  DistantObserver::new(
    config.name.clone(),
    config.inclination,
    config.azimuth,
    (config.pixels[0], config.pixels[1]),
    (config.field_of_view[0], config.field_of_view[1]),
  )
}

#[cfg(test)]
#[path = "sim_test.rs"]
mod sim_test;
