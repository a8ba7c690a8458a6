//! The photon life-cycle engine and the simulation phases.
//!
//! One life cycle: trace the path and fill its optical depths, split the
//! packet into escaping, absorbed and scattered luminosity, drop it below
//! the luminosity floor, propagate to a scattering location drawn from the
//! truncated exponential, peel a copy off toward every observer, and draw a
//! new direction from the phase function. The stellar phase launches from
//! the sources; the dust phase launches from cells in proportion to their
//! absorbed bolometric luminosity times the library emission spectrum, and
//! the self-absorption driver iterates that phase to convergence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{error, info};

use crate::dustlib::DustLib;
use crate::error::{Error, Result};
use crate::medium::Medium;
use crate::observer::ObserverSet;
use crate::parallel::{parallel_call, Communicator, ProcessAssigner, SequentialAssigner, SingleProcess, StaggeredAssigner};
use crate::path::TracePath;
use crate::rng::{cumulative, locate_clip, RandomStream};
use crate::source::Source;

use super::Packet;

/// Life cycles per progress-log slice.
const LOG_CHUNK_SIZE: u64 = 10_000;

/// Below this optical depth the interaction factor 1 − e^{−τ} switches to
/// its series expansion.
const TAU_MIN: f64 = 1e-3;

/// Packets are dropped once their luminosity falls below this fraction of
/// the launch luminosity.
const L_MIN_FRACTION: f64 = 1e-4;

/// Minimum seconds between progress log messages.
const PROGRESS_INTERVAL: f64 = 3.0;

/// Stream block reserved per parallel transport phase.
const PHASE_STREAM_BLOCK: u64 = 1 << 40;

/// Convergence controls for the dust self-absorption driver.
#[derive(Clone, Copy, Debug)]
pub struct SelfAbsorptionConfig {
  /// Run the self-absorption iteration at all.
  pub enabled: bool,
  /// Relative-change threshold on the total absorbed dust luminosity.
  pub tolerance: f64,
  /// Cycle cap; reaching it without convergence logs an error but the
  /// simulation completes with the last state.
  pub max_cycles: usize,
}

impl Default for SelfAbsorptionConfig {
  fn default() -> Self {
    Self { enabled: true, tolerance: 0.005, max_cycles: 100 }
  }
}

/// Transport configuration.
#[derive(Clone, Debug)]
pub struct TransportConfig {
  /// Photon packets per wavelength bin.
  pub n_packets: f64,
  /// Base RNG seed; runs with the same seed, configuration and thread mode
  /// are reproducible.
  pub seed: u64,
  /// Force the chunk loops onto the calling thread; combined with a fixed
  /// seed this makes observer cubes reproducible bit for bit.
  pub serial: bool,
  /// Dust emission and self-absorption controls.
  pub self_absorption: SelfAbsorptionConfig,
  /// Run a dust-emission phase after the stellar phase.
  pub dust_emission: bool,
}

impl Default for TransportConfig {
  fn default() -> Self {
    Self {
      n_packets: 1e5,
      seed: 0,
      serial: false,
      self_absorption: SelfAbsorptionConfig::default(),
      dust_emission: true,
    }
  }
}

/// Progress bookkeeping shared by the workers of one phase.
struct Progress {
  phase: String,
  done: AtomicU64,
  total: u64,
  timer: Mutex<Instant>,
}

impl Progress {
  fn new(phase: &str, total: u64) -> Self {
    Self {
      phase: phase.to_string(),
      done: AtomicU64::new(0),
      total,
      timer: Mutex::new(Instant::now()),
    }
  }

  /// Accumulate finished life cycles and log at most every few seconds.
  ///
  /// The timer check runs without blocking, so once in a while two
  /// consecutive messages may slip through.
  fn log(&self, extra: u64) {
    let done = self.done.fetch_add(extra, Ordering::Relaxed) + extra;
    if let Ok(mut timer) = self.timer.try_lock() {
      if timer.elapsed().as_secs_f64() > PROGRESS_INTERVAL {
        *timer = Instant::now();
        let completed = done as f64 * 100.0 / self.total as f64;
        info!("launched {} photon packets: {completed:.1}%", self.phase);
      }
    }
  }
}

/// The Monte Carlo transport engine.
pub struct PhotonEngine {
  medium: Arc<Medium>,
  sources: Vec<Arc<dyn Source>>,
  observers: Arc<ObserverSet>,
  dustlib: Option<DustLib>,
  comm: Arc<dyn Communicator>,
  config: TransportConfig,
  n_lambda: usize,
  n_chunks: u64,
  chunk_size: u64,
  /// Actual packets per wavelength: `n_chunks × chunk_size`.
  n_pp: f64,
  /// Distinguishes the RNG stream blocks of successive phases.
  phase_counter: AtomicU64,
}

impl PhotonEngine {
  /// Create the engine; `dustlib` is required when dust emission is on.
  pub fn new(
    medium: Arc<Medium>,
    sources: Vec<Arc<dyn Source>>,
    observers: Arc<ObserverSet>,
    dustlib: Option<DustLib>,
    config: TransportConfig,
  ) -> Result<Self> {
    Self::with_communicator(medium, sources, observers, dustlib, config, Arc::new(SingleProcess))
  }

  /// Create the engine with an explicit multi-process communicator.
  pub fn with_communicator(
    medium: Arc<Medium>,
    sources: Vec<Arc<dyn Source>>,
    observers: Arc<ObserverSet>,
    dustlib: Option<DustLib>,
    config: TransportConfig,
    comm: Arc<dyn Communicator>,
  ) -> Result<Self> {
    if config.n_packets < 0.0 {
      return Err(Error::config("the number of photon packets is negative"));
    }
    if config.n_packets > 1e15 {
      return Err(Error::config("the number of photon packets exceeds the implementation limit of 1e15"));
    }
    if (config.dust_emission || config.self_absorption.enabled) && dustlib.is_none() {
      return Err(Error::config("dust emission requires a dust library"));
    }
    let n_lambda = medium.lambda_grid().n_lambda();

    // chunk count chosen so it comfortably exceeds the thread count for
    // load balancing while keeping per-chunk progress messages useful
    let threads = if config.serial { 1 } else { rayon::current_num_threads() };
    let (n_chunks, chunk_size) = if config.n_packets <= 0.0 {
      (0u64, 0u64)
    } else if threads == 1 {
      (1, config.n_packets.ceil() as u64)
    } else {
      let n = (config.n_packets / 2e4)
        .min((config.n_packets / 1e7).max(10.0 * threads as f64 / n_lambda as f64))
        .ceil()
        .max(1.0) as u64;
      (n, (config.n_packets / n as f64).ceil() as u64)
    };

    Ok(Self {
      medium,
      sources,
      observers,
      dustlib,
      comm,
      config,
      n_lambda,
      n_chunks,
      chunk_size,
      n_pp: (n_chunks * chunk_size) as f64,
      phase_counter: AtomicU64::new(1),
    })
  }

  /// The medium the engine transports through.
  pub fn medium(&self) -> &Medium {
    &self.medium
  }

  /// The observer set receiving peel-off contributions.
  pub fn observers(&self) -> &ObserverSet {
    &self.observers
  }

  /// Run all configured phases: stellar emission, then optionally the dust
  /// self-absorption iteration and the final dust emission phase.
  pub fn run(&self) -> Result<()> {
    self.run_stellar_emission()?;
    if self.config.dust_emission {
      if self.config.self_absorption.enabled {
        self.run_self_absorption()?;
      }
      self.run_dust_emission()?;
    }
    self.observers.flush();
    Ok(())
  }

  /// The stellar emission phase.
  pub fn run_stellar_emission(&self) -> Result<()> {
    if self.n_chunks == 0 || self.sources.is_empty() {
      return Ok(());
    }
    info!(
      packets = self.n_pp,
      wavelengths = self.n_lambda,
      "starting the stellar emission phase"
    );
    let progress = Progress::new("stellar", self.n_pp as u64 * self.n_lambda as u64);
    let stream_base = self.next_stream_base();

    self.run_chunks(|index| {
      let ell = index % self.n_lambda;
      let mut rng = RandomStream::new(self.config.seed, stream_base + index as u64);

      let weights: Vec<f64> = self.sources.iter().map(|s| s.luminosity(ell)).collect();
      let l_total: f64 = weights.iter().sum();
      if l_total <= 0.0 {
        progress.log(self.chunk_size);
        return Ok(());
      }
      let l = l_total / self.n_pp;
      let l_min = L_MIN_FRACTION * l;

      let mut packet = Packet::default();
      let mut path = TracePath::new();
      let mut obs_path = TracePath::new();
      let mut remaining = self.chunk_size;
      while remaining > 0 {
        let count = remaining.min(LOG_CHUNK_SIZE);
        for _ in 0..count {
          let s = rng.weighted_index(&weights);
          self.sources[s].emit(ell, l, &mut rng, &mut packet);
          self.peel_off_emission(&packet, &mut obs_path)?;
          self.life_cycle(&mut packet, &mut path, &mut obs_path, &mut rng, l_min, true)?;
        }
        progress.log(count);
        remaining -= count;
      }
      Ok(())
    })
  }

  /// The dust self-absorption iteration: re-emit absorbed energy without
  /// peel-off until the total absorbed dust luminosity converges. Returns
  /// the number of cycles run.
  pub fn run_self_absorption(&self) -> Result<usize> {
    let SelfAbsorptionConfig { tolerance, max_cycles, .. } = self.config.self_absorption;
    info!("starting the dust self-absorption phase");

    let mut previous_total = 0.0;
    for cycle in 1..=max_cycles {
      info!(cycle, "dust self-absorption cycle");
      let labsbol = self.prepare_dust_emission()?;
      self.medium.reboot_dust_absorption();

      let progress = Progress::new(&format!("self-absorption cycle {cycle}"), self.n_pp as u64 * self.n_lambda as u64);
      self.run_dust_chunks(&labsbol, false, &progress)?;

      let total = self.medium.l_abs_dust_total();
      info!(
        absorbed_stellar = self.medium.l_abs_stellar_total(),
        absorbed_dust = total,
        "absorbed luminosity totals"
      );
      // a medium that re-absorbs nothing at all is trivially converged
      let eps = if total > 0.0 { ((total - previous_total) / total).abs() } else { 0.0 };
      if eps < tolerance {
        info!(cycle, change = format!("{:.2}%", eps * 100.0), "self-absorption converged");
        return Ok(cycle);
      }
      info!(change = format!("{:.2}%", eps * 100.0), "convergence not yet reached");
      previous_total = total;
    }
    error!(cycles = max_cycles, "self-absorption did not converge; continuing with the last state");
    Ok(max_cycles)
  }

  /// The final dust emission phase, with peel-off to the observers.
  pub fn run_dust_emission(&self) -> Result<()> {
    info!("starting the dust emission phase");
    let labsbol = self.prepare_dust_emission()?;
    let progress = Progress::new("dust", self.n_pp as u64 * self.n_lambda as u64);
    self.run_dust_chunks(&labsbol, true, &progress)
  }

  /// Compute the dust emission spectra and snapshot the bolometric
  /// absorbed luminosity per cell.
  fn prepare_dust_emission(&self) -> Result<Vec<f64>> {
    let dustlib = self.dustlib.as_ref().expect("dust phases require a library");
    info!("calculating dust emission spectra");
    dustlib.calculate(&self.medium, self.comm.as_ref())?;
    Ok((0..self.medium.n_cells()).map(|m| self.medium.bolometric_absorbed(m)).collect())
  }

  /// Launch dust packets from cells in proportion to the absorbed
  /// luminosity times the library spectrum.
  fn run_dust_chunks(&self, labsbol: &[f64], peel_off: bool, progress: &Progress) -> Result<()> {
    if self.n_chunks == 0 {
      return Ok(());
    }
    let dustlib = self.dustlib.as_ref().expect("dust phases require a library");
    let stream_base = self.next_stream_base();

    self.run_chunks(|index| {
      let ell = index % self.n_lambda;
      let mut rng = RandomStream::new(self.config.seed, stream_base + index as u64);

      let lv: Vec<f64> = (0..self.medium.n_cells())
        .map(|m| {
          if labsbol[m] > 0.0 {
            labsbol[m] * dustlib.luminosity(m, ell)
          } else {
            0.0
          }
        })
        .collect();
      let l_total: f64 = lv.iter().sum();
      if l_total <= 0.0 {
        progress.log(self.chunk_size);
        return Ok(());
      }
      let cdf = cumulative(&lv);
      let l = l_total / self.n_pp;
      let l_min = L_MIN_FRACTION * l;

      let mut packet = Packet::default();
      let mut path = TracePath::new();
      let mut obs_path = TracePath::new();
      let mut remaining = self.chunk_size;
      while remaining > 0 {
        let count = remaining.min(LOG_CHUNK_SIZE);
        for _ in 0..count {
          let m = locate_clip(&cdf, rng.uniform() * l_total);
          let position = self.medium.grid().random_position_in(m, &mut rng)?;
          packet.launch(l, ell, position, rng.direction(), false);
          if peel_off {
            self.peel_off_emission(&packet, &mut obs_path)?;
          }
          self.life_cycle(&mut packet, &mut path, &mut obs_path, &mut rng, l_min, peel_off)?;
        }
        progress.log(count);
        remaining -= count;
      }
      Ok(())
    })
  }

  /// Distribute the chunk×wavelength loop over the thread pool (or run it
  /// serially when so configured).
  fn run_chunks(&self, body: impl Fn(usize) -> Result<()> + Sync) -> Result<()> {
    let total = (self.n_chunks as usize) * self.n_lambda;
    if self.config.serial {
      let assigner = SerialAssigner(total);
      parallel_call(&assigner, body)
    } else if self.comm.is_multi_proc() {
      let assigner = StaggeredAssigner::new(total, self.comm.rank(), self.comm.size());
      let result = parallel_call(&assigner, body);
      self.comm.wait("transport phase");
      result
    } else {
      parallel_call(&SequentialAssigner::new(total), body)
    }
  }

  /// Fresh stream block so successive phases never reuse RNG streams.
  fn next_stream_base(&self) -> u64 {
    self.phase_counter.fetch_add(1, Ordering::Relaxed) * PHASE_STREAM_BLOCK
  }

  /// Run the interaction loop of one packet until it escapes or drops
  /// below the luminosity floor.
  fn life_cycle(
    &self,
    packet: &mut Packet,
    path: &mut TracePath,
    obs_path: &mut TracePath,
    rng: &mut RandomStream,
    l_min: f64,
    peel_off: bool,
  ) -> Result<()> {
    loop {
      path.start(packet.position, packet.direction);
      let tau_path = self.medium.fill_path(packet.ell, path)?;

      self.split_escape_absorption(packet, path);
      if packet.luminosity <= l_min {
        return Ok(());
      }

      // propagate to the next scattering location
      let tau = rng.expon_cutoff(tau_path);
      let s = path.path_length(tau)?;
      packet.propagate(s);

      if peel_off {
        self.peel_off_scattering(packet, obs_path)?;
      }
      self.scatter(packet, rng)?;
    }
  }

  /// Deposit the absorbed luminosity of every path segment and reduce the
  /// packet to its scattered luminosity.
  fn split_escape_absorption(&self, packet: &mut Packet, path: &TracePath) {
    let ell = packet.ell;
    let l = packet.luminosity;
    let mut l_sca = 0.0;
    for (n, seg) in path.segments().iter().enumerate() {
      let Some(m) = seg.cell else { continue };
      let albedo = self.medium.local_albedo(ell, m);
      let tau_start = if n == 0 { 0.0 } else { path.tau(n - 1) };
      let dtau = path.dtau(n);
      let expfactor = if dtau > TAU_MIN {
        1.0 - (-dtau).exp()
      } else {
        dtau * (1.0 - 0.5 * dtau)
      };
      let l_int = l * (-tau_start).exp() * expfactor;
      l_sca += albedo * l_int;
      self.medium.absorb(m, ell, (1.0 - albedo) * l_int, packet.stellar);
    }
    // the escaping fraction exp(−τ_path)·L leaves through the peel-off
    // copies; the packet itself continues with the scattered luminosity
    packet.luminosity = l_sca;
  }

  /// Peel an emission copy off toward every observer; emission is
  /// isotropic, so the only weight is the line-of-sight extinction.
  fn peel_off_emission(&self, packet: &Packet, obs_path: &mut TracePath) -> Result<()> {
    for (o, observer) in self.observers.observers().iter().enumerate() {
      let k_obs = observer.direction_to(packet.position);
      obs_path.start(packet.position, k_obs);
      let tau = self.medium.fill_path(packet.ell, obs_path)?;
      self.observers.detect(o, packet, packet.luminosity * (-tau).exp());
    }
    Ok(())
  }

  /// Peel a scattering copy off toward every observer, weighted by the
  /// component-averaged phase function toward the observer.
  fn peel_off_scattering(&self, packet: &Packet, obs_path: &mut TracePath) -> Result<()> {
    if self.observers.is_empty() {
      return Ok(());
    }
    let ell = packet.ell;
    let n_comp = self.medium.n_comp();

    // per-component weights κ_sca(h)·ρ(m,h), needed only with several
    // components
    let mut weights = Vec::new();
    if n_comp > 1 {
      let m = self
        .medium
        .grid()
        .cell_of(packet.position)
        .ok_or_else(|| Error::numerical("a scattering event seems to take place outside the grid"))?;
      self.medium.scattering_weights(ell, m, &mut weights);
      let total: f64 = weights.iter().sum();
      if total > 0.0 {
        for w in &mut weights {
          *w /= total;
        }
      }
    } else {
      weights.push(1.0);
    }

    let k_old = packet.direction;
    for (o, observer) in self.observers.observers().iter().enumerate() {
      let k_obs = observer.direction_to(packet.position);
      let mut w = 0.0;
      for (h, &wh) in weights.iter().enumerate() {
        w += wh * self.medium.mix(h).phase(ell, k_old, k_obs);
      }
      obs_path.start(packet.position, k_obs);
      let tau = self.medium.fill_path(ell, obs_path)?;
      self.observers.detect(o, packet, packet.luminosity * w * (-tau).exp());
    }
    Ok(())
  }

  /// Choose a component in proportion to κ_sca·ρ and draw the scattered
  /// direction from its phase function.
  fn scatter(&self, packet: &mut Packet, rng: &mut RandomStream) -> Result<()> {
    let ell = packet.ell;
    let mut h = 0;
    if self.medium.n_comp() > 1 {
      let m = self
        .medium
        .grid()
        .cell_of(packet.position)
        .ok_or_else(|| Error::numerical("a scattering event seems to take place outside the grid"))?;
      let mut weights = Vec::new();
      self.medium.scattering_weights(ell, m, &mut weights);
      h = rng.weighted_index(&weights);
    }
    let k_new = self.medium.mix(h).sample_phase(ell, packet.direction, rng);
    packet.scatter(k_new);
    Ok(())
  }
}

/// Assigner that keeps all work on the calling thread, in index order.
struct SerialAssigner(usize);

impl ProcessAssigner for SerialAssigner {
  fn n_values(&self) -> usize {
    self.0
  }

  fn absolute_index(&self, i: usize) -> usize {
    i
  }

  fn parallel(&self) -> bool {
    false
  }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;
