//! lumiray - Monte Carlo radiative transfer engine
//!
//! The engine follows discrete packets of luminosity from their sources
//! through an absorbing and scattering medium discretized on an adaptive
//! spatial grid, records the escaping radiation at distant observers through
//! peel-off, and iterates the dust re-emission until the absorbed dust
//! luminosity converges.
//!
//! # Features
//!
//! - **Grids**: regular cartesian (linear, power-law, two-phase), adaptive
//!   octree / k-d tree with per-wall neighbor lists, and Voronoi
//!   tesselations with block + k-d point location
//! - **Transport**: peel-off to observers, continuous absorption along
//!   multi-cell paths, truncated-exponential propagation, phase-function
//!   scattering
//! - **Self-absorption**: fixed-point iteration of the dust emission phase
//!   with a cell-to-library spectrum compression
//! - **Parallelism**: chunked parallel-for over a long-lived thread pool
//!   with first-error capture, composable across processes

pub mod config;
pub mod dustlib;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod import;
pub mod medium;
pub mod observer;
pub mod output;
pub mod parallel;
pub mod path;
pub mod rng;
pub mod sim;
pub mod source;
pub mod transport;
pub mod wavelength;

// Re-export commonly used items
pub use error::{Error, Result};
pub use geometry::Aabb;
pub use grid::Grid;
pub use medium::Medium;
pub use observer::{DistantObserver, ObserverSet};
pub use path::TracePath;
pub use rng::RandomStream;
pub use sim::Simulation;
pub use transport::{Packet, PhotonEngine};
pub use wavelength::WavelengthGrid;
