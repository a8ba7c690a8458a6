//! Error taxonomy for the engine.
//!
//! Setup problems surface as `Config`, bad particle/mesh input as `Import`,
//! and anything that goes wrong mid-transport (negative or non-finite optical
//! depth, a scattering event outside the grid, a packet that cannot advance)
//! as `Numerical`. A worker failure is captured first-one-wins by the
//! parallel layer and re-raised on the calling thread as `Worker`.

use thiserror::Error;

/// Engine-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal and reportable error conditions.
#[derive(Error, Debug)]
pub enum Error {
  /// Invalid or inconsistent configuration, detected during setup.
  #[error("configuration error: {0}")]
  Config(String),

  /// Malformed particle or mesh input data.
  #[error("import error: {0}")]
  Import(String),

  /// Numerical anomaly during transport (NaN/∞ optical depth, lookup failure,
  /// stuck packet).
  #[error("numerical anomaly: {0}")]
  Numerical(String),

  /// Self-absorption iteration did not meet the tolerance within the cycle
  /// cap. The simulation still completes with the last computed state; this
  /// variant is used when the caller asks for a hard failure instead.
  #[error("convergence failure: {0}")]
  Convergence(String),

  /// Error propagated out of a parallel worker.
  #[error("worker error: {0}")]
  Worker(String),

  /// Underlying I/O failure while writing output files.
  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),
}

impl Error {
  /// Shorthand for a configuration error with a formatted message.
  pub fn config(msg: impl Into<String>) -> Self {
    Error::Config(msg.into())
  }

  /// Shorthand for a numerical-anomaly error with a formatted message.
  pub fn numerical(msg: impl Into<String>) -> Self {
    Error::Numerical(msg.into())
  }
}
