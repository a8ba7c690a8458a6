//! Output writers: FITS images, text reports, grid plots, diagnostics.
//!
//! # Module Structure
//!
//! - [`fits`]: minimal FITS image/cube writer
//! - [`text`]: text reports and grid plot files
//! - [`diagnostics`]: the dust-system diagnostics suite

pub mod diagnostics;
pub mod fits;
pub mod text;

pub use diagnostics::DiagnosticsOptions;
pub use fits::write_fits;
pub use text::{GridPlotData, TextFile};
