//! Packet transport: the life-cycle engine and the simulation phases.
//!
//! # Module Structure
//!
//! - [`packet`]: the photon packet value type
//! - [`engine`]: emission, peel-off, escape/absorption split, propagation,
//!   scattering, and the dust self-absorption driver

pub mod engine;
pub mod packet;

pub use engine::{PhotonEngine, SelfAbsorptionConfig, TransportConfig};
pub use packet::Packet;
