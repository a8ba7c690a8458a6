//! Geometry primitives shared by all grids.
//!
//! Positions and directions are plain `glam::DVec3` values; directions are
//! kept unit length by the code that constructs them (the RNG helpers and the
//! phase-function samplers normalize on creation).

pub mod aabb;

pub use aabb::Aabb;
