//! Mathematical utilities
//!
//! Planar rotation and cross-product helpers, and the integration rules
//! shared by the simulator and the collocation terms.

pub mod planar;
pub mod integrator;

pub use planar::*;
pub use integrator::*;
