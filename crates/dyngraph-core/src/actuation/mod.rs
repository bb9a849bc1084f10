//! Pneumatic actuation
//!
//! Gas and tube properties, the mass-flow fixed point, the actuator torque
//! law and their residual terms.

pub mod mass_flow;
pub mod actuator;
pub mod terms;

pub use mass_flow::*;
pub use actuator::*;
pub use terms::*;
