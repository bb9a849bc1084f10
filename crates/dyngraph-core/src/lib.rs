//! # dyngraph core
//!
//! Time-indexed constrained dynamics for planar robots.
//!
//! Every physical quantity at every time step is a named variable; physics,
//! kinematics, actuation and integration are residual terms over those
//! variables. The same terms drive forward simulation, trajectory
//! optimization and feedback-gain extraction.
//!
//! ## Modules
//!
//! - [`graph`]: Keys, values, residual terms and the Levenberg-Marquardt solver
//! - [`math`]: Planar rotation helpers and integration rules
//! - [`dynamics`]: Robot model, kinematics, Newton-Euler terms, forward dynamics
//! - [`actuation`]: Pneumatic mass flow and actuator torque
//! - [`simulation`]: Contact phases, transition predicates and the simulator
//! - [`cdpr`]: Planar cable-driven parallel robot model and terms
//! - [`error`]: Error taxonomy

pub mod error;
pub mod graph;
pub mod math;
pub mod dynamics;
pub mod actuation;
pub mod simulation;
pub mod cdpr;

pub use error::{DynamicsError, Result};

/// Gravity constant [m/s²]
pub const GRAVITY: f64 = 9.8;
