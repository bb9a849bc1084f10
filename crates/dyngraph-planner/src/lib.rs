//! # dyngraph planner
//!
//! Trajectory optimization and controllers built on the constraint system of
//! `dyngraph-core`.
//!
//! ```text
//! simulate ──(values, step_phases)──▶ collocation optimizer ──▶ refined jump
//! desired poses ──▶ full-horizon CDPR controller ──▶ tensions + feedback gains
//! current state ──▶ one-step tension distribution ──▶ tension command
//! ```
//!
//! # Components
//!
//! - [`config`]: Optimizer and controller configuration
//! - [`collocation`]: Collocation, duration and control terms
//! - [`optimizer`]: Multi-phase jump trajectory optimizer
//! - [`controller`]: Full-horizon cable-robot controller with feedback gains
//! - [`tension`]: Per-step cable tension distribution
//! - [`scenarios`]: Ready-made simulate-then-optimize pipelines

pub mod error;
pub mod config;
pub mod collocation;
pub mod optimizer;
pub mod controller;
pub mod tension;
pub mod scenarios;

pub use error::PlannerError;
pub use config::{IlqrConfig, OptimizerConfig, TensionConfig};
pub use optimizer::{OptimizationResult, TrajectoryOptimizer};
pub use controller::{CdprIlqrController, ControlSample};
pub use tension::{CdprTensionController, CurrentState, TensionCommand};
pub use scenarios::{budgeted_jump, vertical_jump, JumpOutcome, JumpScenario};

/// Result alias for planner operations
pub type Result<T> = std::result::Result<T, PlannerError>;
