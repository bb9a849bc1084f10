//! Error taxonomy shared by every stage of the core.
//!
//! Non-fatal solve outcomes (non-convergence, ill-posed systems) are carried in
//! [`SolveReport`](crate::graph::SolveReport) and only become errors when a
//! caller asks for them to be enforced.

use thiserror::Error;

use crate::graph::Key;
use crate::simulation::SimulationOutput;

/// Core errors
#[derive(Debug, Clone, Error)]
pub enum DynamicsError {
    #[error("Key not found: {0}")]
    KeyNotFound(Key),
    #[error("Dimension mismatch for {key}: expected {expected}, got {got}")]
    DimensionMismatch { key: Key, expected: usize, got: usize },
    #[error("Key {0} is not a free variable of the system")]
    NotAVariable(Key),
    #[error("Fixed-point sub-solve did not converge after {iterations} iterations (last iterate {last_iterate})")]
    SubSolveNonConvergence { iterations: usize, last_iterate: f64 },
    #[error("Optimization did not converge after {iterations} iterations (residual norm {residual_norm:.3e})")]
    OptimizationNonConvergence { iterations: usize, residual_norm: f64 },
    #[error("Ill-posed system: rank {rank} for {columns} unknowns")]
    IllPosedSystem { rank: usize, columns: usize },
    #[error("Invalid phase schedule: {0}")]
    InvalidSchedule(String),
    #[error("Simulation aborted after step {step:?}: {source}")]
    SimulationAborted {
        /// Last fully simulated step, `None` if the first step failed
        step: Option<usize>,
        #[source]
        source: Box<DynamicsError>,
        /// Steps simulated before the failure
        partial: Box<SimulationOutput>,
    },
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, DynamicsError>;
