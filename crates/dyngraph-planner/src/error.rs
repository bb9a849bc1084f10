//! Planner errors

use dyngraph_core::DynamicsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("Dynamics error: {0}")]
    Dynamics(#[from] DynamicsError),
    #[error("Empty trajectory")]
    EmptyTrajectory,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
