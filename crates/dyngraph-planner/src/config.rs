//! Planner configuration
//!
//! Settings of the jump trajectory optimizer and the two cable-robot
//! controllers.

use dyngraph_core::actuation::MassFlowConfig;
use dyngraph_core::graph::{PenaltyParams, SolverSettings};
use serde::{Deserialize, Serialize};

use crate::error::PlannerError;

/// Treatment of the per-segment time steps
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DurationMode {
    /// Every segment keeps the simulation time step
    Fixed,
    /// Time steps are free around the simulation value
    Free {
        /// Standard deviation of the time-step prior [s]
        prior_sigma: f64,
    },
}

/// Treatment of the valve timing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ControlMode {
    /// Valve times are held at the given controls
    Hard,
    /// Valve times may move; standard deviation of their priors [s]
    Soft(f64),
}

/// Target height of the torso at one step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApexHeightGoal {
    /// Torso COM height [m]
    pub height: f64,
    /// Step the goal applies to; the last step if `None`
    pub step: Option<usize>,
    /// Standard deviation of the goal [m]
    pub sigma: f64,
}

/// Jump trajectory optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub durations: DurationMode,
    pub controls: ControlMode,
    pub goal: Option<ApexHeightGoal>,
    /// Settings of the tube-flow fixed point inside the mass-flow terms
    pub mass_flow: MassFlowConfig,
    pub solver: SolverSettings,
    /// Solve by the penalty method instead of hard constraints
    pub penalty: Option<PenaltyParams>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            durations: DurationMode::Fixed,
            controls: ControlMode::Hard,
            goal: None,
            mass_flow: MassFlowConfig::default(),
            solver: SolverSettings::default(),
            penalty: None,
        }
    }
}

/// Pose tracking of the full-horizon controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackingMode {
    /// Desired poses are hard constraints
    Hard,
    /// Desired poses are soft, with precisions `[θ, x, z]`
    Weighted(Vec<f64>),
}

/// Full-horizon cable-robot controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IlqrConfig {
    /// Time step [s]
    pub dt: f64,
    pub tracking: TrackingMode,
    /// Precision of the mid-tension priors [1/N²]
    pub control_precision: f64,
    pub solver: SolverSettings,
}

impl Default for IlqrConfig {
    fn default() -> Self {
        Self {
            dt: 0.01,
            tracking: TrackingMode::Hard,
            control_precision: 1.0,
            solver: SolverSettings::default(),
        }
    }
}

impl IlqrConfig {
    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.dt <= 0.0 || !self.dt.is_finite() {
            return Err(PlannerError::InvalidConfig(format!("dt must be positive, got {}", self.dt)));
        }
        if self.control_precision <= 0.0 {
            return Err(PlannerError::InvalidConfig("control precision must be positive".to_string()));
        }
        if let TrackingMode::Weighted(q) = &self.tracking {
            if q.len() != 1 && q.len() != 3 {
                return Err(PlannerError::InvalidConfig(format!("expected 1 or 3 tracking precisions, got {}", q.len())));
            }
        }
        Ok(())
    }
}

/// One-step tension-distribution controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensionConfig {
    /// Control period [s]
    pub dt: f64,
    /// Precision of the zero-tension priors [1/N²]
    pub control_precision: f64,
    /// Precision of the measured length and speed priors
    pub measurement_precision: f64,
    pub solver: SolverSettings,
}

impl Default for TensionConfig {
    fn default() -> Self {
        Self {
            dt: 0.01,
            control_precision: 1.0,
            measurement_precision: 1e6,
            solver: SolverSettings::default(),
        }
    }
}

impl TensionConfig {
    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.dt <= 0.0 || !self.dt.is_finite() {
            return Err(PlannerError::InvalidConfig(format!("dt must be positive, got {}", self.dt)));
        }
        if self.control_precision <= 0.0 || self.measurement_precision <= 0.0 {
            return Err(PlannerError::InvalidConfig("precisions must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizer_config_round_trip() {
        let config = OptimizerConfig {
            durations: DurationMode::Free { prior_sigma: 1e-3 },
            controls: ControlMode::Soft(0.01),
            goal: Some(ApexHeightGoal { height: 1.2, step: None, sigma: 0.01 }),
            penalty: Some(PenaltyParams { num_iterations: 4, ..Default::default() }),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: OptimizerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.durations, config.durations);
        assert_eq!(back.controls, ControlMode::Soft(0.01));
        assert_eq!(back.goal, config.goal);
        assert_eq!(back.penalty.map(|p| p.num_iterations), Some(4));
    }

    #[test]
    fn test_ilqr_validation() {
        assert!(IlqrConfig::default().validate().is_ok());
        let bad = IlqrConfig { dt: 0.0, ..Default::default() };
        assert!(matches!(bad.validate(), Err(PlannerError::InvalidConfig(_))));
        let bad = IlqrConfig { tracking: TrackingMode::Weighted(vec![1.0, 2.0]), ..Default::default() };
        assert!(bad.validate().is_err());
    }
}
