//! Jump and cable-robot scenarios
//!
//! Ready-made pipelines used by the demos and the integration tests:
//! - `vertical_jump`: simulate from a crouch until the apex, then optimize
//!   the trajectory over the simulated phases
//! - `budgeted_jump`: the same over a fixed `(phase, steps)` budget
//! - `cdpr_line`: straight-line pose references for the cable robot

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::info;

use dyngraph_core::dynamics::JumpingRobot;
use dyngraph_core::graph::Key;
use dyngraph_core::simulation::{
    initial_values, JumpControls, Phase, PhaseTransition, SimConfig, SimulationOutput, Simulator, StepBudget,
    VerticalJump,
};

use crate::config::OptimizerConfig;
use crate::optimizer::{OptimizationResult, TrajectoryOptimizer};
use crate::Result;

/// Settings of a jump run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumpScenario {
    /// Shank lean of the starting crouch [rad]
    pub crouch: f64,
    pub controls: JumpControls,
    pub simulation: SimConfig,
    pub optimizer: OptimizerConfig,
}

impl Default for JumpScenario {
    fn default() -> Self {
        Self {
            crouch: 0.3,
            controls: JumpControls::default(),
            simulation: SimConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

/// Simulated and optimized trajectories of one jump
#[derive(Debug, Clone)]
pub struct JumpOutcome {
    pub simulation: SimulationOutput,
    pub optimization: OptimizationResult,
}

impl JumpOutcome {
    /// Torso height at the last optimized step [m]
    pub fn final_height(&self, robot: &JumpingRobot) -> Result<f64> {
        let last = self.optimization.schedule.num_steps() - 1;
        Ok(self.optimization.values().vector3(Key::pose(robot.robot.base, last))?.z)
    }
}

/// Simulate from the crouch until the apex, then optimize
pub fn vertical_jump(robot: &JumpingRobot, scenario: &JumpScenario) -> Result<JumpOutcome> {
    run_jump(robot, scenario, Phase::Ground, &mut VerticalJump)
}

/// Simulate a fixed phase budget, then optimize
pub fn budgeted_jump(robot: &JumpingRobot, scenario: &JumpScenario, budget: &[(Phase, usize)]) -> Result<JumpOutcome> {
    let mut budget = StepBudget::new(budget)?;
    run_jump(robot, scenario, budget.initial_phase(), &mut budget)
}

fn run_jump(
    robot: &JumpingRobot,
    scenario: &JumpScenario,
    initial_phase: Phase,
    transition: &mut dyn PhaseTransition,
) -> Result<JumpOutcome> {
    let init = initial_values(robot, &scenario.controls, &JumpingRobot::crouch(scenario.crouch))?;
    let simulation =
        Simulator::new(robot, scenario.simulation.clone()).simulate(&init, initial_phase, transition)?;
    info!(steps = simulation.num_steps(), "simulated warm start");

    let optimizer = TrajectoryOptimizer::new(robot, scenario.optimizer.clone());
    let optimization = optimizer.optimize_simulation(&simulation, &scenario.controls)?;
    Ok(JumpOutcome { simulation, optimization })
}

/// `n` poses from `start` to `end`, both included
pub fn cdpr_line(start: Vector3<f64>, end: Vector3<f64>, n: usize) -> Vec<Vector3<f64>> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..n).map(|k| start + (end - start) * (k as f64 / (n - 1) as f64)).collect(),
    }
}
