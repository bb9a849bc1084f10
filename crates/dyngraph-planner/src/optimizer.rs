//! Jump trajectory optimizer
//!
//! Assembles the full-horizon system over a fixed phase schedule:
//!
//! | set           | contents                                          |
//! |---------------|---------------------------------------------------|
//! | `dynamics`    | Newton-Euler, joint and kinematics terms per step |
//! | `actuation`   | actuator torque and mass flow per step            |
//! | `collocation` | trapezoidal rule between consecutive steps        |
//! | `durations`   | segment durations and time-step priors            |
//! | `initial`     | step-0 state                                      |
//! | `controls`    | valve timing priors                               |
//! | `goal`        | optional torso height                             |
//!
//! and solves it from a simulated warm start.

use tracing::{info, warn};

use dyngraph_core::dynamics::JumpingRobot;
use dyngraph_core::graph::{ConstraintSystem, Key, SolveReport, Values};
use dyngraph_core::simulation::{JumpControls, PhaseSchedule, SimulationOutput};

use crate::collocation::{actuation_set, collocation_set, control_set, duration_set, dynamics_set, goal_set, initial_set};
use crate::config::{DurationMode, OptimizerConfig};
use crate::error::PlannerError;
use crate::Result;

/// Outcome of an optimization
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub report: SolveReport,
    pub schedule: PhaseSchedule,
}

impl OptimizationResult {
    pub fn values(&self) -> &Values {
        &self.report.values
    }

    /// Optimized time step of every segment [s]
    pub fn time_steps(&self) -> Result<Vec<f64>> {
        (0..self.schedule.num_segments())
            .map(|s| Ok(self.report.values.scalar(Key::time_step(s))?))
            .collect()
    }

    /// Optimized duration of every segment [s]
    pub fn phase_durations(&self) -> Result<Vec<f64>> {
        (0..self.schedule.num_segments())
            .map(|s| Ok(self.report.values.scalar(Key::phase_duration(s))?))
            .collect()
    }
}

/// Multi-phase collocation optimizer for the jumping robot
#[derive(Debug, Clone)]
pub struct TrajectoryOptimizer<'a> {
    robot: &'a JumpingRobot,
    config: OptimizerConfig,
}

impl<'a> TrajectoryOptimizer<'a> {
    pub fn new(robot: &'a JumpingRobot, config: OptimizerConfig) -> Self {
        Self { robot, config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Build the system; `initial` supplies the step-0 state
    pub fn build(&self, schedule: &PhaseSchedule, controls: &JumpControls, initial: &Values, dt: f64) -> Result<ConstraintSystem> {
        let n = self.robot.actuators.len();
        if controls.valve_open.len() != n || controls.valve_close.len() != n {
            return Err(PlannerError::InvalidConfig(format!(
                "expected valve times for {n} actuators, got {} open and {} close",
                controls.valve_open.len(),
                controls.valve_close.len()
            )));
        }
        if let DurationMode::Free { prior_sigma } = self.config.durations {
            if prior_sigma <= 0.0 {
                return Err(PlannerError::InvalidConfig("time-step prior sigma must be positive".to_string()));
            }
        }

        let robot = &self.robot.robot;
        let mut system = ConstraintSystem::new(self.config.solver.clone());
        system.add_set("dynamics", dynamics_set(robot, schedule));
        system.add_set("actuation", actuation_set(self.robot, schedule, &self.config.mass_flow));
        system.add_set("collocation", collocation_set(self.robot, schedule));
        system.add_set("durations", duration_set(schedule, self.config.durations, dt));
        system.add_set("initial", initial_set(self.robot, schedule, initial)?);
        system.add_set("controls", control_set(controls, self.config.controls));
        if let Some(goal) = &self.config.goal {
            system.add_set("goal", goal_set(robot, schedule, goal));
        }
        system.free_all_referenced();
        Ok(system)
    }

    /// Simulated values completed with the segment time steps and durations
    pub fn warm_start(&self, schedule: &PhaseSchedule, values: &Values, dt: f64) -> Result<Values> {
        let mut warm = values.clone();
        for (s, segment) in schedule.segments().iter().enumerate() {
            if !warm.contains(Key::time_step(s)) {
                warm.set_scalar(Key::time_step(s), dt)?;
            }
            if !warm.contains(Key::phase_duration(s)) {
                warm.set_scalar(Key::phase_duration(s), dt * segment.len as f64)?;
            }
        }
        Ok(warm)
    }

    /// Optimize over `schedule` from the warm start `values`
    pub fn optimize(
        &self,
        schedule: &PhaseSchedule,
        controls: &JumpControls,
        values: &Values,
        dt: f64,
    ) -> Result<OptimizationResult> {
        let warm = self.warm_start(schedule, values, dt)?;
        let system = self.build(schedule, controls, &warm, dt)?;
        info!(
            steps = schedule.num_steps(),
            segments = schedule.num_segments(),
            terms = system.num_terms(),
            "optimizing jump trajectory"
        );

        let report = match &self.config.penalty {
            Some(params) => system.solve_penalty(&warm, params)?,
            None => system.solve(&warm)?,
        };
        if !report.converged() {
            warn!(status = ?report.status, residual = report.residual_norm, "jump optimization did not converge");
        }

        for s in 0..schedule.num_segments() {
            let step = report.values.scalar(Key::time_step(s))?;
            if step <= 0.0 {
                return Err(PlannerError::InvalidConfig(format!("segment {s} collapsed to a time step of {step}")));
            }
        }
        Ok(OptimizationResult { report, schedule: schedule.clone() })
    }

    /// Optimize using a simulation as warm start and its phases as schedule
    pub fn optimize_simulation(&self, output: &SimulationOutput, controls: &JumpControls) -> Result<OptimizationResult> {
        if output.step_phases.is_empty() {
            return Err(PlannerError::EmptyTrajectory);
        }
        let schedule = output.schedule()?;
        self.optimize(&schedule, controls, &output.values, output.dt)
    }
}
