//! Hybrid forward simulator
//!
//! Each step k (phase φ):
//! 1. Actuation: mass flow and torque of every actuator at t_k
//! 2. Rigid body: forward dynamics of step k
//! 3. Events: the transition predicate picks the phase of step k+1
//! 4. Integration (explicit Euler) of joints, pressures, time and, in flight,
//!    the base state into step k+1

use tracing::{debug, info, warn};

use super::{JumpControls, Phase, PhaseSchedule, PhaseTransition, SimConfig, Transition};
use crate::actuation::{solve_mass_flow, source_pressure_rate};
use crate::dynamics::{forward_dynamics, JumpingRobot};
use crate::error::{DynamicsError, Result};
use crate::graph::{Key, Values};

/// Trajectory produced by a simulation
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    /// Every quantity of steps `0..step_phases.len()`
    pub values: Values,
    /// Phase of each simulated step
    pub step_phases: Vec<Phase>,
    /// Time step [s]
    pub dt: f64,
}

impl SimulationOutput {
    pub fn num_steps(&self) -> usize {
        self.step_phases.len()
    }

    pub fn schedule(&self) -> Result<PhaseSchedule> {
        PhaseSchedule::from_step_phases(&self.step_phases)
    }
}

/// Step-0 values: joint angles, zero velocities, atmospheric actuators, a full
/// source tank, zero time and the valve timing
pub fn initial_values(robot: &JumpingRobot, controls: &JumpControls, joint_angles: &[f64]) -> Result<Values> {
    let mut values = Values::new();
    for (j, q) in joint_angles.iter().enumerate().take(robot.robot.num_joints()) {
        values.set_scalar(Key::joint_angle(j, 0), *q)?;
        values.set_scalar(Key::joint_vel(j, 0), 0.0)?;
    }
    for a in 0..robot.actuators.len() {
        values.set_scalar(Key::pressure(a, 0), robot.pneumatics.atmospheric_pressure)?;
        values.set_scalar(Key::valve_open_time(a), controls.valve_open.get(a).copied().unwrap_or(0.0))?;
        values.set_scalar(Key::valve_close_time(a), controls.valve_close.get(a).copied().unwrap_or(0.0))?;
    }
    values.set_scalar(Key::source_pressure(0), controls.source_pressure)?;
    values.set_scalar(Key::time(0), 0.0)?;
    Ok(values)
}

/// Simulator of the jumping robot
#[derive(Debug, Clone)]
pub struct Simulator<'a> {
    robot: &'a JumpingRobot,
    config: SimConfig,
}

impl<'a> Simulator<'a> {
    pub fn new(robot: &'a JumpingRobot, config: SimConfig) -> Self {
        Self { robot, config }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Run from `init` (see [`initial_values`]) until the predicate stops or
    /// `max_steps` is reached
    ///
    /// On failure the returned [`DynamicsError::SimulationAborted`] carries
    /// the completed steps. Its values may also hold entries the failed step
    /// wrote before failing.
    pub fn simulate(
        &self,
        init: &Values,
        initial_phase: Phase,
        transition: &mut dyn PhaseTransition,
    ) -> Result<SimulationOutput> {
        let mut values = init.clone();
        let mut step_phases = Vec::new();
        let mut phase = initial_phase;

        for k in 0..self.config.max_steps {
            let next = self.step(k, phase, &mut values).and_then(|_| {
                transition.next(&self.robot.robot, k, phase, &values)
            });
            let next = match next {
                Ok(next) => next,
                Err(source) => return Err(self.abort(k.checked_sub(1), source, values, step_phases)),
            };
            step_phases.push(phase);

            let next_phase = match next {
                Transition::Stop => break,
                Transition::Stay => phase,
                Transition::Switch(p) => {
                    debug!(k, from = ?phase, to = ?p, "phase switch");
                    p
                }
            };
            if k + 1 == self.config.max_steps {
                break;
            }
            if let Err(source) = self.integrate(k, next_phase, &mut values) {
                return Err(self.abort(Some(k), source, values, step_phases));
            }
            phase = next_phase;
        }

        info!(steps = step_phases.len(), final_phase = ?phase, "simulation finished");
        Ok(SimulationOutput { values, step_phases, dt: self.config.dt })
    }

    /// Abort error carrying the steps simulated so far
    fn abort(&self, step: Option<usize>, source: DynamicsError, values: Values, step_phases: Vec<Phase>) -> DynamicsError {
        warn!(step = ?step, error = %source, "simulation aborted");
        let partial = SimulationOutput { values, step_phases, dt: self.config.dt };
        DynamicsError::SimulationAborted { step, source: Box::new(source), partial: Box::new(partial) }
    }

    /// Actuation and forward dynamics of step k
    pub fn step(&self, k: usize, phase: Phase, values: &mut Values) -> Result<()> {
        let robot = &self.robot.robot;
        let params = &self.robot.pneumatics;
        let t = values.scalar(Key::time(k))?;
        let source = values.scalar(Key::source_pressure(k))?;

        let active = robot.active_joints(phase);
        for &j in &active {
            values.set_scalar(Key::torque(j, k), 0.0)?;
        }
        for (a, actuator) in self.robot.actuators.iter().enumerate() {
            let pressure = values.scalar(Key::pressure(a, k))?;
            let flow = solve_mass_flow(
                values.scalar(Key::valve_open_time(a))?,
                values.scalar(Key::valve_close_time(a))?,
                pressure,
                source,
                t,
                params,
                &self.config.mass_flow,
            )?;
            if !flow.converged {
                warn!(k, actuator = a, iterations = flow.iterations, "mass flow not converged, using last iterate");
            }
            values.set_scalar(Key::mass_flow(a, k), flow.rate)?;

            let j = actuator.joint;
            if active.contains(&j) {
                let q = values.scalar(Key::joint_angle(j, k))?;
                let v = values.scalar(Key::joint_vel(j, k))?;
                let torque = actuator.torque(pressure, q, v, params.atmospheric_pressure);
                values.set_scalar(Key::torque(j, k), torque)?;
            }
        }

        let solved = forward_dynamics(robot, phase, k, values, &self.config.solver)?;
        values.extend_from(&solved);
        debug!(k, t, ?phase, "step");
        Ok(())
    }

    /// Explicit Euler from step k into step k+1
    fn integrate(&self, k: usize, next_phase: Phase, values: &mut Values) -> Result<()> {
        let robot = &self.robot.robot;
        let params = &self.robot.pneumatics;
        let dt = self.config.dt;

        for j in robot.active_joints(next_phase) {
            let q = values.scalar(Key::joint_angle(j, k))?;
            let v = values.scalar(Key::joint_vel(j, k))?;
            let a = values.scalar(Key::joint_accel(j, k))?;
            values.set_scalar(Key::joint_angle(j, k + 1), q + dt * v)?;
            values.set_scalar(Key::joint_vel(j, k + 1), v + dt * a)?;
        }

        let mut mdots = Vec::with_capacity(self.robot.actuators.len());
        for (a, actuator) in self.robot.actuators.iter().enumerate() {
            let mdot = values.scalar(Key::mass_flow(a, k))?;
            let p = values.scalar(Key::pressure(a, k))?;
            values.set_scalar(Key::pressure(a, k + 1), p + dt * actuator.pressure_rate(mdot, params))?;
            mdots.push(mdot);
        }
        let source = values.scalar(Key::source_pressure(k))?;
        values.set_scalar(Key::source_pressure(k + 1), source + dt * source_pressure_rate(&mdots, params))?;
        let t = values.scalar(Key::time(k))?;
        values.set_scalar(Key::time(k + 1), t + dt)?;

        if next_phase == Phase::Air {
            let base = robot.base;
            let pose = values.vector3(Key::pose(base, k))?;
            let twist = values.vector3(Key::twist(base, k))?;
            let accel = values.vector3(Key::twist_accel(base, k))?;
            values.set_vector3(Key::pose(base, k + 1), pose + twist * dt)?;
            values.set_vector3(Key::twist(base, k + 1), twist + accel * dt)?;
        }
        Ok(())
    }
}
