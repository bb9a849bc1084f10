//! Collocation terms
//!
//! Trapezoidal integration between consecutive steps, with the step length
//! taken from the segment of the later step:
//!
//! ```text
//! x_{k+1} − x_k − dt/2 · c · (ẋ_k + ẋ_{k+1}) = 0
//! ```
//!
//! plus the duration, control and goal terms of the jump optimizer. Each
//! `*_set` function builds one named term set over a [`PhaseSchedule`].

use nalgebra::{DMatrix, DVector};

use dyngraph_core::actuation::{ActuatorTorqueTerm, MassFlowConfig, MassFlowTerm};
use dyngraph_core::dynamics::{dynamics_terms, kinematics_terms, JumpingRobot, RobotModel};
use dyngraph_core::graph::{Key, PriorTerm, Term, TermSet, Values, WeightModel};
use dyngraph_core::simulation::{JumpControls, Phase, PhaseSchedule};

use crate::config::{ApexHeightGoal, ControlMode, DurationMode};

/// `x_{k+1} − x_k − dt/2 · c · (ẋ_k + ẋ_{k+1})`
#[derive(Debug, Clone)]
pub struct TrapezoidalTerm {
    /// `[x_k, x_{k+1}, ẋ_k, ẋ_{k+1}, dt]`
    keys: [Key; 5],
    scale: f64,
}

impl TrapezoidalTerm {
    pub fn new(x0: Key, x1: Key, xdot0: Key, xdot1: Key, dt: Key) -> Self {
        Self::scaled(x0, x1, xdot0, xdot1, dt, 1.0)
    }

    /// Rate `c·ẋ` for a derivative stored in other units
    pub fn scaled(x0: Key, x1: Key, xdot0: Key, xdot1: Key, dt: Key, scale: f64) -> Self {
        Self { keys: [x0, x1, xdot0, xdot1, dt], scale }
    }
}

impl Term for TrapezoidalTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        self.keys[0].dim()
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        let half = 0.5 * x[4][0] * self.scale;
        x[1] - x[0] - (x[2] + x[3]) * half
    }

    fn jacobians(&self, x: &[&DVector<f64>]) -> Vec<DMatrix<f64>> {
        let n = self.dim();
        let eye = DMatrix::<f64>::identity(n, n);
        let half = 0.5 * x[4][0] * self.scale;
        let d_dt = (x[2] + x[3]) * (-0.5 * self.scale);
        vec![-eye.clone(), eye.clone(), &eye * -half, &eye * -half, DMatrix::from_column_slice(n, 1, d_dt.as_slice())]
    }
}

/// Source tank depletion over one step
///
/// `S_{k+1} − S_k + dt/2 · c · (Σ ṁ_k + Σ ṁ_{k+1})` with `c = R T / V_s`.
#[derive(Debug, Clone)]
pub struct SourcePressureTerm {
    /// `[S_k, S_{k+1}, ṁ_k..., ṁ_{k+1}..., dt]`
    keys: Vec<Key>,
    scale: f64,
}

impl SourcePressureTerm {
    pub fn new(k: usize, num_actuators: usize, dt: Key, scale: f64) -> Self {
        let mut keys = vec![Key::source_pressure(k), Key::source_pressure(k + 1)];
        keys.extend((0..num_actuators).map(|a| Key::mass_flow(a, k)));
        keys.extend((0..num_actuators).map(|a| Key::mass_flow(a, k + 1)));
        keys.push(dt);
        Self { keys, scale }
    }

    fn num_flows(&self) -> usize {
        self.keys.len() - 3
    }
}

impl Term for SourcePressureTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        1
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        let flows: f64 = x[2..2 + self.num_flows()].iter().map(|m| m[0]).sum();
        let dt = x[x.len() - 1][0];
        DVector::from_element(1, x[1][0] - x[0][0] + 0.5 * dt * self.scale * flows)
    }

    fn jacobians(&self, x: &[&DVector<f64>]) -> Vec<DMatrix<f64>> {
        let flows: f64 = x[2..2 + self.num_flows()].iter().map(|m| m[0]).sum();
        let dt = x[x.len() - 1][0];
        let mut jac = vec![DMatrix::from_element(1, 1, -1.0), DMatrix::from_element(1, 1, 1.0)];
        jac.extend((0..self.num_flows()).map(|_| DMatrix::from_element(1, 1, 0.5 * dt * self.scale)));
        jac.push(DMatrix::from_element(1, 1, 0.5 * self.scale * flows));
        jac
    }
}

/// `t_{k+1} − t_k − dt`
#[derive(Debug, Clone)]
pub struct TimeTerm {
    keys: [Key; 3],
}

impl TimeTerm {
    pub fn new(k: usize, dt: Key) -> Self {
        Self { keys: [Key::time(k), Key::time(k + 1), dt] }
    }
}

impl Term for TimeTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        1
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        DVector::from_element(1, x[1][0] - x[0][0] - x[2][0])
    }

    fn jacobians(&self, _x: &[&DVector<f64>]) -> Vec<DMatrix<f64>> {
        vec![DMatrix::from_element(1, 1, -1.0), DMatrix::from_element(1, 1, 1.0), DMatrix::from_element(1, 1, -1.0)]
    }
}

/// `PhaseDuration(seg) − n_seg · TimeStep(seg)`
#[derive(Debug, Clone)]
pub struct PhaseDurationTerm {
    keys: [Key; 2],
    steps: f64,
}

impl PhaseDurationTerm {
    pub fn new(segment: usize, steps: usize) -> Self {
        Self { keys: [Key::phase_duration(segment), Key::time_step(segment)], steps: steps as f64 }
    }
}

impl Term for PhaseDurationTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        1
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        DVector::from_element(1, x[0][0] - self.steps * x[1][0])
    }

    fn jacobians(&self, _x: &[&DVector<f64>]) -> Vec<DMatrix<f64>> {
        vec![DMatrix::from_element(1, 1, 1.0), DMatrix::from_element(1, 1, -self.steps)]
    }
}

/// `z_base − h`
#[derive(Debug, Clone)]
pub struct BaseHeightTerm {
    keys: [Key; 1],
    height: f64,
}

impl BaseHeightTerm {
    pub fn new(base: usize, k: usize, height: f64) -> Self {
        Self { keys: [Key::pose(base, k)], height }
    }
}

impl Term for BaseHeightTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        1
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        DVector::from_element(1, x[0][2] - self.height)
    }

    fn jacobians(&self, _x: &[&DVector<f64>]) -> Vec<DMatrix<f64>> {
        vec![DMatrix::from_row_slice(1, 3, &[0.0, 0.0, 1.0])]
    }
}

/// Phase of every step, in order
fn steps(schedule: &PhaseSchedule) -> impl Iterator<Item = (usize, Phase)> + '_ {
    schedule.segments().iter().flat_map(|s| (s.start..s.end()).map(move |k| (k, s.phase)))
}

/// Rigid-body dynamics and joint kinematics of every step
pub fn dynamics_set(robot: &RobotModel, schedule: &PhaseSchedule) -> TermSet {
    let mut set = TermSet::new();
    for (k, phase) in steps(schedule) {
        set.extend(dynamics_terms(robot, phase, k));
        set.extend(kinematics_terms(robot, phase, k));
    }
    set
}

/// Actuator torque and gated mass flow of every step, zero torque on the
/// unactuated active joints
pub fn actuation_set(jr: &JumpingRobot, schedule: &PhaseSchedule, mass_flow: &MassFlowConfig) -> TermSet {
    let robot = &jr.robot;
    let mut set = TermSet::new();
    for (k, phase) in steps(schedule) {
        let active = robot.active_joints(phase);
        for (a, actuator) in jr.actuators.iter().enumerate() {
            if active.contains(&actuator.joint) {
                set.push(ActuatorTorqueTerm::new(a, actuator, k, &jr.pneumatics), WeightModel::Hard);
            }
            set.push(MassFlowTerm::new(a, k, &jr.pneumatics, mass_flow), WeightModel::Hard);
        }
        for j in active.into_iter().filter(|j| jr.actuator_of(*j).is_none()) {
            set.push(PriorTerm::scalar(Key::torque(j, k), 0.0), WeightModel::Hard);
        }
    }
    set
}

/// Trapezoidal collocation between every pair of consecutive steps
pub fn collocation_set(jr: &JumpingRobot, schedule: &PhaseSchedule) -> TermSet {
    let robot = &jr.robot;
    let params = &jr.pneumatics;
    let mut set = TermSet::new();

    for k in 0..schedule.num_steps().saturating_sub(1) {
        let (Some(seg), Some(phase)) = (schedule.segment_of(k + 1), schedule.phase_at(k + 1)) else {
            continue;
        };
        let dt = Key::time_step(seg);

        for j in robot.collocated_joints(phase) {
            set.push(
                TrapezoidalTerm::new(
                    Key::joint_angle(j, k),
                    Key::joint_angle(j, k + 1),
                    Key::joint_vel(j, k),
                    Key::joint_vel(j, k + 1),
                    dt,
                ),
                WeightModel::Hard,
            );
            set.push(
                TrapezoidalTerm::new(
                    Key::joint_vel(j, k),
                    Key::joint_vel(j, k + 1),
                    Key::joint_accel(j, k),
                    Key::joint_accel(j, k + 1),
                    dt,
                ),
                WeightModel::Hard,
            );
        }

        if phase == Phase::Air {
            let b = robot.base;
            set.push(
                TrapezoidalTerm::new(Key::pose(b, k), Key::pose(b, k + 1), Key::twist(b, k), Key::twist(b, k + 1), dt),
                WeightModel::Hard,
            );
            set.push(
                TrapezoidalTerm::new(
                    Key::twist(b, k),
                    Key::twist(b, k + 1),
                    Key::twist_accel(b, k),
                    Key::twist_accel(b, k + 1),
                    dt,
                ),
                WeightModel::Hard,
            );
        }

        for (a, actuator) in jr.actuators.iter().enumerate() {
            set.push(
                TrapezoidalTerm::scaled(
                    Key::pressure(a, k),
                    Key::pressure(a, k + 1),
                    Key::mass_flow(a, k),
                    Key::mass_flow(a, k + 1),
                    dt,
                    params.gas_constant_temperature / actuator.volume,
                ),
                WeightModel::Hard,
            );
        }
        let source_scale = params.gas_constant_temperature / params.source_volume;
        set.push(SourcePressureTerm::new(k, jr.actuators.len(), dt, source_scale), WeightModel::Hard);
        set.push(TimeTerm::new(k, dt), WeightModel::Hard);
    }
    set
}

/// Segment durations and time-step priors
pub fn duration_set(schedule: &PhaseSchedule, mode: DurationMode, dt: f64) -> TermSet {
    let weight = match mode {
        DurationMode::Fixed => WeightModel::Hard,
        DurationMode::Free { prior_sigma } => WeightModel::Sigma(prior_sigma),
    };
    let mut set = TermSet::new();
    for (s, segment) in schedule.segments().iter().enumerate() {
        set.push(PhaseDurationTerm::new(s, segment.len), WeightModel::Hard);
        set.push(PriorTerm::scalar(Key::time_step(s), dt), weight.clone());
    }
    set
}

/// Hard priors on the step-0 state taken from `values`
///
/// Covers the collocated joints, actuator and source pressures, time and,
/// when the first phase is `Air`, the base pose and twist.
pub fn initial_set(jr: &JumpingRobot, schedule: &PhaseSchedule, values: &Values) -> dyngraph_core::Result<TermSet> {
    let robot = &jr.robot;
    let phase = schedule.phase_at(0).unwrap_or(Phase::Ground);
    let mut keys = Vec::new();
    for j in robot.collocated_joints(phase) {
        keys.push(Key::joint_angle(j, 0));
        keys.push(Key::joint_vel(j, 0));
    }
    keys.extend((0..jr.actuators.len()).map(|a| Key::pressure(a, 0)));
    keys.push(Key::source_pressure(0));
    keys.push(Key::time(0));
    if phase == Phase::Air {
        keys.push(Key::pose(robot.base, 0));
        keys.push(Key::twist(robot.base, 0));
    }

    let mut set = TermSet::new();
    for key in keys {
        set.push(PriorTerm::new(key, values.get(key)?.clone()), WeightModel::Hard);
    }
    Ok(set)
}

/// Valve timing priors
pub fn control_set(controls: &JumpControls, mode: ControlMode) -> TermSet {
    let weight = match mode {
        ControlMode::Hard => WeightModel::Hard,
        ControlMode::Soft(sigma) => WeightModel::Sigma(sigma),
    };
    let mut set = TermSet::new();
    for (a, (open, close)) in controls.valve_open.iter().zip(controls.valve_close.iter()).enumerate() {
        set.push(PriorTerm::scalar(Key::valve_open_time(a), *open), weight.clone());
        set.push(PriorTerm::scalar(Key::valve_close_time(a), *close), weight.clone());
    }
    set
}

/// Torso height goal
pub fn goal_set(robot: &RobotModel, schedule: &PhaseSchedule, goal: &ApexHeightGoal) -> TermSet {
    let k = goal.step.unwrap_or(schedule.num_steps().saturating_sub(1));
    let mut set = TermSet::new();
    set.push(BaseHeightTerm::new(robot.base, k, goal.height), WeightModel::Sigma(goal.sigma));
    set
}
