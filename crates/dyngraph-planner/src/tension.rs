//! One-step tension distribution
//!
//! Each call solves a single transition k → k+1 of the cable robot: the
//! current state, semi-implicit Euler to the desired next pose, and the
//! cable wrenches and dynamics at k with zero-tension priors. When only the
//! cable lengths and speeds are measured, a forward-kinematics solve first
//! recovers the end-effector pose and twist.

use nalgebra::{DVector, Vector3};
use tracing::{debug, warn};

use dyngraph_core::cdpr::{
    cdpr_collocation_terms, cdpr_step_terms, CableLengthTerm, CableSpeedTerm, CdprParams, EE_ID,
};
use dyngraph_core::graph::{ConstraintSystem, Key, PriorTerm, SolveReport, TermSet, Values, WeightModel};
use dyngraph_core::math::planar;

use crate::config::TensionConfig;
use crate::error::PlannerError;
use crate::Result;

/// What is known about the robot at the current step
#[derive(Debug, Clone, PartialEq)]
pub enum CurrentState {
    /// End-effector pose `[θ, x, z]` and twist `[ω, vx, vz]`
    Known { pose: Vector3<f64>, twist: Vector3<f64> },
    /// Cable lengths [m] and speeds [m/s]
    Measured { lengths: DVector<f64>, speeds: DVector<f64> },
}

/// Output of one control step
#[derive(Debug, Clone)]
pub struct TensionCommand {
    /// Cable tensions [N]
    pub tensions: DVector<f64>,
    /// Wrench of each cable on the end effector
    pub wrenches: Vec<Vector3<f64>>,
    /// Current pose, measured or given
    pub pose: Vector3<f64>,
    /// Current twist, measured or given
    pub twist: Vector3<f64>,
    /// Twist acceleration the tensions produce
    pub accel: Vector3<f64>,
    /// Pose reached at the next step
    pub next_pose: Vector3<f64>,
    pub report: SolveReport,
}

/// Stateless per-step tension controller over a desired pose sequence
#[derive(Debug, Clone)]
pub struct CdprTensionController {
    cdpr: CdprParams,
    desired: Vec<Vector3<f64>>,
    config: TensionConfig,
}

impl CdprTensionController {
    pub fn new(cdpr: CdprParams, desired: Vec<Vector3<f64>>, config: TensionConfig) -> Result<Self> {
        if desired.is_empty() {
            return Err(PlannerError::EmptyTrajectory);
        }
        config.validate()?;
        Ok(Self { cdpr, desired, config })
    }

    /// Desired pose at step `k`, clamped to the last entry
    pub fn desired(&self, k: usize) -> Vector3<f64> {
        self.desired[k.min(self.desired.len() - 1)]
    }

    /// Tensions that carry the robot from `state` at step `k` to the desired
    /// pose at `k + 1`
    pub fn update(&self, state: &CurrentState, k: usize) -> Result<TensionCommand> {
        let (pose, twist) = match state {
            CurrentState::Known { pose, twist } => (*pose, *twist),
            CurrentState::Measured { lengths, speeds } => self.forward_kinematics(lengths, speeds, k)?,
        };
        let goal = self.desired(k + 1);
        let cdpr = &self.cdpr;

        let mut system = ConstraintSystem::new(self.config.solver.clone());
        let mut current = TermSet::new();
        current.push(PriorTerm::new(Key::pose(EE_ID, k), vector(&pose)), WeightModel::Hard);
        current.push(PriorTerm::new(Key::twist(EE_ID, k), vector(&twist)), WeightModel::Hard);
        system.add_set("current", current);
        system.add_set("dynamics", cdpr_step_terms(cdpr, k));
        system.add_set("collocation", cdpr_collocation_terms(k, self.config.dt));

        let mut goal_set = TermSet::new();
        goal_set.push(PriorTerm::new(Key::pose(EE_ID, k + 1), vector(&goal)), WeightModel::Hard);
        system.add_set("goal", goal_set);

        let mut tensions = TermSet::new();
        for i in 0..cdpr.num_cables() {
            tensions.push(PriorTerm::scalar(Key::torque(i, k), 0.0), WeightModel::precision(self.config.control_precision));
        }
        system.add_set("tensions", tensions);
        system.free_all_referenced();

        let initial = self.initial_guess(&pose, &twist, &goal, k)?;
        let report = system.solve(&initial)?;
        if !report.converged() {
            warn!(k, status = ?report.status, "tension distribution did not converge");
        }

        let values = &report.values;
        let mut t = DVector::zeros(cdpr.num_cables());
        let mut wrenches = Vec::with_capacity(cdpr.num_cables());
        for i in 0..cdpr.num_cables() {
            t[i] = values.scalar(Key::torque(i, k))?;
            wrenches.push(values.vector3(Key::wrench(i, k))?);
        }
        let accel = values.vector3(Key::twist_accel(EE_ID, k))?;
        let next_pose = values.vector3(Key::pose(EE_ID, k + 1))?;
        debug!(k, tensions = ?t.as_slice(), "tension command");

        Ok(TensionCommand { tensions: t, wrenches, pose, twist, accel, next_pose, report })
    }

    /// Pose and twist that best explain measured cable lengths and speeds
    ///
    /// Starts from the frame center at rest. A solve that does not converge
    /// is an error rather than a best guess.
    pub fn forward_kinematics(
        &self,
        lengths: &DVector<f64>,
        speeds: &DVector<f64>,
        k: usize,
    ) -> Result<(Vector3<f64>, Vector3<f64>)> {
        let cdpr = &self.cdpr;
        let n = cdpr.num_cables();
        if lengths.len() != n || speeds.len() != n {
            return Err(PlannerError::InvalidConfig(format!(
                "expected {n} cable measurements, got {} lengths and {} speeds",
                lengths.len(),
                speeds.len()
            )));
        }

        let measured = WeightModel::precision(self.config.measurement_precision);
        let mut kinematics = TermSet::new();
        let mut priors = TermSet::new();
        for i in 0..n {
            kinematics.push(CableLengthTerm::new(cdpr, i, k), WeightModel::Hard);
            kinematics.push(CableSpeedTerm::new(cdpr, i, k), WeightModel::Hard);
            priors.push(PriorTerm::scalar(Key::joint_angle(i, k), lengths[i]), measured.clone());
            priors.push(PriorTerm::scalar(Key::joint_vel(i, k), speeds[i]), measured.clone());
        }
        let mut system = ConstraintSystem::new(self.config.solver.clone());
        system.add_set("kinematics", kinematics);
        system.add_set("measurements", priors);
        system.free_all_referenced();

        let mut initial = Values::new();
        initial.set_vector3(Key::pose(EE_ID, k), planar(0.0, &cdpr.frame_center()))?;
        initial.set_vector3(Key::twist(EE_ID, k), Vector3::zeros())?;
        for i in 0..n {
            initial.set_scalar(Key::joint_angle(i, k), lengths[i])?;
            initial.set_scalar(Key::joint_vel(i, k), speeds[i])?;
        }

        let report = system.solve(&initial)?;
        if !report.converged() {
            warn!(k, status = ?report.status, "cable forward kinematics did not converge");
        }
        let values = report.into_values()?;
        let pose = values.vector3(Key::pose(EE_ID, k))?;
        let twist = values.vector3(Key::twist(EE_ID, k))?;
        Ok((pose, twist))
    }

    fn initial_guess(&self, pose: &Vector3<f64>, twist: &Vector3<f64>, goal: &Vector3<f64>, k: usize) -> Result<Values> {
        let cdpr = &self.cdpr;
        let dt = self.config.dt;
        let twist_next = (goal - pose) / dt;
        let accel = (twist_next - twist) / dt;

        let mut values = Values::new();
        values.set_vector3(Key::pose(EE_ID, k), *pose)?;
        values.set_vector3(Key::twist(EE_ID, k), *twist)?;
        values.set_vector3(Key::twist_accel(EE_ID, k), accel)?;
        values.set_vector3(Key::pose(EE_ID, k + 1), *goal)?;
        values.set_vector3(Key::twist(EE_ID, k + 1), twist_next)?;

        let lengths = cdpr.cable_lengths(pose);
        let speeds = cdpr.cable_speeds(pose, twist);
        let tensions = cdpr.distribute_tensions(pose, &cdpr.required_wrench(&accel));
        let units = cdpr.wrench_matrix(pose);
        for i in 0..cdpr.num_cables() {
            values.set_scalar(Key::joint_angle(i, k), lengths[i])?;
            values.set_scalar(Key::joint_vel(i, k), speeds[i])?;
            values.set_scalar(Key::torque(i, k), tensions[i])?;
            values.set(Key::wrench(i, k), units.column(i) * tensions[i])?;
        }
        Ok(values)
    }
}

fn vector(v: &Vector3<f64>) -> DVector<f64> {
    DVector::from_column_slice(v.as_slice())
}
