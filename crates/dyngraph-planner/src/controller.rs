//! Full-horizon cable-robot controller
//!
//! Solves the whole trajectory once:
//!
//! ```text
//! minimize    Σ_k ‖t_k − t_mid‖²_R  (+ Σ_k ‖x_k − x*_k‖²_Q when tracking is soft)
//! subject to  x_0, v_0 given
//!             cable kinematics, cable wrenches and dynamics at every step
//!             v_{k+1} = v_k + dt·a_k,  x_{k+1} = x_k + dt·v_{k+1}
//!             x_k = x*_k  (k ≥ 1, when tracking is hard)
//! ```
//!
//! and extracts the local feedback law `t_k = t*_k + K_k (x_k − x*_k)` from
//! the sensitivity of the optimum, `K_k = ∂t_k/∂v_{k+1} · ∂v_{k+1}/∂x_k`.
//! Both factors are taken with the state `(x_k, v_k)` held, so the tensions
//! respond at the planned pose.

use nalgebra::{DMatrix, DVector, Vector3};
use tracing::{debug, info, warn};

use dyngraph_core::cdpr::{cdpr_collocation_terms, cdpr_step_terms, CdprParams, CdprState, EE_ID};
use dyngraph_core::graph::{ConstraintSystem, Key, PriorTerm, SolveReport, TermSet, Values, WeightModel};
use dyngraph_core::math::semi_implicit_euler_inverse;

use crate::config::{IlqrConfig, TrackingMode};
use crate::error::PlannerError;
use crate::Result;

/// Tensions of one step [N]
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSample {
    pub step: usize,
    pub tensions: DVector<f64>,
}

/// Controller over a fixed horizon of desired poses
#[derive(Debug, Clone)]
pub struct CdprIlqrController {
    cdpr: CdprParams,
    desired: Vec<Vector3<f64>>,
    config: IlqrConfig,
    system: ConstraintSystem,
    report: SolveReport,
    /// `K_k` for `k < N − 1`, 4×3 each
    gains: Vec<DMatrix<f64>>,
}

impl CdprIlqrController {
    /// Build and solve the horizon starting at `x0`
    pub fn new(cdpr: CdprParams, x0: CdprState, desired: Vec<Vector3<f64>>, config: IlqrConfig) -> Result<Self> {
        if desired.is_empty() {
            return Err(PlannerError::EmptyTrajectory);
        }
        config.validate()?;

        let system = Self::build(&cdpr, &x0, &desired, &config);
        let initial = Self::initial_guess(&cdpr, &x0, &desired, config.dt)?;
        let report = system.solve(&initial)?;
        if report.converged() {
            info!(steps = desired.len(), iterations = report.iterations, "cdpr horizon solved");
        } else {
            warn!(status = ?report.status, residual = report.residual_norm, "cdpr horizon did not converge");
        }

        let mut controller = Self { cdpr, desired, config, system, report, gains: Vec::new() };
        controller.gains = controller.compute_gains()?;
        Ok(controller)
    }

    fn build(cdpr: &CdprParams, x0: &CdprState, desired: &[Vector3<f64>], config: &IlqrConfig) -> ConstraintSystem {
        let n = desired.len();
        let mut system = ConstraintSystem::new(config.solver.clone());

        let mut initial = TermSet::new();
        initial.push(PriorTerm::new(Key::pose(EE_ID, 0), vector(&x0.pose)), WeightModel::Hard);
        initial.push(PriorTerm::new(Key::twist(EE_ID, 0), vector(&x0.twist)), WeightModel::Hard);
        system.add_set("initial", initial);

        let mut dynamics = TermSet::new();
        let mut collocation = TermSet::new();
        let mut tensions = TermSet::new();
        let mut tracking = TermSet::new();
        let tracking_weight = match &config.tracking {
            TrackingMode::Hard => WeightModel::Hard,
            TrackingMode::Weighted(q) => WeightModel::precisions(q),
        };
        for k in 0..n {
            dynamics.extend(cdpr_step_terms(cdpr, k));
            if k + 1 < n {
                collocation.extend(cdpr_collocation_terms(k, config.dt));
            }
            for i in 0..cdpr.num_cables() {
                tensions.push(
                    PriorTerm::scalar(Key::torque(i, k), cdpr.tension_mid()),
                    WeightModel::precision(config.control_precision),
                );
            }
            // step 0 is pinned by the initial state
            if k > 0 {
                tracking.push(PriorTerm::new(Key::pose(EE_ID, k), vector(&desired[k])), tracking_weight.clone());
            }
        }
        system.add_set("dynamics", dynamics);
        system.add_set("collocation", collocation);
        system.add_set("tensions", tensions);
        system.add_set("tracking", tracking);
        system.free_all_referenced();
        system
    }

    /// Inverse-kinematics guess: poses on the desired path, twists and
    /// accelerations that reproduce it, minimum-norm tensions
    fn initial_guess(cdpr: &CdprParams, x0: &CdprState, desired: &[Vector3<f64>], dt: f64) -> Result<Values> {
        let mut poses = desired.to_vec();
        poses[0] = x0.pose;
        let (twists, mut accels) = semi_implicit_euler_inverse(&poses, &x0.twist, dt);
        // v_{k+1} = v_k + dt·a_k, so a_k is the transition out of step k
        accels.push(Vector3::zeros());

        let mut values = Values::new();
        for (k, pose) in poses.iter().enumerate() {
            values.set_vector3(Key::pose(EE_ID, k), *pose)?;
            values.set_vector3(Key::twist(EE_ID, k), twists[k])?;
            values.set_vector3(Key::twist_accel(EE_ID, k), accels[k])?;

            let lengths = cdpr.cable_lengths(pose);
            let speeds = cdpr.cable_speeds(pose, &twists[k]);
            let tensions = cdpr.distribute_tensions(pose, &cdpr.required_wrench(&accels[k]));
            let units = cdpr.wrench_matrix(pose);
            for i in 0..cdpr.num_cables() {
                values.set_scalar(Key::joint_angle(i, k), lengths[i])?;
                values.set_scalar(Key::joint_vel(i, k), speeds[i])?;
                values.set_scalar(Key::torque(i, k), tensions[i])?;
                values.set(Key::wrench(i, k), units.column(i) * tensions[i])?;
            }
        }
        Ok(values)
    }

    fn compute_gains(&self) -> Result<Vec<DMatrix<f64>>> {
        let values = &self.report.values;
        let tensions = |k: usize| (0..self.cdpr.num_cables()).map(|i| Key::torque(i, k)).collect::<Vec<_>>();

        (0..self.desired.len().saturating_sub(1))
            .map(|k| {
                let (pose, twist, twist_next) = (Key::pose(EE_ID, k), Key::twist(EE_ID, k), Key::twist(EE_ID, k + 1));
                // the state at k is held so only the transition out of k responds
                let v_from_x = self.system.conditional_gain(values, &[twist_next], &[pose, twist])?;
                let t_from_v = self.system.conditional_gain(values, &tensions(k), &[twist_next, pose, twist])?;
                let gain = t_from_v.columns(0, 3) * v_from_x.columns(0, 3);
                debug!(k, norm = gain.norm(), "feedback gain");
                Ok(gain)
            })
            .collect()
    }

    pub fn num_steps(&self) -> usize {
        self.desired.len()
    }

    pub fn config(&self) -> &IlqrConfig {
        &self.config
    }

    /// Planned tensions at step `t`
    pub fn update(&self, t: usize) -> Result<ControlSample> {
        if t >= self.num_steps() {
            return Err(PlannerError::InvalidConfig(format!("step {t} is past the horizon of {}", self.num_steps())));
        }
        let values = &self.report.values;
        let tensions = (0..self.cdpr.num_cables())
            .map(|i| values.scalar(Key::torque(i, t)))
            .collect::<dyngraph_core::Result<Vec<f64>>>()?;
        Ok(ControlSample { step: t, tensions: DVector::from_vec(tensions) })
    }

    /// Planned tensions corrected by the feedback gain of step `t`
    ///
    /// The last step has no gain and returns the planned tensions.
    pub fn update_with_feedback(&self, t: usize, pose: &Vector3<f64>) -> Result<ControlSample> {
        let mut sample = self.update(t)?;
        if let Some(gain) = self.gains.get(t) {
            let planned = self.report.values.vector3(Key::pose(EE_ID, t))?;
            sample.tensions += gain * vector(&(pose - planned));
        }
        Ok(sample)
    }

    /// Full optimized trajectory
    pub fn result(&self) -> &Values {
        &self.report.values
    }

    pub fn report(&self) -> &SolveReport {
        &self.report
    }

    pub fn gains(&self) -> &[DMatrix<f64>] {
        &self.gains
    }

    /// Planned end-effector pose at step `k`
    pub fn pose(&self, k: usize) -> Result<Vector3<f64>> {
        Ok(self.report.values.vector3(Key::pose(EE_ID, k))?)
    }
}

fn vector(v: &Vector3<f64>) -> DVector<f64> {
    DVector::from_column_slice(v.as_slice())
}
