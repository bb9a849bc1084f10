//! Cable robot terms
//!
//! Kinematics, cable wrench and end-effector dynamics, each with analytic
//! Jacobians, plus the semi-implicit Euler collocation between steps.
//! With `P = I − u uᵀ` the derivatives of the cable direction are
//!
//! ```text
//! ∂u/∂p = −P / l,     ∂u/∂θ = −P perp(R a) / l
//! ```

use nalgebra::{DMatrix, DVector, Matrix2, Matrix2x3, Vector2, Vector3};

use super::{CdprParams, EE_ID};
use crate::graph::{Key, Term, TermSet, WeightModel};
use crate::math::{cross2, linear, perp, rot2};

fn vec3(v: &DVector<f64>) -> Vector3<f64> {
    Vector3::new(v[0], v[1], v[2])
}

fn row(values: &[f64]) -> DMatrix<f64> {
    DMatrix::from_row_slice(1, values.len(), values)
}

/// Cable quantities shared by the terms of cable i
#[derive(Debug, Clone)]
struct Cable {
    frame_anchor: Vector2<f64>,
    ee_anchor: Vector2<f64>,
}

struct CableState {
    length: f64,
    u: Vector2<f64>,
    /// R a
    offset: Vector2<f64>,
    /// I − u uᵀ
    projector: Matrix2<f64>,
}

impl Cable {
    fn new(params: &CdprParams, i: usize) -> Self {
        Self { frame_anchor: params.frame_anchors[i], ee_anchor: params.ee_anchors[i] }
    }

    fn state(&self, pose: &Vector3<f64>) -> CableState {
        let offset = rot2(pose.x) * self.ee_anchor;
        let d = self.frame_anchor - linear(pose) - offset;
        let length = d.norm();
        let u = d / length;
        CableState { length, u, offset, projector: Matrix2::identity() - u * u.transpose() }
    }
}

impl CableState {
    /// `∂u/∂[θ, x, z]` as a 2×3 block
    fn du_dpose(&self) -> Matrix2x3<f64> {
        let dtheta = -(self.projector * perp(&self.offset)) / self.length;
        let dp = -self.projector / self.length;
        Matrix2x3::new(dtheta.x, dp[(0, 0)], dp[(0, 1)], dtheta.y, dp[(1, 0)], dp[(1, 1)])
    }
}

/// `l_i − |b_i − p − R a_i|`
#[derive(Debug, Clone)]
pub struct CableLengthTerm {
    keys: [Key; 2],
    cable: Cable,
}

impl CableLengthTerm {
    pub fn new(params: &CdprParams, i: usize, k: usize) -> Self {
        Self { keys: [Key::pose(EE_ID, k), Key::joint_angle(i, k)], cable: Cable::new(params, i) }
    }
}

impl Term for CableLengthTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        1
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        let c = self.cable.state(&vec3(x[0]));
        DVector::from_element(1, x[1][0] - c.length)
    }

    fn jacobians(&self, x: &[&DVector<f64>]) -> Vec<DMatrix<f64>> {
        let c = self.cable.state(&vec3(x[0]));
        // ∂l/∂p = −u, ∂l/∂θ = −u·perp(Ra)
        vec![row(&[c.u.dot(&perp(&c.offset)), c.u.x, c.u.y]), row(&[1.0])]
    }
}

/// `l̇_i + u_i · (v + ω × R a_i)`
#[derive(Debug, Clone)]
pub struct CableSpeedTerm {
    keys: [Key; 3],
    cable: Cable,
}

impl CableSpeedTerm {
    pub fn new(params: &CdprParams, i: usize, k: usize) -> Self {
        Self {
            keys: [Key::pose(EE_ID, k), Key::twist(EE_ID, k), Key::joint_vel(i, k)],
            cable: Cable::new(params, i),
        }
    }
}

impl Term for CableSpeedTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        1
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        let twist = vec3(x[1]);
        let c = self.cable.state(&vec3(x[0]));
        let s = linear(&twist) + perp(&c.offset) * twist.x;
        DVector::from_element(1, x[2][0] + c.u.dot(&s))
    }

    fn jacobians(&self, x: &[&DVector<f64>]) -> Vec<DMatrix<f64>> {
        let twist = vec3(x[1]);
        let c = self.cable.state(&vec3(x[0]));
        let perp_offset = perp(&c.offset);
        let s = linear(&twist) + perp_offset * twist.x;

        // u·s through u, plus u·∂s/∂θ with ∂s/∂θ = −ω R a
        let du = c.du_dpose();
        let through_u = s.transpose() * du;
        let d_pose = [through_u[0] - twist.x * c.u.dot(&c.offset), through_u[1], through_u[2]];

        vec![row(&d_pose), row(&[c.u.dot(&perp_offset), c.u.x, c.u.y]), row(&[1.0])]
    }
}

/// `W_i − t_i [(R a_i) × u_i, u_i]`
#[derive(Debug, Clone)]
pub struct CableWrenchTerm {
    keys: [Key; 3],
    cable: Cable,
}

impl CableWrenchTerm {
    pub fn new(params: &CdprParams, i: usize, k: usize) -> Self {
        Self {
            keys: [Key::pose(EE_ID, k), Key::torque(i, k), Key::wrench(i, k)],
            cable: Cable::new(params, i),
        }
    }
}

impl Term for CableWrenchTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        3
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        let c = self.cable.state(&vec3(x[0]));
        let t = x[1][0];
        let w = vec3(x[2]);
        let unit = Vector3::new(cross2(&c.offset, &c.u), c.u.x, c.u.y);
        DVector::from_column_slice((w - unit * t).as_slice())
    }

    fn jacobians(&self, x: &[&DVector<f64>]) -> Vec<DMatrix<f64>> {
        let c = self.cable.state(&vec3(x[0]));
        let t = x[1][0];
        let du = c.du_dpose();
        let perp_offset = perp(&c.offset);

        // (Ra) × u = perp(Ra)·u
        let moment_through_u = perp_offset.transpose() * du;
        let d_moment_dtheta = moment_through_u[0] - c.offset.dot(&c.u);

        let mut d_pose = DMatrix::zeros(3, 3);
        d_pose[(0, 0)] = -t * d_moment_dtheta;
        d_pose[(0, 1)] = -t * moment_through_u[1];
        d_pose[(0, 2)] = -t * moment_through_u[2];
        for r in 0..2 {
            for col in 0..3 {
                d_pose[(r + 1, col)] = -t * du[(r, col)];
            }
        }
        let d_tension = DMatrix::from_column_slice(3, 1, &[-cross2(&c.offset, &c.u), -c.u.x, -c.u.y]);
        vec![d_pose, d_tension, DMatrix::identity(3, 3)]
    }
}

/// `[I α, m a] − Σ W_i − [0, m g]`
#[derive(Debug, Clone)]
pub struct CdprDynamicsTerm {
    keys: Vec<Key>,
    mass: f64,
    inertia: f64,
    gravity: Vector2<f64>,
}

impl CdprDynamicsTerm {
    pub fn new(params: &CdprParams, k: usize) -> Self {
        let mut keys = vec![Key::twist_accel(EE_ID, k)];
        keys.extend((0..params.num_cables()).map(|i| Key::wrench(i, k)));
        Self { keys, mass: params.mass, inertia: params.inertia, gravity: params.gravity }
    }
}

impl Term for CdprDynamicsTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        3
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        let a = vec3(x[0]);
        let f = (linear(&a) - self.gravity) * self.mass;
        let mut r = Vector3::new(self.inertia * a.x, f.x, f.y);
        for w in &x[1..] {
            r -= vec3(w);
        }
        DVector::from_column_slice(r.as_slice())
    }

    fn jacobians(&self, x: &[&DVector<f64>]) -> Vec<DMatrix<f64>> {
        let mut jac = vec![DMatrix::from_diagonal(&DVector::from_vec(vec![self.inertia, self.mass, self.mass]))];
        jac.extend(x[1..].iter().map(|_| -DMatrix::<f64>::identity(3, 3)));
        jac
    }
}

/// `x_{k+1} − x_k − dt·ẋ_{k+1}` between two planar quantities
///
/// With pose/twist this is the position half of semi-implicit Euler; with
/// twist/accel keyed at k it is the velocity half.
#[derive(Debug, Clone)]
pub struct EulerCollocationTerm {
    keys: [Key; 3],
    dt: f64,
}

impl EulerCollocationTerm {
    /// `pose_{k+1} = pose_k + dt·twist_{k+1}`
    pub fn pose(k: usize, dt: f64) -> Self {
        Self { keys: [Key::pose(EE_ID, k), Key::pose(EE_ID, k + 1), Key::twist(EE_ID, k + 1)], dt }
    }

    /// `twist_{k+1} = twist_k + dt·accel_k`
    pub fn twist(k: usize, dt: f64) -> Self {
        Self { keys: [Key::twist(EE_ID, k), Key::twist(EE_ID, k + 1), Key::twist_accel(EE_ID, k)], dt }
    }
}

impl Term for EulerCollocationTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        3
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        x[1] - x[0] - x[2] * self.dt
    }

    fn jacobians(&self, _x: &[&DVector<f64>]) -> Vec<DMatrix<f64>> {
        let eye = DMatrix::<f64>::identity(3, 3);
        vec![-eye.clone(), eye.clone(), -eye * self.dt]
    }
}

/// Kinematics, wrench and dynamics terms of step k
pub fn cdpr_step_terms(params: &CdprParams, k: usize) -> TermSet {
    let mut set = TermSet::new();
    for i in 0..params.num_cables() {
        set.push(CableLengthTerm::new(params, i, k), WeightModel::Hard);
        set.push(CableSpeedTerm::new(params, i, k), WeightModel::Hard);
        set.push(CableWrenchTerm::new(params, i, k), WeightModel::Hard);
    }
    set.push(CdprDynamicsTerm::new(params, k), WeightModel::Hard);
    set
}

/// Wrench and dynamics terms of step k, without the cable kinematics
pub fn cdpr_wrench_terms(params: &CdprParams, k: usize) -> TermSet {
    let mut set = TermSet::new();
    for i in 0..params.num_cables() {
        set.push(CableWrenchTerm::new(params, i, k), WeightModel::Hard);
    }
    set.push(CdprDynamicsTerm::new(params, k), WeightModel::Hard);
    set
}

/// Semi-implicit Euler collocation from k to k+1
pub fn cdpr_collocation_terms(k: usize, dt: f64) -> TermSet {
    let mut set = TermSet::new();
    set.push(EulerCollocationTerm::pose(k, dt), WeightModel::Hard);
    set.push(EulerCollocationTerm::twist(k, dt), WeightModel::Hard);
    set
}
