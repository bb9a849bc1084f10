//! Planar multibody terms
//!
//! Per moving link, the Newton-Euler balance about the center of mass
//!
//! ```text
//! I α − Σ s_j (m_j + r_j × f_j) = 0
//! m a − Σ s_j f_j − m g      = 0
//! ```
//!
//! where `W_j = [m_j, f_j]` is the wrench joint j exerts on its child at the
//! joint point, `s_j = +1` on the child and `−1` on the parent, and `r_j` is
//! the world-frame offset from the COM to the joint point. Per joint, the
//! relative angle, rate and acceleration and the coincidence of the joint
//! point seen from both sides. Ground sides are constant and carry no keys.

use nalgebra::{DVector, Vector2, Vector3};

use super::{Joint, RobotModel};
use crate::graph::{Key, Term, TermSet, WeightModel};
use crate::math::{angular, cross2, linear, point_acceleration, point_position, point_velocity, rot2, wrap_angle};
use crate::simulation::Phase;

fn vec3(v: &DVector<f64>) -> Vector3<f64> {
    Vector3::new(v[0], v[1], v[2])
}

/// `[pose, twist, accel]` of the two sides of a joint, zero for the ground
struct Sides {
    parent: [Vector3<f64>; 3],
    child: [Vector3<f64>; 3],
    next: usize,
}

/// Where each side's keys sit in a joint term's key list
#[derive(Debug, Clone)]
struct JointLayout {
    parent_moving: bool,
    child_moving: bool,
    /// Number of per-side quantities: 1 pose, 2 pose+twist, 3 pose+twist+accel
    depth: usize,
}

impl JointLayout {
    fn new(robot: &RobotModel, joint: &Joint, depth: usize) -> Self {
        Self {
            parent_moving: !robot.is_fixed(joint.parent),
            child_moving: !robot.is_fixed(joint.child),
            depth,
        }
    }

    fn keys(&self, joint: &Joint, k: usize) -> Vec<Key> {
        let side = |link: usize| {
            [Key::pose(link, k), Key::twist(link, k), Key::twist_accel(link, k)][..self.depth].to_vec()
        };
        let mut keys = Vec::new();
        if self.parent_moving {
            keys.extend(side(joint.parent));
        }
        if self.child_moving {
            keys.extend(side(joint.child));
        }
        keys
    }

    fn unpack(&self, x: &[&DVector<f64>]) -> Sides {
        let mut sides = Sides { parent: [Vector3::zeros(); 3], child: [Vector3::zeros(); 3], next: 0 };
        if self.parent_moving {
            for d in 0..self.depth {
                sides.parent[d] = vec3(x[sides.next]);
                sides.next += 1;
            }
        }
        if self.child_moving {
            for d in 0..self.depth {
                sides.child[d] = vec3(x[sides.next]);
                sides.next += 1;
            }
        }
        sides
    }
}

/// Newton-Euler balance of one link at step k
#[derive(Debug, Clone)]
pub struct NewtonEulerTerm {
    keys: Vec<Key>,
    mass: f64,
    inertia: f64,
    gravity: Vector2<f64>,
    /// `(s_j, anchor in the link frame)` per attached joint, in key order
    attachments: Vec<(f64, Vector2<f64>)>,
}

impl NewtonEulerTerm {
    pub fn new(robot: &RobotModel, link: usize, phase: Phase, k: usize) -> Self {
        let body = robot.link(link);
        let mut keys = vec![Key::pose(link, k), Key::twist_accel(link, k)];
        let mut attachments = Vec::new();
        for j in robot.joints_of(link, phase) {
            let joint = robot.joint(j);
            keys.push(Key::wrench(j, k));
            attachments.push((joint.sign(link), joint.anchor(link)));
        }
        Self { keys, mass: body.mass, inertia: body.inertia, gravity: robot.gravity, attachments }
    }
}

impl Term for NewtonEulerTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        3
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        let pose = vec3(x[0]);
        let accel = vec3(x[1]);
        let rotation = rot2(pose.x);

        let mut moment = self.inertia * angular(&accel);
        let mut force = self.mass * (linear(&accel) - self.gravity);
        for (i, (sign, anchor)) in self.attachments.iter().enumerate() {
            let wrench = vec3(x[2 + i]);
            let f = linear(&wrench);
            moment -= sign * (angular(&wrench) + cross2(&(rotation * anchor), &f));
            force -= f * *sign;
        }
        DVector::from_vec(vec![moment, force.x, force.y])
    }
}

/// Joint acceleration constraint
///
/// ```text
/// α_c − α_p − a_j = 0
/// a_p + α_p × r_p − ω_p² r_p − (a_c + α_c × r_c − ω_c² r_c) = 0
/// ```
#[derive(Debug, Clone)]
pub struct JointAccelTerm {
    keys: Vec<Key>,
    layout: JointLayout,
    parent_anchor: Vector2<f64>,
    child_anchor: Vector2<f64>,
}

impl JointAccelTerm {
    pub fn new(robot: &RobotModel, j: usize, k: usize) -> Self {
        let joint = robot.joint(j);
        let layout = JointLayout::new(robot, joint, 3);
        let mut keys = layout.keys(joint, k);
        keys.push(Key::joint_accel(j, k));
        Self { keys, layout, parent_anchor: joint.parent_anchor, child_anchor: joint.child_anchor }
    }
}

impl Term for JointAccelTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        3
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        let s = self.layout.unpack(x);
        let a_j = x[s.next][0];
        let [pose_p, twist_p, accel_p] = s.parent;
        let [pose_c, twist_c, accel_c] = s.child;

        let rel = accel_c.x - accel_p.x - a_j;
        let point = point_acceleration(&pose_p, &twist_p, &accel_p, &self.parent_anchor)
            - point_acceleration(&pose_c, &twist_c, &accel_c, &self.child_anchor);
        DVector::from_vec(vec![rel, point.x, point.y])
    }
}

/// `W_j.moment − τ_j`
#[derive(Debug, Clone)]
pub struct TorqueWrenchTerm {
    keys: [Key; 2],
}

impl TorqueWrenchTerm {
    pub fn new(j: usize, k: usize) -> Self {
        Self { keys: [Key::wrench(j, k), Key::torque(j, k)] }
    }
}

impl Term for TorqueWrenchTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        1
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        DVector::from_element(1, x[0][0] - x[1][0])
    }

    fn jacobians(&self, _x: &[&DVector<f64>]) -> Vec<nalgebra::DMatrix<f64>> {
        vec![
            nalgebra::DMatrix::from_row_slice(1, 3, &[1.0, 0.0, 0.0]),
            nalgebra::DMatrix::from_element(1, 1, -1.0),
        ]
    }
}

/// Joint pose constraint: relative angle and joint point coincidence
#[derive(Debug, Clone)]
pub struct KinematicPoseTerm {
    keys: Vec<Key>,
    layout: JointLayout,
    parent_anchor: Vector2<f64>,
    child_anchor: Vector2<f64>,
    rest_angle: f64,
}

impl KinematicPoseTerm {
    pub fn new(robot: &RobotModel, j: usize, k: usize) -> Self {
        let joint = robot.joint(j);
        let layout = JointLayout::new(robot, joint, 1);
        let mut keys = layout.keys(joint, k);
        keys.push(Key::joint_angle(j, k));
        Self {
            keys,
            layout,
            parent_anchor: joint.parent_anchor,
            child_anchor: joint.child_anchor,
            rest_angle: joint.rest_angle,
        }
    }
}

impl Term for KinematicPoseTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        3
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        let s = self.layout.unpack(x);
        let q = x[s.next][0];
        let (pose_p, pose_c) = (s.parent[0], s.child[0]);

        let rel = wrap_angle(pose_c.x - pose_p.x - q - self.rest_angle);
        let point = point_position(&pose_p, &self.parent_anchor) - point_position(&pose_c, &self.child_anchor);
        DVector::from_vec(vec![rel, point.x, point.y])
    }
}

/// Joint twist constraint: relative rate and joint point velocity coincidence
#[derive(Debug, Clone)]
pub struct KinematicTwistTerm {
    keys: Vec<Key>,
    layout: JointLayout,
    parent_anchor: Vector2<f64>,
    child_anchor: Vector2<f64>,
}

impl KinematicTwistTerm {
    pub fn new(robot: &RobotModel, j: usize, k: usize) -> Self {
        let joint = robot.joint(j);
        let layout = JointLayout::new(robot, joint, 2);
        let mut keys = layout.keys(joint, k);
        keys.push(Key::joint_vel(j, k));
        Self { keys, layout, parent_anchor: joint.parent_anchor, child_anchor: joint.child_anchor }
    }
}

impl Term for KinematicTwistTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        3
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        let s = self.layout.unpack(x);
        let v = x[s.next][0];
        let [pose_p, twist_p, _] = s.parent;
        let [pose_c, twist_c, _] = s.child;

        let rel = twist_c.x - twist_p.x - v;
        let point = point_velocity(&pose_p, &twist_p, &self.parent_anchor)
            - point_velocity(&pose_c, &twist_c, &self.child_anchor);
        DVector::from_vec(vec![rel, point.x, point.y])
    }
}

/// Newton-Euler, joint acceleration and torque–wrench terms of step k
pub fn dynamics_terms(robot: &RobotModel, phase: Phase, k: usize) -> TermSet {
    let mut set = TermSet::new();
    for link in robot.moving_links() {
        set.push(NewtonEulerTerm::new(robot, link, phase, k), WeightModel::Hard);
    }
    for j in robot.active_joints(phase) {
        set.push(JointAccelTerm::new(robot, j, k), WeightModel::Hard);
        set.push(TorqueWrenchTerm::new(j, k), WeightModel::Hard);
    }
    set
}

/// Pose and twist kinematics terms of step k
pub fn kinematics_terms(robot: &RobotModel, phase: Phase, k: usize) -> TermSet {
    let mut set = TermSet::new();
    for j in robot.active_joints(phase) {
        set.push(KinematicPoseTerm::new(robot, j, k), WeightModel::Hard);
        set.push(KinematicTwistTerm::new(robot, j, k), WeightModel::Hard);
    }
    set
}
