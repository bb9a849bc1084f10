//! Forward kinematics
//!
//! Breadth-first propagation of link poses and twists over the spanning tree
//! of the active joints. Crossing joint j from a known link to an unknown one:
//!
//! ```text
//! φ_c = φ_p + q + rest,     x_j = p_p + R_p a_p,     p_c = x_j − R_c a_c
//! ω_c = ω_p + v,            ẋ_j = v_p + ω_p × R_p a_p, v_c = ẋ_j − ω_c × R_c a_c
//! ```
//!
//! and the same relations solved for the parent when walking child to parent.

use nalgebra::{Vector2, Vector3};

use super::RobotModel;
use crate::error::Result;
use crate::graph::{Key, Values};
use crate::math::{linear, omega_cross, planar, rot2};
use crate::simulation::Phase;

/// Pose and twist of every link; ground entries are zero
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStates {
    pub poses: Vec<Vector3<f64>>,
    pub twists: Vec<Vector3<f64>>,
}

impl LinkStates {
    /// World position of a point given in the frame of `link`
    pub fn point(&self, link: usize, r_local: &Vector2<f64>) -> Vector2<f64> {
        linear(&self.poses[link]) + rot2(self.poses[link].x) * r_local
    }
}

/// Propagate from the root over the active joints of `phase`
///
/// `q` and `v` are indexed by joint (inactive entries are ignored).
/// `base` is the root pose and twist when no contact is active.
pub fn forward_kinematics(
    robot: &RobotModel,
    phase: Phase,
    q: &[f64],
    v: &[f64],
    base: Option<(Vector3<f64>, Vector3<f64>)>,
) -> LinkStates {
    let n = robot.num_links();
    let mut states = LinkStates { poses: vec![Vector3::zeros(); n], twists: vec![Vector3::zeros(); n] };

    let root = robot.root(phase);
    if !robot.is_fixed(root) {
        if let Some((pose, twist)) = base {
            states.poses[root] = pose;
            states.twists[root] = twist;
        }
    }

    for (j, from, to) in robot.spanning_tree(phase) {
        let joint = robot.joint(j);
        let (a_from, a_to) = (joint.anchor(from), joint.anchor(to));
        // relative angle and rate measured from `from` to `to`
        let sign = if to == joint.child { 1.0 } else { -1.0 };

        let pose_from = states.poses[from];
        let twist_from = states.twists[from];
        let phi_to = pose_from.x + sign * (q[j] + joint.rest_angle);
        let omega_to = twist_from.x + sign * v[j];

        let r_from = rot2(pose_from.x) * a_from;
        let r_to = rot2(phi_to) * a_to;
        let x_joint = linear(&pose_from) + r_from;
        let xdot_joint = linear(&twist_from) + omega_cross(twist_from.x, &r_from);

        states.poses[to] = planar(phi_to, &(x_joint - r_to));
        states.twists[to] = planar(omega_to, &(xdot_joint - omega_cross(omega_to, &r_to)));
    }
    states
}

/// Read joint angles/velocities (and the base state in flight) at step `k`
/// from `values` and store every moving link's pose and twist back
pub fn forward_kinematics_values(robot: &RobotModel, phase: Phase, k: usize, values: &mut Values) -> Result<LinkStates> {
    let nj = robot.num_joints();
    let mut q = vec![0.0; nj];
    let mut v = vec![0.0; nj];
    for j in robot.active_joints(phase) {
        q[j] = values.scalar(Key::joint_angle(j, k))?;
        v[j] = values.scalar(Key::joint_vel(j, k))?;
    }

    let root = robot.root(phase);
    let base = if robot.is_fixed(root) {
        None
    } else {
        Some((values.vector3(Key::pose(root, k))?, values.vector3(Key::twist(root, k))?))
    };

    let states = forward_kinematics(robot, phase, &q, &v, base);
    for link in robot.moving_links() {
        values.set_vector3(Key::pose(link, k), states.poses[link])?;
        values.set_vector3(Key::twist(link, k), states.twists[link])?;
    }
    Ok(states)
}
