//! Forward dynamics
//!
//! Given joint angles, velocities and torques at one step, forward kinematics
//! fixes every link pose and twist; the instantaneous system of Newton-Euler,
//! joint acceleration and torque–wrench terms is then solved for the link and
//! joint accelerations and the joint wrenches.

use tracing::debug;

use super::{dynamics_terms, forward_kinematics_values, RobotModel};
use crate::error::Result;
use crate::graph::{ConstraintSystem, Key, PriorTerm, SolverSettings, TermSet, Values, WeightModel};
use crate::simulation::Phase;

/// Solve the forward dynamics of step `k`
///
/// `values` must hold the joint angles, velocities and torques of the active
/// joints at `k`, plus the base pose and twist when no contact is active.
/// Returns the poses, twists, accelerations, wrenches and torques of step `k`.
pub fn forward_dynamics(
    robot: &RobotModel,
    phase: Phase,
    k: usize,
    values: &Values,
    settings: &SolverSettings,
) -> Result<Values> {
    let active = robot.active_joints(phase);

    let mut init = Values::new();
    for &j in &active {
        init.set_scalar(Key::joint_angle(j, k), values.scalar(Key::joint_angle(j, k))?)?;
        init.set_scalar(Key::joint_vel(j, k), values.scalar(Key::joint_vel(j, k))?)?;
    }
    let root = robot.root(phase);
    if !robot.is_fixed(root) {
        init.set(Key::pose(root, k), values.get(Key::pose(root, k))?.clone())?;
        init.set(Key::twist(root, k), values.get(Key::twist(root, k))?.clone())?;
    }
    forward_kinematics_values(robot, phase, k, &mut init)?;

    let mut system = ConstraintSystem::new(settings.clone());
    system.add_set("dynamics", dynamics_terms(robot, phase, k));

    let mut priors = TermSet::new();
    for &j in &active {
        let torque = values.scalar(Key::torque(j, k))?;
        priors.push(PriorTerm::scalar(Key::torque(j, k), torque), WeightModel::Hard);
        init.set_scalar(Key::torque(j, k), torque)?;
        init.set_scalar(Key::joint_accel(j, k), 0.0)?;
        init.set(Key::wrench(j, k), nalgebra::DVector::zeros(3))?;
        system.new_variables([Key::torque(j, k), Key::joint_accel(j, k), Key::wrench(j, k)]);
    }
    system.add_set("torques", priors);
    for link in robot.moving_links() {
        init.set(Key::twist_accel(link, k), nalgebra::DVector::zeros(3))?;
        system.new_variable(Key::twist_accel(link, k));
    }

    let report = system.solve(&init)?;
    debug!(k, ?phase, iterations = report.iterations, status = ?report.status, "forward dynamics");
    report.into_values()
}

/// Vertical ground reaction on the robot at each active contact
///
/// Returns `(joint, reaction)` pairs; the sign follows whether the robot is
/// the child (receives `W`) or the parent (receives `−W`) of the contact.
pub fn contact_reactions(robot: &RobotModel, phase: Phase, k: usize, values: &Values) -> Result<Vec<(usize, f64)>> {
    robot
        .active_contacts(phase)
        .into_iter()
        .map(|j| {
            let joint = robot.joint(j);
            let fz = values.vector3(Key::wrench(j, k))?.z;
            let on_robot = if robot.is_fixed(joint.child) { -fz } else { fz };
            Ok((j, on_robot))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::JumpingRobot;
    use approx::assert_relative_eq;

    fn standing(q: &[f64], torques: &[f64]) -> Values {
        let mut values = Values::new();
        for j in 0..6 {
            values.set_scalar(Key::joint_angle(j, 0), q[j]).unwrap();
            values.set_scalar(Key::joint_vel(j, 0), 0.0).unwrap();
            values.set_scalar(Key::torque(j, 0), torques[j]).unwrap();
        }
        values
    }

    #[test]
    fn test_unactuated_stance_supports_weight() {
        let jr = JumpingRobot::default();
        let robot = &jr.robot;
        // straight legs: gravity passes through the joints
        let values = standing(&JumpingRobot::crouch(0.0), &[0.0; 6]);
        let result = forward_dynamics(robot, Phase::Ground, 0, &values, &SolverSettings::default()).unwrap();

        for j in robot.active_joints(Phase::Ground) {
            assert_relative_eq!(result.scalar(Key::joint_accel(j, 0)).unwrap(), 0.0, epsilon = 1e-8);
        }
        let reactions = contact_reactions(robot, Phase::Ground, 0, &result).unwrap();
        let total: f64 = reactions.iter().map(|(_, r)| r).sum();
        assert_relative_eq!(total, robot.total_mass() * 9.8, epsilon = 1e-6);
    }

    #[test]
    fn test_free_fall_in_flight() {
        let jr = JumpingRobot::default();
        let robot = &jr.robot;
        let mut values = standing(&JumpingRobot::crouch(0.3), &[0.0; 6]);
        values.set_vector3(Key::pose(2, 0), nalgebra::Vector3::new(std::f64::consts::PI, 0.0, 1.0)).unwrap();
        values.set_vector3(Key::twist(2, 0), nalgebra::Vector3::zeros()).unwrap();

        let result = forward_dynamics(robot, Phase::Air, 0, &values, &SolverSettings::default()).unwrap();
        for link in robot.moving_links() {
            let a = result.vector3(Key::twist_accel(link, 0)).unwrap();
            assert_relative_eq!(a, nalgebra::Vector3::new(0.0, 0.0, -9.8), epsilon = 1e-8);
        }
        assert!(!result.contains(Key::wrench(0, 0)));
    }

    #[test]
    fn test_missing_torque_is_reported() {
        let jr = JumpingRobot::default();
        let mut values = standing(&JumpingRobot::crouch(0.3), &[0.0; 6]);
        values.remove(Key::torque(2, 0));
        let err = forward_dynamics(&jr.robot, Phase::Ground, 0, &values, &SolverSettings::default()).unwrap_err();
        assert!(matches!(err, crate::DynamicsError::KeyNotFound(k) if k == Key::torque(2, 0)));
    }
}
