//! Planar multibody model
//!
//! Links carry their frame at the center of mass with the x-axis along the
//! rod, so a link of length `l` has its start anchor at `(−l/2, 0)` and its
//! end anchor at `(+l/2, 0)`. A revolute joint relates its parent and child
//! link angles through
//!
//! ```text
//! φ_child = φ_parent + q + rest_angle
//! ```
//!
//! and keeps its parent and child anchor points coincident.

use std::collections::VecDeque;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::simulation::Phase;

/// Rigid link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    /// Mass [kg]
    pub mass: f64,
    /// Planar inertia about the COM [kg·m²]
    pub inertia: f64,
    /// Rod length [m]
    pub length: f64,
    /// Fixed to the world (ground)
    pub fixed: bool,
}

impl Link {
    /// Solid cylinder of radius `r` rotating about a transverse axis
    pub fn rod(name: &str, mass: f64, length: f64, radius: f64) -> Self {
        Self {
            name: name.to_string(),
            mass,
            inertia: (length * length + 3.0 * radius * radius) * mass / 12.0,
            length,
            fixed: false,
        }
    }

    pub fn ground(length: f64) -> Self {
        Self { name: "ground".to_string(), mass: 0.0, inertia: 0.0, length, fixed: true }
    }

    pub fn start_anchor(&self) -> Vector2<f64> {
        Vector2::new(-0.5 * self.length, 0.0)
    }

    pub fn end_anchor(&self) -> Vector2<f64> {
        Vector2::new(0.5 * self.length, 0.0)
    }
}

/// Which foot a contact joint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactSide {
    Left,
    Right,
}

/// Revolute joint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Joint {
    pub name: String,
    pub parent: usize,
    pub child: usize,
    /// Joint point in the parent frame [m]
    pub parent_anchor: Vector2<f64>,
    /// Joint point in the child frame [m]
    pub child_anchor: Vector2<f64>,
    /// Relative angle at q = 0 [rad]
    pub rest_angle: f64,
    /// Set on foot–ground joints; active only in phases with that foot down
    pub contact: Option<ContactSide>,
}

impl Joint {
    /// The link on the other side of this joint, if `link` is one of its ends
    pub fn other(&self, link: usize) -> Option<usize> {
        if link == self.parent {
            Some(self.child)
        } else if link == self.child {
            Some(self.parent)
        } else {
            None
        }
    }

    /// +1 if `link` is the child (receives the joint wrench), −1 if the parent
    pub fn sign(&self, link: usize) -> f64 {
        if link == self.child {
            1.0
        } else {
            -1.0
        }
    }

    /// Anchor of this joint expressed in the frame of `link`
    pub fn anchor(&self, link: usize) -> Vector2<f64> {
        if link == self.child {
            self.child_anchor
        } else {
            self.parent_anchor
        }
    }
}

/// Caller-owned robot description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotModel {
    pub links: Vec<Link>,
    pub joints: Vec<Joint>,
    /// Index of the fixed ground link
    pub ground: usize,
    /// Floating base link, the kinematic root when no contact is active
    pub base: usize,
    /// Gravity [m/s²] in the x–z plane
    pub gravity: Vector2<f64>,
    /// Independent joints of the closed chain formed when every contact is active
    pub loop_coordinates: Vec<usize>,
}

impl RobotModel {
    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    pub fn num_joints(&self) -> usize {
        self.joints.len()
    }

    pub fn link(&self, i: usize) -> &Link {
        &self.links[i]
    }

    pub fn joint(&self, j: usize) -> &Joint {
        &self.joints[j]
    }

    pub fn is_fixed(&self, link: usize) -> bool {
        self.links[link].fixed
    }

    /// Links that carry pose, twist and acceleration variables
    pub fn moving_links(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.links.len()).filter(|&i| !self.links[i].fixed)
    }

    pub fn contact_joints(&self) -> Vec<usize> {
        (0..self.joints.len()).filter(|&j| self.joints[j].contact.is_some()).collect()
    }

    /// Joints in effect during `phase`
    pub fn active_joints(&self, phase: Phase) -> Vec<usize> {
        (0..self.joints.len())
            .filter(|&j| match self.joints[j].contact {
                None => true,
                Some(side) => phase.in_contact(side),
            })
            .collect()
    }

    /// Active contact joints in `phase`
    pub fn active_contacts(&self, phase: Phase) -> Vec<usize> {
        self.active_joints(phase).into_iter().filter(|&j| self.joints[j].contact.is_some()).collect()
    }

    /// Joints whose angle and velocity are integrated independently
    ///
    /// All active joints when the chain is open, the loop coordinates when
    /// several contacts close it.
    pub fn collocated_joints(&self, phase: Phase) -> Vec<usize> {
        if self.active_contacts(phase).len() <= 1 {
            self.active_joints(phase)
        } else {
            self.loop_coordinates.clone()
        }
    }

    /// Active joints attached to `link`
    pub fn joints_of(&self, link: usize, phase: Phase) -> Vec<usize> {
        self.active_joints(phase)
            .into_iter()
            .filter(|&j| self.joints[j].other(link).is_some())
            .collect()
    }

    /// Kinematic root of `phase`
    pub fn root(&self, phase: Phase) -> usize {
        if self.active_contacts(phase).is_empty() {
            self.base
        } else {
            self.ground
        }
    }

    /// Spanning tree over the active joints, in breadth-first order
    ///
    /// Each entry is `(joint, from_link, to_link)`; joints closing a loop are
    /// left out.
    pub fn spanning_tree(&self, phase: Phase) -> Vec<(usize, usize, usize)> {
        let active = self.active_joints(phase);
        let root = self.root(phase);
        let mut visited = vec![false; self.links.len()];
        visited[root] = true;
        let mut queue = VecDeque::from([root]);
        let mut edges = Vec::new();

        while let Some(link) = queue.pop_front() {
            for &j in &active {
                if let Some(next) = self.joints[j].other(link) {
                    if !visited[next] {
                        visited[next] = true;
                        edges.push((j, link, next));
                        queue.push_back(next);
                    }
                }
            }
        }
        edges
    }

    /// Total mass of the moving links [kg]
    pub fn total_mass(&self) -> f64 {
        self.moving_links().map(|i| self.links[i].mass).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::jumping_robot::{JumpingRobot, GROUND, HIP_L, TORSO};
    use approx::assert_relative_eq;

    #[test]
    fn test_phase_topology() {
        let robot = JumpingRobot::default().robot;
        assert_eq!(robot.active_joints(Phase::Ground).len(), 6);
        assert_eq!(robot.active_joints(Phase::Air), vec![1, 2, 3, 4]);
        assert_eq!(robot.root(Phase::Ground), GROUND);
        assert_eq!(robot.root(Phase::Air), TORSO);

        assert_eq!(robot.collocated_joints(Phase::Ground), robot.loop_coordinates);
        assert_eq!(robot.collocated_joints(Phase::RightOnGround).len(), 5);
        assert_relative_eq!(robot.total_mass(), 1.72, epsilon = 1e-12);
    }

    #[test]
    fn test_spanning_tree_skips_loop_closure() {
        let robot = JumpingRobot::default().robot;
        let tree = robot.spanning_tree(Phase::Ground);
        assert_eq!(tree.len(), 5);
        assert!(tree.iter().all(|&(j, _, _)| j != HIP_L));

        // an open chain keeps every active joint
        assert_eq!(robot.spanning_tree(Phase::Air).len(), 4);
        assert_eq!(robot.spanning_tree(Phase::LeftOnGround).len(), 5);
    }
}
