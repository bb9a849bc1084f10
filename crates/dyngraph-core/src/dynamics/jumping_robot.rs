//! Pneumatic jumping robot
//!
//! Five links standing on two feet: shank_r, thigh_r, torso, thigh_l and
//! shank_l, closed through the ground. Knees and hips carry pneumatic
//! actuators fed from a shared source tank.
//!
//! ```text
//!            torso
//!     hip_r o=====o hip_l
//!          /       \
//!   knee_r <        > knee_l
//!          \       /
//!   foot_r  o     o  foot_l
//! ```

use std::f64::consts::{FRAC_PI_2, PI};

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use super::{ContactSide, Joint, Link, RobotModel};
use crate::actuation::{Actuator, PneumaticParams};

/// Link ids
pub const SHANK_R: usize = 0;
pub const THIGH_R: usize = 1;
pub const TORSO: usize = 2;
pub const THIGH_L: usize = 3;
pub const SHANK_L: usize = 4;
pub const GROUND: usize = 5;

/// Joint ids
pub const FOOT_R: usize = 0;
pub const KNEE_R: usize = 1;
pub const HIP_R: usize = 2;
pub const HIP_L: usize = 3;
pub const KNEE_L: usize = 4;
pub const FOOT_L: usize = 5;

/// Geometry and mass properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumpingRobotParams {
    /// Length of every link, also the foot spacing [m]
    pub link_length: f64,
    /// Link radius used for the inertia [m]
    pub link_radius: f64,
    /// [kg]
    pub shank_mass: f64,
    /// [kg]
    pub thigh_mass: f64,
    /// [kg]
    pub torso_mass: f64,
    /// Gravitational acceleration magnitude [m/s²]
    pub gravity: f64,
}

impl Default for JumpingRobotParams {
    fn default() -> Self {
        Self {
            link_length: 0.55,
            link_radius: 0.02,
            shank_mass: 0.31,
            thigh_mass: 0.28,
            torso_mass: 0.54,
            gravity: crate::GRAVITY,
        }
    }
}

/// Robot model, actuators and pneumatics of the jumping robot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumpingRobot {
    pub robot: RobotModel,
    pub actuators: Vec<Actuator>,
    pub pneumatics: PneumaticParams,
}

impl Default for JumpingRobot {
    fn default() -> Self {
        Self::new(&JumpingRobotParams::default(), PneumaticParams::default())
    }
}

impl JumpingRobot {
    pub fn new(params: &JumpingRobotParams, pneumatics: PneumaticParams) -> Self {
        let (l, r) = (params.link_length, params.link_radius);
        let links = vec![
            Link::rod("shank_r", params.shank_mass, l, r),
            Link::rod("thigh_r", params.thigh_mass, l, r),
            Link::rod("torso", params.torso_mass, l, r),
            Link::rod("thigh_l", params.thigh_mass, l, r),
            Link::rod("shank_l", params.shank_mass, l, r),
            Link::ground(l),
        ];

        let chain = |name: &str, parent: usize, child: usize, rest_angle: f64| Joint {
            name: name.to_string(),
            parent,
            child,
            parent_anchor: links[parent].end_anchor(),
            child_anchor: links[child].start_anchor(),
            rest_angle,
            contact: None,
        };
        let joints = vec![
            Joint {
                name: "foot_r".to_string(),
                parent: GROUND,
                child: SHANK_R,
                parent_anchor: Vector2::new(0.5 * l, 0.0),
                child_anchor: links[SHANK_R].start_anchor(),
                rest_angle: FRAC_PI_2,
                contact: Some(ContactSide::Right),
            },
            chain("knee_r", SHANK_R, THIGH_R, 0.0),
            chain("hip_r", THIGH_R, TORSO, FRAC_PI_2),
            chain("hip_l", TORSO, THIGH_L, FRAC_PI_2),
            chain("knee_l", THIGH_L, SHANK_L, 0.0),
            Joint {
                name: "foot_l".to_string(),
                parent: SHANK_L,
                child: GROUND,
                parent_anchor: links[SHANK_L].end_anchor(),
                child_anchor: Vector2::new(-0.5 * l, 0.0),
                rest_angle: -3.0 * PI / 2.0,
                contact: Some(ContactSide::Left),
            },
        ];

        let robot = RobotModel {
            links,
            joints,
            ground: GROUND,
            base: TORSO,
            gravity: Vector2::new(0.0, -params.gravity),
            loop_coordinates: vec![FOOT_R, KNEE_R, HIP_R],
        };

        let actuators = vec![
            Actuator::new("knee_r", KNEE_R, -1.0),
            Actuator::new("hip_r", HIP_R, 1.0),
            Actuator::new("hip_l", HIP_L, 1.0),
            Actuator::new("knee_l", KNEE_L, -1.0),
        ];

        Self { robot, actuators, pneumatics }
    }

    /// Symmetric crouch with the shanks leaning out by `theta`
    ///
    /// Keeps the torso horizontal and each hip straight above its foot.
    pub fn crouch(theta: f64) -> Vec<f64> {
        vec![-theta, 2.0 * theta, -theta, -theta, 2.0 * theta, -theta]
    }

    /// Actuator driving `joint`, if any
    pub fn actuator_of(&self, joint: usize) -> Option<usize> {
        self.actuators.iter().position(|a| a.joint == joint)
    }
}
