//! Planar multibody dynamics
//!
//! - Robot model (links, revolute joints, contacts)
//! - Forward kinematics over the active spanning tree
//! - Newton-Euler, joint and kinematics terms
//! - Forward dynamics of a single step
//! - The jumping robot preset

pub mod robot;
pub mod kinematics;
pub mod terms;
pub mod forward;
pub mod jumping_robot;

pub use robot::*;
pub use kinematics::*;
pub use terms::*;
pub use forward::*;
pub use jumping_robot::{JumpingRobot, JumpingRobotParams};
