//! Variable keys
//!
//! A key names one unknown by quantity kind, entity id and time index.
//! Vector quantities are planar: poses are `[θ, x, z]`, twists `[ω, vx, vz]`,
//! twist accelerations `[α, ax, az]` and wrenches `[moment, fx, fz]`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of quantity a key refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quantity {
    /// Link pose `[θ, x, z]`
    Pose,
    /// Link twist `[ω, vx, vz]`
    Twist,
    /// Link twist acceleration `[α, ax, az]`
    TwistAccel,
    /// Joint angle [rad], or cable length [m]
    JointAngle,
    /// Joint velocity [rad/s], or cable speed [m/s]
    JointVel,
    /// Joint acceleration [rad/s²]
    JointAccel,
    /// Joint torque [N·m], or cable tension [N]
    Torque,
    /// Wrench exerted by a joint (or cable) on its child link `[moment, fx, fz]`
    Wrench,
    /// Actuator pressure [Pa]
    Pressure,
    /// Actuator mass flow rate [kg/s]
    MassFlow,
    /// Valve open time [s]
    ValveOpenTime,
    /// Valve close time [s]
    ValveCloseTime,
    /// Source tank pressure [Pa]
    SourcePressure,
    /// Per-step duration of a phase segment [s]
    TimeStep,
    /// Total duration of a phase segment [s]
    PhaseDuration,
    /// Elapsed time [s]
    Time,
}

impl Quantity {
    /// Dimension of the value stored under this kind
    pub fn dim(self) -> usize {
        match self {
            Quantity::Pose | Quantity::Twist | Quantity::TwistAccel | Quantity::Wrench => 3,
            _ => 1,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Quantity::Pose => "p",
            Quantity::Twist => "V",
            Quantity::TwistAccel => "A",
            Quantity::JointAngle => "q",
            Quantity::JointVel => "v",
            Quantity::JointAccel => "a",
            Quantity::Torque => "T",
            Quantity::Wrench => "F",
            Quantity::Pressure => "P",
            Quantity::MassFlow => "m",
            Quantity::ValveOpenTime => "To",
            Quantity::ValveCloseTime => "Tc",
            Quantity::SourcePressure => "Ps",
            Quantity::TimeStep => "dt",
            Quantity::PhaseDuration => "D",
            Quantity::Time => "t",
        }
    }
}

/// Unique identifier of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub kind: Quantity,
    /// Entity id (link, joint, cable, actuator or phase segment)
    pub id: u32,
    /// Time index
    pub index: u32,
}

impl Key {
    pub fn new(kind: Quantity, id: usize, index: usize) -> Self {
        Self { kind, id: id as u32, index: index as u32 }
    }

    pub fn dim(&self) -> usize {
        self.kind.dim()
    }

    pub fn pose(link: usize, k: usize) -> Self {
        Self::new(Quantity::Pose, link, k)
    }

    pub fn twist(link: usize, k: usize) -> Self {
        Self::new(Quantity::Twist, link, k)
    }

    pub fn twist_accel(link: usize, k: usize) -> Self {
        Self::new(Quantity::TwistAccel, link, k)
    }

    pub fn joint_angle(joint: usize, k: usize) -> Self {
        Self::new(Quantity::JointAngle, joint, k)
    }

    pub fn joint_vel(joint: usize, k: usize) -> Self {
        Self::new(Quantity::JointVel, joint, k)
    }

    pub fn joint_accel(joint: usize, k: usize) -> Self {
        Self::new(Quantity::JointAccel, joint, k)
    }

    pub fn torque(joint: usize, k: usize) -> Self {
        Self::new(Quantity::Torque, joint, k)
    }

    pub fn wrench(joint: usize, k: usize) -> Self {
        Self::new(Quantity::Wrench, joint, k)
    }

    pub fn pressure(actuator: usize, k: usize) -> Self {
        Self::new(Quantity::Pressure, actuator, k)
    }

    pub fn mass_flow(actuator: usize, k: usize) -> Self {
        Self::new(Quantity::MassFlow, actuator, k)
    }

    pub fn valve_open_time(actuator: usize) -> Self {
        Self::new(Quantity::ValveOpenTime, actuator, 0)
    }

    pub fn valve_close_time(actuator: usize) -> Self {
        Self::new(Quantity::ValveCloseTime, actuator, 0)
    }

    pub fn source_pressure(k: usize) -> Self {
        Self::new(Quantity::SourcePressure, 0, k)
    }

    pub fn time_step(segment: usize) -> Self {
        Self::new(Quantity::TimeStep, segment, 0)
    }

    pub fn phase_duration(segment: usize) -> Self {
        Self::new(Quantity::PhaseDuration, segment, 0)
    }

    pub fn time(k: usize) -> Self {
        Self::new(Quantity::Time, 0, k)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}[{}]", self.kind.symbol(), self.id, self.index)
    }
}
