//! Pneumatic joint actuator
//!
//! A single-acting piston drives its joint through a moment arm; an
//! antagonistic spring engages past a limit angle and the joint is lightly
//! damped:
//!
//! ```text
//! τ = d·r·A·max(p − p_atm, 0) − k_s·δq − b·v
//! δq = q − q_e   if d·(q − q_e) > 0, else 0
//! ```
//!
//! The chamber has a fixed volume, so under isothermal conditions
//! `ṗ = (R T / V)·ṁ`, and the source tank drains as
//! `ṗ_s = −(R T / V_s)·Σ ṁ`.

use serde::{Deserialize, Serialize};

use super::PneumaticParams;

/// Actuator attached to one joint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actuator {
    pub name: String,
    /// Driven joint
    pub joint: usize,
    /// Effective piston area [m²]
    pub piston_area: f64,
    /// Moment arm [m]
    pub moment_arm: f64,
    /// Actuation direction, +1 or −1
    pub direction: f64,
    /// Chamber volume [m³]
    pub volume: f64,
    /// Antagonistic spring stiffness [N·m/rad]
    pub spring_stiffness: f64,
    /// Angle at which the antagonistic spring engages [rad]
    pub spring_engage_angle: f64,
    /// Joint damping [N·m·s/rad]
    pub damping: f64,
}

impl Actuator {
    /// Actuator with the default piston and spring on `joint`
    pub fn new(name: &str, joint: usize, direction: f64) -> Self {
        Self {
            name: name.to_string(),
            joint,
            piston_area: 5e-4,
            moment_arm: 0.02,
            direction,
            volume: 1e-4,
            spring_stiffness: 10.0,
            spring_engage_angle: 0.0,
            damping: 0.01,
        }
    }

    /// Joint torque [N·m]
    pub fn torque(&self, pressure: f64, q: f64, v: f64, atmospheric_pressure: f64) -> f64 {
        let gauge = (pressure - atmospheric_pressure).max(0.0);
        let over = q - self.spring_engage_angle;
        let spring = if self.direction * over > 0.0 { over } else { 0.0 };
        self.direction * self.moment_arm * self.piston_area * gauge - self.spring_stiffness * spring - self.damping * v
    }

    /// Chamber pressure rate [Pa/s] for an inflow `mdot`
    pub fn pressure_rate(&self, mdot: f64, params: &PneumaticParams) -> f64 {
        params.gas_constant_temperature / self.volume * mdot
    }
}

/// Source tank pressure rate [Pa/s] for the given actuator inflows
pub fn source_pressure_rate(mdots: &[f64], params: &PneumaticParams) -> f64 {
    -params.gas_constant_temperature / params.source_volume * mdots.iter().sum::<f64>()
}
