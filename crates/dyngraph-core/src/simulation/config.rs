//! Simulation configuration

use serde::{Deserialize, Serialize};

use crate::actuation::MassFlowConfig;
use crate::graph::SolverSettings;

/// Gauge pressure of a 65 psi supply [Pa]
pub const SUPPLY_GAUGE_65_PSI: f64 = 65.0 * 6894.757;

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Simulation time step [s]
    pub dt: f64,
    /// Step cap; the simulation stops here if no predicate stops it earlier
    pub max_steps: usize,
    /// Mass-flow sub-solve settings
    pub mass_flow: MassFlowConfig,
    /// Settings of the per-step forward dynamics solve
    pub solver: SolverSettings,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            dt: 0.005, // 200 Hz
            max_steps: 400,
            mass_flow: MassFlowConfig::default(),
            solver: SolverSettings::default(),
        }
    }
}

/// Valve timing and supply pressure of a jump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JumpControls {
    /// Valve open time per actuator [s]
    pub valve_open: Vec<f64>,
    /// Valve close time per actuator [s]
    pub valve_close: Vec<f64>,
    /// Initial source tank pressure [Pa] (absolute)
    pub source_pressure: f64,
}

impl JumpControls {
    /// Same timing on every actuator
    pub fn uniform(num_actuators: usize, open: f64, close: f64, source_pressure: f64) -> Self {
        Self {
            valve_open: vec![open; num_actuators],
            valve_close: vec![close; num_actuators],
            source_pressure,
        }
    }
}

impl Default for JumpControls {
    fn default() -> Self {
        Self::uniform(4, 0.0, 0.2, 101_325.0 + SUPPLY_GAUGE_65_PSI)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_round_trip() {
        let config = SimConfig { max_steps: 12, ..Default::default() };
        let json = serde_json::to_string(&config).unwrap();
        let back: SimConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_steps, 12);
        assert_eq!(back.dt, 0.005);
        assert_eq!(back.solver.max_iterations, 100);
    }

    #[test]
    fn test_default_controls() {
        let controls = JumpControls::default();
        assert_eq!(controls.valve_open.len(), 4);
        assert!(controls.source_pressure > 5e5);
    }
}
