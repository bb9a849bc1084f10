//! Actuation terms
//!
//! Residual forms of the actuator torque law and the gated tube flow, used by
//! the trajectory optimizer.

use nalgebra::DVector;
use tracing::{debug, warn};

use super::{tube_mass_flow, valve_opening, Actuator, MassFlowConfig, PneumaticParams};
use crate::error::DynamicsError;
use crate::graph::{Key, Term};

/// `τ − torque(P, q, v)`
#[derive(Debug, Clone)]
pub struct ActuatorTorqueTerm {
    keys: [Key; 4],
    actuator: Actuator,
    atmospheric_pressure: f64,
}

impl ActuatorTorqueTerm {
    /// Torque term of actuator number `index` at step `k`
    pub fn new(index: usize, actuator: &Actuator, k: usize, params: &PneumaticParams) -> Self {
        let j = actuator.joint;
        Self {
            keys: [Key::pressure(index, k), Key::joint_angle(j, k), Key::joint_vel(j, k), Key::torque(j, k)],
            actuator: actuator.clone(),
            atmospheric_pressure: params.atmospheric_pressure,
        }
    }
}

impl Term for ActuatorTorqueTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        1
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        let torque = self.actuator.torque(x[0][0], x[1][0], x[2][0], self.atmospheric_pressure);
        DVector::from_element(1, x[3][0] - torque)
    }
}

/// `ṁ − o(t)·ṁ_tube(S, P)`
#[derive(Debug, Clone)]
pub struct MassFlowTerm {
    keys: [Key; 6],
    params: PneumaticParams,
    config: MassFlowConfig,
}

impl MassFlowTerm {
    pub fn new(index: usize, k: usize, params: &PneumaticParams, config: &MassFlowConfig) -> Self {
        Self {
            keys: [
                Key::valve_open_time(index),
                Key::valve_close_time(index),
                Key::time(k),
                Key::source_pressure(k),
                Key::pressure(index, k),
                Key::mass_flow(index, k),
            ],
            params: params.clone(),
            config: config.clone(),
        }
    }
}

impl Term for MassFlowTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        1
    }

    fn evaluate(&self, x: &[&DVector<f64>]) -> DVector<f64> {
        let (open, close, t, source, pressure, mdot) = (x[0][0], x[1][0], x[2][0], x[3][0], x[4][0], x[5][0]);
        let tube = match tube_mass_flow(source, pressure, &self.params, &self.config) {
            Ok(flow) => flow.rate,
            Err(DynamicsError::SubSolveNonConvergence { iterations, last_iterate }) => {
                debug!(key = %self.keys[5], iterations, last_iterate, "tube flow not converged, using last iterate");
                last_iterate
            }
            Err(err) => {
                warn!(key = %self.keys[5], error = %err, "tube flow failed, taking zero flow");
                0.0
            }
        };
        let opening = valve_opening(t, open, close, self.params.valve_time_constant);
        DVector::from_element(1, mdot - opening * tube)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::solve_mass_flow;
    use crate::graph::Values;
    use approx::assert_relative_eq;

    #[test]
    fn test_mass_flow_term_vanishes_at_sub_solve() {
        let params = PneumaticParams::default();
        let config = MassFlowConfig::default();
        let flow = solve_mass_flow(0.0, 0.2, 1.5e5, 5.0e5, 0.05, &params, &config).unwrap();

        let mut values = Values::new();
        values.set_scalar(Key::valve_open_time(1), 0.0).unwrap();
        values.set_scalar(Key::valve_close_time(1), 0.2).unwrap();
        values.set_scalar(Key::time(3), 0.05).unwrap();
        values.set_scalar(Key::source_pressure(3), 5.0e5).unwrap();
        values.set_scalar(Key::pressure(1, 3), 1.5e5).unwrap();
        values.set_scalar(Key::mass_flow(1, 3), flow.rate).unwrap();

        let term = MassFlowTerm::new(1, 3, &params, &config);
        let inputs: Vec<_> = term.keys().iter().map(|k| values.get(*k).unwrap()).collect();
        assert_relative_eq!(term.evaluate(&inputs)[0], 0.0, epsilon = 1e-15);
        // more inflow than the tube carries is a positive residual
        assert!(term.jacobians(&inputs)[5][(0, 0)] > 0.0);
    }

    #[test]
    fn test_capped_tube_flow_uses_last_iterate() {
        let params = PneumaticParams::default();
        let config = MassFlowConfig { max_iterations: 1, tolerance: 0.0, ..Default::default() };
        let flow = solve_mass_flow(0.0, 0.2, 1.5e5, 5.0e5, 0.05, &params, &config).unwrap();
        assert!(!flow.converged);

        let term = MassFlowTerm::new(0, 0, &params, &config);
        let x = |v: f64| DVector::from_element(1, v);
        let inputs = [x(0.0), x(0.2), x(0.05), x(5.0e5), x(1.5e5), x(flow.rate)];
        let refs: Vec<_> = inputs.iter().collect();
        assert_relative_eq!(term.evaluate(&refs)[0], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_torque_term_residual() {
        let params = PneumaticParams::default();
        let actuator = Actuator::new("hip_r", 2, 1.0);
        let term = ActuatorTorqueTerm::new(1, &actuator, 0, &params);
        assert_eq!(term.keys()[3], Key::torque(2, 0));

        let p = DVector::from_element(1, params.atmospheric_pressure + 1e5);
        let q = DVector::from_element(1, -0.2);
        let v = DVector::from_element(1, 0.0);
        let tau = DVector::from_element(1, 1.0);
        assert_relative_eq!(term.evaluate(&[&p, &q, &v, &tau])[0], 0.0, epsilon = 1e-12);
    }
}
