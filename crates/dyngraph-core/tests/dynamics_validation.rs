//! Dynamics validation
//!
//! Checks the core against closed-form mechanics:
//! 1. Virtual work on the symmetric crouch mechanism, in closed form
//! 2. Mass-flow fixed point against its governing relation
//! 3. Zero actuator torque before any gas has entered
//! 4. Simulator bookkeeping over a fixed phase budget and after an abort

use approx::assert_relative_eq;
use proptest::prelude::*;

use dyngraph_core::actuation::{flow_equation_residual, solve_mass_flow, MassFlowConfig, PneumaticParams};
use dyngraph_core::dynamics::{forward_dynamics, JumpingRobot, JumpingRobotParams};
use dyngraph_core::graph::{Key, SolverSettings, Values};
use dyngraph_core::dynamics::RobotModel;
use dyngraph_core::simulation::{
    initial_values, JumpControls, Phase, PhaseTransition, SimConfig, Simulator, StepBudget, Transition,
    SUPPLY_GAUGE_65_PSI,
};
use dyngraph_core::DynamicsError;

/// Joint rates of the symmetric crouch per unit rate of the foot joints
const CROUCH_DIRECTION: [f64; 6] = [1.0, -2.0, 1.0, 1.0, -2.0, 1.0];

/// Foot-joint acceleration of the symmetric crouch at zero velocity
///
/// Virtual work on one leg with half the torso: shank and thigh rods of mass
/// `m1`, `m2` and length `l`, torso `m3`, legs leaning `θ` from vertical.
fn crouch_acceleration(params: &JumpingRobotParams, theta: f64, hip: f64, knee: f64) -> f64 {
    let (m1, m2, m3) = (params.shank_mass, params.thigh_mass, params.torso_mass);
    let (l, r, g) = (params.link_length, params.link_radius, params.gravity);
    let s = theta.sin();

    let moment = (0.5 * m1 + 1.5 * m2 + m3) * g * l * s;
    let j1 = (l * l + 3.0 * r * r) / 12.0 * m1;
    let j2 = (l * l + 3.0 * r * r) / 12.0 * m2;
    let j = l * l * (0.25 * m1 + (0.25 + 2.0 * s * s) * m2 + 2.0 * s * s * m3);
    (hip - 2.0 * knee - moment) / (j + j1 + j2)
}

fn crouch_values(theta: f64, torques: &[f64; 6]) -> Values {
    let mut values = Values::new();
    for (j, q) in JumpingRobot::crouch(theta).into_iter().enumerate() {
        values.set_scalar(Key::joint_angle(j, 0), q).unwrap();
        values.set_scalar(Key::joint_vel(j, 0), 0.0).unwrap();
        values.set_scalar(Key::torque(j, 0), torques[j]).unwrap();
    }
    values
}

mod virtual_work_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_symmetric_torques_follow_crouch_mode(
            theta in 0.1f64..0.7,
            hip in -2.0f64..2.0,
            knee in -2.0f64..2.0,
        ) {
            let jr = JumpingRobot::default();
            let torques = [0.0, knee, hip, hip, knee, 0.0];
            let values = crouch_values(theta, &torques);
            let result = forward_dynamics(&jr.robot, Phase::Ground, 0, &values, &SolverSettings::default()).unwrap();

            let expected = crouch_acceleration(&JumpingRobotParams::default(), theta, hip, knee);
            for (j, e) in CROUCH_DIRECTION.iter().enumerate() {
                let a = result.scalar(Key::joint_accel(j, 0)).unwrap();
                prop_assert!((a - e * expected).abs() <= 1e-7, "joint {}: {} vs {}", j, a, e * expected);
            }
        }
    }

    #[test]
    fn test_unloaded_crouch_collapses() {
        let jr = JumpingRobot::default();
        // gravity alone folds the legs: the feet lean further out
        let theta = 0.4;
        let expected = crouch_acceleration(&JumpingRobotParams::default(), theta, 0.0, 0.0);
        assert!(expected < 0.0);

        let result =
            forward_dynamics(&jr.robot, Phase::Ground, 0, &crouch_values(theta, &[0.0; 6]), &SolverSettings::default())
                .unwrap();
        assert_relative_eq!(result.scalar(Key::joint_accel(0, 0)).unwrap(), expected, epsilon = 1e-7);
        assert_relative_eq!(result.scalar(Key::joint_accel(1, 0)).unwrap(), -2.0 * expected, epsilon = 1e-7);
    }

    #[test]
    fn test_gravity_moment_torque_holds_crouch() {
        // torques that cancel the gravity moment leave the crouch at rest
        let params = JumpingRobotParams::default();
        let jr = JumpingRobot::new(&params, Default::default());
        let theta = std::f64::consts::FRAC_PI_3;
        let hip = (0.5 * params.shank_mass + 1.5 * params.thigh_mass + params.torso_mass)
            * params.gravity
            * params.link_length
            * theta.sin();
        let torques = [0.0, 0.0, hip, hip, 0.0, 0.0];
        let result =
            forward_dynamics(&jr.robot, Phase::Ground, 0, &crouch_values(theta, &torques), &SolverSettings::default())
                .unwrap();
        for j in 0..6 {
            assert_relative_eq!(result.scalar(Key::joint_accel(j, 0)).unwrap(), 0.0, epsilon = 1e-7);
        }
    }
}

mod mass_flow_tests {
    use super::*;

    #[test]
    fn test_open_valve_flow_satisfies_relation() {
        let params = PneumaticParams::default();
        let config = MassFlowConfig::default();
        let source = params.atmospheric_pressure + SUPPLY_GAUGE_65_PSI;

        for &actuator in &[params.atmospheric_pressure, 2.0e5, 4.0e5, 0.9 * source] {
            let flow = solve_mass_flow(0.0, 1.0, actuator, source, 0.1, &params, &config).unwrap();
            assert!(flow.converged);
            assert!(flow.tube_rate > 0.0);
            assert_relative_eq!(flow.opening, 1.0, epsilon = 1e-6);
            assert_relative_eq!(flow.rate, flow.opening * flow.tube_rate);
            assert!(flow_equation_residual(flow.tube_rate, source, actuator, &params).abs() < 1e-6);
        }
    }

    #[test]
    fn test_backflow_when_actuator_exceeds_source() {
        let params = PneumaticParams::default();
        let flow = solve_mass_flow(0.0, 1.0, 5.0e5, 3.0e5, 0.5, &params, &MassFlowConfig::default()).unwrap();
        assert!(flow.rate < 0.0);
    }
}

mod actuation_tests {
    use super::*;

    #[test]
    fn test_atmospheric_actuators_produce_no_torque() {
        let jr = JumpingRobot::default();
        let controls = JumpControls::uniform(4, 0.0, 1.0, jr.pneumatics.atmospheric_pressure + SUPPLY_GAUGE_65_PSI);
        let mut values = initial_values(&jr, &controls, &JumpingRobot::crouch(0.3)).unwrap();
        values.set_scalar(Key::time(0), 0.1).unwrap();

        let simulator = Simulator::new(&jr, SimConfig::default());
        simulator.step(0, Phase::Ground, &mut values).unwrap();

        for (a, actuator) in jr.actuators.iter().enumerate() {
            assert_relative_eq!(values.scalar(Key::torque(actuator.joint, 0)).unwrap(), 0.0, epsilon = 1e-7);
            assert!(values.scalar(Key::mass_flow(a, 0)).unwrap() > 0.0);
        }
    }
}

mod simulator_tests {
    use super::*;

    #[test]
    fn test_step_budget_run() {
        let jr = JumpingRobot::default();
        let controls = JumpControls::default();
        let init = initial_values(&jr, &controls, &JumpingRobot::crouch(0.3)).unwrap();
        let config = SimConfig::default();
        let dt = config.dt;

        let mut budget = StepBudget::new(&[(Phase::Ground, 10)]).unwrap();
        let output = Simulator::new(&jr, config).simulate(&init, budget.initial_phase(), &mut budget).unwrap();

        assert_eq!(output.step_phases, vec![Phase::Ground; 10]);
        assert_eq!(output.schedule().unwrap().num_segments(), 1);
        assert_relative_eq!(output.values.scalar(Key::time(9)).unwrap(), 9.0 * dt, epsilon = 1e-12);

        // gas moves from the tank into the chambers
        let atm = jr.pneumatics.atmospheric_pressure;
        assert!(output.values.scalar(Key::pressure(0, 9)).unwrap() > atm);
        assert!(output.values.scalar(Key::source_pressure(9)).unwrap() < controls.source_pressure);
        // every simulated step carries its solved accelerations
        for k in 0..10 {
            assert!(output.values.contains(Key::joint_accel(0, k)));
        }
    }

    #[test]
    fn test_missing_input_aborts_first_step() {
        let jr = JumpingRobot::default();
        let mut init = initial_values(&jr, &JumpControls::default(), &JumpingRobot::crouch(0.3)).unwrap();
        init.remove(Key::source_pressure(0));

        let mut budget = StepBudget::new(&[(Phase::Ground, 3)]).unwrap();
        let err = Simulator::new(&jr, SimConfig::default()).simulate(&init, Phase::Ground, &mut budget).unwrap_err();
        match err {
            DynamicsError::SimulationAborted { step, source, partial } => {
                assert_eq!(step, None);
                assert!(matches!(*source, DynamicsError::KeyNotFound(k) if k == Key::source_pressure(0)));
                assert_eq!(partial.num_steps(), 0);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    /// Ground budget that fails once step `fail_at` is reached
    struct FailingTransition {
        fail_at: usize,
    }

    impl PhaseTransition for FailingTransition {
        fn next(&mut self, _robot: &RobotModel, k: usize, _phase: Phase, _values: &Values) -> dyngraph_core::Result<Transition> {
            if k == self.fail_at {
                Err(DynamicsError::InvalidSchedule(format!("no transition at step {k}")))
            } else {
                Ok(Transition::Stay)
            }
        }
    }

    #[test]
    fn test_abort_keeps_completed_steps() {
        let jr = JumpingRobot::default();
        let init = initial_values(&jr, &JumpControls::default(), &JumpingRobot::crouch(0.3)).unwrap();
        let config = SimConfig::default();
        let dt = config.dt;

        let mut transition = FailingTransition { fail_at: 4 };
        let err = Simulator::new(&jr, config).simulate(&init, Phase::Ground, &mut transition).unwrap_err();
        let (step, source, partial) = match err {
            DynamicsError::SimulationAborted { step, source, partial } => (step, source, partial),
            other => panic!("unexpected error {other}"),
        };
        assert_eq!(step, Some(3));
        assert!(matches!(*source, DynamicsError::InvalidSchedule(_)));

        assert_eq!(partial.step_phases, vec![Phase::Ground; 4]);
        assert_relative_eq!(partial.dt, dt);
        for k in 0..4 {
            assert!(partial.values.contains(Key::joint_accel(0, k)));
        }
        assert_relative_eq!(partial.values.scalar(Key::time(4)).unwrap(), 4.0 * dt, epsilon = 1e-12);
    }
}
