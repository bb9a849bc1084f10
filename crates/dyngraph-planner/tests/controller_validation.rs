//! Planner validation
//!
//! End-to-end checks of the planner pipelines:
//! 1. Collocation optimizer from a simulated warm start
//! 2. Full-horizon CDPR controller holding still, with closed-form gains,
//!    and following a moving path
//! 3. One-step tension distribution with known and measured state

use approx::assert_relative_eq;
use nalgebra::{DVector, Vector3};

use dyngraph_core::cdpr::{CdprParams, CdprState};
use dyngraph_core::dynamics::JumpingRobot;
use dyngraph_core::graph::Key;
use dyngraph_core::simulation::Phase;
use dyngraph_planner::config::{IlqrConfig, TensionConfig};
use dyngraph_planner::scenarios::{budgeted_jump, cdpr_line, JumpScenario};
use dyngraph_planner::{CdprIlqrController, CdprTensionController, CurrentState, TrajectoryOptimizer};

mod collocation_tests {
    use super::*;

    #[test]
    fn test_short_ground_push() {
        let jr = JumpingRobot::default();
        let scenario = JumpScenario::default();
        let outcome = budgeted_jump(&jr, &scenario, &[(Phase::Ground, 4)]).unwrap();
        let result = &outcome.optimization;
        assert!(result.report.converged(), "{:?}", result.report.status);

        // rebuild the same system to inspect its sets at the solution
        let optimizer = TrajectoryOptimizer::new(&jr, scenario.optimizer.clone());
        let warm = optimizer
            .warm_start(&result.schedule, &outcome.simulation.values, outcome.simulation.dt)
            .unwrap();
        let system = optimizer.build(&result.schedule, &scenario.controls, &warm, outcome.simulation.dt).unwrap();
        let collocation = system.set("collocation").unwrap();
        assert!(collocation.max_residual(result.values()).unwrap() <= 1e-6);

        // hard valve priors keep the inputs
        for a in 0..jr.actuators.len() {
            let open = result.values().scalar(Key::valve_open_time(a)).unwrap();
            let close = result.values().scalar(Key::valve_close_time(a)).unwrap();
            assert_relative_eq!(open, scenario.controls.valve_open[a], epsilon = 1e-9);
            assert_relative_eq!(close, scenario.controls.valve_close[a], epsilon = 1e-9);
        }
        assert_eq!(result.time_steps().unwrap(), vec![outcome.simulation.dt]);
    }
}

mod cdpr_gain_tests {
    use super::*;

    #[test]
    fn test_no_motion_gains() {
        let cdpr = CdprParams::default();
        let x0 = CdprState::at_rest(Vector3::new(0.0, 1.5, 1.5));
        let config = IlqrConfig::default();
        let dt = config.dt;
        let controller = CdprIlqrController::new(cdpr.clone(), x0, vec![x0.pose; 3], config).unwrap();
        assert!(controller.report().converged());

        for k in 0..3 {
            assert_relative_eq!(controller.pose(k).unwrap(), x0.pose, epsilon = 1e-9);
            // holding still only fights gravity
            let produced = cdpr.wrench_matrix(&x0.pose) * controller.update(k).unwrap().tensions;
            assert_relative_eq!(produced[1], 0.0, epsilon = 1e-6);
            assert_relative_eq!(produced[2], cdpr.mass * 9.8, epsilon = 1e-6);
        }

        // −I/dt composed with the minimum-norm tension response m/(2√2·dt)
        let scale = cdpr.mass / (2.0 * 2.0f64.sqrt() * dt * dt);
        for gain in controller.gains() {
            assert_eq!(gain.shape(), (4, 3));
            for i in 0..4 {
                let u = cdpr.cable(&x0.pose, i).direction;
                assert!(gain[(i, 0)].abs() < 1e-6 * scale, "{}", gain[(i, 0)]);
                assert_relative_eq!(gain[(i, 1)], -scale * u.x.signum(), max_relative = 1e-6);
                assert_relative_eq!(gain[(i, 2)], -scale * u.y.signum(), max_relative = 1e-6);
            }
        }
    }

    #[test]
    fn test_feedback_pushes_back() {
        let cdpr = CdprParams::default();
        let x0 = CdprState::at_rest(Vector3::new(0.0, 1.5, 1.5));
        let controller = CdprIlqrController::new(cdpr.clone(), x0, vec![x0.pose; 3], IlqrConfig::default()).unwrap();
        let planned = cdpr.wrench_matrix(&x0.pose) * controller.update(0).unwrap().tensions;

        // displaced to +x, the extra cable force points to −x
        let displaced = x0.pose + Vector3::new(0.0, 1e-3, 0.0);
        let sample = controller.update_with_feedback(0, &displaced).unwrap();
        let extra = cdpr.wrench_matrix(&x0.pose) * &sample.tensions - planned;
        assert!(extra[1] < 0.0);
        assert!(extra[2].abs() < 1e-6 * extra[1].abs());
    }
}

mod cdpr_tracking_tests {
    use super::*;

    /// Semi-implicit Euler step of the end effector under cable tensions
    fn step(cdpr: &CdprParams, state: &CdprState, tensions: &DVector<f64>, dt: f64) -> CdprState {
        let wrench = cdpr.wrench_matrix(&state.pose) * tensions;
        let accel = Vector3::new(
            wrench[0] / cdpr.inertia,
            wrench[1] / cdpr.mass + cdpr.gravity.x,
            wrench[2] / cdpr.mass + cdpr.gravity.y,
        );
        let twist = state.twist + accel * dt;
        CdprState { pose: state.pose + twist * dt, twist }
    }

    #[test]
    fn test_moving_path_is_followed() {
        let cdpr = CdprParams::default();
        let x0 = CdprState::at_rest(Vector3::new(0.0, 1.5, 1.5));
        // hold for one step, then move 5 cm per step
        let mut desired = vec![x0.pose];
        desired.extend((0..9).map(|k| Vector3::new(0.0, 1.5 + k as f64 / 20.0, 1.5)));
        let config = IlqrConfig { dt: 0.1, ..Default::default() };
        let dt = config.dt;

        let controller = CdprIlqrController::new(cdpr.clone(), x0, desired.clone(), config).unwrap();
        assert!(controller.report().converged(), "{:?}", controller.report().status);
        for (k, pose) in desired.iter().enumerate() {
            assert_relative_eq!(controller.pose(k).unwrap(), *pose, epsilon = 1e-6);
        }

        // replaying the planned tensions with feedback reproduces the path
        let mut state = x0;
        for (k, pose) in desired.iter().enumerate() {
            assert_relative_eq!(state.pose, *pose, epsilon = 1e-6);
            let sample = controller.update_with_feedback(k, &state.pose).unwrap();
            state = step(&cdpr, &state, &sample.tensions, dt);
        }
    }
}

mod tension_tests {
    use super::*;

    fn controller(cdpr: &CdprParams) -> CdprTensionController {
        let desired = cdpr_line(Vector3::new(0.0, 1.5, 1.5), Vector3::new(0.0, 1.6, 1.5), 11);
        CdprTensionController::new(cdpr.clone(), desired, TensionConfig::default()).unwrap()
    }

    #[test]
    fn test_known_state_round_trip() {
        let cdpr = CdprParams::default();
        let controller = controller(&cdpr);
        let pose = Vector3::new(0.0, 1.5, 1.5);
        let command = controller.update(&CurrentState::Known { pose, twist: Vector3::zeros() }, 0).unwrap();
        assert!(command.report.converged());

        assert_relative_eq!(command.next_pose, controller.desired(1), epsilon = 1e-9);
        // x1 = x0 + dt·(v0 + dt·a0) from rest
        let dt = TensionConfig::default().dt;
        assert_relative_eq!(command.accel, (controller.desired(1) - pose) / (dt * dt), max_relative = 1e-6);

        let produced: Vector3<f64> = (cdpr.wrench_matrix(&pose) * &command.tensions).fixed_rows::<3>(0).into_owned();
        assert_relative_eq!(produced, cdpr.required_wrench(&command.accel), epsilon = 1e-6);
        let summed: Vector3<f64> = command.wrenches.iter().sum();
        assert_relative_eq!(summed, produced, epsilon = 1e-6);
    }

    #[test]
    fn test_measured_state_matches_known() {
        let cdpr = CdprParams::default();
        let controller = controller(&cdpr);
        let pose = Vector3::new(0.02, 1.52, 1.48);
        let twist = Vector3::new(0.0, 0.5, 0.1);

        let known = controller.update(&CurrentState::Known { pose, twist }, 2).unwrap();
        let measured = CurrentState::Measured {
            lengths: cdpr.cable_lengths(&pose),
            speeds: cdpr.cable_speeds(&pose, &twist),
        };
        let fk = controller.update(&measured, 2).unwrap();

        assert_relative_eq!(fk.pose, pose, epsilon = 1e-8);
        assert_relative_eq!(fk.twist, twist, epsilon = 1e-8);
        assert_relative_eq!(fk.tensions, known.tensions, epsilon = 1e-4);
    }

    #[test]
    fn test_goal_is_clamped_past_the_end() {
        let cdpr = CdprParams::default();
        let controller = controller(&cdpr);
        let end = Vector3::new(0.0, 1.6, 1.5);
        let command = controller.update(&CurrentState::Known { pose: end, twist: Vector3::zeros() }, 20).unwrap();
        assert_relative_eq!(command.next_pose, end, epsilon = 1e-9);
        // holding still only fights gravity
        let produced = cdpr.wrench_matrix(&end) * &command.tensions;
        assert_relative_eq!(produced[2], cdpr.mass * 9.8, epsilon = 1e-6);
        assert_eq!(command.tensions.len(), 4);
    }
}
