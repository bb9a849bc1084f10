//! Cable robot tracking demonstration
//!
//! Plans a short straight-line move of the planar cable robot with the
//! full-horizon controller, then replays it with the one-step tension
//! distribution from measured cable lengths and speeds.

use nalgebra::Vector3;
use tracing_subscriber::EnvFilter;

use dyngraph_core::cdpr::{CdprParams, CdprState};
use dyngraph_planner::scenarios::cdpr_line;
use dyngraph_planner::{CdprIlqrController, CdprTensionController, CurrentState, IlqrConfig, PlannerError, TensionConfig};

fn main() -> Result<(), PlannerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    println!("=== Cable Robot Tracking ===\n");

    let cdpr = CdprParams::default();
    let start = Vector3::new(0.0, 1.5, 1.5);
    let desired = cdpr_line(start, Vector3::new(0.0, 1.7, 1.6), 20);

    let controller = CdprIlqrController::new(cdpr.clone(), CdprState::at_rest(start), desired.clone(), IlqrConfig::default())?;
    let report = controller.report();
    println!("Horizon: {} steps, {:?} after {} iterations", controller.num_steps(), report.status, report.iterations);
    println!("\n step |        x        z |  t0     t1     t2     t3   [N]");
    for k in (0..controller.num_steps()).step_by(4) {
        let pose = controller.pose(k)?;
        let t = controller.update(k)?.tensions;
        println!(
            " {k:4} | {:8.4} {:8.4} | {:6.2} {:6.2} {:6.2} {:6.2}",
            pose.y, pose.z, t[0], t[1], t[2], t[3]
        );
    }
    if let Some(gain) = controller.gains().first() {
        println!("\nFeedback gain at step 0:\n{gain:.1}");
    }

    println!("\nOne-step tension distribution from cable measurements:");
    let config = TensionConfig::default();
    let dt = config.dt;
    let tension = CdprTensionController::new(cdpr.clone(), desired, config)?;
    let mut state = CdprState::at_rest(start);
    for k in 0..5 {
        let measured = CurrentState::Measured {
            lengths: cdpr.cable_lengths(&state.pose),
            speeds: cdpr.cable_speeds(&state.pose, &state.twist),
        };
        let command = tension.update(&measured, k)?;
        println!(
            "  step {k}: x = {:.4}, tensions = [{:.2}, {:.2}, {:.2}, {:.2}]",
            command.pose.y, command.tensions[0], command.tensions[1], command.tensions[2], command.tensions[3]
        );
        // semi-implicit Euler, as in the controller
        let twist = state.twist + command.accel * dt;
        state = CdprState { pose: state.pose + twist * dt, twist };
    }

    Ok(())
}
