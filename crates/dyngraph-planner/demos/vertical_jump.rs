//! Vertical jump demonstration
//!
//! Simulates the pneumatic jumping robot from a crouch until the apex of its
//! flight, then refines the trajectory with multi-phase collocation.
//!
//! Run with `RUST_LOG=dyngraph_planner=info,dyngraph_core=info` for solver
//! progress.

use tracing_subscriber::EnvFilter;

use dyngraph_core::dynamics::JumpingRobot;
use dyngraph_core::graph::Key;
use dyngraph_planner::{vertical_jump, JumpScenario, PlannerError};

fn main() -> Result<(), PlannerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    println!("=== Vertical Jump ===\n");

    let robot = JumpingRobot::default();
    let mut scenario = JumpScenario::default();
    scenario.simulation.max_steps = 120;

    println!("Crouch lean: {:.2} rad", scenario.crouch);
    println!("Source pressure: {:.0} Pa", scenario.controls.source_pressure);
    println!("Valves: open {:?} s, close {:?} s\n", scenario.controls.valve_open, scenario.controls.valve_close);

    let outcome = vertical_jump(&robot, &scenario)?;
    let sim = &outcome.simulation;
    let schedule = &outcome.optimization.schedule;

    println!("Simulated {} steps at dt = {} s", sim.num_steps(), sim.dt);
    for (s, segment) in schedule.segments().iter().enumerate() {
        println!("  segment {s}: {:?} x {} steps", segment.phase, segment.len);
    }

    let report = &outcome.optimization.report;
    println!("\nOptimization: {:?} after {} iterations", report.status, report.iterations);
    println!("  error {:.3e} -> {:.3e}", report.initial_error, report.final_error);

    let last = schedule.num_steps() - 1;
    let simulated = sim.values.vector3(Key::pose(robot.robot.base, last))?.z;
    println!("\nTorso height at the last step:");
    println!("  simulated: {simulated:.4} m");
    println!("  optimized: {:.4} m", outcome.final_height(&robot)?);

    Ok(())
}
