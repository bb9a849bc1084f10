//! Hybrid forward simulation
//!
//! Contact phases and their schedules, transition predicates, and the
//! step-by-step simulator of the jumping robot.

pub mod phase;
pub mod config;
pub mod simulator;

pub use phase::*;
pub use config::*;
pub use simulator::*;
