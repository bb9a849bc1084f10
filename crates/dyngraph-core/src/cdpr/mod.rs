//! Planar cable-driven parallel robot
//!
//! A rigid end effector suspended by four cables from the corners of a
//! frame. Cable lengths, speeds and tensions are indexed like joints.

pub mod model;
pub mod terms;

pub use model::*;
pub use terms::*;
