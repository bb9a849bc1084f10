//! Variable/constraint system
//!
//! Named variables ([`Key`]), owned assignments ([`Values`]), weighted
//! residual terms ([`Term`], [`TermSet`]) and the damped Gauss-Newton solver
//! over them ([`ConstraintSystem`]).

pub mod key;
pub mod values;
pub mod term;
pub mod system;
pub mod sensitivity;
pub mod penalty;

pub use key::*;
pub use values::*;
pub use term::*;
pub use system::*;
pub use penalty::*;
