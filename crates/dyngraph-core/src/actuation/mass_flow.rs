//! Mass-flow sub-solver
//!
//! Isothermal, friction-limited compressible flow from the source tank
//! through the supply tube into an actuator:
//!
//! ```text
//! C(f) ṁ|ṁ| = p_s² − p_a²,        C(f) = 16 f L (R T) / (π² D⁵)
//! Re = 4|ṁ| / (π D μ)
//! ```
//!
//! The Darcy friction factor depends on the flow itself, so ṁ is found by
//! fixed-point iteration starting from the fully rough friction factor.
//! The valve gates the delivered flow with a smooth opening
//! `o(t) = max(0, σ((t − To)/τ) − σ((t − Tc)/τ))`.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DynamicsError, Result};

/// Upper Reynolds number of the laminar regime
pub const LAMINAR_REYNOLDS: f64 = 2300.0;
/// Lower Reynolds number of the fully turbulent regime
pub const TURBULENT_REYNOLDS: f64 = 4000.0;

/// Gas, tube and tank properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PneumaticParams {
    /// Atmospheric pressure [Pa]
    pub atmospheric_pressure: f64,
    /// Specific gas constant times temperature, R·T [J/kg]
    pub gas_constant_temperature: f64,
    /// Supply tube inner diameter [m]
    pub tube_diameter: f64,
    /// Supply tube length [m]
    pub tube_length: f64,
    /// Absolute tube wall roughness [m]
    pub tube_roughness: f64,
    /// Dynamic viscosity of air [Pa·s]
    pub viscosity: f64,
    /// Valve opening/closing time constant [s]
    pub valve_time_constant: f64,
    /// Source tank volume [m³]
    pub source_volume: f64,
}

impl Default for PneumaticParams {
    fn default() -> Self {
        Self {
            atmospheric_pressure: 101_325.0,
            gas_constant_temperature: 287.05 * 293.15, // air at 20 °C
            tube_diameter: 0.004,
            tube_length: 0.45,
            tube_roughness: 1.5e-6, // drawn tubing
            viscosity: 1.8e-5,
            valve_time_constant: 0.005,
            source_volume: 1.475e-3,
        }
    }
}

impl PneumaticParams {
    /// Coefficient `C(f)` of the flow relation
    pub fn tube_coefficient(&self, friction: f64) -> f64 {
        16.0 * friction * self.tube_length * self.gas_constant_temperature / (PI * PI * self.tube_diameter.powi(5))
    }

    /// Reynolds number of a mass flow rate
    pub fn reynolds(&self, mdot: f64) -> f64 {
        4.0 * mdot.abs() / (PI * self.tube_diameter * self.viscosity)
    }

    pub fn relative_roughness(&self) -> f64 {
        self.tube_roughness / self.tube_diameter
    }
}

/// Fixed-point iteration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MassFlowConfig {
    /// Relative change between iterates at which the iteration stops
    pub tolerance: f64,
    /// Iteration cap
    pub max_iterations: usize,
    /// Standard deviation of the pressure measurements [Pa]
    pub pressure_sigma: f64,
}

impl Default for MassFlowConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            max_iterations: 50,
            pressure_sigma: 100.0,
        }
    }
}

/// Result of the sub-solve for one actuator at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassFlow {
    /// Delivered flow `o(t)·ṁ_tube` [kg/s]
    pub rate: f64,
    /// First-order uncertainty of `rate` from the pressure noise [kg/s]
    pub sigma: f64,
    /// Flow the tube would carry with the valve fully open [kg/s]
    pub tube_rate: f64,
    /// Valve opening in [0, 1]
    pub opening: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Haaland friction factor (turbulent)
pub fn haaland_friction(reynolds: f64, relative_roughness: f64) -> f64 {
    let inv_sqrt = -1.8 * ((relative_roughness / 3.7).powf(1.11) + 6.9 / reynolds).log10();
    1.0 / (inv_sqrt * inv_sqrt)
}

/// Friction factor of a fully rough tube (Re → ∞)
pub fn fully_rough_friction(relative_roughness: f64) -> f64 {
    let inv_sqrt = -1.8 * (relative_roughness / 3.7).powf(1.11).log10();
    1.0 / (inv_sqrt * inv_sqrt)
}

/// Darcy friction factor
///
/// `64/Re` below [`LAMINAR_REYNOLDS`], Haaland above [`TURBULENT_REYNOLDS`],
/// linear in Re across the transition band.
pub fn friction_factor(reynolds: f64, relative_roughness: f64) -> f64 {
    if reynolds < LAMINAR_REYNOLDS {
        64.0 / reynolds.max(f64::MIN_POSITIVE)
    } else if reynolds > TURBULENT_REYNOLDS {
        haaland_friction(reynolds, relative_roughness)
    } else {
        let lam = 64.0 / LAMINAR_REYNOLDS;
        let turb = haaland_friction(TURBULENT_REYNOLDS, relative_roughness);
        let s = (reynolds - LAMINAR_REYNOLDS) / (TURBULENT_REYNOLDS - LAMINAR_REYNOLDS);
        lam + s * (turb - lam)
    }
}

/// Logistic function
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Smooth valve opening at time `t`
pub fn valve_opening(t: f64, open_time: f64, close_time: f64, time_constant: f64) -> f64 {
    let o = sigmoid((t - open_time) / time_constant) - sigmoid((t - close_time) / time_constant);
    o.max(0.0)
}

/// Fixed-point solution of the tube flow
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TubeFlow {
    pub rate: f64,
    pub iterations: usize,
}

/// Solve `C(f(Re(ṁ))) ṁ|ṁ| = p_s² − p_a²` for ṁ
///
/// Positive flow runs from the source into the actuator.
pub fn tube_mass_flow(
    source_pressure: f64,
    actuator_pressure: f64,
    params: &PneumaticParams,
    config: &MassFlowConfig,
) -> Result<TubeFlow> {
    let delta = source_pressure * source_pressure - actuator_pressure * actuator_pressure;
    if delta == 0.0 {
        return Ok(TubeFlow { rate: 0.0, iterations: 0 });
    }
    let eps = params.relative_roughness();
    let from_friction = |f: f64| delta.signum() * (delta.abs() / params.tube_coefficient(f)).sqrt();

    let mut mdot = from_friction(fully_rough_friction(eps));
    for iteration in 1..=config.max_iterations {
        let f = friction_factor(params.reynolds(mdot), eps);
        let next = from_friction(f);
        let change = (next - mdot).abs();
        mdot = next;
        if change <= config.tolerance * mdot.abs().max(1e-12) {
            return Ok(TubeFlow { rate: mdot, iterations: iteration });
        }
    }
    Err(DynamicsError::SubSolveNonConvergence { iterations: config.max_iterations, last_iterate: mdot })
}

/// Delivered mass flow into an actuator at time `t`
///
/// A tube flow that hits the iteration cap is returned from its last iterate
/// with `converged` unset.
pub fn solve_mass_flow(
    open_time: f64,
    close_time: f64,
    actuator_pressure: f64,
    source_pressure: f64,
    t: f64,
    params: &PneumaticParams,
    config: &MassFlowConfig,
) -> Result<MassFlow> {
    let (tube, converged) = match tube_mass_flow(source_pressure, actuator_pressure, params, config) {
        Ok(tube) => (tube, true),
        Err(DynamicsError::SubSolveNonConvergence { iterations, last_iterate }) => {
            debug!(t, iterations, last_iterate, "tube flow stopped at the iteration cap");
            (TubeFlow { rate: last_iterate, iterations }, false)
        }
        Err(err) => return Err(err),
    };
    let opening = valve_opening(t, open_time, close_time, params.valve_time_constant);

    // ∂ṁ/∂p_x = ṁ p_x / Δ at fixed friction
    let delta = source_pressure * source_pressure - actuator_pressure * actuator_pressure;
    let sigma = if delta == 0.0 {
        0.0
    } else {
        let gain = tube.rate / delta;
        opening * config.pressure_sigma * (gain * source_pressure).hypot(gain * actuator_pressure)
    };

    debug!(t, rate = opening * tube.rate, iterations = tube.iterations, "mass flow");
    Ok(MassFlow {
        rate: opening * tube.rate,
        sigma: sigma.abs(),
        tube_rate: tube.rate,
        opening,
        iterations: tube.iterations,
        converged,
    })
}

/// Relative defect of the flow relation at a given ṁ
///
/// Evaluates the friction factor at ṁ itself, so a converged fixed point
/// gives zero up to the iteration tolerance.
pub fn flow_equation_residual(mdot: f64, source_pressure: f64, actuator_pressure: f64, params: &PneumaticParams) -> f64 {
    let delta = source_pressure * source_pressure - actuator_pressure * actuator_pressure;
    let f = friction_factor(params.reynolds(mdot), params.relative_roughness());
    let lhs = params.tube_coefficient(f) * mdot * mdot.abs();
    let scale = if delta == 0.0 { source_pressure * source_pressure } else { delta.abs() };
    let scale = scale.max(f64::MIN_POSITIVE);
    (lhs - delta) / scale
}
