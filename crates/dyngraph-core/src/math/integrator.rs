//! Integration rules
//!
//! Explicit Euler for the forward simulator, and the residual forms of the
//! trapezoidal and semi-implicit Euler rules used as collocation terms.

use nalgebra::Vector3;

/// Explicit Euler step `x + dt·ẋ`
pub fn euler(x: f64, xdot: f64, dt: f64) -> f64 {
    x + dt * xdot
}

/// Explicit Euler step for planar vectors
pub fn euler_vec3(x: &Vector3<f64>, xdot: &Vector3<f64>, dt: f64) -> Vector3<f64> {
    x + xdot * dt
}

/// Trapezoidal rule residual
///
/// ```text
/// x₁ − x₀ − dt/2 · (ẋ₀ + ẋ₁)
/// ```
pub fn trapezoidal_residual(x0: f64, x1: f64, xdot0: f64, xdot1: f64, dt: f64) -> f64 {
    x1 - x0 - 0.5 * dt * (xdot0 + xdot1)
}

/// Semi-implicit Euler for second-order systems
///
/// Velocity is updated first, and the new velocity drives the position:
///
/// ```text
/// v₁ = v₀ + dt·a₀
/// x₁ = x₀ + dt·v₁
/// ```
///
/// # Returns
/// (new_position, new_velocity)
pub fn semi_implicit_euler(
    pos: &Vector3<f64>,
    vel: &Vector3<f64>,
    acc: &Vector3<f64>,
    dt: f64,
) -> (Vector3<f64>, Vector3<f64>) {
    let new_vel = vel + acc * dt;
    let new_pos = pos + new_vel * dt;
    (new_pos, new_vel)
}

/// Inverse of [`semi_implicit_euler`]: velocities and accelerations that carry
/// a pose sequence exactly through the rule
///
/// The first velocity is `v0`; returns `(twists, accels)` with one twist per
/// pose and one acceleration per transition.
pub fn semi_implicit_euler_inverse(
    poses: &[Vector3<f64>],
    v0: &Vector3<f64>,
    dt: f64,
) -> (Vec<Vector3<f64>>, Vec<Vector3<f64>>) {
    let mut twists = Vec::with_capacity(poses.len());
    let mut accels = Vec::with_capacity(poses.len().saturating_sub(1));
    twists.push(*v0);
    for k in 1..poses.len() {
        let v = (poses[k] - poses[k - 1]) / dt;
        accels.push((v - twists[k - 1]) / dt);
        twists.push(v);
    }
    (twists, accels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_euler_exponential_decay() {
        // dx/dt = −x, x(0) = 1
        let dt = 1e-4;
        let mut x = 1.0;
        for _ in 0..10_000 {
            x = euler(x, -x, dt);
        }
        assert_relative_eq!(x, (-1.0f64).exp(), epsilon = 1e-4);
    }

    #[test]
    fn test_trapezoid_exact_for_linear_rate() {
        // ẋ = t  =>  x(1) − x(0) = 1/2
        assert_relative_eq!(trapezoidal_residual(0.0, 0.5, 0.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_semi_implicit_round_trip() {
        let dt = 0.01;
        let mut pos = Vector3::new(0.1, 1.0, 1.0);
        let mut vel = Vector3::new(0.0, 0.5, -0.2);
        let acc = Vector3::new(0.3, 0.0, -1.0);
        let mut poses = vec![pos];
        let v0 = vel;
        for _ in 0..5 {
            let (p, v) = semi_implicit_euler(&pos, &vel, &acc, dt);
            pos = p;
            vel = v;
            poses.push(pos);
        }

        let (twists, accels) = semi_implicit_euler_inverse(&poses, &v0, dt);
        assert_eq!(twists.len(), 6);
        assert_eq!(accels.len(), 5);
        for a in &accels {
            assert_relative_eq!(*a, acc, epsilon = 1e-8);
        }
        assert_relative_eq!(twists[5], vel, epsilon = 1e-10);
    }
}
