//! Planar (x–z) rigid-body utilities
//!
//! Angles are measured counter-clockwise from +x towards +z. A pose is
//! `[θ, x, z]`, so a point `r` expressed in a link frame maps to world
//! coordinates as `p + R(θ) r` with
//!
//! ```text
//! R(θ) = [cos θ  −sin θ]
//!        [sin θ   cos θ]
//! ```

use nalgebra::{Matrix2, Vector2, Vector3};

/// Rotation matrix R(θ)
pub fn rot2(theta: f64) -> Matrix2<f64> {
    let (s, c) = theta.sin_cos();
    Matrix2::new(c, -s, s, c)
}

/// dR/dθ
pub fn rot2_derivative(theta: f64) -> Matrix2<f64> {
    let (s, c) = theta.sin_cos();
    Matrix2::new(-s, -c, c, -s)
}

/// Planar cross product `a × b = a_x b_z − a_z b_x`
pub fn cross2(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// `ω × r` for an out-of-plane angular rate ω
pub fn omega_cross(omega: f64, r: &Vector2<f64>) -> Vector2<f64> {
    Vector2::new(-omega * r.y, omega * r.x)
}

/// Rotate by +90°: `perp(r) = (−r_z, r_x)`
pub fn perp(r: &Vector2<f64>) -> Vector2<f64> {
    Vector2::new(-r.y, r.x)
}

/// Angle part of a planar pose, twist or wrench
pub fn angular(v: &Vector3<f64>) -> f64 {
    v.x
}

/// Linear part of a planar pose, twist or wrench
pub fn linear(v: &Vector3<f64>) -> Vector2<f64> {
    Vector2::new(v.y, v.z)
}

/// Assemble `[angular, linear]`
pub fn planar(angular: f64, linear: &Vector2<f64>) -> Vector3<f64> {
    Vector3::new(angular, linear.x, linear.y)
}

/// World position of a point fixed in a link frame
pub fn point_position(pose: &Vector3<f64>, r_local: &Vector2<f64>) -> Vector2<f64> {
    linear(pose) + rot2(pose.x) * r_local
}

/// World velocity of a point fixed in a link frame
pub fn point_velocity(pose: &Vector3<f64>, twist: &Vector3<f64>, r_local: &Vector2<f64>) -> Vector2<f64> {
    let r = rot2(pose.x) * r_local;
    linear(twist) + omega_cross(twist.x, &r)
}

/// World acceleration of a point fixed in a link frame: `a + α × r − ω² r`
pub fn point_acceleration(
    pose: &Vector3<f64>,
    twist: &Vector3<f64>,
    accel: &Vector3<f64>,
    r_local: &Vector2<f64>,
) -> Vector2<f64> {
    let r = rot2(pose.x) * r_local;
    linear(accel) + omega_cross(accel.x, &r) - r * (twist.x * twist.x)
}

/// Wrap an angle into (−π, π]
pub fn wrap_angle(theta: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let wrapped = (theta + std::f64::consts::PI).rem_euclid(two_pi) - std::f64::consts::PI;
    if wrapped <= -std::f64::consts::PI {
        wrapped + two_pi
    } else {
        wrapped
    }
}
