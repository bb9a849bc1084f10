//! Planar cable-driven parallel robot
//!
//! Four cables run from frame anchors `b_i` to end-effector anchors `a_i`
//! (in the end-effector frame). With `d_i = b_i − p − R(θ) a_i`:
//!
//! ```text
//! l_i = |d_i|,   u_i = d_i / l_i
//! l̇_i = −u_i · (v + ω × R a_i)
//! W_i = t_i [(R a_i) × u_i, u_i]
//! ```
//!
//! Cables pull, so each tension acts along `u_i` towards the frame.

use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::math::{cross2, linear, perp, rot2};

/// Link id of the end effector
pub const EE_ID: usize = 0;

/// Cable robot parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdprParams {
    /// Cable exit points on the frame [m]
    pub frame_anchors: Vec<Vector2<f64>>,
    /// Cable attachment points on the end effector, in its frame [m]
    pub ee_anchors: Vec<Vector2<f64>>,
    /// End-effector mass [kg]
    pub mass: f64,
    /// End-effector planar inertia [kg·m²]
    pub inertia: f64,
    /// Gravity [m/s²]
    pub gravity: Vector2<f64>,
    /// Minimum cable tension [N]
    pub tension_min: f64,
    /// Maximum cable tension [N]
    pub tension_max: f64,
}

impl Default for CdprParams {
    fn default() -> Self {
        Self {
            frame_anchors: vec![
                Vector2::new(3.0, 3.0),
                Vector2::new(3.0, 0.0),
                Vector2::new(0.0, 0.0),
                Vector2::new(0.0, 3.0),
            ],
            ee_anchors: vec![
                Vector2::new(0.15, 0.15),
                Vector2::new(0.15, -0.15),
                Vector2::new(-0.15, -0.15),
                Vector2::new(-0.15, 0.15),
            ],
            mass: 1.0,
            inertia: 0.01,
            gravity: Vector2::new(0.0, -crate::GRAVITY),
            tension_min: 0.0,
            tension_max: 100.0,
        }
    }
}

impl CdprParams {
    pub fn num_cables(&self) -> usize {
        self.frame_anchors.len()
    }

    pub fn tension_mid(&self) -> f64 {
        0.5 * (self.tension_min + self.tension_max)
    }

    /// Centroid of the frame anchors
    pub fn frame_center(&self) -> Vector2<f64> {
        self.frame_anchors.iter().sum::<Vector2<f64>>() / self.num_cables() as f64
    }
}

/// End-effector pose and twist
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CdprState {
    /// `[θ, x, z]`
    pub pose: Vector3<f64>,
    /// `[ω, vx, vz]`
    pub twist: Vector3<f64>,
}

impl CdprState {
    pub fn at_rest(pose: Vector3<f64>) -> Self {
        Self { pose, twist: Vector3::zeros() }
    }
}

/// Geometry of one cable at a pose
#[derive(Debug, Clone, Copy)]
pub struct CableGeometry {
    /// Cable length [m]
    pub length: f64,
    /// Unit vector from the end-effector anchor to the frame anchor
    pub direction: Vector2<f64>,
    /// `R(θ) a_i`: COM-to-anchor offset in the world frame [m]
    pub offset: Vector2<f64>,
}

impl CdprParams {
    pub fn cable(&self, pose: &Vector3<f64>, i: usize) -> CableGeometry {
        let offset = rot2(pose.x) * self.ee_anchors[i];
        let d = self.frame_anchors[i] - linear(pose) - offset;
        let length = d.norm();
        CableGeometry { length, direction: d / length, offset }
    }

    pub fn cable_lengths(&self, pose: &Vector3<f64>) -> DVector<f64> {
        DVector::from_iterator(self.num_cables(), (0..self.num_cables()).map(|i| self.cable(pose, i).length))
    }

    pub fn cable_speeds(&self, pose: &Vector3<f64>, twist: &Vector3<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.num_cables(),
            (0..self.num_cables()).map(|i| {
                let c = self.cable(pose, i);
                -c.direction.dot(&(linear(twist) + perp(&c.offset) * twist.x))
            }),
        )
    }

    /// Unit wrench `[(R a_i) × u_i, u_i]` of each cable, one column per cable
    pub fn wrench_matrix(&self, pose: &Vector3<f64>) -> DMatrix<f64> {
        let mut a = DMatrix::zeros(3, self.num_cables());
        for i in 0..self.num_cables() {
            let c = self.cable(pose, i);
            a[(0, i)] = cross2(&c.offset, &c.direction);
            a[(1, i)] = c.direction.x;
            a[(2, i)] = c.direction.y;
        }
        a
    }

    /// Total cable wrench needed for a twist acceleration
    pub fn required_wrench(&self, accel: &Vector3<f64>) -> Vector3<f64> {
        let f = (linear(accel) - self.gravity) * self.mass;
        Vector3::new(self.inertia * accel.x, f.x, f.y)
    }

    /// Minimum-norm deviation from the mid tension that produces `wrench`
    ///
    /// Directions the cables cannot span (e.g. the moment at a symmetric
    /// pose) are matched in the least-squares sense.
    pub fn distribute_tensions(&self, pose: &Vector3<f64>, wrench: &Vector3<f64>) -> DVector<f64> {
        let a = self.wrench_matrix(pose);
        let mid = DVector::from_element(self.num_cables(), self.tension_mid());
        let w = DVector::from_column_slice(wrench.as_slice());
        let residual = w - &a * &mid;
        match a.pseudo_inverse(1e-12) {
            Ok(pinv) => mid + pinv * residual,
            Err(_) => mid,
        }
    }
}
