//! Conditional gains
//!
//! Linear response of an optimum to a perturbation of some of its variables.
//! Clamping the `given` keys A and re-optimizing the rest R, the first-order
//! change satisfies the hard constraints exactly and minimizes the soft terms:
//!
//! ```text
//! J_h,R δR = −J_h,A δA                      (exact)
//! min ‖J_s,R δR + J_s,A δA‖²                 (over the remaining freedom)
//! ```
//!
//! The hard block is pseudo-inverted through its SVD; the soft terms then pick
//! the component in its null space. The result `δR = X δA` is returned
//! restricted to the target rows.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::{ConstraintSystem, Key, Ordering, Values};
use crate::error::{DynamicsError, Result};

impl ConstraintSystem {
    /// Gain matrix `∂target/∂given` at `values`
    ///
    /// `values` should be an optimum of this system. Rows follow `target`
    /// (flattened by key dimension), columns follow `given`.
    pub fn conditional_gain(&self, values: &Values, target: &[Key], given: &[Key]) -> Result<DMatrix<f64>> {
        if let Some(key) = target.iter().find(|k| !self.is_free(k) || given.contains(k)) {
            return Err(DynamicsError::NotAVariable(*key));
        }

        let remaining: Vec<Key> = self.free_keys().iter().filter(|k| !given.contains(k)).copied().collect();
        let ordering = Ordering::new(remaining.iter().chain(given.iter()), values)?;
        let n_r: usize = remaining.iter().map(|k| ordering.get(k).map_or(0, |(_, d)| d)).sum();
        let n_a = ordering.columns() - n_r;

        let lin = self.linearize(values, &ordering)?;
        let jh_r = lin.hard_jacobian.columns(0, n_r).clone_owned();
        let jh_a = lin.hard_jacobian.columns(n_r, n_a).clone_owned();
        let js_r = lin.soft_jacobian.columns(0, n_r).clone_owned();
        let js_a = lin.soft_jacobian.columns(n_r, n_a).clone_owned();

        let tolerance = self.settings.rank_tolerance;

        // particular solution of the hard block and its null space
        let hard = Pseudoinverse::new(&jh_r, tolerance);
        let x_hard = -(hard.solve(&jh_a));
        let null = hard.null_space();

        let x = if null.ncols() == 0 {
            x_hard
        } else {
            let m = &js_r * &null;
            let rhs = -(&js_r * &x_hard + &js_a);
            let soft = Pseudoinverse::new(&m, tolerance);
            if soft.rank < null.ncols() {
                let rank = hard.rank + soft.rank;
                debug!(rank, columns = n_r, "gain system rank deficient");
                return Err(DynamicsError::IllPosedSystem { rank, columns: n_r });
            }
            x_hard + &null * soft.solve(&rhs)
        };

        let rows: usize = target.iter().map(|k| k.dim()).sum();
        let mut gain = DMatrix::zeros(rows, n_a);
        let mut row = 0;
        for key in target {
            if let Some((offset, dim)) = ordering.get(key) {
                gain.rows_mut(row, dim).copy_from(&x.rows(offset, dim));
                row += dim;
            }
        }
        Ok(gain)
    }
}

/// SVD-based pseudoinverse with rank detection
pub(crate) struct Pseudoinverse {
    /// Retained left singular vectors (as columns)
    u: DMatrix<f64>,
    /// Retained right singular vectors (as columns)
    v: DMatrix<f64>,
    sigma: Vec<f64>,
    /// Right singular vectors with zero singular value
    null: DMatrix<f64>,
    pub(crate) rank: usize,
}

impl Pseudoinverse {
    pub(crate) fn new(matrix: &DMatrix<f64>, tolerance: f64) -> Self {
        let (m, n) = matrix.shape();
        if n == 0 {
            return Self {
                u: DMatrix::zeros(m, 0),
                v: DMatrix::zeros(0, 0),
                sigma: Vec::new(),
                null: DMatrix::zeros(0, 0),
                rank: 0,
            };
        }
        // pad to at least square so the full right basis is available
        let rows = m.max(n);
        let mut padded = DMatrix::zeros(rows, n);
        padded.rows_mut(0, m).copy_from(matrix);

        let svd = padded.svd(true, true);
        let (u_full, v_t) = match (svd.u, svd.v_t) {
            (Some(u), Some(v_t)) => (u, v_t),
            _ => (DMatrix::zeros(rows, n), DMatrix::zeros(n, n)),
        };
        let max = svd.singular_values.iter().cloned().fold(0.0, f64::max);

        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        for (i, s) in svd.singular_values.iter().enumerate() {
            if max > 0.0 && *s > tolerance * max {
                kept.push(i);
            } else {
                dropped.push(i);
            }
        }

        let mut u = DMatrix::zeros(m, kept.len());
        let mut v = DMatrix::zeros(n, kept.len());
        let mut sigma = Vec::with_capacity(kept.len());
        for (c, &i) in kept.iter().enumerate() {
            u.set_column(c, &u_full.column(i).rows(0, m));
            v.set_column(c, &v_t.row(i).transpose());
            sigma.push(svd.singular_values[i]);
        }
        let mut null = DMatrix::zeros(n, dropped.len());
        for (c, &i) in dropped.iter().enumerate() {
            null.set_column(c, &v_t.row(i).transpose());
        }

        Self { u, v, sigma, null, rank: kept.len() }
    }

    /// Minimum-norm least-squares solution `A⁺ b`
    fn solve(&self, b: &DMatrix<f64>) -> DMatrix<f64> {
        let mut projected = self.u.transpose() * b;
        for (i, s) in self.sigma.iter().enumerate() {
            projected.row_mut(i).unscale_mut(*s);
        }
        &self.v * projected
    }

    /// `A⁺ b` for a single right-hand side
    pub(crate) fn solve_vector(&self, b: &DVector<f64>) -> DVector<f64> {
        let mut projected = self.u.transpose() * b;
        for (i, s) in self.sigma.iter().enumerate() {
            projected[i] /= *s;
        }
        &self.v * projected
    }

    pub(crate) fn null_space(&self) -> DMatrix<f64> {
        self.null.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PriorTerm, SolverSettings, WeightModel};
    use approx::assert_relative_eq;

    fn scalar(v: f64) -> DVector<f64> {
        DVector::from_element(1, v)
    }

    #[test]
    fn test_hard_chain_gain() {
        // y = 2 x, z = y + x  =>  dz/dx = 3
        let x = Key::joint_angle(0, 0);
        let y = Key::joint_angle(1, 0);
        let z = Key::joint_angle(2, 0);
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.new_variables([x, y, z]);
        system.add_fn_term(vec![x, y], 1, |v| scalar(v[1][0] - 2.0 * v[0][0]), WeightModel::Hard);
        system.add_fn_term(vec![x, y, z], 1, |v| scalar(v[2][0] - v[1][0] - v[0][0]), WeightModel::Hard);
        system.add_term(PriorTerm::scalar(x, 1.0), WeightModel::Hard);

        let mut values = Values::new();
        values.set_scalar(x, 1.0).unwrap();
        values.set_scalar(y, 2.0).unwrap();
        values.set_scalar(z, 3.0).unwrap();

        let gain = system.conditional_gain(&values, &[z], &[x]).unwrap();
        assert_eq!(gain.shape(), (1, 1));
        assert_relative_eq!(gain[(0, 0)], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_soft_terms_resolve_null_space() {
        // x + y = a exactly, x pulled to 0 with weight 1, y with weight 3
        // => x = 3a/4, y = a/4
        let a = Key::joint_angle(0, 0);
        let x = Key::joint_angle(1, 0);
        let y = Key::joint_angle(2, 0);
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.new_variables([a, x, y]);
        system.add_fn_term(vec![a, x, y], 1, |v| scalar(v[1][0] + v[2][0] - v[0][0]), WeightModel::Hard);
        system.add_term(PriorTerm::scalar(a, 1.0), WeightModel::Hard);
        system.add_term(PriorTerm::scalar(x, 0.0), WeightModel::precision(1.0));
        system.add_term(PriorTerm::scalar(y, 0.0), WeightModel::precision(3.0));

        let mut values = Values::new();
        values.set_scalar(a, 1.0).unwrap();
        values.set_scalar(x, 0.75).unwrap();
        values.set_scalar(y, 0.25).unwrap();

        let gain = system.conditional_gain(&values, &[x, y], &[a]).unwrap();
        assert_relative_eq!(gain[(0, 0)], 0.75, epsilon = 1e-9);
        assert_relative_eq!(gain[(1, 0)], 0.25, epsilon = 1e-9);
    }

    #[test]
    fn test_target_must_be_free() {
        let x = Key::joint_angle(0, 0);
        let c = Key::joint_angle(1, 0);
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.new_variable(x);
        system.add_fn_term(vec![x, c], 1, |v| scalar(v[0][0] - v[1][0]), WeightModel::Hard);

        let mut values = Values::new();
        values.set_scalar(x, 0.0).unwrap();
        values.set_scalar(c, 0.0).unwrap();
        let err = system.conditional_gain(&values, &[c], &[x]).unwrap_err();
        assert!(matches!(err, DynamicsError::NotAVariable(k) if k == c));
    }

    #[test]
    fn test_undetermined_response_is_ill_posed() {
        let a = Key::joint_angle(0, 0);
        let x = Key::joint_angle(1, 0);
        let y = Key::joint_angle(2, 0);
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.new_variables([a, x, y]);
        system.add_fn_term(vec![a, x, y], 1, |v| scalar(v[1][0] + v[2][0] - v[0][0]), WeightModel::Hard);

        let mut values = Values::new();
        values.set_scalar(a, 0.0).unwrap();
        values.set_scalar(x, 0.0).unwrap();
        values.set_scalar(y, 0.0).unwrap();
        let err = system.conditional_gain(&values, &[x], &[a]).unwrap_err();
        assert!(matches!(err, DynamicsError::IllPosedSystem { .. }));
    }
}
