//! Constraint system and Levenberg-Marquardt solver
//!
//! The solve repeatedly linearizes every term at the current assignment.
//! Hard rows are solved by a Gauss-Newton step through their pseudoinverse,
//! and soft rows (scaled by `√precision`) by a damped Gauss-Newton step
//! restricted to the null space of the hard Jacobian. Rank-deficient hard
//! blocks, such as redundant constraints, are truncated by the SVD. A step is
//! accepted only if it lowers the total weighted squared residual, where hard
//! rows count with `hard_weight`.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::sensitivity::Pseudoinverse;
use super::{Key, Term, TermSet, Values, WeightModel};
use crate::error::{DynamicsError, Result};

/// Levenberg-Marquardt settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Iteration cap
    pub max_iterations: usize,
    /// Stop when the total error falls below this value
    pub absolute_error_tolerance: f64,
    /// Stop when an accepted step lowers the error by less than this fraction
    pub relative_error_tolerance: f64,
    /// Stop when an accepted step is shorter than this (relative to ‖x‖)
    pub step_tolerance: f64,
    /// Largest hard-constraint residual accepted as satisfied
    pub constraint_tolerance: f64,
    /// Initial damping
    pub lambda_initial: f64,
    /// Damping increase/decrease factor
    pub lambda_factor: f64,
    /// Damping floor
    pub lambda_min: f64,
    /// Damping ceiling; exceeding it ends the solve
    pub lambda_max: f64,
    /// Square-root weight applied to hard constraint rows
    pub hard_weight: f64,
    /// Relative threshold on the R diagonal below which a column is rank deficient
    pub rank_tolerance: f64,
    /// Floor on the Marquardt scaling diagonal
    pub min_diagonal: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            absolute_error_tolerance: 1e-14,
            relative_error_tolerance: 1e-10,
            step_tolerance: 1e-12,
            constraint_tolerance: 1e-6,
            lambda_initial: 1e-5,
            lambda_factor: 10.0,
            lambda_min: 1e-12,
            lambda_max: 1e10,
            hard_weight: 1e6,
            rank_tolerance: 1e-12,
            min_diagonal: 1e-9,
        }
    }
}

/// Which stopping rule ended a converged solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceReason {
    ResidualTolerance,
    RelativeDecrease,
    StepTolerance,
}

/// Outcome of a solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Converged(ConvergenceReason),
    /// Iteration cap reached
    MaxIterations,
    /// No further progress while hard constraints remain violated
    Stalled,
    /// The linearized system has no unique solution
    IllPosed { rank: usize, columns: usize },
}

/// Result of a solve, converged or not
#[derive(Debug, Clone)]
pub struct SolveReport {
    /// Best assignment found
    pub values: Values,
    pub status: SolveStatus,
    /// Number of linearizations, including a final one whose trial steps
    /// were all rejected
    pub iterations: usize,
    /// `‖W r‖` at `values`
    pub residual_norm: f64,
    pub initial_error: f64,
    pub final_error: f64,
}

impl SolveReport {
    pub fn converged(&self) -> bool {
        matches!(self.status, SolveStatus::Converged(_))
    }

    /// Enforce convergence, mapping failures onto the error taxonomy
    pub fn into_values(self) -> Result<Values> {
        match self.status {
            SolveStatus::Converged(_) => Ok(self.values),
            SolveStatus::IllPosed { rank, columns } => Err(DynamicsError::IllPosedSystem { rank, columns }),
            SolveStatus::MaxIterations | SolveStatus::Stalled => Err(DynamicsError::OptimizationNonConvergence {
                iterations: self.iterations,
                residual_norm: self.residual_norm,
            }),
        }
    }
}

/// Column layout of the free variables
#[derive(Debug, Clone, Default)]
pub struct Ordering {
    offsets: BTreeMap<Key, (usize, usize)>,
    order: Vec<Key>,
    columns: usize,
}

impl Ordering {
    /// Lay out `keys` in iteration order, taking dimensions from `values`
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a Key>, values: &Values) -> Result<Self> {
        let mut ordering = Self::default();
        for key in keys {
            let dim = values.get(*key)?.len();
            ordering.offsets.insert(*key, (ordering.columns, dim));
            ordering.order.push(*key);
            ordering.columns += dim;
        }
        Ok(ordering)
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// `(offset, dim)` of a key, if it is part of the layout
    pub fn get(&self, key: &Key) -> Option<(usize, usize)> {
        self.offsets.get(key).copied()
    }

    pub fn keys(&self) -> &[Key] {
        &self.order
    }
}

/// Jacobian and residual split into hard and soft rows
///
/// Hard rows are unweighted; soft rows are whitened.
#[derive(Debug, Clone)]
pub struct Linearization {
    pub hard_jacobian: DMatrix<f64>,
    pub hard_residual: DVector<f64>,
    pub soft_jacobian: DMatrix<f64>,
    pub soft_residual: DVector<f64>,
}

impl Linearization {
    /// Stack `[hard_weight·hard; soft]`
    pub fn whitened(&self, hard_weight: f64) -> (DMatrix<f64>, DVector<f64>) {
        let mh = self.hard_jacobian.nrows();
        let ms = self.soft_jacobian.nrows();
        let n = self.hard_jacobian.ncols();
        let mut jacobian = DMatrix::zeros(mh + ms, n);
        let mut residual = DVector::zeros(mh + ms);
        jacobian.rows_mut(0, mh).copy_from(&(&self.hard_jacobian * hard_weight));
        jacobian.rows_mut(mh, ms).copy_from(&self.soft_jacobian);
        residual.rows_mut(0, mh).copy_from(&(&self.hard_residual * hard_weight));
        residual.rows_mut(mh, ms).copy_from(&self.soft_residual);
        (jacobian, residual)
    }
}

/// Named sets of weighted terms plus the set of free variables
#[derive(Debug, Clone, Default)]
pub struct ConstraintSystem {
    sets: Vec<(String, TermSet)>,
    free: BTreeSet<Key>,
    pub settings: SolverSettings,
}

impl ConstraintSystem {
    pub fn new(settings: SolverSettings) -> Self {
        Self { sets: Vec::new(), free: BTreeSet::new(), settings }
    }

    /// Declare a variable to be solved for
    pub fn new_variable(&mut self, key: Key) {
        self.free.insert(key);
    }

    pub fn new_variables(&mut self, keys: impl IntoIterator<Item = Key>) {
        self.free.extend(keys);
    }

    /// Declare every key referenced by any term as free
    pub fn free_all_referenced(&mut self) {
        let keys = self.referenced_keys();
        self.free.extend(keys);
    }

    pub fn is_free(&self, key: &Key) -> bool {
        self.free.contains(key)
    }

    pub fn free_keys(&self) -> &BTreeSet<Key> {
        &self.free
    }

    /// Add a term to the default set
    pub fn add_term(&mut self, term: impl Term + 'static, weight: WeightModel) {
        self.default_set().push(term, weight);
    }

    /// Add a closure-defined term to the default set
    pub fn add_fn_term<F>(&mut self, keys: Vec<Key>, dim: usize, f: F, weight: WeightModel)
    where
        F: Fn(&[&DVector<f64>]) -> DVector<f64> + Send + Sync + 'static,
    {
        self.default_set().push_fn(keys, dim, f, weight);
    }

    /// Append a named set, merging into an existing set of the same name
    pub fn add_set(&mut self, name: &str, set: TermSet) {
        match self.sets.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => existing.extend(set),
            None => self.sets.push((name.to_string(), set)),
        }
    }

    pub fn set(&self, name: &str) -> Option<&TermSet> {
        self.sets.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn sets(&self) -> impl Iterator<Item = (&str, &TermSet)> {
        self.sets.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn num_terms(&self) -> usize {
        self.sets.iter().map(|(_, s)| s.len()).sum()
    }

    fn default_set(&mut self) -> &mut TermSet {
        if !self.sets.iter().any(|(n, _)| n == "default") {
            self.sets.push(("default".to_string(), TermSet::new()));
        }
        let idx = self.sets.iter().position(|(n, _)| n == "default").unwrap_or(0);
        &mut self.sets[idx].1
    }

    fn terms(&self) -> impl Iterator<Item = &super::WeightedTerm> {
        self.sets.iter().flat_map(|(_, s)| s.iter())
    }

    pub fn referenced_keys(&self) -> BTreeSet<Key> {
        self.terms().flat_map(|t| t.term.keys().iter().copied()).collect()
    }

    /// Total `½‖W r‖²`
    pub fn error(&self, values: &Values) -> Result<f64> {
        let hard_weight = self.settings.hard_weight;
        self.terms().map(|t| t.error(values, hard_weight)).sum()
    }

    /// Error per named set, in insertion order
    pub fn set_errors(&self, values: &Values) -> Result<Vec<(String, f64)>> {
        self.sets
            .iter()
            .map(|(n, s)| Ok((n.clone(), s.error(values, self.settings.hard_weight)?)))
            .collect()
    }

    /// Largest absolute hard-constraint residual
    pub fn max_hard_violation(&self, values: &Values) -> Result<f64> {
        let mut max = 0.0f64;
        for t in self.terms().filter(|t| t.weight.is_hard()) {
            max = max.max(t.residual(values)?.amax());
        }
        Ok(max)
    }

    /// Linearize every term with respect to the keys of `ordering`
    pub fn linearize(&self, values: &Values, ordering: &Ordering) -> Result<Linearization> {
        let n = ordering.columns();
        let (mh, ms) = self.terms().fold((0, 0), |(h, s), t| {
            if t.weight.is_hard() {
                (h + t.term.dim(), s)
            } else {
                (h, s + t.term.dim())
            }
        });

        let mut lin = Linearization {
            hard_jacobian: DMatrix::zeros(mh, n),
            hard_residual: DVector::zeros(mh),
            soft_jacobian: DMatrix::zeros(ms, n),
            soft_residual: DVector::zeros(ms),
        };
        let (mut hard_row, mut soft_row) = (0, 0);

        for t in self.terms() {
            let inputs = t.inputs(values)?;
            let residual = t.term.evaluate(&inputs);
            let dim = t.term.dim();
            let hard = t.weight.is_hard();
            let w = if hard {
                DVector::from_element(dim, 1.0)
            } else {
                t.weight.sqrt_weights(dim, 1.0)
            };

            let (jac, res, row) = if hard {
                (&mut lin.hard_jacobian, &mut lin.hard_residual, &mut hard_row)
            } else {
                (&mut lin.soft_jacobian, &mut lin.soft_residual, &mut soft_row)
            };

            for r in 0..dim {
                res[*row + r] = w[r] * residual[r];
            }

            let keys = t.term.keys();
            if keys.iter().any(|k| ordering.get(k).is_some()) {
                let blocks = t.term.jacobians(&inputs);
                for (key, block) in keys.iter().zip(blocks.iter()) {
                    if let Some((col, width)) = ordering.get(key) {
                        for r in 0..dim {
                            for c in 0..width {
                                jac[(*row + r, col + c)] += w[r] * block[(r, c)];
                            }
                        }
                    }
                }
            }
            *row += dim;
        }
        Ok(lin)
    }

    fn check_references(&self, values: &Values) -> Result<()> {
        for key in self.referenced_keys().iter().chain(self.free.iter()) {
            values.get(*key)?;
        }
        Ok(())
    }

    /// Solve from `initial`, which must contain every referenced key
    ///
    /// Free keys start from their `initial` entries; all other keys are held fixed.
    pub fn solve(&self, initial: &Values) -> Result<SolveReport> {
        self.check_references(initial)?;
        let s = &self.settings;
        let ordering = Ordering::new(self.free.iter(), initial)?;
        let n = ordering.columns();

        let mut values = initial.clone();
        let mut error = self.error(&values)?;
        let initial_error = error;
        let mut lambda = s.lambda_initial;
        let mut iterations = 0;

        let report = |values: Values, status: SolveStatus, iterations: usize, error: f64| SolveReport {
            values,
            status,
            iterations,
            residual_norm: (2.0 * error).sqrt(),
            initial_error,
            final_error: error,
        };

        let status = loop {
            if iterations == 0 {
                let (jacobian, _) = self.linearize(&values, &ordering)?.whitened(s.hard_weight);
                let rank = numerical_rank(&jacobian, s.rank_tolerance);
                if rank < n {
                    warn!(rank, columns = n, "ill-posed system");
                    return Ok(report(values, SolveStatus::IllPosed { rank, columns: n }, 0, error));
                }
            }
            if error < s.absolute_error_tolerance {
                break SolveStatus::Converged(ConvergenceReason::ResidualTolerance);
            }
            if iterations >= s.max_iterations {
                break SolveStatus::MaxIterations;
            }
            if n == 0 {
                break SolveStatus::Converged(ConvergenceReason::StepTolerance);
            }

            let step = ConstrainedStep::new(&self.linearize(&values, &ordering)?, s);

            let mut fraction = 1.0;
            let outcome = loop {
                if let Some(delta) = step.damped(lambda, fraction) {
                    let mut candidate = values.clone();
                    apply_step(&mut candidate, &ordering, &delta)?;
                    let new_error = self.error(&candidate)?;
                    if new_error < error {
                        break Some((candidate, new_error, delta));
                    }
                }
                lambda *= s.lambda_factor;
                fraction *= 0.5;
                if lambda > s.lambda_max {
                    break None;
                }
            };

            iterations += 1;
            match outcome {
                None => {
                    break if self.max_hard_violation(&values)? <= s.constraint_tolerance {
                        SolveStatus::Converged(ConvergenceReason::RelativeDecrease)
                    } else {
                        SolveStatus::Stalled
                    };
                }
                Some((candidate, new_error, delta)) => {
                    let decrease = error - new_error;
                    let x_norm = ordering
                        .keys()
                        .iter()
                        .filter_map(|k| values.get(*k).ok())
                        .map(|v| v.norm_squared())
                        .sum::<f64>()
                        .sqrt();
                    let small_step = delta.norm() < s.step_tolerance * (x_norm + s.step_tolerance);
                    let small_decrease = decrease < s.relative_error_tolerance * error;

                    debug!(iteration = iterations, error = new_error, lambda, "accepted step");
                    values = candidate;
                    error = new_error;
                    lambda = (lambda / s.lambda_factor).max(s.lambda_min);

                    if error < s.absolute_error_tolerance {
                        break SolveStatus::Converged(ConvergenceReason::ResidualTolerance);
                    }
                    if small_step || small_decrease {
                        let satisfied = self.max_hard_violation(&values)? <= s.constraint_tolerance;
                        break match (satisfied, small_step) {
                            (true, true) => SolveStatus::Converged(ConvergenceReason::StepTolerance),
                            (true, false) => SolveStatus::Converged(ConvergenceReason::RelativeDecrease),
                            (false, _) => SolveStatus::Stalled,
                        };
                    }
                }
            }
        };

        match status {
            SolveStatus::Converged(_) => {
                info!(iterations, error, ?status, "solve finished");
            }
            _ => {
                warn!(iterations, error, ?status, "solve did not converge");
            }
        }
        Ok(report(values, status, iterations, error))
    }
}

/// Linearized step split into the hard constraints and their null space
///
/// The hard rows are solved exactly in the least-squares sense by their
/// pseudoinverse, `δ_h = −J_h⁺ r_h`. The soft rows then pick `z` in the
/// null space `N` of `J_h`:
///
/// ```text
/// minimize ‖J_s (β δ_h + N z) + r_s‖² + λ zᵀ D z,     D = diag(NᵀJ_sᵀJ_s N)
/// ```
///
/// `β ≤ 1` shortens the hard part when a full step is rejected.
struct ConstrainedStep {
    hard_step: DVector<f64>,
    null: DMatrix<f64>,
    /// R factor of `J_s N`, padded to square
    r_factor: DMatrix<f64>,
    /// `Qᵀ J_s δ_h` and `Qᵀ r_s`
    q_hard: DVector<f64>,
    q_soft: DVector<f64>,
    diagonal: DVector<f64>,
}

impl ConstrainedStep {
    fn new(lin: &Linearization, s: &SolverSettings) -> Self {
        let n = lin.hard_jacobian.ncols();
        let (hard_step, null) = if lin.hard_jacobian.nrows() == 0 {
            (DVector::zeros(n), DMatrix::identity(n, n))
        } else {
            let hard = Pseudoinverse::new(&lin.hard_jacobian, s.rank_tolerance);
            (-hard.solve_vector(&lin.hard_residual), hard.null_space())
        };

        let p = null.ncols();
        if p == 0 {
            return Self {
                hard_step,
                null,
                r_factor: DMatrix::zeros(0, 0),
                q_hard: DVector::zeros(0),
                q_soft: DVector::zeros(0),
                diagonal: DVector::zeros(0),
            };
        }

        let reduced = &lin.soft_jacobian * &null;
        let rows = reduced.nrows().max(p);
        let mut padded = DMatrix::zeros(rows, p);
        padded.rows_mut(0, reduced.nrows()).copy_from(&reduced);
        let mut soft_hard = DVector::zeros(rows);
        soft_hard.rows_mut(0, reduced.nrows()).copy_from(&(&lin.soft_jacobian * &hard_step));
        let mut soft_residual = DVector::zeros(rows);
        soft_residual.rows_mut(0, reduced.nrows()).copy_from(&lin.soft_residual);

        let diagonal = DVector::from_iterator(p, padded.column_iter().map(|c| c.norm_squared().max(s.min_diagonal)));
        let qr = padded.qr();
        let q_t = qr.q().transpose();
        Self {
            q_hard: &q_t * soft_hard,
            q_soft: &q_t * soft_residual,
            r_factor: qr.r(),
            hard_step,
            null,
            diagonal,
        }
    }

    /// Full step for damping `lambda` and hard fraction `fraction`
    fn damped(&self, lambda: f64, fraction: f64) -> Option<DVector<f64>> {
        if self.null.ncols() == 0 {
            return Some(&self.hard_step * fraction);
        }
        let q_tr = &self.q_hard * fraction + &self.q_soft;
        let z = damped_step(&self.r_factor, &q_tr, &self.diagonal, lambda)?;
        let delta = &self.hard_step * fraction + &self.null * z;
        delta.iter().all(|v| v.is_finite()).then_some(delta)
    }
}

/// Solve `[R; √(λD)] z = [−Qᵀr; 0]` in the least-squares sense
fn damped_step(r: &DMatrix<f64>, q_tr: &DVector<f64>, diagonal: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
    let n = r.ncols();
    let mut stacked = DMatrix::zeros(2 * n, n);
    stacked.rows_mut(0, n).copy_from(&r.rows(0, n));
    for i in 0..n {
        stacked[(n + i, i)] = (lambda * diagonal[i]).sqrt();
    }
    let mut rhs = DVector::zeros(2 * n);
    rhs.rows_mut(0, n).copy_from(&(-q_tr.rows(0, n).clone_owned()));

    let qr = stacked.qr();
    let qtb = qr.q().transpose() * rhs;
    let delta = qr.r().solve_upper_triangular(&qtb)?;
    delta.iter().all(|v| v.is_finite()).then_some(delta)
}

fn apply_step(values: &mut Values, ordering: &Ordering, delta: &DVector<f64>) -> Result<()> {
    for key in ordering.keys() {
        if let Some((offset, dim)) = ordering.get(key) {
            values.retract(*key, &delta.as_slice()[offset..offset + dim])?;
        }
    }
    Ok(())
}

/// Rank estimate from the R diagonal of an unpivoted QR
pub(crate) fn numerical_rank(jacobian: &DMatrix<f64>, tolerance: f64) -> usize {
    let (m, n) = jacobian.shape();
    if n == 0 {
        return 0;
    }
    let r = jacobian.clone().qr().r();
    let diag: Vec<f64> = (0..m.min(n)).map(|i| r[(i, i)].abs()).collect();
    let max = diag.iter().cloned().fold(0.0, f64::max);
    if max == 0.0 {
        return 0;
    }
    diag.iter().filter(|d| **d > tolerance * max).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PriorTerm;
    use approx::assert_relative_eq;

    fn scalar(v: f64) -> DVector<f64> {
        DVector::from_element(1, v)
    }

    #[test]
    fn test_soft_priors_average() {
        let x = Key::joint_angle(0, 0);
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.new_variable(x);
        system.add_term(PriorTerm::scalar(x, 1.0), WeightModel::precision(1.0));
        system.add_term(PriorTerm::scalar(x, 3.0), WeightModel::precision(1.0));

        let mut init = Values::new();
        init.set_scalar(x, 0.0).unwrap();
        let report = system.solve(&init).unwrap();

        assert!(report.converged());
        assert_relative_eq!(report.values.scalar(x).unwrap(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_hard_constraint_dominates_soft() {
        let x = Key::joint_angle(0, 0);
        let y = Key::joint_angle(1, 0);
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.new_variables([x, y]);
        // x + y = 1 exactly, both pulled towards 0
        system.add_fn_term(vec![x, y], 1, |v| scalar(v[0][0] + v[1][0] - 1.0), WeightModel::Hard);
        system.add_term(PriorTerm::scalar(x, 0.0), WeightModel::precision(1.0));
        system.add_term(PriorTerm::scalar(y, 0.0), WeightModel::precision(3.0));

        let mut init = Values::new();
        init.set_scalar(x, 0.0).unwrap();
        init.set_scalar(y, 0.0).unwrap();
        let values = system.solve(&init).unwrap().into_values().unwrap();

        assert_relative_eq!(values.scalar(x).unwrap(), 0.75, epsilon = 1e-8);
        assert_relative_eq!(values.scalar(y).unwrap(), 0.25, epsilon = 1e-8);
    }

    #[test]
    fn test_nonlinear_root() {
        let x = Key::joint_angle(0, 0);
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.new_variable(x);
        system.add_fn_term(vec![x], 1, |v| scalar(v[0][0] * v[0][0] - 2.0), WeightModel::Hard);

        let mut init = Values::new();
        init.set_scalar(x, 1.0).unwrap();
        let report = system.solve(&init).unwrap();

        assert!(report.converged());
        assert_relative_eq!(report.values.scalar(x).unwrap(), 2f64.sqrt(), epsilon = 1e-10);
    }

    #[test]
    fn test_fixed_keys_are_not_moved() {
        let x = Key::joint_angle(0, 0);
        let c = Key::joint_angle(1, 0);
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.new_variable(x);
        system.add_fn_term(vec![x, c], 1, |v| scalar(v[0][0] - 2.0 * v[1][0]), WeightModel::Hard);

        let mut init = Values::new();
        init.set_scalar(x, 0.0).unwrap();
        init.set_scalar(c, 1.5).unwrap();
        let values = system.solve(&init).unwrap().into_values().unwrap();

        assert_relative_eq!(values.scalar(x).unwrap(), 3.0, epsilon = 1e-10);
        assert_relative_eq!(values.scalar(c).unwrap(), 1.5);
    }

    #[test]
    fn test_unset_key_is_reported() {
        let x = Key::joint_angle(0, 0);
        let c = Key::joint_angle(1, 0);
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.new_variable(x);
        system.add_fn_term(vec![x, c], 1, |v| scalar(v[0][0] - v[1][0]), WeightModel::Hard);

        let mut init = Values::new();
        init.set_scalar(x, 0.0).unwrap();
        let err = system.solve(&init).unwrap_err();
        assert!(matches!(err, DynamicsError::KeyNotFound(k) if k == c));
    }

    #[test]
    fn test_gauge_freedom_is_ill_posed() {
        let x = Key::joint_angle(0, 0);
        let y = Key::joint_angle(1, 0);
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.new_variables([x, y]);
        // only the difference is constrained
        system.add_fn_term(vec![x, y], 1, |v| scalar(v[0][0] - v[1][0] - 1.0), WeightModel::Hard);

        let mut init = Values::new();
        init.set_scalar(x, 0.0).unwrap();
        init.set_scalar(y, 0.0).unwrap();
        let report = system.solve(&init).unwrap();

        assert_eq!(report.status, SolveStatus::IllPosed { rank: 1, columns: 2 });
        assert!(matches!(report.into_values(), Err(DynamicsError::IllPosedSystem { .. })));
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let x = Key::joint_angle(0, 0);
        let mut system = ConstraintSystem::new(SolverSettings { max_iterations: 1, ..Default::default() });
        system.new_variable(x);
        system.add_fn_term(vec![x], 1, |v| scalar(v[0][0].exp() - 10.0), WeightModel::Hard);

        let mut init = Values::new();
        init.set_scalar(x, 0.0).unwrap();
        let report = system.solve(&init).unwrap();

        assert_eq!(report.status, SolveStatus::MaxIterations);
        assert_eq!(report.iterations, 1);
        assert!(report.residual_norm > 0.0);
        assert!(matches!(
            report.into_values(),
            Err(DynamicsError::OptimizationNonConvergence { iterations: 1, .. })
        ));
    }

    #[test]
    fn test_conflicting_hard_constraints_stall() {
        let x = Key::joint_angle(0, 0);
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.new_variable(x);
        system.add_term(PriorTerm::scalar(x, 0.0), WeightModel::Hard);
        system.add_term(PriorTerm::scalar(x, 1.0), WeightModel::Hard);

        let mut init = Values::new();
        init.set_scalar(x, 0.3).unwrap();
        let report = system.solve(&init).unwrap();

        assert_eq!(report.status, SolveStatus::Stalled);
        assert_relative_eq!(report.values.scalar(x).unwrap(), 0.5, epsilon = 1e-8);
        // one accepted step, then a pass with every trial rejected
        assert_eq!(report.iterations, 2);
    }

    #[test]
    fn test_redundant_hard_row_leaves_soft_freedom() {
        // x = 0 and t·x = 0 are redundant at the solution, where t is only
        // held by its prior
        let x = Key::joint_angle(0, 0);
        let t = Key::torque(0, 0);
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.new_variables([x, t]);
        system.add_term(PriorTerm::scalar(x, 0.0), WeightModel::Hard);
        system.add_fn_term(vec![x, t], 1, |v| scalar(v[0][0] * v[1][0]), WeightModel::Hard);
        system.add_term(PriorTerm::scalar(t, 5.0), WeightModel::precision(1.0));

        let mut init = Values::new();
        init.set_scalar(x, 0.1).unwrap();
        init.set_scalar(t, 0.0).unwrap();
        let report = system.solve(&init).unwrap();

        assert!(report.converged(), "{:?}", report.status);
        assert_relative_eq!(report.values.scalar(x).unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(report.values.scalar(t).unwrap(), 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_hard_rows_are_met_exactly_beside_large_priors() {
        // a stiff nonlinear chain next to soft priors far from it
        let x = Key::joint_angle(0, 0);
        let y = Key::joint_angle(1, 0);
        let t = Key::torque(0, 0);
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.new_variables([x, y, t]);
        system.add_term(PriorTerm::scalar(x, 0.3), WeightModel::Hard);
        system.add_fn_term(vec![x, y, t], 1, |v| scalar(v[2][0] * v[0][0].sin() - v[1][0]), WeightModel::Hard);
        system.add_term(PriorTerm::scalar(t, 50.0), WeightModel::precision(1.0));
        system.add_term(PriorTerm::scalar(y, 0.0), WeightModel::precision(1.0));

        let mut init = Values::new();
        init.set_scalar(x, 1.0).unwrap();
        init.set_scalar(y, 0.0).unwrap();
        init.set_scalar(t, 0.0).unwrap();
        let report = system.solve(&init).unwrap();

        assert!(report.converged(), "{:?}", report.status);
        assert!(system.max_hard_violation(&report.values).unwrap() < 1e-9);
        // min (t − 50)² + (t·s)² with s = sin 0.3
        let s = 0.3f64.sin();
        assert_relative_eq!(report.values.scalar(t).unwrap(), 50.0 / (1.0 + s * s), epsilon = 1e-6);
    }

    #[test]
    fn test_set_errors_by_name() {
        let x = Key::joint_angle(0, 0);
        let mut priors = TermSet::new();
        priors.push(PriorTerm::scalar(x, 1.0), WeightModel::precision(1.0));
        let mut system = ConstraintSystem::new(SolverSettings::default());
        system.add_set("priors", priors);
        system.free_all_referenced();

        let mut values = Values::new();
        values.set_scalar(x, 3.0).unwrap();
        let errors = system.set_errors(&values).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "priors");
        assert_relative_eq!(errors[0].1, 2.0);
        assert!(system.is_free(&x));
    }
}
