//! Constraint terms
//!
//! A term is a residual function over a fixed list of keys. Paired with a
//! [`WeightModel`] it contributes `½‖W r(x)‖²` to the least-squares objective,
//! or, for hard terms, an equality constraint `r(x) = 0`.

use std::fmt;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use super::{Key, Values};
use crate::error::Result;

/// Residual function over a fixed subset of keys
pub trait Term: fmt::Debug + Send + Sync {
    /// Keys this term reads, in the order `evaluate` receives them
    fn keys(&self) -> &[Key];

    /// Residual dimension
    fn dim(&self) -> usize;

    /// Residual at the given inputs (one vector per key)
    fn evaluate(&self, inputs: &[&DVector<f64>]) -> DVector<f64>;

    /// Jacobian blocks `∂r/∂x_i`, one per key
    ///
    /// Defaults to central finite differences.
    fn jacobians(&self, inputs: &[&DVector<f64>]) -> Vec<DMatrix<f64>> {
        numerical_jacobians(self, inputs)
    }
}

/// Central-difference Jacobians of any term
pub fn numerical_jacobians<T: Term + ?Sized>(term: &T, inputs: &[&DVector<f64>]) -> Vec<DMatrix<f64>> {
    let mut perturbed: Vec<DVector<f64>> = inputs.iter().map(|v| (*v).clone()).collect();
    let mut jacobians = Vec::with_capacity(inputs.len());

    for i in 0..inputs.len() {
        let n = inputs[i].len();
        let mut jac = DMatrix::zeros(term.dim(), n);
        for c in 0..n {
            let x0 = inputs[i][c];
            let h = 1e-6 * x0.abs().max(1e-2);

            perturbed[i][c] = x0 + h;
            let plus = term.evaluate(&perturbed.iter().collect::<Vec<_>>());
            perturbed[i][c] = x0 - h;
            let minus = term.evaluate(&perturbed.iter().collect::<Vec<_>>());
            perturbed[i][c] = x0;

            jac.set_column(c, &((plus - minus) / (2.0 * h)));
        }
        jacobians.push(jac);
    }
    jacobians
}

/// Noise model of a term
#[derive(Debug, Clone, PartialEq)]
pub enum WeightModel {
    /// Exact equality constraint
    Hard,
    /// Diagonal precision (inverse variance) per residual row
    ///
    /// A length-1 vector applies to every row.
    Precisions(DVector<f64>),
    /// Isotropic standard deviation
    Sigma(f64),
}

impl WeightModel {
    pub fn precisions(p: &[f64]) -> Self {
        WeightModel::Precisions(DVector::from_column_slice(p))
    }

    pub fn precision(p: f64) -> Self {
        WeightModel::Precisions(DVector::from_element(1, p))
    }

    pub fn is_hard(&self) -> bool {
        matches!(self, WeightModel::Hard)
    }

    /// Square-root weights applied to each residual row
    pub fn sqrt_weights(&self, dim: usize, hard_weight: f64) -> DVector<f64> {
        match self {
            WeightModel::Hard => DVector::from_element(dim, hard_weight),
            WeightModel::Sigma(sigma) => DVector::from_element(dim, 1.0 / sigma),
            WeightModel::Precisions(p) if p.len() == 1 => DVector::from_element(dim, p[0].sqrt()),
            WeightModel::Precisions(p) => p.map(f64::sqrt),
        }
    }
}

/// A term together with its weight model
#[derive(Debug, Clone)]
pub struct WeightedTerm {
    pub term: Arc<dyn Term>,
    pub weight: WeightModel,
}

impl WeightedTerm {
    pub fn new(term: impl Term + 'static, weight: WeightModel) -> Self {
        Self { term: Arc::new(term), weight }
    }

    /// Gather this term's inputs from an assignment
    pub fn inputs<'a>(&self, values: &'a Values) -> Result<Vec<&'a DVector<f64>>> {
        self.term.keys().iter().map(|k| values.get(*k)).collect()
    }

    /// Unwhitened residual
    pub fn residual(&self, values: &Values) -> Result<DVector<f64>> {
        Ok(self.term.evaluate(&self.inputs(values)?))
    }

    /// `½‖W r‖²`
    pub fn error(&self, values: &Values, hard_weight: f64) -> Result<f64> {
        let r = self.residual(values)?;
        let w = self.weight.sqrt_weights(r.len(), hard_weight);
        Ok(0.5 * r.component_mul(&w).norm_squared())
    }
}

type ResidualFn = dyn Fn(&[&DVector<f64>]) -> DVector<f64> + Send + Sync;

/// Term defined by a closure
#[derive(Clone)]
pub struct FnTerm {
    keys: Vec<Key>,
    dim: usize,
    f: Arc<ResidualFn>,
}

impl FnTerm {
    pub fn new<F>(keys: Vec<Key>, dim: usize, f: F) -> Self
    where
        F: Fn(&[&DVector<f64>]) -> DVector<f64> + Send + Sync + 'static,
    {
        Self { keys, dim, f: Arc::new(f) }
    }
}

impl fmt::Debug for FnTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTerm").field("keys", &self.keys).field("dim", &self.dim).finish()
    }
}

impl Term for FnTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn evaluate(&self, inputs: &[&DVector<f64>]) -> DVector<f64> {
        (self.f)(inputs)
    }
}

/// `r = x − prior`
#[derive(Debug, Clone)]
pub struct PriorTerm {
    keys: [Key; 1],
    prior: DVector<f64>,
}

impl PriorTerm {
    pub fn new(key: Key, prior: DVector<f64>) -> Self {
        Self { keys: [key], prior }
    }

    pub fn scalar(key: Key, prior: f64) -> Self {
        Self::new(key, DVector::from_element(1, prior))
    }
}

impl Term for PriorTerm {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        self.prior.len()
    }

    fn evaluate(&self, inputs: &[&DVector<f64>]) -> DVector<f64> {
        inputs[0] - &self.prior
    }

    fn jacobians(&self, _inputs: &[&DVector<f64>]) -> Vec<DMatrix<f64>> {
        vec![DMatrix::identity(self.prior.len(), self.prior.len())]
    }
}

/// Ordered collection of weighted terms
#[derive(Debug, Clone, Default)]
pub struct TermSet {
    terms: Vec<WeightedTerm>,
}

impl TermSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, term: impl Term + 'static, weight: WeightModel) {
        self.terms.push(WeightedTerm::new(term, weight));
    }

    pub fn push_weighted(&mut self, term: WeightedTerm) {
        self.terms.push(term);
    }

    pub fn push_fn<F>(&mut self, keys: Vec<Key>, dim: usize, f: F, weight: WeightModel)
    where
        F: Fn(&[&DVector<f64>]) -> DVector<f64> + Send + Sync + 'static,
    {
        self.push(FnTerm::new(keys, dim, f), weight);
    }

    pub fn extend(&mut self, other: TermSet) {
        self.terms.extend(other.terms);
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WeightedTerm> {
        self.terms.iter()
    }

    /// Total `½‖W r‖²` over the set
    pub fn error(&self, values: &Values, hard_weight: f64) -> Result<f64> {
        self.terms.iter().map(|t| t.error(values, hard_weight)).sum()
    }

    /// Largest absolute unwhitened residual entry in the set
    pub fn max_residual(&self, values: &Values) -> Result<f64> {
        let mut max = 0.0f64;
        for term in &self.terms {
            max = max.max(term.residual(values)?.amax());
        }
        Ok(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_numerical_jacobian_matches_closure() {
        let a = Key::joint_angle(0, 0);
        let b = Key::joint_angle(1, 0);
        let term = FnTerm::new(vec![a, b], 1, |x| DVector::from_element(1, x[0][0] * x[1][0].sin()));

        let xa = DVector::from_element(1, 2.0);
        let xb = DVector::from_element(1, 0.3);
        let jac = term.jacobians(&[&xa, &xb]);

        assert_relative_eq!(jac[0][(0, 0)], 0.3f64.sin(), epsilon = 1e-8);
        assert_relative_eq!(jac[1][(0, 0)], 2.0 * 0.3f64.cos(), epsilon = 1e-8);
    }

    #[test]
    fn test_weight_broadcast() {
        let w = WeightModel::precision(4.0).sqrt_weights(3, 1e6);
        assert_eq!(w, DVector::from_element(3, 2.0));
        let hard = WeightModel::Hard.sqrt_weights(2, 1e6);
        assert_relative_eq!(hard[1], 1e6);
        let sigma = WeightModel::Sigma(0.5).sqrt_weights(1, 1e6);
        assert_relative_eq!(sigma[0], 2.0);
    }

    #[test]
    fn test_prior_error() {
        let key = Key::torque(0, 0);
        let mut values = Values::new();
        values.set_scalar(key, 3.0).unwrap();

        let mut set = TermSet::new();
        set.push(PriorTerm::scalar(key, 1.0), WeightModel::precision(2.0));
        assert_relative_eq!(set.error(&values, 1e6).unwrap(), 0.5 * 2.0 * 4.0);
        assert_relative_eq!(set.max_residual(&values).unwrap(), 2.0);
    }
}
