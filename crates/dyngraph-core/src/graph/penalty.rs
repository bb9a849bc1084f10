//! Penalty method
//!
//! Replaces every hard constraint by a soft term of precision μ and solves a
//! sequence of unconstrained problems with μ growing geometrically. Each
//! round warm-starts from the previous one.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ConstraintSystem, SolveReport, TermSet, Values, WeightModel, WeightedTerm};
use crate::error::Result;

/// Penalty schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyParams {
    /// Precision of the converted hard terms in the first round
    pub initial_mu: f64,
    /// Multiplier applied to μ after each round
    pub mu_increase_rate: f64,
    /// Number of rounds
    pub num_iterations: usize,
}

impl Default for PenaltyParams {
    fn default() -> Self {
        Self {
            initial_mu: 1.0,
            mu_increase_rate: 10.0,
            num_iterations: 8,
        }
    }
}

impl ConstraintSystem {
    /// Copy of this system with every hard term softened to precision `mu`
    pub fn softened(&self, mu: f64) -> ConstraintSystem {
        let mut system = ConstraintSystem::new(self.settings.clone());
        system.new_variables(self.free_keys().iter().copied());
        for (name, set) in self.sets() {
            let mut soft = TermSet::new();
            for t in set.iter() {
                let weight = if t.weight.is_hard() {
                    WeightModel::precision(mu)
                } else {
                    t.weight.clone()
                };
                soft.push_weighted(WeightedTerm { term: t.term.clone(), weight });
            }
            system.add_set(name, soft);
        }
        system
    }

    /// Solve by the penalty method, returning the last round's report
    pub fn solve_penalty(&self, initial: &Values, params: &PenaltyParams) -> Result<SolveReport> {
        let mut mu = params.initial_mu;
        let mut values = initial.clone();
        let mut last = None;

        for round in 0..params.num_iterations.max(1) {
            let report = self.softened(mu).solve(&values)?;
            debug!(round, mu, error = report.final_error, "penalty round");
            values = report.values.clone();
            last = Some(report);
            mu *= params.mu_increase_rate;
        }

        match last {
            Some(report) => Ok(report),
            None => self.softened(mu).solve(&values),
        }
    }
}
