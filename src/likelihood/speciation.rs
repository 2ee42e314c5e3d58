//! Birth-death tree prior (Gernhard 2008), Yule as the zero-death case.
//!
//! Parameterized by `r = lambda - mu`, `a = mu / lambda` and a sampling
//! fraction `rho`. The tree type fixes the combinatorial constant.

use statrs::function::gamma::ln_gamma;

use crate::error::Result;
use crate::model::{ChangeEvent, ModelGraph, Source};
use crate::tree::TreeId;
use crate::variable::VariableId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeType {
    /// No combinatorial term.
    Unscaled,
    /// Ranked unlabeled history: `n!`.
    TimesOnly,
    /// Oriented tree: `n`.
    Oriented,
    /// Labeled ranked tree: `2^(n-1) / (n-1)!`.
    Labeled,
}

impl TreeType {
    fn log_coefficient(self, taxa: usize) -> f64 {
        let n = taxa as f64;
        match self {
            TreeType::Unscaled => 0.0,
            TreeType::TimesOnly => ln_gamma(n + 1.0),
            TreeType::Oriented => n.ln(),
            TreeType::Labeled => (n - 1.0) * std::f64::consts::LN_2 - ln_gamma(n),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SpeciationRates {
    /// Birth and death rates; no death rate is the Yule process.
    BirthDeath {
        birth: VariableId,
        death: Option<VariableId>,
    },
    /// `r = lambda - mu` and `a = mu / lambda`.
    Diversification {
        birth_diff: VariableId,
        relative_death: VariableId,
    },
}

#[derive(Debug, Clone)]
pub struct SpeciationLikelihood {
    tree: TreeId,
    rates: SpeciationRates,
    sampling: Option<VariableId>,
    tree_type: TreeType,
}

impl SpeciationLikelihood {
    pub fn new(
        tree: TreeId,
        rates: SpeciationRates,
        sampling: Option<VariableId>,
        tree_type: TreeType,
    ) -> Self {
        Self {
            tree,
            rates,
            sampling,
            tree_type,
        }
    }

    pub fn dependencies(&self) -> Vec<Source> {
        let mut deps = vec![Source::Tree(self.tree)];
        match &self.rates {
            SpeciationRates::BirthDeath { birth, death } => {
                deps.push(Source::Variable(*birth));
                if let Some(d) = death {
                    deps.push(Source::Variable(*d));
                }
            }
            SpeciationRates::Diversification {
                birth_diff,
                relative_death,
            } => {
                deps.push(Source::Variable(*birth_diff));
                deps.push(Source::Variable(*relative_death));
            }
        }
        if let Some(s) = self.sampling {
            deps.push(Source::Variable(s));
        }
        deps
    }

    pub fn handle_event(&self, event: &ChangeEvent) -> bool {
        match event.source {
            Source::Model(_) => false,
            source => self.dependencies().contains(&source),
        }
    }

    /// `(r, a)`, or `None` for rates outside the process' domain.
    fn diversification(&self, graph: &ModelGraph) -> Result<Option<(f64, f64)>> {
        let (r, a) = match &self.rates {
            SpeciationRates::BirthDeath { birth, death } => {
                let lambda = graph.variable(*birth).value(0)?;
                let mu = match death {
                    Some(d) => graph.variable(*d).value(0)?,
                    None => 0.0,
                };
                if !(lambda > 0.0) {
                    return Ok(None);
                }
                (lambda - mu, mu / lambda)
            }
            SpeciationRates::Diversification {
                birth_diff,
                relative_death,
            } => (
                graph.variable(*birth_diff).value(0)?,
                graph.variable(*relative_death).value(0)?,
            ),
        };
        if !(r > 0.0) || !(0.0..1.0).contains(&a) {
            return Ok(None);
        }
        Ok(Some((r, a)))
    }

    pub fn calculate(&self, graph: &ModelGraph) -> Result<f64> {
        let Some((r, a)) = self.diversification(graph)? else {
            return Ok(f64::NEG_INFINITY);
        };
        let rho = match self.sampling {
            Some(s) => graph.variable(s).value(0)?,
            None => 1.0,
        };
        if !(rho > 0.0 && rho <= 1.0) {
            return Ok(f64::NEG_INFINITY);
        }
        let tree = graph.tree(self.tree);
        let n = tree.tip_count();

        let mut log_l = self.tree_type.log_coefficient(n)
            + (n as f64 - 1.0) * (r * rho).ln()
            + n as f64 * (1.0 - a).ln();
        for node in n..tree.node_count() {
            let mrh = -r * tree.height(node);
            let z = (rho + ((1.0 - rho) - a) * mrh.exp()).ln();
            log_l += mrh - 2.0 * z;
            if tree.is_root(node) {
                log_l += mrh - z;
            }
        }
        Ok(log_l)
    }
}
