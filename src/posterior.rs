//! Joint log posterior: a prior compound and a likelihood compound.

use tracing::debug;

use crate::error::Result;
use crate::likelihood::{CompoundLikelihood, Likelihood, LikelihoodKind};
use crate::model::ModelGraph;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub posterior: f64,
    pub prior: f64,
    /// `None` when the prior already ruled the state out.
    pub likelihood: Option<f64>,
}

pub struct Posterior {
    prior: Likelihood,
    likelihood: Likelihood,
}

impl Posterior {
    pub fn new(priors: Vec<Likelihood>, likelihoods: Vec<Likelihood>) -> Self {
        Self {
            prior: Likelihood::compound("prior", priors),
            likelihood: Likelihood::compound("likelihood", likelihoods),
        }
    }

    /// Like [`new`](Self::new), but stale likelihood components are computed
    /// on a pool of `threads` workers.
    pub fn with_threads(priors: Vec<Likelihood>, likelihoods: Vec<Likelihood>, threads: usize) -> Result<Self> {
        let compound = CompoundLikelihood::with_threads(likelihoods, threads)?;
        Ok(Self {
            prior: Likelihood::compound("prior", priors),
            likelihood: Likelihood::new("likelihood", LikelihoodKind::Compound(compound)),
        })
    }

    pub fn prior(&self) -> &Likelihood {
        &self.prior
    }

    pub fn likelihood(&self) -> &Likelihood {
        &self.likelihood
    }

    pub fn find(&self, id: &str) -> Option<&Likelihood> {
        self.prior.find(id).or_else(|| self.likelihood.find(id))
    }

    /// Delivers queued graph events to every component.
    pub fn update(&mut self, graph: &mut ModelGraph) {
        let events = graph.drain_events();
        if !events.is_empty() {
            debug!("dispatching {} change events", events.len());
        }
        for event in &events {
            self.prior.handle_event(graph, event);
            self.likelihood.handle_event(graph, event);
        }
    }

    /// Prior first; the likelihood is only computed when the prior allows
    /// the state. A variable outside its bounds makes the prior `-inf`.
    pub fn evaluate(&mut self, graph: &mut ModelGraph) -> Result<Evaluation> {
        self.update(graph);
        if let Some(name) = graph.out_of_bounds() {
            debug!("{} is outside its bounds", name);
            return Ok(Evaluation {
                posterior: f64::NEG_INFINITY,
                prior: f64::NEG_INFINITY,
                likelihood: None,
            });
        }
        let prior = self.prior.log_likelihood(graph)?;
        if prior == f64::NEG_INFINITY || prior.is_nan() {
            return Ok(Evaluation {
                posterior: prior,
                prior,
                likelihood: None,
            });
        }
        let likelihood = self.likelihood.log_likelihood(graph)?;
        Ok(Evaluation {
            posterior: prior + likelihood,
            prior,
            likelihood: Some(likelihood),
        })
    }

    /// Recomputes everything from scratch, ignoring every cache.
    pub fn evaluate_fully(&mut self, graph: &mut ModelGraph) -> Result<Evaluation> {
        self.update(graph);
        self.prior.make_dirty();
        self.likelihood.make_dirty();
        self.evaluate(graph)
    }

    pub fn store_state(&mut self) {
        self.prior.store_state();
        self.likelihood.store_state();
    }

    pub fn restore_state(&mut self) {
        self.prior.restore_state();
        self.likelihood.restore_state();
    }

    pub fn accept_state(&mut self) {
        self.prior.accept_state();
        self.likelihood.accept_state();
    }

    /// Component-wise values, for reporting an unusable state.
    pub fn diagnosis(&mut self, graph: &ModelGraph) -> Result<String> {
        Ok(format!(
            "{}; {}",
            self.prior.diagnosis(graph)?,
            self.likelihood.diagnosis(graph)?
        ))
    }
}
