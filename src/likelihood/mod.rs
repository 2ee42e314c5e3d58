//! Cached log-densities over the model graph.
//!
//! A [`Likelihood`] wraps one [`LikelihoodKind`] and caches its value. Change
//! events from the graph mark it stale; the next query recomputes exactly once.
//! Compound likelihoods recompute only their stale children and can fan the
//! work out to a rayon pool.

pub mod coalescent;
pub mod distribution;
pub mod speciation;
pub mod substitution;
pub mod tree_data;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::error::{ChainError, Result};
use crate::model::{ChangeEvent, ModelGraph, Source};

pub use coalescent::{CoalescentLikelihood, Demographic};
pub use distribution::{DistributionLikelihood, PriorDensity};
pub use speciation::{SpeciationLikelihood, SpeciationRates, TreeType};
pub use substitution::SubstitutionModel;
pub use tree_data::TreeDataLikelihood;

/// A density supplied from outside the crate.
pub trait DensityFunction: Send + Sync {
    fn dependencies(&self) -> Vec<Source>;
    fn log_density(&self, graph: &ModelGraph) -> Result<f64>;
}

pub struct CompoundLikelihood {
    children: Vec<Likelihood>,
    pool: Option<ThreadPool>,
}

impl CompoundLikelihood {
    pub fn new(children: Vec<Likelihood>) -> Self {
        Self {
            children,
            pool: None,
        }
    }

    /// Evaluates stale children on a dedicated pool of `threads` workers.
    pub fn with_threads(children: Vec<Likelihood>, threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| ChainError::InvalidInput(format!("cannot start thread pool: {}", e)))?;
        Ok(Self {
            children,
            pool: Some(pool),
        })
    }

    pub fn children(&self) -> &[Likelihood] {
        &self.children
    }

    pub fn push(&mut self, child: Likelihood) {
        self.children.push(child);
    }

    fn calculate(&mut self, graph: &ModelGraph) -> Result<f64> {
        match &self.pool {
            Some(pool) if self.children.iter().filter(|c| !c.known).count() > 1 => {
                let children = &mut self.children;
                pool.install(|| {
                    children
                        .par_iter_mut()
                        .filter(|c| !c.known)
                        .map(|c| c.log_likelihood(graph).map(|_| ()))
                        .collect::<Result<Vec<()>>>()
                })?;
            }
            _ => {
                for c in self.children.iter_mut().filter(|c| !c.known) {
                    c.log_likelihood(graph)?;
                }
            }
        }
        // fixed order so threaded and sequential sums agree bit for bit
        Ok(self.children.iter().map(|c| c.log_likelihood).sum())
    }
}

pub enum LikelihoodKind {
    Distribution(DistributionLikelihood),
    Speciation(SpeciationLikelihood),
    Coalescent(CoalescentLikelihood),
    TreeData(TreeDataLikelihood),
    Compound(CompoundLikelihood),
    Custom(Box<dyn DensityFunction>),
}

pub struct Likelihood {
    id: String,
    kind: LikelihoodKind,
    log_likelihood: f64,
    stored_log_likelihood: f64,
    known: bool,
    stored_known: bool,
    evaluations: u64,
}

impl Likelihood {
    pub fn new(id: impl Into<String>, kind: LikelihoodKind) -> Self {
        Self {
            id: id.into(),
            kind,
            log_likelihood: f64::NAN,
            stored_log_likelihood: f64::NAN,
            known: false,
            stored_known: false,
            evaluations: 0,
        }
    }

    pub fn compound(id: impl Into<String>, children: Vec<Likelihood>) -> Self {
        Self::new(id, LikelihoodKind::Compound(CompoundLikelihood::new(children)))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &LikelihoodKind {
        &self.kind
    }

    pub fn is_known(&self) -> bool {
        self.known
    }

    /// How many times the value has actually been computed.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// The cached value, if it is current.
    pub fn cached(&self) -> Option<f64> {
        self.known.then_some(self.log_likelihood)
    }

    pub fn dependencies(&self) -> Vec<Source> {
        match &self.kind {
            LikelihoodKind::Distribution(d) => d.dependencies(),
            LikelihoodKind::Speciation(s) => s.dependencies(),
            LikelihoodKind::Coalescent(c) => c.dependencies(),
            LikelihoodKind::TreeData(t) => t.dependencies(),
            LikelihoodKind::Custom(f) => f.dependencies(),
            LikelihoodKind::Compound(c) => {
                let mut deps: Vec<Source> = Vec::new();
                for child in &c.children {
                    for d in child.dependencies() {
                        if !deps.contains(&d) {
                            deps.push(d);
                        }
                    }
                }
                deps
            }
        }
    }

    /// Routes one change event; returns true if this likelihood went stale.
    pub fn handle_event(&mut self, graph: &ModelGraph, event: &ChangeEvent) -> bool {
        let stale = match &mut self.kind {
            LikelihoodKind::Distribution(d) => d.handle_event(event),
            LikelihoodKind::Speciation(s) => s.handle_event(event),
            LikelihoodKind::Coalescent(c) => c.handle_event(event),
            LikelihoodKind::TreeData(t) => t.handle_event(graph, event),
            LikelihoodKind::Custom(f) => f.dependencies().contains(&event.source),
            LikelihoodKind::Compound(c) => {
                let mut any = false;
                for child in c.children.iter_mut() {
                    any |= child.handle_event(graph, event);
                }
                any
            }
        };
        if stale {
            self.known = false;
        }
        stale
    }

    /// Forgets every cached quantity, down to per-node partials.
    pub fn make_dirty(&mut self) {
        self.known = false;
        match &mut self.kind {
            LikelihoodKind::Coalescent(c) => c.make_dirty(),
            LikelihoodKind::TreeData(t) => t.make_dirty(),
            LikelihoodKind::Compound(c) => c.children.iter_mut().for_each(|l| l.make_dirty()),
            _ => {}
        }
    }

    pub fn log_likelihood(&mut self, graph: &ModelGraph) -> Result<f64> {
        if !self.known {
            self.log_likelihood = self.calculate(graph)?;
            self.known = true;
            self.evaluations += 1;
        }
        Ok(self.log_likelihood)
    }

    fn calculate(&mut self, graph: &ModelGraph) -> Result<f64> {
        match &mut self.kind {
            LikelihoodKind::Distribution(d) => d.calculate(graph),
            LikelihoodKind::Speciation(s) => s.calculate(graph),
            LikelihoodKind::Coalescent(c) => c.calculate(graph),
            LikelihoodKind::TreeData(t) => t.calculate(graph),
            LikelihoodKind::Custom(f) => f.log_density(graph),
            LikelihoodKind::Compound(c) => c.calculate(graph),
        }
    }

    pub fn store_state(&mut self) {
        self.stored_log_likelihood = self.log_likelihood;
        self.stored_known = self.known;
        match &mut self.kind {
            LikelihoodKind::Coalescent(c) => c.store_state(),
            LikelihoodKind::TreeData(t) => t.store_state(),
            LikelihoodKind::Compound(c) => c.children.iter_mut().for_each(|l| l.store_state()),
            _ => {}
        }
    }

    pub fn restore_state(&mut self) {
        self.log_likelihood = self.stored_log_likelihood;
        self.known = self.stored_known;
        match &mut self.kind {
            LikelihoodKind::Coalescent(c) => c.restore_state(),
            LikelihoodKind::TreeData(t) => t.restore_state(),
            LikelihoodKind::Compound(c) => c.children.iter_mut().for_each(|l| l.restore_state()),
            _ => {}
        }
    }

    pub fn accept_state(&mut self) {
        if let LikelihoodKind::Compound(c) = &mut self.kind {
            c.children.iter_mut().for_each(|l| l.accept_state());
        }
    }

    /// `id=value` for this likelihood and, for compounds, every child.
    pub fn diagnosis(&mut self, graph: &ModelGraph) -> Result<String> {
        let value = self.log_likelihood(graph)?;
        match &mut self.kind {
            LikelihoodKind::Compound(c) => {
                let mut parts = Vec::with_capacity(c.children.len());
                for child in c.children.iter_mut() {
                    parts.push(child.diagnosis(graph)?);
                }
                Ok(format!("{}={} ({})", self.id, value, parts.join(", ")))
            }
            _ => Ok(format!("{}={}", self.id, value)),
        }
    }

    /// Looks up a likelihood by id in this subtree.
    pub fn find(&self, id: &str) -> Option<&Likelihood> {
        if self.id == id {
            return Some(self);
        }
        match &self.kind {
            LikelihoodKind::Compound(c) => c.children.iter().find_map(|l| l.find(id)),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::variable::{Variable, VariableId};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Sum of squares of one variable, counting its calls.
    pub(crate) struct CountingDensity {
        pub variable: VariableId,
        pub calls: Arc<AtomicU64>,
    }

    impl DensityFunction for CountingDensity {
        fn dependencies(&self) -> Vec<Source> {
            vec![Source::Variable(self.variable)]
        }

        fn log_density(&self, graph: &ModelGraph) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(-graph
                .variable(self.variable)
                .values()
                .iter()
                .map(|v| v * v)
                .sum::<f64>())
        }
    }

    fn dispatch(graph: &mut ModelGraph, lik: &mut Likelihood) {
        for e in graph.drain_events() {
            lik.handle_event(graph, &e);
        }
    }

    #[test]
    fn cached_until_dependency_changes() {
        let mut g = ModelGraph::new();
        let m = g.add_model("m").unwrap();
        let x = g.add_variable(m, Variable::scalar("x", 2.0)).unwrap();
        let y = g.add_variable(m, Variable::scalar("y", 1.0)).unwrap();
        let calls = Arc::new(AtomicU64::new(0));
        let mut lik = Likelihood::new(
            "sq",
            LikelihoodKind::Custom(Box::new(CountingDensity {
                variable: x,
                calls: calls.clone(),
            })),
        );
        assert_eq!(lik.log_likelihood(&g).unwrap(), -4.0);
        assert_eq!(lik.log_likelihood(&g).unwrap(), -4.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        g.variable_mut(y).set_value(0, 5.0).unwrap();
        dispatch(&mut g, &mut lik);
        lik.log_likelihood(&g).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        g.variable_mut(x).set_value(0, 3.0).unwrap();
        dispatch(&mut g, &mut lik);
        assert_eq!(lik.log_likelihood(&g).unwrap(), -9.0);
        lik.log_likelihood(&g).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(lik.evaluations(), 2);
    }

    fn counting_compound(threads: Option<usize>) -> (ModelGraph, Vec<VariableId>, Likelihood, Vec<Arc<AtomicU64>>) {
        let mut g = ModelGraph::new();
        let m = g.add_model("m").unwrap();
        let mut vars = Vec::new();
        let mut counters = Vec::new();
        let mut children = Vec::new();
        for i in 0..4 {
            let v = g
                .add_variable(m, Variable::scalar(format!("x{}", i), i as f64 * 0.1))
                .unwrap();
            let calls = Arc::new(AtomicU64::new(0));
            children.push(Likelihood::new(
                format!("part{}", i),
                LikelihoodKind::Custom(Box::new(CountingDensity {
                    variable: v,
                    calls: calls.clone(),
                })),
            ));
            vars.push(v);
            counters.push(calls);
        }
        let kind = match threads {
            Some(n) => CompoundLikelihood::with_threads(children, n).unwrap(),
            None => CompoundLikelihood::new(children),
        };
        let lik = Likelihood::new("all", LikelihoodKind::Compound(kind));
        (g, vars, lik, counters)
    }

    #[test]
    fn compound_recomputes_only_stale_children() {
        let (mut g, vars, mut lik, counters) = counting_compound(None);
        let first = lik.log_likelihood(&g).unwrap();
        assert!((first + 0.14).abs() < 1e-12);
        g.variable_mut(vars[2]).set_value(0, 1.0).unwrap();
        dispatch(&mut g, &mut lik);
        lik.log_likelihood(&g).unwrap();
        let calls: Vec<u64> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(calls, vec![1, 1, 2, 1]);
    }

    #[test]
    fn threaded_compound_matches_sequential() {
        let (mut g1, v1, mut seq, _) = counting_compound(None);
        let (mut g2, v2, mut par, _) = counting_compound(Some(2));
        for (g, v, lik) in [(&mut g1, &v1, &mut seq), (&mut g2, &v2, &mut par)] {
            for (i, id) in v.iter().enumerate() {
                g.variable_mut(*id).set_value(0, 0.37 * i as f64 + 0.01).unwrap();
            }
            dispatch(g, lik);
        }
        assert_eq!(
            seq.log_likelihood(&g1).unwrap().to_bits(),
            par.log_likelihood(&g2).unwrap().to_bits()
        );
    }

    #[test]
    fn restore_brings_back_cached_value() {
        let (mut g, vars, mut lik, counters) = counting_compound(None);
        let before = lik.log_likelihood(&g).unwrap();
        g.store_state();
        lik.store_state();
        g.variable_mut(vars[0]).set_value(0, 4.0).unwrap();
        dispatch(&mut g, &mut lik);
        assert!(lik.log_likelihood(&g).unwrap() < before);
        g.restore_state();
        lik.restore_state();
        assert_eq!(lik.log_likelihood(&g).unwrap().to_bits(), before.to_bits());
        assert_eq!(counters[0].load(Ordering::SeqCst), 2);
    }

    #[test]
    fn negative_infinity_propagates() {
        struct Impossible;
        impl DensityFunction for Impossible {
            fn dependencies(&self) -> Vec<Source> {
                Vec::new()
            }
            fn log_density(&self, _: &ModelGraph) -> Result<f64> {
                Ok(f64::NEG_INFINITY)
            }
        }
        let g = ModelGraph::new();
        let mut lik = Likelihood::compound(
            "all",
            vec![
                Likelihood::new("never", LikelihoodKind::Custom(Box::new(Impossible))),
                Likelihood::new("also", LikelihoodKind::Custom(Box::new(Impossible))),
            ],
        );
        assert_eq!(lik.log_likelihood(&g).unwrap(), f64::NEG_INFINITY);
        assert!(lik.diagnosis(&g).unwrap().contains("never=-inf"));
    }
}
