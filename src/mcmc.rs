//! The chain driver.
//!
//! Each step stores the graph, applies one operator, evaluates the
//! posterior, and then either accepts or restores. Loggers see the state only
//! after that decision.

use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::acceptor::MetropolisHastings;
use crate::error::{ChainError, Result};
use crate::logger::{ChainState, Logger};
use crate::model::ModelGraph;
use crate::operators::ProposalResult;
use crate::posterior::{Evaluation, Posterior};
use crate::schedule::OperatorSchedule;

/// Cached and from-scratch posteriors may differ by this much.
pub const EVALUATION_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Initializing,
    Running,
    Finished,
}

#[derive(Debug, Clone)]
pub struct McmcOptions {
    pub chain_length: u64,
    /// Adapt coercable operators whose mode is `Default`.
    pub coercion: bool,
    /// States to wait before coercion starts.
    pub coercion_delay: u64,
    pub temperature: f64,
    /// States during which every evaluation is checked against a full
    /// recomputation.
    pub full_evaluation_count: u64,
    pub operator_analysis: Option<PathBuf>,
}

impl Default for McmcOptions {
    fn default() -> Self {
        Self {
            chain_length: 10_000,
            coercion: true,
            coercion_delay: 0,
            temperature: 1.0,
            full_evaluation_count: 0,
            operator_analysis: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorSummary {
    pub name: String,
    pub tuning: Option<f64>,
    pub count: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub failed: u64,
    pub acceptance: f64,
    pub mean_time_ms: f64,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainSummary {
    pub states: u64,
    pub final_posterior: f64,
    pub best_posterior: f64,
    /// Likelihood and prior computations, cache hits excluded.
    pub evaluations: u64,
    pub operators: Vec<OperatorSummary>,
}

/// NaN and `+inf` scores count as impossible states.
fn sanitize(score: f64) -> f64 {
    if score.is_nan() || score == f64::INFINITY {
        f64::NEG_INFINITY
    } else {
        score
    }
}

fn same_score(a: f64, b: f64) -> bool {
    let (a, b) = (sanitize(a), sanitize(b));
    a == b || (a - b).abs() <= EVALUATION_TOLERANCE
}

pub struct Mcmc {
    graph: ModelGraph,
    posterior: Posterior,
    schedule: OperatorSchedule,
    loggers: Vec<Box<dyn Logger>>,
    acceptor: MetropolisHastings,
    options: McmcOptions,
    status: ChainStatus,
    progress: Option<ProgressBar>,
}

impl Mcmc {
    pub fn new(
        graph: ModelGraph,
        posterior: Posterior,
        schedule: OperatorSchedule,
        loggers: Vec<Box<dyn Logger>>,
        options: McmcOptions,
    ) -> Result<Self> {
        if schedule.is_empty() {
            return Err(ChainError::InvalidInput("no operators to run".into()));
        }
        let acceptor = MetropolisHastings::new(options.temperature)?;
        Ok(Self {
            graph,
            posterior,
            schedule,
            loggers,
            acceptor,
            options,
            status: ChainStatus::Initializing,
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    pub fn posterior(&self) -> &Posterior {
        &self.posterior
    }

    pub fn schedule(&self) -> &OperatorSchedule {
        &self.schedule
    }

    pub fn status(&self) -> ChainStatus {
        self.status
    }

    /// Evaluates the starting state. Anything but a finite posterior is an
    /// error that lists every component's value.
    pub fn initial_evaluation(&mut self) -> Result<Evaluation> {
        let evaluation = self.posterior.evaluate(&mut self.graph)?;
        if !evaluation.posterior.is_finite() {
            let diagnosis = self.posterior.diagnosis(&self.graph)?;
            return Err(ChainError::InvalidInitialState(format!(
                "posterior is {}: {}",
                evaluation.posterior, diagnosis
            )));
        }
        Ok(evaluation)
    }

    /// Per-component values of the current state.
    pub fn diagnosis(&mut self) -> Result<String> {
        self.posterior.diagnosis(&self.graph)
    }

    pub fn run<R: Rng>(&mut self, rng: &mut R) -> Result<ChainSummary> {
        self.status = ChainStatus::Initializing;
        let mut current = self.initial_evaluation()?;
        let mut best = current.posterior;
        info!(
            "initial posterior {:.4} (prior {:.4})",
            current.posterior, current.prior
        );

        for logger in self.loggers.iter_mut() {
            logger.start(&self.graph)?;
        }
        self.log_state(0, &current)?;

        self.status = ChainStatus::Running;
        let mut mismatches: Vec<String> = Vec::new();
        for state in 1..=self.options.chain_length {
            let full_evaluation = self.in_full_evaluation_phase(state);
            if !full_evaluation && !mismatches.is_empty() {
                return Err(ChainError::EvaluationMismatch(mismatches.join("; ")));
            }

            let idx = self.schedule.next_index(rng)?;
            self.graph.store_state();
            self.posterior.store_state();

            let result = self.schedule.operator_mut(idx).operate(&mut self.graph, rng)?;
            match result {
                ProposalResult::Infeasible(reason) => {
                    self.graph.restore_state();
                    self.posterior.restore_state();
                    self.schedule.operator_mut(idx).reject()?;
                    debug!(
                        "state {}: {} failed: {}",
                        state,
                        self.schedule.operator(idx).name(),
                        reason
                    );
                }
                ProposalResult::Success(log_hastings) => {
                    let proposed = self.posterior.evaluate(&mut self.graph)?;
                    if full_evaluation {
                        let scratch = self.posterior.evaluate_fully(&mut self.graph)?;
                        if !same_score(proposed.posterior, scratch.posterior) {
                            let msg = format!(
                                "state {}: after {} cached posterior {} but full evaluation gives {}",
                                state,
                                self.schedule.operator(idx).name(),
                                proposed.posterior,
                                scratch.posterior
                            );
                            error!("{}", msg);
                            mismatches.push(msg);
                        }
                    }

                    let new_score = sanitize(proposed.posterior);
                    let u = 1.0 - rng.gen::<f64>();
                    let decision =
                        self.acceptor
                            .decide(current.posterior, new_score, log_hastings, u);
                    if decision.accepted {
                        self.graph.accept_state();
                        self.posterior.accept_state();
                        self.schedule
                            .operator_mut(idx)
                            .accept(new_score - current.posterior)?;
                        current = proposed;
                    } else {
                        self.graph.restore_state();
                        self.posterior.restore_state();
                        self.schedule.operator_mut(idx).reject()?;
                        if full_evaluation {
                            let cached = self.posterior.evaluate(&mut self.graph)?;
                            let scratch = self.posterior.evaluate_fully(&mut self.graph)?;
                            if !same_score(cached.posterior, current.posterior)
                                || !same_score(scratch.posterior, current.posterior)
                            {
                                let msg = format!(
                                    "state {}: restore after {} gives {} (cached) and {} (full), expected {}",
                                    state,
                                    self.schedule.operator(idx).name(),
                                    cached.posterior,
                                    scratch.posterior,
                                    current.posterior
                                );
                                error!("{}", msg);
                                mismatches.push(msg);
                            }
                        }
                    }

                    let coerce = self
                        .schedule
                        .operator(idx)
                        .coercion()
                        .is_active(self.options.coercion);
                    if coerce && state > self.options.coercion_delay {
                        let count = self.schedule.operator(idx).count() as f64;
                        let t = self.schedule.optimization_transform(count);
                        self.schedule.operator_mut(idx).coerce(decision.log_r, t);
                    }
                }
            }

            if current.posterior > best {
                best = current.posterior;
            }
            self.log_state(state, &current)?;
            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
        }
        if !mismatches.is_empty() {
            return Err(ChainError::EvaluationMismatch(mismatches.join("; ")));
        }

        self.status = ChainStatus::Finished;
        for logger in self.loggers.iter_mut() {
            logger.finish()?;
        }
        if let Some(pb) = &self.progress {
            pb.finish();
        }

        let summary = ChainSummary {
            states: self.options.chain_length,
            final_posterior: current.posterior,
            best_posterior: best,
            evaluations: self.posterior.prior().evaluations()
                + self.posterior.likelihood().evaluations(),
            operators: self.operator_summaries(),
        };
        report_operators(&summary.operators);
        if let Some(path) = &self.options.operator_analysis {
            write_operator_analysis(path, &summary.operators)?;
        }
        info!(
            "finished {} states: final posterior {:.4}, best {:.4}",
            summary.states, summary.final_posterior, summary.best_posterior
        );
        Ok(summary)
    }

    fn in_full_evaluation_phase(&self, state: u64) -> bool {
        if self.options.full_evaluation_count == 0 {
            return false;
        }
        state <= self.options.full_evaluation_count
            || (self.schedule.minimum_accept_and_reject_count() > 0
                && !self.schedule.all_operators_exercised())
    }

    fn log_state(&mut self, state: u64, evaluation: &Evaluation) -> Result<()> {
        let view = ChainState {
            state,
            evaluation,
            graph: &self.graph,
        };
        for logger in self.loggers.iter_mut() {
            if state % logger.log_every() == 0 {
                if let Err(e) = logger.log_state(&view) {
                    error!("logging state {} failed: {}", state, e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub fn operator_summaries(&self) -> Vec<OperatorSummary> {
        self.schedule
            .operators()
            .iter()
            .map(|op| OperatorSummary {
                name: op.name().to_string(),
                tuning: op.operator().raw_parameter(),
                count: op.count(),
                accepted: op.accepted(),
                rejected: op.rejected(),
                failed: op.failed(),
                acceptance: op.acceptance_probability(),
                mean_time_ms: op.mean_time_ms(),
                suggestion: op.tuning_suggestion().to_string(),
            })
            .collect()
    }
}

fn report_operators(operators: &[OperatorSummary]) {
    info!("operator analysis");
    for op in operators {
        let tuning = op.tuning.map_or("-".to_string(), |t| format!("{:.4}", t));
        info!(
            "{:<32} {:>10} {:>8} {:>8.4} {:>10.4}ms {}",
            op.name, tuning, op.count, op.acceptance, op.mean_time_ms, op.suggestion
        );
        if op.count > 0 && op.failed == op.count {
            warn!("{} never produced a valid proposal", op.name);
        }
    }
}

/// Tab-delimited operator table.
pub fn write_operator_analysis(path: &Path, operators: &[OperatorSummary]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    wtr.write_record([
        "operator",
        "tuning",
        "count",
        "accepted",
        "rejected",
        "failed",
        "acceptance",
        "time_ms",
        "suggestion",
    ])?;
    for op in operators {
        wtr.write_record(&[
            op.name.clone(),
            op.tuning.map_or(String::new(), |t| t.to_string()),
            op.count.to_string(),
            op.accepted.to_string(),
            op.rejected.to_string(),
            op.failed.to_string(),
            op.acceptance.to_string(),
            op.mean_time_ms.to_string(),
            op.suggestion.clone(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::Alignment;
    use crate::likelihood::{
        CoalescentLikelihood, DensityFunction, Demographic, DistributionLikelihood, Likelihood,
        LikelihoodKind, PriorDensity, SubstitutionModel, TreeDataLikelihood,
    };
    use crate::model::Source;
    use crate::operators::parameter::BoundaryCondition;
    use crate::operators::{
        CoercionMode, McmcOperator, NarrowExchangeOperator, OperatorRecord, RandomWalkOperator,
        ScaleOperator, SubtreeSlideOperator, UniformNodeHeightOperator, WideExchangeOperator,
        WilsonBaldingOperator,
    };
    use crate::tree::TreeModel;
    use crate::variable::{Bounds, Variable, VariableId};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::{Arc, Mutex};

    /// Records one variable's value at every logged state.
    struct Capture {
        variable: VariableId,
        seen: Arc<Mutex<Vec<f64>>>,
    }

    impl Logger for Capture {
        fn log_every(&self) -> u64 {
            1
        }
        fn start(&mut self, _: &ModelGraph) -> Result<()> {
            Ok(())
        }
        fn log_state(&mut self, state: &ChainState) -> Result<()> {
            let v = state.graph.variable(self.variable).value(0)?;
            self.seen.lock().unwrap().push(v);
            Ok(())
        }
        fn finish(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn record(op: impl McmcOperator + 'static, weight: f64) -> OperatorRecord {
        OperatorRecord::new(Box::new(op), weight, CoercionMode::Default).unwrap()
    }

    fn normal_chain(bounds: Option<Bounds>, length: u64) -> (Mcmc, VariableId, Arc<Mutex<Vec<f64>>>) {
        let mut g = ModelGraph::new();
        let m = g.add_model("m").unwrap();
        let mut v = Variable::scalar("x", 0.5);
        if let Some(b) = bounds {
            v.add_bounds(b);
        }
        let x = g.add_variable(m, v).unwrap();
        let prior = Likelihood::new(
            "x.prior",
            LikelihoodKind::Distribution(DistributionLikelihood::new(
                x,
                PriorDensity::normal(0.0, 1.0).unwrap(),
            )),
        );
        let posterior = Posterior::new(vec![prior], Vec::new());
        let mut schedule = OperatorSchedule::default();
        schedule.add_operator(record(
            RandomWalkOperator::new(&g, x, 0.05, BoundaryCondition::Rejecting).unwrap(),
            1.0,
        ));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let capture = Capture {
            variable: x,
            seen: seen.clone(),
        };
        let options = McmcOptions {
            chain_length: length,
            ..McmcOptions::default()
        };
        let chain = Mcmc::new(g, posterior, schedule, vec![Box::new(capture)], options).unwrap();
        (chain, x, seen)
    }

    #[test]
    fn samples_a_standard_normal() {
        let (mut chain, _, seen) = normal_chain(None, 40_000);
        let mut rng = StdRng::seed_from_u64(42);
        let summary = chain.run(&mut rng).unwrap();
        assert_eq!(chain.status(), ChainStatus::Finished);
        assert_eq!(summary.operators[0].count, 40_000);
        let values = seen.lock().unwrap();
        let burnin = values.len() / 10;
        let kept = &values[burnin..];
        let n = kept.len() as f64;
        let mean = kept.iter().sum::<f64>() / n;
        let var = kept.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 0.15, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.25, "variance {}", var);
        // coercion widened the window from its tiny start and kept it finite
        let window = summary.operators[0].tuning.unwrap();
        assert!(window > 0.5 && window.is_finite(), "window {}", window);
    }

    #[test]
    fn bounds_are_never_left() {
        let (mut chain, _, seen) = normal_chain(Some(Bounds::new(0.0, 1.0).unwrap()), 5_000);
        let mut rng = StdRng::seed_from_u64(7);
        chain.run(&mut rng).unwrap();
        let values = seen.lock().unwrap();
        assert_eq!(values.len(), 5_001);
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn impossible_start_is_reported() {
        let mut g = ModelGraph::new();
        let m = g.add_model("m").unwrap();
        let x = g.add_variable(m, Variable::scalar("x", 2.0)).unwrap();
        let prior = Likelihood::new(
            "x.prior",
            LikelihoodKind::Distribution(DistributionLikelihood::new(
                x,
                PriorDensity::uniform(0.0, 1.0).unwrap(),
            )),
        );
        let mut schedule = OperatorSchedule::default();
        schedule.add_operator(record(ScaleOperator::new(&g, x, 0.5, false).unwrap(), 1.0));
        let mut chain = Mcmc::new(
            g,
            Posterior::new(vec![prior], Vec::new()),
            schedule,
            Vec::new(),
            McmcOptions::default(),
        )
        .unwrap();
        let err = chain.run(&mut StdRng::seed_from_u64(1)).unwrap_err();
        match err {
            ChainError::InvalidInitialState(msg) => assert!(msg.contains("x.prior=-inf")),
            other => panic!("unexpected {}", other),
        }
    }

    const SEQS: &[(&str, &str)] = &[
        ("a", "ACGTACGTAACCGGTTACGT"),
        ("b", "ACGTACGAAACCGGTTACGA"),
        ("c", "ACGAACGTAACCTGTTACCT"),
        ("d", "TCGAACGTAACCTGATACCT"),
        ("e", "TCGAACTTAAGCTGATACCT"),
    ];

    fn phylogenetic_chain(extra: Option<Likelihood>, full_evaluation_count: u64) -> Mcmc {
        let mut g = ModelGraph::new();
        let m = g.add_model("treeModel").unwrap();
        let tree = TreeModel::from_newick(
            "tree",
            "(((a:0.1,b:0.1):0.1,c:0.2):0.2,(d:0.15,e:0.15):0.25);",
        )
        .unwrap();
        let t = g.add_tree(m, tree).unwrap();
        let mut pop = Variable::scalar("popSize", 1.0);
        pop.add_bounds(Bounds::new(0.0, f64::INFINITY).unwrap());
        let n = g.add_variable(m, pop).unwrap();
        let records: Vec<(String, String)> = SEQS
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        let patterns = Alignment::from_sequences(&records).unwrap().patterns();
        let data = TreeDataLikelihood::new(t, g.tree(t), &patterns, SubstitutionModel::Jc69, None)
            .unwrap();
        let mut priors = vec![
            Likelihood::new(
                "coalescent",
                LikelihoodKind::Coalescent(CoalescentLikelihood::new(
                    t,
                    Demographic::Constant { pop_size: n },
                )),
            ),
            Likelihood::new(
                "popSize.prior",
                LikelihoodKind::Distribution(DistributionLikelihood::new(n, PriorDensity::OneOnX)),
            ),
        ];
        priors.extend(extra);
        let posterior = Posterior::new(
            priors,
            vec![Likelihood::new("treeLikelihood", LikelihoodKind::TreeData(data))],
        );
        let mut schedule = OperatorSchedule::default();
        schedule.add_operator(record(NarrowExchangeOperator::new(&g, t), 3.0));
        schedule.add_operator(record(WideExchangeOperator::new(&g, t), 1.0));
        schedule.add_operator(record(SubtreeSlideOperator::new(&g, t, 0.1, false).unwrap(), 3.0));
        schedule.add_operator(record(WilsonBaldingOperator::new(&g, t), 1.0));
        schedule.add_operator(record(UniformNodeHeightOperator::new(&g, t), 3.0));
        schedule.add_operator(record(ScaleOperator::new(&g, n, 0.75, false).unwrap(), 1.0));
        let options = McmcOptions {
            chain_length: 3_000,
            full_evaluation_count,
            ..McmcOptions::default()
        };
        Mcmc::new(g, posterior, schedule, Vec::new(), options).unwrap()
    }

    #[test]
    fn cached_evaluation_matches_full_recompute() {
        let mut chain = phylogenetic_chain(None, 3_000);
        let summary = chain.run(&mut StdRng::seed_from_u64(99)).unwrap();
        assert!(summary.final_posterior.is_finite());
        assert!(summary.operators.iter().all(|op| op.count > 0));
        let accepted: u64 = summary.operators.iter().map(|op| op.accepted).sum();
        assert!(accepted > 0);
        chain.graph().tree(chain.graph().tree_id("tree").unwrap()).validate().unwrap();
    }

    /// Reads the tree but declares no dependency on it.
    struct Undeclared {
        tree: crate::tree::TreeId,
    }

    impl DensityFunction for Undeclared {
        fn dependencies(&self) -> Vec<Source> {
            Vec::new()
        }
        fn log_density(&self, graph: &ModelGraph) -> Result<f64> {
            Ok(-graph.tree(self.tree).root_height())
        }
    }

    #[test]
    fn stale_cache_is_caught() {
        let tree = crate::tree::TreeId(0);
        let bad = Likelihood::new("undeclared", LikelihoodKind::Custom(Box::new(Undeclared { tree })));
        let mut chain = phylogenetic_chain(Some(bad), 500);
        let err = chain.run(&mut StdRng::seed_from_u64(3)).unwrap_err();
        assert!(matches!(err, ChainError::EvaluationMismatch(_)));
    }

    #[test]
    fn operator_analysis_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.ops");
        let (mut chain, _, _) = normal_chain(None, 200);
        chain.options.operator_analysis = Some(path.clone());
        chain.run(&mut StdRng::seed_from_u64(5)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("operator\ttuning\tcount"));
        assert!(lines.next().unwrap().starts_with("randomWalk(x)\t"));
    }

    /// Writes a value, then gives up on the move.
    struct GivesUp {
        variable: VariableId,
    }

    impl McmcOperator for GivesUp {
        fn name(&self) -> &str {
            "givesUp"
        }
        fn operate(&mut self, graph: &mut ModelGraph, _: &mut dyn rand::RngCore) -> Result<ProposalResult> {
            graph.variable_mut(self.variable).set_value(0, 5.0)?;
            Ok(ProposalResult::Infeasible("no room to move".into()))
        }
    }

    #[test]
    fn failed_moves_leave_state_and_cache_untouched() {
        use crate::likelihood::tests::CountingDensity;
        use std::sync::atomic::{AtomicU64, Ordering};

        let mut g = ModelGraph::new();
        let m = g.add_model("m").unwrap();
        let x = g.add_variable(m, Variable::scalar("x", 0.5)).unwrap();
        let calls = Arc::new(AtomicU64::new(0));
        let density = Likelihood::new(
            "sq",
            LikelihoodKind::Custom(Box::new(CountingDensity {
                variable: x,
                calls: calls.clone(),
            })),
        );
        let mut schedule = OperatorSchedule::default();
        schedule.add_operator(record(GivesUp { variable: x }, 1.0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let capture = Capture {
            variable: x,
            seen: seen.clone(),
        };
        let options = McmcOptions {
            chain_length: 50,
            ..McmcOptions::default()
        };
        let mut chain = Mcmc::new(
            g,
            Posterior::new(Vec::new(), vec![density]),
            schedule,
            vec![Box::new(capture)],
            options,
        )
        .unwrap();
        let summary = chain.run(&mut StdRng::seed_from_u64(2)).unwrap();

        assert_eq!(chain.status(), ChainStatus::Finished);
        assert_eq!(chain.graph().variable(x).value(0).unwrap(), 0.5);
        assert!(seen.lock().unwrap().iter().all(|v| *v == 0.5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.final_posterior, -0.25);
        let op = &summary.operators[0];
        assert_eq!(op.failed, 50);
        assert_eq!(op.rejected, 50);
        assert_eq!(op.accepted, 0);
    }

    /// Standard normal up to `cliff`, then a broken score.
    struct Cliff {
        variable: VariableId,
        cliff: f64,
        beyond: f64,
    }

    impl DensityFunction for Cliff {
        fn dependencies(&self) -> Vec<Source> {
            vec![Source::Variable(self.variable)]
        }
        fn log_density(&self, graph: &ModelGraph) -> Result<f64> {
            let x = graph.variable(self.variable).value(0)?;
            Ok(if x > self.cliff { self.beyond } else { -0.5 * x * x })
        }
    }

    /// Records the posterior at every logged state.
    struct Scores {
        seen: Arc<Mutex<Vec<f64>>>,
    }

    impl Logger for Scores {
        fn log_every(&self) -> u64 {
            1
        }
        fn start(&mut self, _: &ModelGraph) -> Result<()> {
            Ok(())
        }
        fn log_state(&mut self, state: &ChainState) -> Result<()> {
            self.seen.lock().unwrap().push(state.evaluation.posterior);
            Ok(())
        }
        fn finish(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn broken_scores_are_never_accepted() {
        for beyond in [f64::NAN, f64::INFINITY] {
            let mut g = ModelGraph::new();
            let m = g.add_model("m").unwrap();
            let x = g.add_variable(m, Variable::scalar("x", 0.5)).unwrap();
            let cliff = Likelihood::new(
                "cliff",
                LikelihoodKind::Custom(Box::new(Cliff {
                    variable: x,
                    cliff: 1.0,
                    beyond,
                })),
            );
            let mut schedule = OperatorSchedule::default();
            schedule.add_operator(record(
                RandomWalkOperator::new(&g, x, 0.5, BoundaryCondition::Rejecting).unwrap(),
                1.0,
            ));
            let values = Arc::new(Mutex::new(Vec::new()));
            let scores = Arc::new(Mutex::new(Vec::new()));
            let loggers: Vec<Box<dyn Logger>> = vec![
                Box::new(Capture {
                    variable: x,
                    seen: values.clone(),
                }),
                Box::new(Scores { seen: scores.clone() }),
            ];
            let options = McmcOptions {
                chain_length: 5_000,
                coercion: false,
                ..McmcOptions::default()
            };
            let mut chain = Mcmc::new(
                g,
                Posterior::new(Vec::new(), vec![cliff]),
                schedule,
                loggers,
                options,
            )
            .unwrap();
            let summary = chain.run(&mut StdRng::seed_from_u64(17)).unwrap();

            assert!(summary.final_posterior.is_finite());
            assert!(summary.best_posterior <= 0.0);
            let values = values.lock().unwrap();
            assert_eq!(values.len(), 5_001);
            assert!(values.iter().all(|v| *v <= 1.0), "{} crossed the cliff", beyond);
            assert!(values.iter().any(|v| *v > 0.8));
            assert!(scores.lock().unwrap().iter().all(|p| p.is_finite()));
        }
    }
}
