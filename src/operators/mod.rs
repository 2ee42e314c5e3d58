//! Proposal operators and the bookkeeping that wraps them.
//!
//! An operator mutates the graph and returns a [`ProposalResult`]. The
//! surrounding [`OperatorRecord`] enforces the strict
//! `operate -> accept | reject` alternation and keeps the acceptance
//! statistics used for coercion and the final report.

pub mod parameter;
pub mod tree;

use std::time::{Duration, Instant};

use rand::RngCore;

use crate::error::{ChainError, Result};
use crate::model::ModelGraph;
use crate::variable::VariableId;

pub use parameter::{DeltaExchangeOperator, RandomWalkOperator, ScaleOperator, UniformOperator};
pub use tree::{
    NarrowExchangeOperator, SubtreeSlideOperator, TreeScaleOperator, UniformNodeHeightOperator,
    WideExchangeOperator, WilsonBaldingOperator,
};

pub const DEFAULT_TARGET_ACCEPTANCE: f64 = 0.234;

/// Coercable parameters are kept inside `[-COERCION_LIMIT, COERCION_LIMIT]`.
pub const COERCION_LIMIT: f64 = 20.0;

pub fn clamp_coercable(value: f64) -> f64 {
    value.clamp(-COERCION_LIMIT, COERCION_LIMIT)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProposalResult {
    /// The move was made; carries the log Hastings ratio.
    Success(f64),
    /// No move could be constructed. The state may be partially edited and
    /// must be restored.
    Infeasible(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoercionMode {
    /// Follow the chain's coercion switch.
    #[default]
    Default,
    On,
    Off,
}

impl CoercionMode {
    pub fn is_active(self, chain_coercion: bool) -> bool {
        match self {
            CoercionMode::Default => chain_coercion,
            CoercionMode::On => true,
            CoercionMode::Off => false,
        }
    }
}

pub trait McmcOperator: Send {
    fn name(&self) -> &str;

    fn operate(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<ProposalResult>;

    /// The tunable on its unbounded scale, for operators that adapt.
    fn coercable_parameter(&self) -> Option<f64> {
        None
    }

    /// Sets the tunable; implementations clamp it to a finite range.
    fn set_coercable_parameter(&mut self, _value: f64) {}

    /// The tunable on its natural scale, for reports.
    fn raw_parameter(&self) -> Option<f64> {
        None
    }

    fn target_acceptance(&self) -> f64 {
        DEFAULT_TARGET_ACCEPTANCE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperatorState {
    Ready,
    Proposed,
}

/// An operator together with its weight, mode and running statistics.
pub struct OperatorRecord {
    operator: Box<dyn McmcOperator>,
    weight: f64,
    coercion: CoercionMode,
    state: OperatorState,
    accepted: u64,
    rejected: u64,
    failed: u64,
    sum_deviation: f64,
    time: Duration,
}

impl OperatorRecord {
    pub fn new(operator: Box<dyn McmcOperator>, weight: f64, coercion: CoercionMode) -> Result<Self> {
        if !(weight > 0.0) || !weight.is_finite() {
            return Err(ChainError::InvalidInput(format!(
                "operator {} needs a positive weight, got {}",
                operator.name(),
                weight
            )));
        }
        Ok(Self {
            operator,
            weight,
            coercion,
            state: OperatorState::Ready,
            accepted: 0,
            rejected: 0,
            failed: 0,
            sum_deviation: 0.0,
            time: Duration::ZERO,
        })
    }

    pub fn name(&self) -> &str {
        self.operator.name()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn coercion(&self) -> CoercionMode {
        self.coercion
    }

    pub fn operator(&self) -> &dyn McmcOperator {
        self.operator.as_ref()
    }

    pub fn operate(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<ProposalResult> {
        if self.state == OperatorState::Proposed {
            return Err(self.protocol("operate called again before accept or reject"));
        }
        self.state = OperatorState::Proposed;
        let start = Instant::now();
        let result = self.operator.operate(graph, rng);
        self.time += start.elapsed();
        if let Ok(ProposalResult::Infeasible(_)) = result {
            self.failed += 1;
        }
        result
    }

    pub fn accept(&mut self, deviation: f64) -> Result<()> {
        if self.state != OperatorState::Proposed {
            return Err(self.protocol("accept without a pending proposal"));
        }
        self.state = OperatorState::Ready;
        self.accepted += 1;
        self.sum_deviation += deviation;
        Ok(())
    }

    pub fn reject(&mut self) -> Result<()> {
        if self.state != OperatorState::Proposed {
            return Err(self.protocol("reject without a pending proposal"));
        }
        self.state = OperatorState::Ready;
        self.rejected += 1;
        Ok(())
    }

    /// Moves the tunable toward the target acceptance. `log_r` is the log
    /// acceptance probability of the last proposal and `transformed_count`
    /// the schedule's transform of this operator's use count.
    pub fn coerce(&mut self, log_r: f64, transformed_count: f64) {
        if let Some(p) = self.operator.coercable_parameter() {
            let target = self.operator.target_acceptance();
            let new_p = p + (log_r.exp() - target) / (transformed_count + 1.0);
            if new_p.is_finite() {
                self.operator.set_coercable_parameter(new_p);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.accepted + self.rejected
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Proposals that could not be constructed (counted as rejections too).
    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn acceptance_probability(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            n => self.accepted as f64 / n as f64,
        }
    }

    pub fn mean_deviation(&self) -> f64 {
        match self.accepted {
            0 => 0.0,
            n => self.sum_deviation / n as f64,
        }
    }

    /// Mean wall time per proposal in milliseconds.
    pub fn mean_time_ms(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            n => self.time.as_secs_f64() * 1000.0 / n as f64,
        }
    }

    pub fn tuning_suggestion(&self) -> &'static str {
        let p = self.acceptance_probability();
        let target = self.operator.target_acceptance();
        if self.count() == 0 || self.operator.coercable_parameter().is_none() {
            ""
        } else if p < target / 2.0 {
            "low acceptance: try a smaller step"
        } else if p > (1.0 + target) / 2.0 {
            "high acceptance: try a larger step"
        } else {
            ""
        }
    }

    fn protocol(&self, detail: &str) -> ChainError {
        ChainError::Protocol {
            operator: self.operator.name().to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Writes one proposed value. `Ok(false)` means the value broke the
/// variable's bounds and nothing was written.
pub(crate) fn propose_value(
    graph: &mut ModelGraph,
    variable: VariableId,
    index: usize,
    value: f64,
) -> Result<bool> {
    match graph.variable_mut(variable).set_value(index, value) {
        Ok(()) => Ok(true),
        Err(ChainError::BoundsViolation { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Random factor in `[sf, 1/sf]` used by the scale-type operators.
pub(crate) fn draw_scale(scale_factor: f64, rng: &mut dyn RngCore) -> f64 {
    use rand::Rng;
    scale_factor + rng.gen::<f64>() * (1.0 / scale_factor - scale_factor)
}
