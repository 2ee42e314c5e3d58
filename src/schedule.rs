//! Weighted operator selection.

use rand::Rng;

use crate::error::{ChainError, Result};
use crate::operators::OperatorRecord;

/// How an operator's use count is damped before it sets the coercion step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationTransform {
    #[default]
    Log,
    Sqrt,
    Linear,
}

impl OptimizationTransform {
    pub fn apply(self, count: f64) -> f64 {
        match self {
            OptimizationTransform::Log => count.ln(),
            OptimizationTransform::Sqrt => count.sqrt(),
            OptimizationTransform::Linear => count,
        }
    }
}

pub struct OperatorSchedule {
    operators: Vec<OperatorRecord>,
    cumulative: Vec<f64>,
    transform: OptimizationTransform,
    minimum_accept_and_reject_count: u64,
}

impl Default for OperatorSchedule {
    fn default() -> Self {
        Self::new(OptimizationTransform::default())
    }
}

impl OperatorSchedule {
    pub fn new(transform: OptimizationTransform) -> Self {
        Self {
            operators: Vec::new(),
            cumulative: Vec::new(),
            transform,
            minimum_accept_and_reject_count: 0,
        }
    }

    pub fn add_operator(&mut self, record: OperatorRecord) {
        let total = self.total_weight() + record.weight();
        self.cumulative.push(total);
        self.operators.push(record);
    }

    pub fn total_weight(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Index of the next operator, chosen with probability proportional to
    /// its weight.
    pub fn next_index<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<usize> {
        if self.operators.is_empty() {
            return Err(ChainError::InvalidInput("operator schedule is empty".into()));
        }
        let u = rng.gen::<f64>() * self.total_weight();
        let i = self.cumulative.partition_point(|&c| c <= u);
        Ok(i.min(self.operators.len() - 1))
    }

    pub fn operator(&self, index: usize) -> &OperatorRecord {
        &self.operators[index]
    }

    pub fn operator_mut(&mut self, index: usize) -> &mut OperatorRecord {
        &mut self.operators[index]
    }

    pub fn operators(&self) -> &[OperatorRecord] {
        &self.operators
    }

    pub fn optimization_transform(&self, count: f64) -> f64 {
        self.transform.apply(count)
    }

    pub fn set_minimum_accept_and_reject_count(&mut self, count: u64) {
        self.minimum_accept_and_reject_count = count;
    }

    /// Until every operator has been accepted and rejected this many times,
    /// the debug full-evaluation phase keeps running.
    pub fn minimum_accept_and_reject_count(&self) -> u64 {
        self.minimum_accept_and_reject_count
    }

    pub fn all_operators_exercised(&self) -> bool {
        self.operators.iter().all(|op| {
            op.accepted() >= self.minimum_accept_and_reject_count
                && op.rejected() >= self.minimum_accept_and_reject_count
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelGraph;
    use crate::operators::{CoercionMode, ScaleOperator};
    use crate::variable::Variable;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn schedule(weights: &[f64]) -> OperatorSchedule {
        let mut g = ModelGraph::new();
        let m = g.add_model("m").unwrap();
        let x = g.add_variable(m, Variable::scalar("x", 1.0)).unwrap();
        let mut schedule = OperatorSchedule::default();
        for &w in weights {
            let op = ScaleOperator::new(&g, x, 0.75, false).unwrap();
            schedule.add_operator(OperatorRecord::new(Box::new(op), w, CoercionMode::Off).unwrap());
        }
        schedule
    }

    #[test]
    fn selection_follows_weights() {
        let schedule = schedule(&[1.0, 3.0, 6.0]);
        let mut rng = StdRng::seed_from_u64(20240601);
        let mut counts = [0usize; 3];
        let draws = 100_000;
        for _ in 0..draws {
            counts[schedule.next_index(&mut rng).unwrap()] += 1;
        }
        for (count, expected) in counts.iter().zip([0.1, 0.3, 0.6]) {
            let freq = *count as f64 / draws as f64;
            // about five standard errors at n = 100000
            assert!((freq - expected).abs() < 0.008, "{} vs {}", freq, expected);
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let schedule = schedule(&[2.0, 1.0, 1.0, 5.0]);
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..50)
                .map(|_| schedule.next_index(&mut rng).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(9), draw(9));
    }

    #[test]
    fn transforms() {
        assert_eq!(OptimizationTransform::Linear.apply(9.0), 9.0);
        assert_eq!(OptimizationTransform::Sqrt.apply(9.0), 3.0);
        assert_eq!(OptimizationTransform::Log.apply(1.0), 0.0);
        assert!(OperatorSchedule::default().next_index(&mut StdRng::seed_from_u64(0)).is_err());
    }
}
