//! Operators on continuous parameters.

use rand::{Rng, RngCore};

use crate::error::{ChainError, Result};
use crate::model::ModelGraph;
use crate::variable::{Bounds, VariableId};

use super::{clamp_coercable, draw_scale, propose_value, McmcOperator, ProposalResult};

fn check_scale_factor(scale_factor: f64) -> Result<()> {
    if !(scale_factor > 0.0 && scale_factor < 1.0) {
        return Err(ChainError::InvalidInput(format!(
            "scale factor must be in (0, 1), got {}",
            scale_factor
        )));
    }
    Ok(())
}

fn check_dimension(graph: &ModelGraph, variable: VariableId) -> Result<()> {
    let v = graph.variable(variable);
    if v.dimension() == 0 {
        return Err(ChainError::InvalidInput(format!(
            "{} has no dimensions to propose on",
            v.name()
        )));
    }
    Ok(())
}

fn check_positive(what: &str, value: f64) -> Result<()> {
    if !(value > 0.0) || !value.is_finite() {
        return Err(ChainError::InvalidInput(format!(
            "{} must be positive, got {}",
            what, value
        )));
    }
    Ok(())
}

/// Multiplies one random dimension (or all of them) by a factor drawn from
/// `[sf, 1/sf]`.
pub struct ScaleOperator {
    name: String,
    variable: VariableId,
    scale_factor: f64,
    scale_all: bool,
}

impl ScaleOperator {
    pub fn new(graph: &ModelGraph, variable: VariableId, scale_factor: f64, scale_all: bool) -> Result<Self> {
        check_scale_factor(scale_factor)?;
        check_dimension(graph, variable)?;
        Ok(Self {
            name: format!("scale({})", graph.variable(variable).name()),
            variable,
            scale_factor,
            scale_all,
        })
    }
}

impl McmcOperator for ScaleOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn operate(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<ProposalResult> {
        let scale = draw_scale(self.scale_factor, rng);
        let dim = graph.variable(self.variable).dimension();
        if self.scale_all {
            for i in 0..dim {
                let x = graph.variable(self.variable).value(i)?;
                if !propose_value(graph, self.variable, i, x * scale)? {
                    return Ok(ProposalResult::Infeasible("scaled value out of bounds".into()));
                }
            }
            Ok(ProposalResult::Success((dim as f64 - 2.0) * scale.ln()))
        } else {
            let i = rng.gen_range(0..dim);
            let x = graph.variable(self.variable).value(i)?;
            if !propose_value(graph, self.variable, i, x * scale)? {
                return Ok(ProposalResult::Infeasible("scaled value out of bounds".into()));
            }
            Ok(ProposalResult::Success(-scale.ln()))
        }
    }

    fn coercable_parameter(&self) -> Option<f64> {
        Some((1.0 / self.scale_factor - 1.0).ln())
    }

    fn set_coercable_parameter(&mut self, value: f64) {
        self.scale_factor = 1.0 / (clamp_coercable(value).exp() + 1.0);
    }

    fn raw_parameter(&self) -> Option<f64> {
        Some(self.scale_factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryCondition {
    Reflecting,
    Rejecting,
}

/// Folds `value` back into `[bounds.lower, bounds.upper]`.
pub fn reflect(value: f64, bounds: Bounds) -> f64 {
    let (lower, upper) = (bounds.lower, bounds.upper);
    if value < lower {
        if upper.is_infinite() {
            return lower + (lower - value);
        }
        let width = upper - lower;
        let mut remainder = lower - value;
        let widths = (remainder / width).floor();
        remainder -= width * widths;
        if widths % 2.0 == 0.0 {
            lower + remainder
        } else {
            upper - remainder
        }
    } else if value > upper {
        if lower.is_infinite() {
            return upper - (value - upper);
        }
        let width = upper - lower;
        let mut remainder = value - upper;
        let widths = (remainder / width).floor();
        remainder -= width * widths;
        if widths % 2.0 == 0.0 {
            upper - remainder
        } else {
            lower + remainder
        }
    } else {
        value
    }
}

/// Adds a uniform step from `[-w, w]` to one random dimension.
pub struct RandomWalkOperator {
    name: String,
    variable: VariableId,
    window: f64,
    boundary: BoundaryCondition,
}

impl RandomWalkOperator {
    pub fn new(
        graph: &ModelGraph,
        variable: VariableId,
        window: f64,
        boundary: BoundaryCondition,
    ) -> Result<Self> {
        check_positive("random walk window", window)?;
        check_dimension(graph, variable)?;
        Ok(Self {
            name: format!("randomWalk({})", graph.variable(variable).name()),
            variable,
            window,
            boundary,
        })
    }
}

impl McmcOperator for RandomWalkOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn operate(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<ProposalResult> {
        let var = graph.variable(self.variable);
        let i = rng.gen_range(0..var.dimension());
        let bounds = var.bounds(i)?;
        let mut x = var.value(i)? + (2.0 * rng.gen::<f64>() - 1.0) * self.window;
        if !bounds.contains(x) {
            match self.boundary {
                BoundaryCondition::Reflecting => x = reflect(x, bounds),
                BoundaryCondition::Rejecting => {
                    return Ok(ProposalResult::Infeasible("random walk left the bounds".into()))
                }
            }
        }
        if !propose_value(graph, self.variable, i, x)? {
            return Ok(ProposalResult::Infeasible("random walk left the bounds".into()));
        }
        Ok(ProposalResult::Success(0.0))
    }

    fn coercable_parameter(&self) -> Option<f64> {
        Some(self.window.ln())
    }

    fn set_coercable_parameter(&mut self, value: f64) {
        self.window = clamp_coercable(value).exp();
    }

    fn raw_parameter(&self) -> Option<f64> {
        Some(self.window)
    }
}

/// Redraws one random dimension uniformly within its (finite) bounds.
pub struct UniformOperator {
    name: String,
    variable: VariableId,
}

impl UniformOperator {
    /// Every dimension needs finite bounds.
    pub fn new(graph: &ModelGraph, variable: VariableId) -> Result<Self> {
        check_dimension(graph, variable)?;
        let v = graph.variable(variable);
        for i in 0..v.dimension() {
            if !v.bounds(i)?.is_finite() {
                return Err(ChainError::InvalidInput(format!(
                    "uniform operator needs finite bounds on {}[{}]",
                    v.name(),
                    i
                )));
            }
        }
        Ok(Self {
            name: format!("uniform({})", v.name()),
            variable,
        })
    }
}

impl McmcOperator for UniformOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn operate(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<ProposalResult> {
        let var = graph.variable(self.variable);
        let i = rng.gen_range(0..var.dimension());
        let bounds = var.bounds(i)?;
        if !bounds.is_finite() {
            return Ok(ProposalResult::Infeasible("bounds are not finite".into()));
        }
        let x = bounds.lower + rng.gen::<f64>() * (bounds.upper - bounds.lower);
        if !propose_value(graph, self.variable, i, x)? {
            return Ok(ProposalResult::Infeasible("uniform draw outside bounds".into()));
        }
        Ok(ProposalResult::Success(0.0))
    }
}

/// Moves an amount `d ~ U(0, delta)` from one dimension to another, keeping
/// the sum fixed.
pub struct DeltaExchangeOperator {
    name: String,
    variable: VariableId,
    delta: f64,
}

impl DeltaExchangeOperator {
    pub fn new(graph: &ModelGraph, variable: VariableId, delta: f64) -> Result<Self> {
        check_positive("delta", delta)?;
        Ok(Self {
            name: format!("deltaExchange({})", graph.variable(variable).name()),
            variable,
            delta,
        })
    }
}

impl McmcOperator for DeltaExchangeOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn operate(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<ProposalResult> {
        let dim = graph.variable(self.variable).dimension();
        if dim < 2 {
            return Ok(ProposalResult::Infeasible("delta exchange needs two dimensions".into()));
        }
        let i = rng.gen_range(0..dim);
        let mut j = rng.gen_range(0..dim - 1);
        if j >= i {
            j += 1;
        }
        let d = rng.gen::<f64>() * self.delta;
        let var = graph.variable(self.variable);
        let xi = var.value(i)? - d;
        let xj = var.value(j)? + d;
        if !var.bounds(i)?.contains(xi) || !var.bounds(j)?.contains(xj) {
            return Ok(ProposalResult::Infeasible("exchange left the bounds".into()));
        }
        propose_value(graph, self.variable, i, xi)?;
        propose_value(graph, self.variable, j, xj)?;
        Ok(ProposalResult::Success(0.0))
    }

    fn coercable_parameter(&self) -> Option<f64> {
        Some(self.delta.ln())
    }

    fn set_coercable_parameter(&mut self, value: f64) {
        self.delta = clamp_coercable(value).exp();
    }

    fn raw_parameter(&self) -> Option<f64> {
        Some(self.delta)
    }
}
