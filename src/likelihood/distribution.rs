//! Prior densities on the dimensions of one variable.

use statrs::distribution::{Continuous, Exp, Gamma, LogNormal, Normal, Uniform};

use crate::error::{ChainError, Result};
use crate::model::{ChangeEvent, ModelGraph, Source};
use crate::variable::VariableId;

#[derive(Debug, Clone)]
pub enum PriorDensity {
    Uniform(Uniform),
    Normal(Normal),
    LogNormal(LogNormal),
    Exponential(Exp),
    Gamma(Gamma),
    /// Improper `1/x` prior on positive values.
    OneOnX,
}

fn stats_error(what: &str, e: statrs::StatsError) -> ChainError {
    ChainError::InvalidInput(format!("{} prior: {}", what, e))
}

impl PriorDensity {
    pub fn uniform(lower: f64, upper: f64) -> Result<Self> {
        Uniform::new(lower, upper)
            .map(PriorDensity::Uniform)
            .map_err(|e| stats_error("uniform", e))
    }

    pub fn normal(mean: f64, stdev: f64) -> Result<Self> {
        Normal::new(mean, stdev)
            .map(PriorDensity::Normal)
            .map_err(|e| stats_error("normal", e))
    }

    /// `mu` and `sigma` are on the log scale.
    pub fn log_normal(mu: f64, sigma: f64) -> Result<Self> {
        LogNormal::new(mu, sigma)
            .map(PriorDensity::LogNormal)
            .map_err(|e| stats_error("log-normal", e))
    }

    pub fn exponential(mean: f64) -> Result<Self> {
        if !(mean > 0.0) {
            return Err(ChainError::InvalidInput(format!(
                "exponential prior: mean must be positive, got {}",
                mean
            )));
        }
        Exp::new(1.0 / mean)
            .map(PriorDensity::Exponential)
            .map_err(|e| stats_error("exponential", e))
    }

    pub fn gamma(shape: f64, scale: f64) -> Result<Self> {
        if !(scale > 0.0) {
            return Err(ChainError::InvalidInput(format!(
                "gamma prior: scale must be positive, got {}",
                scale
            )));
        }
        Gamma::new(shape, 1.0 / scale)
            .map(PriorDensity::Gamma)
            .map_err(|e| stats_error("gamma", e))
    }

    /// Log density, `-inf` outside the support.
    pub fn ln_pdf(&self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NEG_INFINITY;
        }
        match self {
            PriorDensity::Uniform(d) => d.ln_pdf(x),
            PriorDensity::Normal(d) => d.ln_pdf(x),
            PriorDensity::LogNormal(d) if x > 0.0 => d.ln_pdf(x),
            PriorDensity::Exponential(d) if x >= 0.0 => d.ln_pdf(x),
            PriorDensity::Gamma(d) if x > 0.0 => d.ln_pdf(x),
            PriorDensity::OneOnX if x > 0.0 => -x.ln(),
            _ => f64::NEG_INFINITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DistributionLikelihood {
    variable: VariableId,
    density: PriorDensity,
}

impl DistributionLikelihood {
    pub fn new(variable: VariableId, density: PriorDensity) -> Self {
        Self { variable, density }
    }

    pub fn dependencies(&self) -> Vec<Source> {
        vec![Source::Variable(self.variable)]
    }

    pub fn handle_event(&self, event: &ChangeEvent) -> bool {
        event.source == Source::Variable(self.variable)
    }

    /// Independent density summed over every dimension.
    pub fn calculate(&self, graph: &ModelGraph) -> Result<f64> {
        Ok(graph
            .variable(self.variable)
            .values()
            .iter()
            .map(|&x| self.density.ln_pdf(x))
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::Variable;

    #[test]
    fn normal_and_support() {
        let n = PriorDensity::normal(0.0, 1.0).unwrap();
        assert!((n.ln_pdf(0.0) + 0.9189385332046727).abs() < 1e-12);
        let e = PriorDensity::exponential(2.0).unwrap();
        assert!((e.ln_pdf(1.0) - (0.5f64.ln() - 0.5)).abs() < 1e-12);
        assert_eq!(e.ln_pdf(-1.0), f64::NEG_INFINITY);
        assert_eq!(PriorDensity::OneOnX.ln_pdf(0.0), f64::NEG_INFINITY);
        let u = PriorDensity::uniform(0.0, 4.0).unwrap();
        assert_eq!(u.ln_pdf(5.0), f64::NEG_INFINITY);
        assert!((u.ln_pdf(1.0) + 4f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn gamma_uses_scale() {
        let g = PriorDensity::gamma(2.0, 3.0).unwrap();
        // x e^{-x/3} / (Gamma(2) 9)
        let expected = 1.5f64.ln() - 0.5 - 9f64.ln();
        assert!((g.ln_pdf(1.5) - expected).abs() < 1e-12);
    }

    #[test]
    fn sums_over_dimensions() {
        let mut g = ModelGraph::new();
        let m = g.add_model("m").unwrap();
        let v = g.add_variable(m, Variable::new("x", vec![0.0, 0.0])).unwrap();
        let lik = DistributionLikelihood::new(v, PriorDensity::normal(0.0, 1.0).unwrap());
        assert!((lik.calculate(&g).unwrap() + 2.0 * 0.9189385332046727).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(PriorDensity::normal(0.0, -1.0).is_err());
        assert!(PriorDensity::uniform(2.0, 1.0).is_err());
        assert!(PriorDensity::exponential(0.0).is_err());
    }
}
