//! Metropolis-Hastings acceptance.

use crate::error::{ChainError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub accepted: bool,
    /// `min(0, log acceptance ratio)`; `-inf` for impossible proposals.
    pub log_r: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetropolisHastings {
    temperature: f64,
}

impl Default for MetropolisHastings {
    fn default() -> Self {
        Self { temperature: 1.0 }
    }
}

impl MetropolisHastings {
    pub fn new(temperature: f64) -> Result<Self> {
        if !(temperature > 0.0) || !temperature.is_finite() {
            return Err(ChainError::InvalidInput(format!(
                "temperature must be positive, got {}",
                temperature
            )));
        }
        Ok(Self { temperature })
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Decides a proposal from the old and new log posteriors, the log
    /// Hastings ratio and a uniform draw `u` in `(0, 1]`.
    pub fn decide(&self, old: f64, new: f64, log_hastings: f64, u: f64) -> Decision {
        let reject = Decision {
            accepted: false,
            log_r: f64::NEG_INFINITY,
        };
        if new.is_nan() || new == f64::NEG_INFINITY || log_hastings.is_nan() {
            return reject;
        }
        let delta = (new - old) / self.temperature + log_hastings;
        if delta.is_nan() {
            return reject;
        }
        if delta >= 0.0 {
            return Decision {
                accepted: true,
                log_r: 0.0,
            };
        }
        Decision {
            accepted: u.ln() < delta,
            log_r: delta,
        }
    }
}
