//! Nucleotide substitution models with closed-form transition probabilities.
//!
//! Rates are normalized to one expected substitution per unit distance.

use ndarray::{Array2, ArrayViewMut2};

use crate::alignment::NUCLEOTIDE_STATES;
use crate::error::{ChainError, Result};
use crate::model::{ModelGraph, Source};
use crate::variable::VariableId;

#[derive(Debug, Clone)]
pub enum SubstitutionModel {
    Jc69,
    Hky {
        kappa: VariableId,
        frequencies: [f64; NUCLEOTIDE_STATES],
    },
}

const PURINE: [bool; NUCLEOTIDE_STATES] = [true, false, true, false];

impl SubstitutionModel {
    pub fn hky(kappa: VariableId, frequencies: [f64; NUCLEOTIDE_STATES]) -> Result<Self> {
        let total: f64 = frequencies.iter().sum();
        if frequencies.iter().any(|&f| !(f > 0.0)) || (total - 1.0).abs() > 1e-6 {
            return Err(ChainError::InvalidInput(format!(
                "base frequencies {:?} must be positive and sum to one",
                frequencies
            )));
        }
        Ok(SubstitutionModel::Hky {
            kappa,
            frequencies: frequencies.map(|f| f / total),
        })
    }

    pub fn frequencies(&self) -> [f64; NUCLEOTIDE_STATES] {
        match self {
            SubstitutionModel::Jc69 => [0.25; NUCLEOTIDE_STATES],
            SubstitutionModel::Hky { frequencies, .. } => *frequencies,
        }
    }

    pub fn dependencies(&self) -> Vec<Source> {
        match self {
            SubstitutionModel::Jc69 => Vec::new(),
            SubstitutionModel::Hky { kappa, .. } => vec![Source::Variable(*kappa)],
        }
    }

    pub fn new_matrix() -> Array2<f64> {
        Array2::zeros((NUCLEOTIDE_STATES, NUCLEOTIDE_STATES))
    }

    /// Fills `out[i][j] = P(j | i, distance)`.
    pub fn transition_probabilities(
        &self,
        graph: &ModelGraph,
        distance: f64,
        mut out: ArrayViewMut2<f64>,
    ) -> Result<()> {
        match self {
            SubstitutionModel::Jc69 => {
                let e = (-4.0 * distance / 3.0).exp();
                let same = 0.25 + 0.75 * e;
                let diff = 0.25 - 0.25 * e;
                for i in 0..NUCLEOTIDE_STATES {
                    for j in 0..NUCLEOTIDE_STATES {
                        out[[i, j]] = if i == j { same } else { diff };
                    }
                }
            }
            SubstitutionModel::Hky { kappa, frequencies } => {
                let k = graph.variable(*kappa).value(0)?;
                let pi = frequencies;
                let pi_r = pi[0] + pi[2];
                let pi_y = pi[1] + pi[3];
                let beta = 1.0 / (2.0 * pi_r * pi_y + 2.0 * k * (pi[0] * pi[2] + pi[1] * pi[3]));
                let e1 = (-beta * distance).exp();
                for j in 0..NUCLEOTIDE_STATES {
                    let class = if PURINE[j] { pi_r } else { pi_y };
                    let e2 = (-beta * distance * (1.0 + class * (k - 1.0))).exp();
                    for i in 0..NUCLEOTIDE_STATES {
                        out[[i, j]] = if i == j {
                            pi[j] + pi[j] * (1.0 / class - 1.0) * e1 + ((class - pi[j]) / class) * e2
                        } else if PURINE[i] == PURINE[j] {
                            pi[j] + pi[j] * (1.0 / class - 1.0) * e1 - (pi[j] / class) * e2
                        } else {
                            pi[j] * (1.0 - e1)
                        };
                    }
                }
            }
        }
        Ok(())
    }
}
