//! Bayesian phylogenetic MCMC: a graph of parameters and trees, cached
//! likelihoods that recompute only what changed, proposal operators with
//! adaptive tuning, and a Metropolis-Hastings driver.

pub mod acceptor;
pub mod alignment;
pub mod config;
pub mod error;
pub mod likelihood;
pub mod logger;
pub mod mcmc;
pub mod model;
pub mod newick;
pub mod operators;
pub mod posterior;
pub mod run;
pub mod schedule;
pub mod tree;
pub mod variable;

pub use error::{ChainError, Result};
pub use mcmc::{ChainSummary, Mcmc, McmcOptions};
pub use model::ModelGraph;
