//! Entry points for the `run` and `check` subcommands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::ProgressBar;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::info;

use crate::config::{BuiltModel, ChainConfig};
use crate::error::{ChainError, Result};
use crate::logger::{Logger, ScreenLogger, TraceLogger, TreeLogger};
use crate::mcmc::{ChainSummary, Mcmc};
use crate::posterior::Evaluation;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: PathBuf,
    pub chain_length: Option<u64>,
    pub seed: Option<u64>,
    pub output: PathBuf,
    pub replicates: usize,
    pub threads: usize,
    pub progress: bool,
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn loggers(built: &BuiltModel, prefix: &Path) -> Result<Vec<Box<dyn Logger>>> {
    let mut loggers: Vec<Box<dyn Logger>> = Vec::new();
    if let Some(every) = built.trace_every {
        let path = with_suffix(prefix, ".log");
        loggers.push(Box::new(TraceLogger::create(&path, built.trace_columns.clone(), every)?));
    }
    for &(tree, every) in &built.tree_logs {
        let path = if built.tree_logs.len() == 1 {
            with_suffix(prefix, ".trees")
        } else {
            with_suffix(prefix, &format!(".{}.trees", built.graph.tree(tree).name()))
        };
        loggers.push(Box::new(TreeLogger::create(&path, tree, every)?));
    }
    if let Some(every) = built.screen_every {
        loggers.push(Box::new(ScreenLogger::new(every)));
    }
    Ok(loggers)
}

fn run_single_chain(
    config: &ChainConfig,
    chain_length: u64,
    seed: u64,
    prefix: &Path,
    progress: Option<ProgressBar>,
) -> Result<ChainSummary> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut built = config.build(&mut rng)?;
    built.options.chain_length = chain_length;
    built.options.operator_analysis = Some(with_suffix(prefix, ".ops"));
    let loggers = loggers(&built, prefix)?;
    let mut chain = Mcmc::new(built.graph, built.posterior, built.schedule, loggers, built.options)?;
    if let Some(pb) = progress {
        chain = chain.with_progress(pb);
    }
    info!("chain {} with seed {}", prefix.display(), seed);
    chain.run(&mut rng)
}

/// Runs one chain, or `replicates` independent chains in parallel with
/// seeds `S + i` and output prefixes `P.rep<i>`.
pub fn start(options: &RunOptions) -> Result<Vec<ChainSummary>> {
    let config = ChainConfig::from_path(&options.config)?;
    let chain_length = options.chain_length.unwrap_or(config.chain.chain_length);
    let seed = options.seed.unwrap_or(config.chain.seed);

    if options.replicates <= 1 {
        let progress = options.progress.then(|| ProgressBar::new(chain_length));
        let summary = run_single_chain(&config, chain_length, seed, &options.output, progress)?;
        return Ok(vec![summary]);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads.max(1))
        .build()
        .map_err(|e| ChainError::InvalidInput(format!("thread pool: {}", e)))?;
    let progress_bar = Arc::new(ProgressBar::new(options.replicates as u64));
    let results: Vec<Result<ChainSummary>> = pool.install(|| {
        (0..options.replicates)
            .into_par_iter()
            .map(|i| {
                let prefix = with_suffix(&options.output, &format!(".rep{}", i));
                let result = run_single_chain(&config, chain_length, seed + i as u64, &prefix, None);
                progress_bar.inc(1);
                result
            })
            .collect()
    });
    progress_bar.finish();

    let summaries = results.into_iter().collect::<Result<Vec<_>>>()?;
    for (i, s) in summaries.iter().enumerate() {
        info!(
            "replicate {}: final posterior {:.4}, best {:.4}",
            i, s.final_posterior, s.best_posterior
        );
    }
    Ok(summaries)
}

/// Builds the model and evaluates the starting state without sampling.
pub fn check(config_path: &Path, seed: Option<u64>) -> Result<Evaluation> {
    let config = ChainConfig::from_path(config_path)?;
    let mut rng = StdRng::seed_from_u64(seed.unwrap_or(config.chain.seed));
    let built = config.build(&mut rng)?;
    let mut chain = Mcmc::new(
        built.graph,
        built.posterior,
        built.schedule,
        Vec::new(),
        built.options,
    )?;
    let evaluation = chain.initial_evaluation()?;
    info!("posterior {}", evaluation.posterior);
    info!("{}", chain.diagnosis()?);
    Ok(evaluation)
}
