use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use phylochain::run::{self, RunOptions};

#[derive(Debug, Parser)]
#[clap(name = "phylochain")]
#[clap(about = "Bayesian phylogenetic inference by Markov chain Monte Carlo.", long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the chain described by a JSON model file
    #[clap(arg_required_else_help = true)]
    Run {
        /// path for the JSON model description
        #[clap(short, long, value_parser, required = true)]
        config: PathBuf,

        /// number of states, overrides the model file
        #[clap(short = 'n', long, value_parser)]
        chain_length: Option<u64>,

        /// random seed, overrides the model file
        #[clap(short, long, value_parser)]
        seed: Option<u64>,

        /// output prefix for the .log, .trees and .ops files
        #[clap(short, long, value_parser, default_value = "phylochain")]
        output: PathBuf,

        /// independent chains run in parallel (seed S + i, prefix P.rep<i>)
        #[clap(short, long, value_parser, default_value_t = 1)]
        replicates: usize,

        /// worker threads for replicate chains
        #[clap(short, long, value_parser, default_value_t = 1)]
        threads: usize,

        /// show a progress bar
        #[clap(short, long, value_parser, default_value_t = false)]
        progress: bool,
    },

    /// Build the model and report the starting posterior without sampling
    #[clap(arg_required_else_help = true)]
    Check {
        /// path for the JSON model description
        #[clap(short, long, value_parser, required = true)]
        config: PathBuf,

        /// random seed for random starting trees
        #[clap(short, long, value_parser)]
        seed: Option<u64>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let result = match args.command {
        Commands::Run {
            config,
            chain_length,
            seed,
            output,
            replicates,
            threads,
            progress,
        } => run::start(&RunOptions {
            config,
            chain_length,
            seed,
            output,
            replicates,
            threads,
            progress,
        })
        .map(|_| ()),

        Commands::Check { config, seed } => run::check(&config, seed).map(|_| ()),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
