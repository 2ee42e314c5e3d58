use std::fs;
use std::path::Path;

use phylochain::run::{self, RunOptions};
use phylochain::ChainError;

const FASTA: &str = ">human\nAGAAATATGTCTGATAAAAGAGTTACTTTGATAGAGTAAATAATAGGAGC\n\
>chimp\nAGAAATATGTCTGATAAAAGAATTACTTTGATAGAGTAAATAATAGGAGT\n\
>bonobo\nAGAAATATGTCTGATAAAAGAATTACTTTGATAGAGTAAATAATAGGAGT\n\
>gorilla\nAGAAATATGTCTGATAAAAGAGTTACTTTGTTAGAGTAAATAATAGAGGT\n\
>orangutan\nAGAAATTTGTCTGATAAAAGAGTTACTTTGTTAGAGTAAATAATAGAGGC\n";

fn write_config(dir: &Path, chain_length: u64) -> std::path::PathBuf {
    fs::write(dir.join("apes.fasta"), FASTA).unwrap();
    let config = format!(
        r#"{{
            "chain": {{"chain_length": {}, "seed": 11, "full_evaluation": 200}},
            "parameters": [
                {{"name": "birthRate", "value": 1.0, "lower": 0.0}},
                {{"name": "kappa", "value": 2.0, "lower": 0.0}},
                {{"name": "clockRate", "value": 0.05, "lower": 0.0}}
            ],
            "trees": [{{"name": "tree", "start": "random", "pop_size": 1.0}}],
            "alignment": {{"fasta": "apes.fasta"}},
            "priors": [
                {{"type": "speciation", "id": "yule", "tree": "tree", "birth": "birthRate",
                  "tree_type": "labeled"}},
                {{"type": "distribution", "parameter": "birthRate",
                  "distribution": {{"type": "exponential", "mean": 1.0}}}},
                {{"type": "distribution", "parameter": "kappa",
                  "distribution": {{"type": "log_normal", "mu": 1.0, "sigma": 1.25}}}},
                {{"type": "distribution", "parameter": "clockRate",
                  "distribution": {{"type": "gamma", "shape": 2.0, "scale": 0.05}}}}
            ],
            "likelihoods": [
                {{"type": "tree_data", "id": "treeLikelihood", "tree": "tree",
                  "substitution": {{"type": "hky", "kappa": "kappa"}}, "clock_rate": "clockRate"}}
            ],
            "operators": [
                {{"type": "scale", "parameter": "birthRate"}},
                {{"type": "scale", "parameter": "kappa"}},
                {{"type": "scale", "parameter": "clockRate"}},
                {{"type": "narrow_exchange", "tree": "tree", "weight": 5}},
                {{"type": "wide_exchange", "tree": "tree"}},
                {{"type": "subtree_slide", "tree": "tree", "size": 0.5, "weight": 5}},
                {{"type": "wilson_balding", "tree": "tree"}},
                {{"type": "uniform_node_height", "tree": "tree", "weight": 5}},
                {{"type": "tree_scale", "tree": "tree", "weight": 2}}
            ],
            "loggers": {{
                "trace": {{"every": 100}},
                "trees": [{{"tree": "tree", "every": 100}}],
                "screen": {{"every": 500}}
            }}
        }}"#,
        chain_length
    );
    let path = dir.join("apes.json");
    fs::write(&path, config).unwrap();
    path
}

fn options(dir: &Path, config: std::path::PathBuf, replicates: usize) -> RunOptions {
    RunOptions {
        config,
        chain_length: None,
        seed: None,
        output: dir.join("apes"),
        replicates,
        threads: 2,
        progress: false,
    }
}

#[test]
fn single_chain_writes_all_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), 2_000);
    let summaries = run::start(&options(dir.path(), config, 1)).unwrap();
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.states, 2_000);
    assert!(summary.final_posterior.is_finite());
    assert!(summary.best_posterior >= summary.final_posterior);
    let proposals: u64 = summary.operators.iter().map(|op| op.count).sum();
    assert_eq!(proposals, 2_000);

    let trace = fs::read_to_string(dir.path().join("apes.log")).unwrap();
    let mut lines = trace.lines();
    assert_eq!(
        lines.next().unwrap(),
        "state\tposterior\tprior\tlikelihood\tbirthRate\tkappa\tclockRate\ttree.rootHeight"
    );
    // states 0, 100, ..., 2000
    assert_eq!(lines.count(), 21);

    let trees = fs::read_to_string(dir.path().join("apes.trees")).unwrap();
    assert!(trees.starts_with("#NEXUS"));
    assert_eq!(trees.matches("tree STATE_").count(), 21);
    assert!(trees.trim_end().ends_with("End;"));

    let ops = fs::read_to_string(dir.path().join("apes.ops")).unwrap();
    assert_eq!(ops.lines().count(), 10);
}

#[test]
fn same_seed_same_chain() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), 500);
    let mut first = options(dir.path(), config.clone(), 1);
    first.output = dir.path().join("first");
    let mut second = options(dir.path(), config, 1);
    second.output = dir.path().join("second");
    let a = run::start(&first).unwrap();
    let b = run::start(&second).unwrap();
    assert_eq!(a[0].final_posterior, b[0].final_posterior);
    let trace_a = fs::read_to_string(dir.path().join("first.log")).unwrap();
    let trace_b = fs::read_to_string(dir.path().join("second.log")).unwrap();
    assert_eq!(trace_a, trace_b);
}

#[test]
fn replicates_use_their_own_seeds_and_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), 300);
    let summaries = run::start(&options(dir.path(), config, 3)).unwrap();
    assert_eq!(summaries.len(), 3);
    for i in 0..3 {
        assert!(dir.path().join(format!("apes.rep{}.log", i)).exists());
        assert!(dir.path().join(format!("apes.rep{}.trees", i)).exists());
        assert!(dir.path().join(format!("apes.rep{}.ops", i)).exists());
    }
    let rep0 = fs::read_to_string(dir.path().join("apes.rep0.log")).unwrap();
    let rep1 = fs::read_to_string(dir.path().join("apes.rep1.log")).unwrap();
    assert_ne!(rep0, rep1);
}

#[test]
fn check_reports_the_starting_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), 10);
    let evaluation = run::check(&config, None).unwrap();
    assert!(evaluation.posterior.is_finite());
    assert!(evaluation.likelihood.unwrap() < 0.0);
}

#[test]
fn missing_alignment_taxon_fails_the_build() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), 10);
    let text = fs::read_to_string(&config)
        .unwrap()
        .replace(r#""start": "random", "pop_size": 1.0"#, r#""start": "newick", "newick": "((human:1,chimp:1):1,gibbon:2);""#);
    fs::write(&config, text).unwrap();
    match run::check(&config, None) {
        Err(ChainError::UnknownReference { id, .. }) => assert_eq!(id, "gibbon"),
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("gibbon is not in the alignment"),
    }
}

#[test]
fn empty_parameter_is_an_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("empty.json");
    fs::write(
        &config,
        r#"{
            "chain": {"chain_length": 10},
            "parameters": [{"name": "x", "value": []}],
            "operators": [{"type": "scale", "parameter": "x"}]
        }"#,
    )
    .unwrap();
    assert!(matches!(
        run::start(&options(dir.path(), config, 1)),
        Err(ChainError::InvalidInput(_))
    ));
}
