//! Trace, tree and screen output.
//!
//! Loggers are only called after a step's accept or reject has completed,
//! with strictly increasing state numbers.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::model::ModelGraph;
use crate::newick;
use crate::posterior::Evaluation;
use crate::tree::TreeId;
use crate::variable::VariableId;

/// The accepted state handed to loggers.
pub struct ChainState<'a> {
    pub state: u64,
    pub evaluation: &'a Evaluation,
    pub graph: &'a ModelGraph,
}

pub trait Logger: Send {
    fn log_every(&self) -> u64;

    fn start(&mut self, graph: &ModelGraph) -> Result<()>;

    fn log_state(&mut self, state: &ChainState) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}

/// A column of the trace file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceColumn {
    /// Every dimension of a variable.
    Variable(VariableId),
    RootHeight(TreeId),
}

impl TraceColumn {
    fn headers(&self, graph: &ModelGraph) -> Vec<String> {
        match *self {
            TraceColumn::Variable(id) => {
                let v = graph.variable(id);
                if v.dimension() == 1 {
                    vec![v.name().to_string()]
                } else {
                    (1..=v.dimension()).map(|i| format!("{}{}", v.name(), i)).collect()
                }
            }
            TraceColumn::RootHeight(id) => vec![format!("{}.rootHeight", graph.tree(id).name())],
        }
    }

    fn values(&self, graph: &ModelGraph, out: &mut Vec<String>) {
        match *self {
            TraceColumn::Variable(id) => {
                out.extend(graph.variable(id).values().iter().map(|x| x.to_string()));
            }
            TraceColumn::RootHeight(id) => out.push(graph.tree(id).root_height().to_string()),
        }
    }
}

/// Tab-delimited trace: `state`, `posterior`, `prior`, `likelihood`, then
/// the registered columns.
pub struct TraceLogger {
    writer: csv::Writer<File>,
    columns: Vec<TraceColumn>,
    log_every: u64,
}

impl TraceLogger {
    pub fn create(path: &Path, columns: Vec<TraceColumn>, log_every: u64) -> Result<Self> {
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        Ok(Self {
            writer,
            columns,
            log_every: log_every.max(1),
        })
    }
}

impl Logger for TraceLogger {
    fn log_every(&self) -> u64 {
        self.log_every
    }

    fn start(&mut self, graph: &ModelGraph) -> Result<()> {
        let mut header: Vec<String> = ["state", "posterior", "prior", "likelihood"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for c in &self.columns {
            header.extend(c.headers(graph));
        }
        self.writer.write_record(&header)?;
        Ok(())
    }

    fn log_state(&mut self, state: &ChainState) -> Result<()> {
        let e = state.evaluation;
        let mut row = vec![
            state.state.to_string(),
            e.posterior.to_string(),
            e.prior.to_string(),
            e.likelihood.unwrap_or(f64::NEG_INFINITY).to_string(),
        ];
        for c in &self.columns {
            c.values(state.graph, &mut row);
        }
        self.writer.write_record(&row)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// NEXUS tree samples with a translate table and `lnP` annotations.
pub struct TreeLogger {
    out: BufWriter<File>,
    tree: TreeId,
    log_every: u64,
}

impl TreeLogger {
    pub fn create(path: &Path, tree: TreeId, log_every: u64) -> Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            tree,
            log_every: log_every.max(1),
        })
    }
}

impl Logger for TreeLogger {
    fn log_every(&self) -> u64 {
        self.log_every
    }

    fn start(&mut self, graph: &ModelGraph) -> Result<()> {
        let taxa = graph.tree(self.tree).taxa();
        writeln!(self.out, "#NEXUS")?;
        writeln!(self.out)?;
        writeln!(self.out, "Begin taxa;")?;
        writeln!(self.out, "\tDimensions ntax={};", taxa.len())?;
        writeln!(self.out, "\tTaxlabels")?;
        for t in &taxa {
            writeln!(self.out, "\t\t{}", newick::quote_label(t))?;
        }
        writeln!(self.out, "\t\t;")?;
        writeln!(self.out, "End;")?;
        writeln!(self.out)?;
        writeln!(self.out, "Begin trees;")?;
        writeln!(self.out, "\tTranslate")?;
        for (i, t) in taxa.iter().enumerate() {
            let sep = if i + 1 < taxa.len() { "," } else { "" };
            writeln!(self.out, "\t\t{} {}{}", i + 1, newick::quote_label(t), sep)?;
        }
        writeln!(self.out, "\t\t;")?;
        Ok(())
    }

    fn log_state(&mut self, state: &ChainState) -> Result<()> {
        let tree = state.graph.tree(self.tree);
        let newick = tree.to_newick_with(|_, node| (node + 1).to_string());
        writeln!(
            self.out,
            "tree STATE_{} [&lnP={}] = [&R] {}",
            state.state, state.evaluation.posterior, newick
        )?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        writeln!(self.out, "End;")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Progress lines through `tracing`.
pub struct ScreenLogger {
    log_every: u64,
}

impl ScreenLogger {
    pub fn new(log_every: u64) -> Self {
        Self {
            log_every: log_every.max(1),
        }
    }
}

impl Logger for ScreenLogger {
    fn log_every(&self) -> u64 {
        self.log_every
    }

    fn start(&mut self, _graph: &ModelGraph) -> Result<()> {
        info!("state\tposterior\tprior\tlikelihood");
        Ok(())
    }

    fn log_state(&mut self, state: &ChainState) -> Result<()> {
        let e = state.evaluation;
        info!(
            "{}\t{:.4}\t{:.4}\t{:.4}",
            state.state,
            e.posterior,
            e.prior,
            e.likelihood.unwrap_or(f64::NEG_INFINITY)
        );
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeModel;
    use crate::variable::Variable;

    fn graph() -> (ModelGraph, VariableId, TreeId) {
        let mut g = ModelGraph::new();
        let m = g.add_model("m").unwrap();
        let f = g
            .add_variable(m, Variable::new("freqs", vec![0.5, 0.5]))
            .unwrap();
        let t = g
            .add_tree(m, TreeModel::from_newick("tree", "((a:1,b:1):1,c:2);").unwrap())
            .unwrap();
        (g, f, t)
    }

    #[test]
    fn trace_has_header_and_rows() {
        let (g, f, t) = graph();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let mut logger = TraceLogger::create(
            &path,
            vec![TraceColumn::Variable(f), TraceColumn::RootHeight(t)],
            10,
        )
        .unwrap();
        logger.start(&g).unwrap();
        let e = Evaluation {
            posterior: -3.5,
            prior: -1.0,
            likelihood: Some(-2.5),
        };
        for state in [0, 10] {
            logger
                .log_state(&ChainState {
                    state,
                    evaluation: &e,
                    graph: &g,
                })
                .unwrap();
        }
        logger.finish().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "state\tposterior\tprior\tlikelihood\tfreqs1\tfreqs2\ttree.rootHeight"
        );
        assert_eq!(lines[2], "10\t-3.5\t-1\t-2.5\t0.5\t0.5\t2");
    }

    #[test]
    fn nexus_uses_translate_numbers() {
        let (g, _, t) = graph();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.trees");
        let mut logger = TreeLogger::create(&path, t, 1).unwrap();
        logger.start(&g).unwrap();
        let e = Evaluation {
            posterior: -7.25,
            prior: -1.0,
            likelihood: Some(-6.25),
        };
        logger
            .log_state(&ChainState {
                state: 0,
                evaluation: &e,
                graph: &g,
            })
            .unwrap();
        logger.finish().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("#NEXUS"));
        assert!(text.contains("\t\t1 a,\n\t\t2 b,\n\t\t3 c\n"));
        assert!(text.contains("tree STATE_0 [&lnP=-7.25] = [&R] ((1:1.0,2:1.0):1.0,3:2.0);"));
        assert!(text.trim_end().ends_with("End;"));
    }

    #[test]
    fn nexus_quotes_awkward_taxa() {
        let mut g = ModelGraph::new();
        let m = g.add_model("m").unwrap();
        let text = "(('Homo sapiens':1,chimp:1):1,'O''Brien':2);";
        let t = g.add_tree(m, TreeModel::from_newick("tree", text).unwrap()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.trees");
        let mut logger = TreeLogger::create(&path, t, 1).unwrap();
        logger.start(&g).unwrap();
        logger.finish().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\t\t'Homo sapiens'\n\t\tchimp\n\t\t'O''Brien'\n"));
        assert!(text.contains("\t\t1 'Homo sapiens',\n\t\t2 chimp,\n\t\t3 'O''Brien'\n"));
    }
}
