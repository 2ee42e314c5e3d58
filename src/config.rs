//! JSON model description and the builder that turns it into a runnable
//! object graph.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info};

use crate::alignment::Alignment;
use crate::error::{ChainError, Result};
use crate::likelihood::{
    CoalescentLikelihood, Demographic, DistributionLikelihood, Likelihood, LikelihoodKind,
    PriorDensity, SpeciationLikelihood, SpeciationRates, SubstitutionModel, TreeDataLikelihood,
    TreeType,
};
use crate::logger::TraceColumn;
use crate::mcmc::McmcOptions;
use crate::model::{ModelGraph, ModelId};
use crate::operators::parameter::BoundaryCondition;
use crate::operators::{
    CoercionMode, DeltaExchangeOperator, McmcOperator, NarrowExchangeOperator, OperatorRecord,
    RandomWalkOperator, ScaleOperator, SubtreeSlideOperator, TreeScaleOperator, UniformNodeHeightOperator,
    UniformOperator, WideExchangeOperator, WilsonBaldingOperator,
};
use crate::posterior::Posterior;
use crate::schedule::{OperatorSchedule, OptimizationTransform};
use crate::tree::{TreeId, TreeModel};
use crate::variable::{Bounds, Variable, VariableId};

const DEFAULT_MODEL: &str = "model";

fn default_chain_length() -> u64 {
    10_000
}
fn default_seed() -> u64 {
    1
}
fn default_true() -> bool {
    true
}
fn default_one() -> f64 {
    1.0
}
fn default_threads() -> usize {
    1
}
fn default_scale_factor() -> f64 {
    0.75
}
fn default_log_every() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainSettings {
    #[serde(default = "default_chain_length")]
    pub chain_length: u64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_true")]
    pub coercion: bool,
    #[serde(default)]
    pub coercion_delay: u64,
    #[serde(default = "default_one")]
    pub temperature: f64,
    #[serde(default)]
    pub full_evaluation: u64,
    #[serde(default)]
    pub min_operator_count: u64,
    /// Workers for the likelihood compound.
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub optimization: OptimizationSpec,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            chain_length: default_chain_length(),
            seed: default_seed(),
            coercion: true,
            coercion_delay: 0,
            temperature: 1.0,
            full_evaluation: 0,
            min_operator_count: 0,
            threads: 1,
            optimization: OptimizationSpec::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationSpec {
    #[default]
    Log,
    Sqrt,
    Linear,
}

impl From<OptimizationSpec> for OptimizationTransform {
    fn from(spec: OptimizationSpec) -> Self {
        match spec {
            OptimizationSpec::Log => OptimizationTransform::Log,
            OptimizationSpec::Sqrt => OptimizationTransform::Sqrt,
            OptimizationSpec::Linear => OptimizationTransform::Linear,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default)]
    pub submodels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl ValueSpec {
    fn to_vec(&self, name: &str) -> Result<Vec<f64>> {
        match self {
            ValueSpec::Scalar(x) => Ok(vec![*x]),
            ValueSpec::Vector(v) if v.is_empty() => Err(ChainError::InvalidInput(format!(
                "parameter {} has an empty value",
                name
            ))),
            ValueSpec::Vector(v) => Ok(v.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterSpec {
    pub name: String,
    pub value: ValueSpec,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    /// Owning model; parameters without one go to a shared default model.
    pub model: Option<String>,
    #[serde(default)]
    pub shared_with: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "start", rename_all = "snake_case")]
pub enum TreeStart {
    Newick {
        newick: String,
    },
    /// Simulated under a constant-size coalescent; taxa default to the
    /// alignment's.
    Random {
        pop_size: f64,
        #[serde(default)]
        taxa: Vec<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeSpec {
    pub name: String,
    pub model: Option<String>,
    #[serde(flatten)]
    pub start: TreeStart,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceSpec {
    pub taxon: String,
    pub sequence: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlignmentSpec {
    /// Relative paths are resolved against the config file's directory.
    pub fasta: Option<PathBuf>,
    #[serde(default)]
    pub sequences: Vec<SequenceSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DistributionSpec {
    Uniform { lower: f64, upper: f64 },
    Normal { mean: f64, stdev: f64 },
    LogNormal { mu: f64, sigma: f64 },
    Exponential { mean: f64 },
    Gamma { shape: f64, scale: f64 },
    OneOnX,
}

impl DistributionSpec {
    fn density(&self) -> Result<PriorDensity> {
        match *self {
            DistributionSpec::Uniform { lower, upper } => PriorDensity::uniform(lower, upper),
            DistributionSpec::Normal { mean, stdev } => PriorDensity::normal(mean, stdev),
            DistributionSpec::LogNormal { mu, sigma } => PriorDensity::log_normal(mu, sigma),
            DistributionSpec::Exponential { mean } => PriorDensity::exponential(mean),
            DistributionSpec::Gamma { shape, scale } => PriorDensity::gamma(shape, scale),
            DistributionSpec::OneOnX => Ok(PriorDensity::OneOnX),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeTypeSpec {
    #[default]
    Unscaled,
    TimesOnly,
    Oriented,
    Labeled,
}

impl From<TreeTypeSpec> for TreeType {
    fn from(spec: TreeTypeSpec) -> Self {
        match spec {
            TreeTypeSpec::Unscaled => TreeType::Unscaled,
            TreeTypeSpec::TimesOnly => TreeType::TimesOnly,
            TreeTypeSpec::Oriented => TreeType::Oriented,
            TreeTypeSpec::Labeled => TreeType::Labeled,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubstitutionSpec {
    Jc69,
    /// Frequencies default to the alignment's empirical ones.
    Hky {
        kappa: String,
        frequencies: Option<[f64; 4]>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LikelihoodSpec {
    Distribution {
        id: Option<String>,
        parameter: String,
        distribution: DistributionSpec,
    },
    /// Either `birth` (and `death`), or `birth_diff_rate` and
    /// `relative_death_rate`.
    Speciation {
        id: Option<String>,
        tree: String,
        birth: Option<String>,
        death: Option<String>,
        birth_diff_rate: Option<String>,
        relative_death_rate: Option<String>,
        sampling_fraction: Option<String>,
        #[serde(default)]
        tree_type: TreeTypeSpec,
    },
    Coalescent {
        id: Option<String>,
        tree: String,
        pop_size: String,
        growth_rate: Option<String>,
    },
    TreeData {
        id: Option<String>,
        tree: String,
        substitution: SubstitutionSpec,
        clock_rate: Option<String>,
        #[serde(default)]
        scaling: bool,
    },
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundarySpec {
    #[default]
    Reflecting,
    Rejecting,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorKind {
    Scale {
        parameter: String,
        #[serde(default = "default_scale_factor")]
        scale_factor: f64,
        #[serde(default)]
        scale_all: bool,
    },
    RandomWalk {
        parameter: String,
        window: f64,
        #[serde(default)]
        boundary: BoundarySpec,
    },
    Uniform {
        parameter: String,
    },
    DeltaExchange {
        parameter: String,
        delta: f64,
    },
    NarrowExchange {
        tree: String,
    },
    WideExchange {
        tree: String,
    },
    SubtreeSlide {
        tree: String,
        size: f64,
        #[serde(default)]
        gaussian: bool,
    },
    WilsonBalding {
        tree: String,
    },
    UniformNodeHeight {
        tree: String,
    },
    TreeScale {
        tree: String,
        #[serde(default = "default_scale_factor")]
        scale_factor: f64,
    },
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoercionSpec {
    #[default]
    Default,
    On,
    Off,
}

impl From<CoercionSpec> for CoercionMode {
    fn from(spec: CoercionSpec) -> Self {
        match spec {
            CoercionSpec::Default => CoercionMode::Default,
            CoercionSpec::On => CoercionMode::On,
            CoercionSpec::Off => CoercionMode::Off,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorSpec {
    #[serde(flatten)]
    pub kind: OperatorKind,
    #[serde(default = "default_one")]
    pub weight: f64,
    #[serde(default)]
    pub coercion: CoercionSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceSpec {
    #[serde(default = "default_log_every")]
    pub every: u64,
    /// Parameters to log; empty means all of them.
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default = "default_true")]
    pub root_heights: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeLogSpec {
    pub tree: String,
    #[serde(default = "default_log_every")]
    pub every: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScreenSpec {
    #[serde(default = "default_log_every")]
    pub every: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggerSpec {
    pub trace: Option<TraceSpec>,
    #[serde(default)]
    pub trees: Vec<TreeLogSpec>,
    pub screen: Option<ScreenSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    #[serde(default)]
    pub chain: ChainSettings,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub trees: Vec<TreeSpec>,
    pub alignment: Option<AlignmentSpec>,
    #[serde(default)]
    pub priors: Vec<LikelihoodSpec>,
    #[serde(default)]
    pub likelihoods: Vec<LikelihoodSpec>,
    pub operators: Vec<OperatorSpec>,
    #[serde(default)]
    pub loggers: LoggerSpec,
    #[serde(skip)]
    base_dir: PathBuf,
}

/// Everything the driver and the loggers need, wired together.
pub struct BuiltModel {
    pub graph: ModelGraph,
    pub posterior: Posterior,
    pub schedule: OperatorSchedule,
    pub options: McmcOptions,
    pub trace_columns: Vec<TraceColumn>,
    pub trace_every: Option<u64>,
    pub tree_logs: Vec<(TreeId, u64)>,
    pub screen_every: Option<u64>,
}

impl ChainConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut config: ChainConfig = serde_json::from_reader(reader)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Builds the object graph. `rng` is only used for random starting
    /// trees.
    pub fn build<R: Rng>(&self, rng: &mut R) -> Result<BuiltModel> {
        let mut graph = ModelGraph::new();
        let mut models: HashMap<String, ModelId> = HashMap::new();
        for m in &self.models {
            models.insert(m.name.clone(), graph.add_model(m.name.as_str())?);
        }
        for m in &self.models {
            for sub in &m.submodels {
                let child = lookup_model(&models, sub)?;
                graph.add_submodel(models[&m.name], child)?;
            }
        }

        for p in &self.parameters {
            let owner = owner_model(&mut graph, &mut models, p.model.as_deref())?;
            let mut variable = Variable::new(p.name.as_str(), p.value.to_vec(&p.name)?);
            if p.lower.is_some() || p.upper.is_some() {
                let bounds = Bounds::new(
                    p.lower.unwrap_or(f64::NEG_INFINITY),
                    p.upper.unwrap_or(f64::INFINITY),
                )?;
                variable.add_bounds(bounds);
            }
            let id = graph.add_variable(owner, variable)?;
            for user in &p.shared_with {
                graph.share_variable(lookup_model(&models, user)?, id)?;
            }
        }

        let alignment = self.load_alignment()?;
        for t in &self.trees {
            let owner = owner_model(&mut graph, &mut models, t.model.as_deref())?;
            let tree = match &t.start {
                TreeStart::Newick { newick } => TreeModel::from_newick(t.name.as_str(), newick)?,
                TreeStart::Random { pop_size, taxa } => {
                    let taxa = if !taxa.is_empty() {
                        taxa.clone()
                    } else if let Some(a) = &alignment {
                        a.taxa.clone()
                    } else {
                        return Err(ChainError::InvalidInput(format!(
                            "random tree {} needs taxa or an alignment",
                            t.name
                        )));
                    };
                    TreeModel::random_coalescent(t.name.as_str(), &taxa, *pop_size, rng)?
                }
            };
            debug!("tree {}: {}", t.name, tree.to_newick());
            graph.add_tree(owner, tree)?;
        }

        let mut priors = Vec::with_capacity(self.priors.len());
        for (i, spec) in self.priors.iter().enumerate() {
            priors.push(build_likelihood(spec, i, &graph, alignment.as_ref())?);
        }
        let mut likelihoods = Vec::with_capacity(self.likelihoods.len());
        for (i, spec) in self.likelihoods.iter().enumerate() {
            likelihoods.push(build_likelihood(spec, i, &graph, alignment.as_ref())?);
        }
        let posterior = if self.chain.threads > 1 {
            Posterior::with_threads(priors, likelihoods, self.chain.threads)?
        } else {
            Posterior::new(priors, likelihoods)
        };

        let mut schedule = OperatorSchedule::new(self.chain.optimization.into());
        schedule.set_minimum_accept_and_reject_count(self.chain.min_operator_count);
        for spec in &self.operators {
            let op = build_operator(&spec.kind, &graph)?;
            schedule.add_operator(OperatorRecord::new(op, spec.weight, spec.coercion.into())?);
        }
        if schedule.is_empty() {
            return Err(ChainError::InvalidInput("no operators configured".into()));
        }

        let (trace_columns, trace_every) = match &self.loggers.trace {
            Some(trace) => (self.trace_columns(trace, &graph)?, Some(trace.every)),
            None => (Vec::new(), None),
        };
        let mut tree_logs = Vec::with_capacity(self.loggers.trees.len());
        for t in &self.loggers.trees {
            tree_logs.push((graph.tree_id(&t.tree)?, t.every));
        }

        info!(
            "built {} parameters, {} trees, {} operators",
            graph.variable_count(),
            graph.tree_count(),
            schedule.len()
        );
        Ok(BuiltModel {
            graph,
            posterior,
            schedule,
            options: McmcOptions {
                chain_length: self.chain.chain_length,
                coercion: self.chain.coercion,
                coercion_delay: self.chain.coercion_delay,
                temperature: self.chain.temperature,
                full_evaluation_count: self.chain.full_evaluation,
                operator_analysis: None,
            },
            trace_columns,
            trace_every,
            tree_logs,
            screen_every: self.loggers.screen.as_ref().map(|s| s.every),
        })
    }

    fn load_alignment(&self) -> Result<Option<Alignment>> {
        let Some(spec) = &self.alignment else {
            return Ok(None);
        };
        let alignment = match &spec.fasta {
            Some(path) => {
                let path = if path.is_relative() {
                    self.base_dir.join(path)
                } else {
                    path.clone()
                };
                Alignment::from_fasta(&path)?
            }
            None => {
                let records: Vec<(String, String)> = spec
                    .sequences
                    .iter()
                    .map(|s| (s.taxon.clone(), s.sequence.clone()))
                    .collect();
                Alignment::from_sequences(&records)?
            }
        };
        info!(
            "alignment: {} taxa, {} sites",
            alignment.taxa.len(),
            alignment.site_count()
        );
        Ok(Some(alignment))
    }

    fn trace_columns(&self, trace: &TraceSpec, graph: &ModelGraph) -> Result<Vec<TraceColumn>> {
        let mut columns = Vec::new();
        if trace.parameters.is_empty() {
            columns.extend((0..graph.variable_count()).map(|i| TraceColumn::Variable(VariableId(i))));
        } else {
            for name in &trace.parameters {
                columns.push(TraceColumn::Variable(graph.variable_id(name)?));
            }
        }
        if trace.root_heights {
            columns.extend((0..graph.tree_count()).map(|i| TraceColumn::RootHeight(TreeId(i))));
        }
        Ok(columns)
    }
}

fn lookup_model(models: &HashMap<String, ModelId>, name: &str) -> Result<ModelId> {
    models
        .get(name)
        .copied()
        .ok_or_else(|| ChainError::UnknownReference {
            kind: "model",
            id: name.to_string(),
        })
}

fn owner_model(
    graph: &mut ModelGraph,
    models: &mut HashMap<String, ModelId>,
    name: Option<&str>,
) -> Result<ModelId> {
    match name {
        Some(name) => lookup_model(models, name),
        None => {
            if let Some(id) = models.get(DEFAULT_MODEL) {
                return Ok(*id);
            }
            let id = graph.add_model(DEFAULT_MODEL)?;
            models.insert(DEFAULT_MODEL.to_string(), id);
            Ok(id)
        }
    }
}

fn optional_variable(graph: &ModelGraph, name: &Option<String>) -> Result<Option<VariableId>> {
    name.as_deref().map(|n| graph.variable_id(n)).transpose()
}

fn build_likelihood(
    spec: &LikelihoodSpec,
    index: usize,
    graph: &ModelGraph,
    alignment: Option<&Alignment>,
) -> Result<Likelihood> {
    let likelihood = match spec {
        LikelihoodSpec::Distribution {
            id,
            parameter,
            distribution,
        } => {
            let variable = graph.variable_id(parameter)?;
            let kind = LikelihoodKind::Distribution(DistributionLikelihood::new(
                variable,
                distribution.density()?,
            ));
            Likelihood::new(id.clone().unwrap_or_else(|| format!("{}.prior", parameter)), kind)
        }
        LikelihoodSpec::Speciation {
            id,
            tree,
            birth,
            death,
            birth_diff_rate,
            relative_death_rate,
            sampling_fraction,
            tree_type,
        } => {
            let rates = match (birth, birth_diff_rate, relative_death_rate) {
                (Some(b), None, None) => SpeciationRates::BirthDeath {
                    birth: graph.variable_id(b)?,
                    death: optional_variable(graph, death)?,
                },
                (None, Some(r), Some(a)) if death.is_none() => SpeciationRates::Diversification {
                    birth_diff: graph.variable_id(r)?,
                    relative_death: graph.variable_id(a)?,
                },
                _ => {
                    return Err(ChainError::InvalidInput(format!(
                        "speciation on {} needs either birth (and death) or birth_diff_rate and relative_death_rate",
                        tree
                    )))
                }
            };
            let kind = LikelihoodKind::Speciation(SpeciationLikelihood::new(
                graph.tree_id(tree)?,
                rates,
                optional_variable(graph, sampling_fraction)?,
                (*tree_type).into(),
            ));
            Likelihood::new(id.clone().unwrap_or_else(|| format!("speciation{}", index)), kind)
        }
        LikelihoodSpec::Coalescent {
            id,
            tree,
            pop_size,
            growth_rate,
        } => {
            let pop_size = graph.variable_id(pop_size)?;
            let demographic = match optional_variable(graph, growth_rate)? {
                Some(growth_rate) => Demographic::Exponential {
                    pop_size,
                    growth_rate,
                },
                None => Demographic::Constant { pop_size },
            };
            let kind = LikelihoodKind::Coalescent(CoalescentLikelihood::new(
                graph.tree_id(tree)?,
                demographic,
            ));
            Likelihood::new(id.clone().unwrap_or_else(|| format!("coalescent{}", index)), kind)
        }
        LikelihoodSpec::TreeData {
            id,
            tree,
            substitution,
            clock_rate,
            scaling,
        } => {
            let alignment = alignment.ok_or_else(|| {
                ChainError::InvalidInput(format!("tree likelihood on {} needs an alignment", tree))
            })?;
            let substitution = match substitution {
                SubstitutionSpec::Jc69 => SubstitutionModel::Jc69,
                SubstitutionSpec::Hky { kappa, frequencies } => SubstitutionModel::hky(
                    graph.variable_id(kappa)?,
                    frequencies.unwrap_or_else(|| alignment.empirical_frequencies()),
                )?,
            };
            let tree_id = graph.tree_id(tree)?;
            let data = TreeDataLikelihood::new(
                tree_id,
                graph.tree(tree_id),
                &alignment.patterns(),
                substitution,
                optional_variable(graph, clock_rate)?,
            )?
            .with_scaling(*scaling);
            Likelihood::new(
                id.clone().unwrap_or_else(|| format!("treeLikelihood{}", index)),
                LikelihoodKind::TreeData(data),
            )
        }
    };
    Ok(likelihood)
}

fn build_operator(kind: &OperatorKind, graph: &ModelGraph) -> Result<Box<dyn McmcOperator>> {
    let op: Box<dyn McmcOperator> = match kind {
        OperatorKind::Scale {
            parameter,
            scale_factor,
            scale_all,
        } => Box::new(ScaleOperator::new(
            graph,
            graph.variable_id(parameter)?,
            *scale_factor,
            *scale_all,
        )?),
        OperatorKind::RandomWalk {
            parameter,
            window,
            boundary,
        } => {
            let boundary = match boundary {
                BoundarySpec::Reflecting => BoundaryCondition::Reflecting,
                BoundarySpec::Rejecting => BoundaryCondition::Rejecting,
            };
            Box::new(RandomWalkOperator::new(
                graph,
                graph.variable_id(parameter)?,
                *window,
                boundary,
            )?)
        }
        OperatorKind::Uniform { parameter } => {
            Box::new(UniformOperator::new(graph, graph.variable_id(parameter)?)?)
        }
        OperatorKind::DeltaExchange { parameter, delta } => Box::new(DeltaExchangeOperator::new(
            graph,
            graph.variable_id(parameter)?,
            *delta,
        )?),
        OperatorKind::NarrowExchange { tree } => {
            Box::new(NarrowExchangeOperator::new(graph, graph.tree_id(tree)?))
        }
        OperatorKind::WideExchange { tree } => {
            Box::new(WideExchangeOperator::new(graph, graph.tree_id(tree)?))
        }
        OperatorKind::SubtreeSlide {
            tree,
            size,
            gaussian,
        } => Box::new(SubtreeSlideOperator::new(
            graph,
            graph.tree_id(tree)?,
            *size,
            *gaussian,
        )?),
        OperatorKind::WilsonBalding { tree } => {
            Box::new(WilsonBaldingOperator::new(graph, graph.tree_id(tree)?))
        }
        OperatorKind::UniformNodeHeight { tree } => {
            Box::new(UniformNodeHeightOperator::new(graph, graph.tree_id(tree)?))
        }
        OperatorKind::TreeScale { tree, scale_factor } => Box::new(TreeScaleOperator::new(
            graph,
            graph.tree_id(tree)?,
            *scale_factor,
        )?),
    };
    Ok(op)
}
