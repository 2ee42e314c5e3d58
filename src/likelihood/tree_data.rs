//! Felsenstein pruning with per-node partial caching.
//!
//! Every node owns two partial buffers and two transition-matrix buffers.
//! A recomputation during a step writes into the buffer that is not part of
//! the stored snapshot, so store and restore only copy the small index arrays.
//! `update_node[k]` means the branch above `k` changed; the postorder
//! traversal recomputes the matrix of flagged nodes and the partials of every
//! node that has a flagged or recomputed child.

use ndarray::{Array1, Array2};

use crate::alignment::{SitePatterns, NUCLEOTIDE_STATES, UNKNOWN_STATE};
use crate::error::{ChainError, Result};
use crate::model::{ChangeEvent, ModelGraph, Source};
use crate::tree::{TreeId, TreeModel};
use crate::variable::VariableId;

use super::substitution::SubstitutionModel;

#[derive(Debug, Clone)]
pub struct TreeDataLikelihood {
    tree: TreeId,
    substitution: SubstitutionModel,
    clock_rate: Option<VariableId>,
    weights: Vec<f64>,
    partials: Vec<[Array2<f64>; 2]>,
    scale_factors: Vec<[Array1<f64>; 2]>,
    matrices: Vec<[Array2<f64>; 2]>,
    current_partials: Vec<usize>,
    stored_partials: Vec<usize>,
    current_matrices: Vec<usize>,
    stored_matrices: Vec<usize>,
    update_node: Vec<bool>,
    stored_update_node: Vec<bool>,
    use_scaling: bool,
    partials_updates: u64,
}

impl TreeDataLikelihood {
    pub fn new(
        tree_id: TreeId,
        tree: &TreeModel,
        patterns: &SitePatterns,
        substitution: SubstitutionModel,
        clock_rate: Option<VariableId>,
    ) -> Result<Self> {
        let node_count = tree.node_count();
        let pattern_count = patterns.pattern_count();
        let mut partials = Vec::with_capacity(node_count);
        for node in 0..node_count {
            let mut buffer = Array2::<f64>::zeros((pattern_count, NUCLEOTIDE_STATES));
            if tree.is_external(node) {
                let taxon = tree.taxon(node).unwrap_or("");
                let column = patterns.taxon_position(taxon).ok_or_else(|| {
                    ChainError::UnknownReference {
                        kind: "alignment taxon",
                        id: taxon.to_string(),
                    }
                })?;
                for (p, pattern) in patterns.patterns.iter().enumerate() {
                    let state = pattern[column];
                    if state == UNKNOWN_STATE {
                        buffer.row_mut(p).fill(1.0);
                    } else {
                        buffer[[p, state as usize]] = 1.0;
                    }
                }
            }
            partials.push([buffer.clone(), buffer]);
        }
        let scale = Array1::<f64>::zeros(pattern_count);
        let matrix = SubstitutionModel::new_matrix();
        Ok(Self {
            tree: tree_id,
            substitution,
            clock_rate,
            weights: patterns.weights.clone(),
            partials,
            scale_factors: vec![[scale.clone(), scale]; node_count],
            matrices: vec![[matrix.clone(), matrix]; node_count],
            current_partials: vec![0; node_count],
            stored_partials: vec![0; node_count],
            current_matrices: vec![0; node_count],
            stored_matrices: vec![0; node_count],
            update_node: vec![true; node_count],
            stored_update_node: vec![true; node_count],
            use_scaling: false,
            partials_updates: 0,
        })
    }

    /// Always rescale partials, not only after an underflow.
    pub fn with_scaling(mut self, scaling: bool) -> Self {
        self.use_scaling = scaling;
        self
    }

    /// Number of internal-node partial recomputations so far.
    pub fn partials_updates(&self) -> u64 {
        self.partials_updates
    }

    pub fn dependencies(&self) -> Vec<Source> {
        let mut deps = vec![Source::Tree(self.tree)];
        deps.extend(self.substitution.dependencies());
        if let Some(rate) = self.clock_rate {
            deps.push(Source::Variable(rate));
        }
        deps
    }

    pub fn handle_event(&mut self, graph: &ModelGraph, event: &ChangeEvent) -> bool {
        match event.source {
            Source::Tree(t) if t == self.tree => {
                match event.index {
                    Some(node) if node < self.update_node.len() => {
                        self.update_node[node] = true;
                        for &c in graph.tree(t).children(node) {
                            self.update_node[c] = true;
                        }
                    }
                    _ => self.make_dirty(),
                }
                true
            }
            Source::Variable(v)
                if Some(v) == self.clock_rate
                    || self.substitution.dependencies().contains(&event.source) =>
            {
                self.make_dirty();
                true
            }
            _ => false,
        }
    }

    pub fn make_dirty(&mut self) {
        self.update_node.fill(true);
    }

    pub fn calculate(&mut self, graph: &ModelGraph) -> Result<f64> {
        let tree = graph.tree(self.tree);
        if tree.node_count() != self.partials.len() {
            return Err(ChainError::InvalidInput(format!(
                "tree {} has {} nodes, likelihood was built for {}",
                tree.name(),
                tree.node_count(),
                self.partials.len()
            )));
        }
        let rate = match self.clock_rate {
            Some(r) => graph.variable(r).value(0)?,
            None => 1.0,
        };
        self.traverse(graph, tree, rate)?;
        let mut log_l = self.root_log_likelihood(tree);
        if log_l == f64::NEG_INFINITY && !self.use_scaling {
            self.use_scaling = true;
            self.make_dirty();
            self.traverse(graph, tree, rate)?;
            log_l = self.root_log_likelihood(tree);
        }
        self.update_node.fill(false);
        Ok(log_l)
    }

    fn traverse(&mut self, graph: &ModelGraph, tree: &TreeModel, rate: f64) -> Result<()> {
        let mut updated = vec![false; tree.node_count()];
        for node in tree.postorder() {
            if self.update_node[node] && !tree.is_root(node) {
                let w = 1 - self.stored_matrices[node];
                let distance = tree.branch_length(node) * rate;
                self.substitution
                    .transition_probabilities(graph, distance, self.matrices[node][w].view_mut())?;
                self.current_matrices[node] = w;
            }
            let mut changed = self.update_node[node];
            if let [c1, c2] = tree.children(node) {
                if updated[*c1] || updated[*c2] {
                    self.update_partials(node, *c1, *c2);
                    changed = true;
                }
            }
            updated[node] = changed;
        }
        Ok(())
    }

    fn update_partials(&mut self, node: usize, c1: usize, c2: usize) {
        let w = 1 - self.stored_partials[node];
        let mut target = std::mem::take(&mut self.partials[node][w]);
        {
            let p1 = &self.partials[c1][self.current_partials[c1]];
            let p2 = &self.partials[c2][self.current_partials[c2]];
            let m1 = &self.matrices[c1][self.current_matrices[c1]];
            let m2 = &self.matrices[c2][self.current_matrices[c2]];
            for p in 0..target.nrows() {
                for s in 0..NUCLEOTIDE_STATES {
                    let mut a = 0.0;
                    let mut b = 0.0;
                    for j in 0..NUCLEOTIDE_STATES {
                        a += m1[[s, j]] * p1[[p, j]];
                        b += m2[[s, j]] * p2[[p, j]];
                    }
                    target[[p, s]] = a * b;
                }
            }
        }
        let scale = &mut self.scale_factors[node][w];
        if self.use_scaling {
            for (p, mut row) in target.rows_mut().into_iter().enumerate() {
                let max = row.fold(0.0f64, |m, &x| m.max(x));
                if max > 0.0 {
                    row.mapv_inplace(|x| x / max);
                    scale[p] = max.ln();
                } else {
                    scale[p] = 0.0;
                }
            }
        } else {
            scale.fill(0.0);
        }
        self.partials[node][w] = target;
        self.current_partials[node] = w;
        self.partials_updates += 1;
    }

    fn root_log_likelihood(&self, tree: &TreeModel) -> f64 {
        let root = tree.root();
        let freqs = self.substitution.frequencies();
        let partials = &self.partials[root][self.current_partials[root]];
        let mut log_l = 0.0;
        for (p, weight) in self.weights.iter().enumerate() {
            let mut site = 0.0;
            for s in 0..NUCLEOTIDE_STATES {
                site += freqs[s] * partials[[p, s]];
            }
            let mut ln_site = site.ln();
            for node in tree.tip_count()..tree.node_count() {
                ln_site += self.scale_factors[node][self.current_partials[node]][p];
            }
            log_l += weight * ln_site;
        }
        log_l
    }

    pub fn store_state(&mut self) {
        self.stored_partials.copy_from_slice(&self.current_partials);
        self.stored_matrices.copy_from_slice(&self.current_matrices);
        self.stored_update_node.copy_from_slice(&self.update_node);
    }

    pub fn restore_state(&mut self) {
        self.current_partials.copy_from_slice(&self.stored_partials);
        self.current_matrices.copy_from_slice(&self.stored_matrices);
        self.update_node.copy_from_slice(&self.stored_update_node);
    }
}
