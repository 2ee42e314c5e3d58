//! Topology and node-height operators on time trees.

use rand::{Rng, RngCore};
use statrs::distribution::Normal;

use crate::error::{ChainError, Result};
use crate::model::ModelGraph;
use crate::tree::{NodeIndex, TreeId, TreeModel};

use super::{clamp_coercable, draw_scale, McmcOperator, ProposalResult};

fn infeasible(reason: &str) -> Result<ProposalResult> {
    Ok(ProposalResult::Infeasible(reason.to_string()))
}

/// A uniformly chosen node that is not the root.
fn random_non_root(tree: &TreeModel, rng: &mut dyn RngCore) -> NodeIndex {
    let n = tree.node_count();
    let root = tree.root();
    let k = rng.gen_range(0..n - 1);
    if k >= root {
        k + 1
    } else {
        k
    }
}

/// Swaps the subtrees `i` and `j`, hanging `i` under `j_parent` and `j`
/// under `i_parent`.
fn exchange_nodes(
    tree: &mut TreeModel,
    i: NodeIndex,
    j: NodeIndex,
    i_parent: NodeIndex,
    j_parent: NodeIndex,
) -> Result<()> {
    tree.remove_child(i_parent, i)?;
    tree.remove_child(j_parent, j)?;
    tree.add_child(j_parent, i)?;
    tree.add_child(i_parent, j)?;
    Ok(())
}

/// Grandparents whose taller child is internal and strictly taller than the
/// other child: the nodes a narrow exchange can act on.
fn narrow_candidates(tree: &TreeModel) -> Vec<NodeIndex> {
    (tree.tip_count()..tree.node_count())
        .filter(|&gp| {
            let [a, b] = match tree.children(gp) {
                [a, b] => [*a, *b],
                _ => return false,
            };
            let (tall, short) = if tree.height(a) >= tree.height(b) { (a, b) } else { (b, a) };
            !tree.is_external(tall) && tree.height(tall) > tree.height(short)
        })
        .collect()
}

/// Nearest-neighbour interchange: swaps a grandchild with its uncle.
pub struct NarrowExchangeOperator {
    name: String,
    tree: TreeId,
}

impl NarrowExchangeOperator {
    pub fn new(graph: &ModelGraph, tree: TreeId) -> Self {
        Self {
            name: format!("narrowExchange({})", graph.tree(tree).name()),
            tree,
        }
    }
}

impl McmcOperator for NarrowExchangeOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn operate(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<ProposalResult> {
        let tree = graph.tree_mut(self.tree);
        let before = narrow_candidates(tree);
        if before.is_empty() {
            return infeasible("no suitable node pairs");
        }
        let gp = before[rng.gen_range(0..before.len())];
        let (a, b) = (tree.children(gp)[0], tree.children(gp)[1]);
        let (parent, uncle) = if tree.height(a) >= tree.height(b) { (a, b) } else { (b, a) };
        let i = tree.children(parent)[rng.gen_range(0..2)];
        exchange_nodes(tree, i, uncle, parent, gp)?;
        let after = narrow_candidates(tree).len();
        Ok(ProposalResult::Success((before.len() as f64 / after as f64).ln()))
    }
}

/// Swaps two random subtrees anywhere in the tree when heights allow it.
pub struct WideExchangeOperator {
    name: String,
    tree: TreeId,
}

impl WideExchangeOperator {
    pub fn new(graph: &ModelGraph, tree: TreeId) -> Self {
        Self {
            name: format!("wideExchange({})", graph.tree(tree).name()),
            tree,
        }
    }
}

impl McmcOperator for WideExchangeOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn operate(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<ProposalResult> {
        let tree = graph.tree_mut(self.tree);
        if tree.node_count() < 3 {
            return infeasible("tree too small");
        }
        let i = random_non_root(tree, rng);
        let mut j = random_non_root(tree, rng);
        while j == i {
            j = random_non_root(tree, rng);
        }
        let (Some(ip), Some(jp)) = (tree.parent(i), tree.parent(j)) else {
            return infeasible("root selected");
        };
        if ip != jp
            && i != jp
            && j != ip
            && tree.height(j) < tree.height(ip)
            && tree.height(i) < tree.height(jp)
        {
            exchange_nodes(tree, i, j, ip, jp)?;
            Ok(ProposalResult::Success(0.0))
        } else {
            infeasible("no valid wide exchange")
        }
    }
}

/// Branches crossing `height` in the subtree of `node`, optionally collected.
fn intersecting_edges(
    tree: &TreeModel,
    node: NodeIndex,
    height: f64,
    found: &mut Option<&mut Vec<NodeIndex>>,
) -> usize {
    let Some(parent) = tree.parent(node) else {
        return 0;
    };
    if tree.height(parent) < height {
        return 0;
    }
    if tree.height(node) < height {
        if let Some(list) = found.as_mut() {
            list.push(node);
        }
        return 1;
    }
    let mut count = 0;
    for &c in tree.children(node) {
        count += intersecting_edges(tree, c, height, found);
    }
    count
}

/// Slides a parent node up or down, regrafting it when it passes other
/// branches.
pub struct SubtreeSlideOperator {
    name: String,
    tree: TreeId,
    size: f64,
    gaussian: bool,
}

impl SubtreeSlideOperator {
    pub fn new(graph: &ModelGraph, tree: TreeId, size: f64, gaussian: bool) -> Result<Self> {
        if !(size > 0.0) || !size.is_finite() {
            return Err(ChainError::InvalidInput(format!(
                "subtree slide size must be positive, got {}",
                size
            )));
        }
        Ok(Self {
            name: format!("subtreeSlide({})", graph.tree(tree).name()),
            tree,
            size,
            gaussian,
        })
    }

    fn delta(&self, rng: &mut dyn RngCore) -> Result<f64> {
        if self.gaussian {
            use rand::distributions::Distribution;
            let normal = Normal::new(0.0, self.size)
                .map_err(|e| ChainError::InvalidInput(format!("{}: {}", self.name, e)))?;
            Ok(normal.sample(rng))
        } else {
            Ok(rng.gen::<f64>() * self.size - self.size / 2.0)
        }
    }
}

impl McmcOperator for SubtreeSlideOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn operate(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<ProposalResult> {
        let delta = self.delta(rng)?;
        if delta == 0.0 {
            return infeasible("zero slide");
        }
        let tree = graph.tree_mut(self.tree);
        let i = random_non_root(tree, rng);
        let Some(ip) = tree.parent(i) else {
            return infeasible("root selected");
        };
        let Some(cip) = tree.sibling(i) else {
            return infeasible("node without sibling");
        };
        let pip = tree.parent(ip);
        let old_height = tree.height(ip);
        let new_height = old_height + delta;

        if delta > 0.0 {
            match pip {
                Some(pip) if tree.height(pip) < new_height => {
                    let mut new_child = pip;
                    let mut new_parent = tree.parent(pip);
                    while let Some(np) = new_parent {
                        if tree.height(np) >= new_height {
                            break;
                        }
                        new_child = np;
                        new_parent = tree.parent(np);
                    }
                    tree.remove_child(ip, cip)?;
                    tree.remove_child(pip, ip)?;
                    match new_parent {
                        None => {
                            tree.add_child(ip, new_child)?;
                            tree.add_child(pip, cip)?;
                            tree.set_root(ip)?;
                        }
                        Some(np) => {
                            tree.remove_child(np, new_child)?;
                            tree.add_child(ip, new_child)?;
                            tree.add_child(pip, cip)?;
                            tree.add_child(np, ip)?;
                        }
                    }
                    tree.set_node_height(ip, new_height)?;
                    let sources = intersecting_edges(tree, new_child, old_height, &mut None);
                    if sources == 0 {
                        return infeasible("slide has no reverse move");
                    }
                    Ok(ProposalResult::Success(-(sources as f64).ln()))
                }
                _ => {
                    tree.set_node_height(ip, new_height)?;
                    Ok(ProposalResult::Success(0.0))
                }
            }
        } else {
            if tree.height(i) > new_height {
                return infeasible("slide below the moving subtree");
            }
            if tree.height(cip) > new_height {
                let mut targets = Vec::new();
                let destinations = intersecting_edges(tree, cip, new_height, &mut Some(&mut targets));
                if targets.is_empty() {
                    return infeasible("no branch to slide onto");
                }
                let new_child = targets[rng.gen_range(0..targets.len())];
                let new_parent = tree.parent(new_child).ok_or_else(|| {
                    ChainError::InvalidInput(format!("{}: slide target is the root", self.name))
                })?;
                match pip {
                    None => {
                        tree.remove_child(ip, cip)?;
                        tree.remove_child(new_parent, new_child)?;
                        tree.add_child(ip, new_child)?;
                        tree.add_child(new_parent, ip)?;
                        tree.set_root(cip)?;
                    }
                    Some(pip) => {
                        tree.remove_child(ip, cip)?;
                        tree.remove_child(pip, ip)?;
                        tree.remove_child(new_parent, new_child)?;
                        tree.add_child(ip, new_child)?;
                        tree.add_child(pip, cip)?;
                        tree.add_child(new_parent, ip)?;
                    }
                }
                tree.set_node_height(ip, new_height)?;
                Ok(ProposalResult::Success((destinations as f64).ln()))
            } else {
                tree.set_node_height(ip, new_height)?;
                Ok(ProposalResult::Success(0.0))
            }
        }
    }

    fn coercable_parameter(&self) -> Option<f64> {
        Some(self.size.ln())
    }

    fn set_coercable_parameter(&mut self, value: f64) {
        self.size = clamp_coercable(value).exp();
    }

    fn raw_parameter(&self) -> Option<f64> {
        Some(self.size)
    }
}

/// Prunes a subtree and regrafts it onto a random branch at a uniform height.
pub struct WilsonBaldingOperator {
    name: String,
    tree: TreeId,
}

impl WilsonBaldingOperator {
    pub fn new(graph: &ModelGraph, tree: TreeId) -> Self {
        Self {
            name: format!("wilsonBalding({})", graph.tree(tree).name()),
            tree,
        }
    }
}

impl McmcOperator for WilsonBaldingOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn operate(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<ProposalResult> {
        let tree = graph.tree_mut(self.tree);
        let i = random_non_root(tree, rng);
        let Some(ip) = tree.parent(i) else {
            return infeasible("root selected");
        };
        let Some(pip) = tree.parent(ip) else {
            return infeasible("cannot move the root");
        };
        let Some(cip) = tree.sibling(i) else {
            return infeasible("node without sibling");
        };

        let candidates: Vec<NodeIndex> = (0..tree.node_count())
            .filter(|&j| match tree.parent(j) {
                Some(k) => j != ip && k != ip && tree.height(k) > tree.height(i),
                None => false,
            })
            .collect();
        if candidates.is_empty() {
            return infeasible("no regraft position");
        }
        let j = candidates[rng.gen_range(0..candidates.len())];
        let Some(k) = tree.parent(j) else {
            return infeasible("root selected");
        };

        let new_min = tree.height(i).max(tree.height(j));
        let new_range = tree.height(k) - new_min;
        let old_min = tree.height(i).max(tree.height(cip));
        let old_range = tree.height(pip) - old_min;
        if !(new_range > 0.0) || !(old_range > 0.0) {
            return infeasible("empty height range");
        }
        let new_height = new_min + rng.gen::<f64>() * new_range;

        tree.remove_child(ip, cip)?;
        tree.remove_child(pip, ip)?;
        tree.add_child(pip, cip)?;
        tree.remove_child(k, j)?;
        tree.add_child(ip, j)?;
        tree.add_child(k, ip)?;
        tree.set_node_height(ip, new_height)?;
        Ok(ProposalResult::Success((new_range / old_range).ln()))
    }
}

/// Redraws one non-root internal height between its oldest child and its
/// parent.
pub struct UniformNodeHeightOperator {
    name: String,
    tree: TreeId,
}

impl UniformNodeHeightOperator {
    pub fn new(graph: &ModelGraph, tree: TreeId) -> Self {
        Self {
            name: format!("uniformNodeHeight({})", graph.tree(tree).name()),
            tree,
        }
    }
}

impl McmcOperator for UniformNodeHeightOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn operate(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<ProposalResult> {
        let tree = graph.tree_mut(self.tree);
        let nodes: Vec<NodeIndex> = (tree.tip_count()..tree.node_count())
            .filter(|&n| !tree.is_root(n))
            .collect();
        if nodes.is_empty() {
            return infeasible("no non-root internal node");
        }
        let node = nodes[rng.gen_range(0..nodes.len())];
        let Some(parent) = tree.parent(node) else {
            return infeasible("root selected");
        };
        let lower = tree
            .children(node)
            .iter()
            .map(|&c| tree.height(c))
            .fold(f64::NEG_INFINITY, f64::max);
        let upper = tree.height(parent);
        let h = lower + rng.gen::<f64>() * (upper - lower);
        if h == tree.height(node) {
            return infeasible("height unchanged");
        }
        tree.set_node_height(node, h)?;
        Ok(ProposalResult::Success(0.0))
    }
}

/// Scales every internal height by one factor from `[sf, 1/sf]`.
pub struct TreeScaleOperator {
    name: String,
    tree: TreeId,
    scale_factor: f64,
}

impl TreeScaleOperator {
    pub fn new(graph: &ModelGraph, tree: TreeId, scale_factor: f64) -> Result<Self> {
        if !(scale_factor > 0.0 && scale_factor < 1.0) {
            return Err(ChainError::InvalidInput(format!(
                "scale factor must be in (0, 1), got {}",
                scale_factor
            )));
        }
        Ok(Self {
            name: format!("treeScale({})", graph.tree(tree).name()),
            tree,
            scale_factor,
        })
    }
}

impl McmcOperator for TreeScaleOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn operate(&mut self, graph: &mut ModelGraph, rng: &mut dyn RngCore) -> Result<ProposalResult> {
        let scale = draw_scale(self.scale_factor, rng);
        match graph.tree_mut(self.tree).scale_heights(scale) {
            Ok(scaled) => Ok(ProposalResult::Success((scaled as f64 - 2.0) * scale.ln())),
            Err(ChainError::InvalidInput(reason)) => Ok(ProposalResult::Infeasible(reason)),
            Err(e) => Err(e),
        }
    }

    fn coercable_parameter(&self) -> Option<f64> {
        Some((1.0 / self.scale_factor - 1.0).ln())
    }

    fn set_coercable_parameter(&mut self, value: f64) {
        self.scale_factor = 1.0 / (clamp_coercable(value).exp() + 1.0);
    }

    fn raw_parameter(&self) -> Option<f64> {
        Some(self.scale_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn graph(newick: &str) -> (ModelGraph, TreeId) {
        let mut g = ModelGraph::new();
        let m = g.add_model("m").unwrap();
        let t = g
            .add_tree(m, TreeModel::from_newick("tree", newick).unwrap())
            .unwrap();
        (g, t)
    }

    const EIGHT: &str =
        "(((a:1,b:1):2,(c:2,d:2):1):1.5,((e:0.5,f:0.5):3,(g:1.5,h:1.5):2):1);";

    fn exercise(op: &mut dyn McmcOperator, newick: &str, seed: u64) -> (usize, usize) {
        let (mut g, t) = graph(newick);
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut ok, mut failed) = (0, 0);
        for step in 0..500 {
            g.store_state();
            let before = g.tree(t).to_newick();
            match op.operate(&mut g, &mut rng).unwrap() {
                ProposalResult::Success(logq) => {
                    assert!(logq.is_finite());
                    g.tree(t).validate().unwrap();
                    ok += 1;
                }
                ProposalResult::Infeasible(_) => failed += 1,
            }
            if step % 2 == 0 {
                g.restore_state();
                assert_eq!(g.tree(t).to_newick(), before);
            } else {
                g.accept_state();
            }
            g.discard_events();
        }
        (ok, failed)
    }

    #[test]
    fn rejected_narrow_exchange_leaves_tree_unchanged() {
        let (mut g, t) = graph("((1:1,2:1):1,(3:1,4:1):0.5);");
        let mut op = NarrowExchangeOperator::new(&g, t);
        let mut rng = StdRng::seed_from_u64(17);
        let before = g.tree(t).to_newick();
        let heights: Vec<f64> = (0..g.tree(t).node_count()).map(|n| g.tree(t).height(n)).collect();
        g.store_state();
        let result = op.operate(&mut g, &mut rng).unwrap();
        assert!(matches!(result, ProposalResult::Success(_)));
        assert_ne!(g.tree(t).to_newick(), before);
        g.restore_state();
        assert_eq!(g.tree(t).to_newick(), before);
        for (n, h) in heights.iter().enumerate() {
            assert_eq!(g.tree(t).height(n), *h);
        }
    }

    #[test]
    fn narrow_exchange_without_candidates_fails() {
        let (mut g, t) = graph("((1:1,2:1):1,(3:1,4:1):1);");
        let mut op = NarrowExchangeOperator::new(&g, t);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            op.operate(&mut g, &mut rng).unwrap(),
            ProposalResult::Infeasible("no suitable node pairs".into())
        );
    }

    #[test]
    fn tree_operators_keep_trees_valid() {
        let (g, t) = graph(EIGHT);
        let mut ops: Vec<Box<dyn McmcOperator>> = vec![
            Box::new(NarrowExchangeOperator::new(&g, t)),
            Box::new(WideExchangeOperator::new(&g, t)),
            Box::new(SubtreeSlideOperator::new(&g, t, 1.0, false).unwrap()),
            Box::new(SubtreeSlideOperator::new(&g, t, 2.0, true).unwrap()),
            Box::new(WilsonBaldingOperator::new(&g, t)),
            Box::new(UniformNodeHeightOperator::new(&g, t)),
            Box::new(TreeScaleOperator::new(&g, t, 0.8).unwrap()),
        ];
        for (seed, op) in ops.iter_mut().enumerate() {
            let (ok, _) = exercise(op.as_mut(), EIGHT, seed as u64);
            assert!(ok > 0, "{} never succeeded", op.name());
        }
    }

    #[test]
    fn intersecting_edges_counts_crossings() {
        let (g, t) = graph(EIGHT);
        let tree = g.tree(t);
        let root = tree.root();
        let mut found = Vec::new();
        let left = tree.children(root)[0];
        // left clade: (a,b) at 1, (c,d) at 2, its root at 3; cut at 1.5
        let n = intersecting_edges(tree, left, 1.5, &mut Some(&mut found));
        assert_eq!(n, 3);
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn wilson_balding_cannot_move_root_children() {
        let (mut g, t) = graph("(a:1,b:1);");
        let mut op = WilsonBaldingOperator::new(&g, t);
        let mut rng = StdRng::seed_from_u64(4);
        assert!(matches!(
            op.operate(&mut g, &mut rng).unwrap(),
            ProposalResult::Infeasible(_)
        ));
    }
}
