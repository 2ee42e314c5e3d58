//! Rooted binary time trees with transactional editing.
//!
//! Nodes live in a flat arena. Tips are numbered `0..tip_count`, internal
//! nodes follow. Every edit queues a [`TreeChange`] for the owning graph; a
//! change at node `k` means the branch above `k` and the branches below it may
//! have a different length.

use std::collections::HashMap;

use rand::Rng;

use crate::error::{ChainError, Result};
use crate::newick::{self, ParsedNode};
use crate::variable::ChangeType;

pub type NodeIndex = usize;

/// Stable handle into the tree arena of a [`crate::model::ModelGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
    pub height: f64,
    pub taxon: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeChange {
    /// `None` means the whole tree.
    pub node: Option<NodeIndex>,
    pub change: ChangeType,
}

#[derive(Debug, Clone)]
pub struct TreeModel {
    name: String,
    nodes: Vec<TreeNode>,
    root: NodeIndex,
    tip_count: usize,
    stored_nodes: Vec<TreeNode>,
    stored_root: NodeIndex,
    pending: Vec<TreeChange>,
}

impl TreeModel {
    /// Builds a tree from a node table. The table must be a binary tree with
    /// tips first and every parent strictly older than its children.
    pub fn new(name: impl Into<String>, nodes: Vec<TreeNode>, root: NodeIndex) -> Result<Self> {
        let tip_count = nodes.iter().take_while(|n| n.children.is_empty()).count();
        let tree = Self {
            name: name.into(),
            stored_nodes: nodes.clone(),
            stored_root: root,
            nodes,
            root,
            tip_count,
            pending: Vec::new(),
        };
        tree.validate()?;
        Ok(tree)
    }

    /// Reads a Newick string. Heights are measured back from the tip
    /// furthest from the root, so dated tips keep their offsets.
    pub fn from_newick(name: impl Into<String>, text: &str) -> Result<Self> {
        let parsed = newick::parse(text)?;
        let root_parsed = parsed.len() - 1;

        let mut depth = vec![0.0; parsed.len()];
        for i in (0..parsed.len()).rev() {
            for &c in &parsed[i].children {
                let length = parsed[c].length.ok_or_else(|| {
                    ChainError::Parse(format!(
                        "newick: missing branch length below {}",
                        label_of(&parsed[c])
                    ))
                })?;
                if length < 0.0 {
                    return Err(ChainError::Parse(format!(
                        "newick: negative branch length {} on {}",
                        length,
                        label_of(&parsed[c])
                    )));
                }
                depth[c] = depth[i] + length;
            }
        }
        let max_depth = parsed
            .iter()
            .enumerate()
            .filter(|(_, n)| n.children.is_empty())
            .map(|(i, _)| depth[i])
            .fold(0.0, f64::max);

        // tips first in reading order, then internal nodes in postorder
        let mut index = vec![0usize; parsed.len()];
        let mut next = 0;
        for (i, n) in parsed.iter().enumerate() {
            if n.children.is_empty() {
                index[i] = next;
                next += 1;
            }
        }
        for (i, n) in parsed.iter().enumerate() {
            if !n.children.is_empty() {
                if n.children.len() != 2 {
                    return Err(ChainError::Parse(format!(
                        "newick: node with {} children, only binary trees are supported",
                        n.children.len()
                    )));
                }
                index[i] = next;
                next += 1;
            }
        }

        let mut nodes = vec![
            TreeNode {
                parent: None,
                children: Vec::new(),
                height: 0.0,
                taxon: None,
            };
            parsed.len()
        ];
        for (i, n) in parsed.iter().enumerate() {
            let k = index[i];
            nodes[k].height = max_depth - depth[i];
            nodes[k].children = n.children.iter().map(|&c| index[c]).collect();
            if n.children.is_empty() {
                nodes[k].taxon = n.name.clone();
            }
            for &c in &n.children {
                nodes[index[c]].parent = Some(k);
            }
        }
        // snap float noise so contemporaneous tips sit exactly at zero
        for node in nodes.iter_mut() {
            if node.children.is_empty() && node.height.abs() < 1e-12 {
                node.height = 0.0;
            }
        }
        Self::new(name, nodes, index[root_parsed])
    }

    /// Simulates a starting tree under a constant-size coalescent.
    pub fn random_coalescent(
        name: impl Into<String>,
        taxa: &[String],
        pop_size: f64,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        if taxa.len() < 2 {
            return Err(ChainError::InvalidInput(
                "a random tree needs at least two taxa".into(),
            ));
        }
        if !(pop_size > 0.0) {
            return Err(ChainError::InvalidInput(format!(
                "population size must be positive, got {}",
                pop_size
            )));
        }
        let mut nodes: Vec<TreeNode> = taxa
            .iter()
            .map(|t| TreeNode {
                parent: None,
                children: Vec::new(),
                height: 0.0,
                taxon: Some(t.clone()),
            })
            .collect();
        let mut active: Vec<NodeIndex> = (0..taxa.len()).collect();
        let mut time = 0.0;
        while active.len() > 1 {
            let k = active.len() as f64;
            let rate = k * (k - 1.0) / 2.0 / pop_size;
            let u: f64 = rng.gen();
            time += -(1.0 - u).ln() / rate;
            let a = active.swap_remove(rng.gen_range(0..active.len()));
            let b = active.swap_remove(rng.gen_range(0..active.len()));
            let parent = nodes.len();
            nodes.push(TreeNode {
                parent: None,
                children: vec![a, b],
                height: time,
                taxon: None,
            });
            nodes[a].parent = Some(parent);
            nodes[b].parent = Some(parent);
            active.push(parent);
        }
        let root = nodes.len() - 1;
        Self::new(name, nodes, root)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self, node: NodeIndex) -> &TreeNode {
        &self.nodes[node]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn tip_count(&self) -> usize {
        self.tip_count
    }

    pub fn internal_node_count(&self) -> usize {
        self.nodes.len() - self.tip_count
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn is_root(&self, node: NodeIndex) -> bool {
        node == self.root
    }

    pub fn is_external(&self, node: NodeIndex) -> bool {
        node < self.tip_count
    }

    pub fn parent(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.nodes[node].parent
    }

    pub fn children(&self, node: NodeIndex) -> &[NodeIndex] {
        &self.nodes[node].children
    }

    pub fn height(&self, node: NodeIndex) -> f64 {
        self.nodes[node].height
    }

    pub fn root_height(&self) -> f64 {
        self.nodes[self.root].height
    }

    /// Length of the branch above `node`; zero for the root.
    pub fn branch_length(&self, node: NodeIndex) -> f64 {
        match self.nodes[node].parent {
            Some(p) => self.nodes[p].height - self.nodes[node].height,
            None => 0.0,
        }
    }

    pub fn taxon(&self, node: NodeIndex) -> Option<&str> {
        self.nodes[node].taxon.as_deref()
    }

    pub fn taxa(&self) -> Vec<String> {
        (0..self.tip_count)
            .map(|i| self.nodes[i].taxon.clone().unwrap_or_else(|| i.to_string()))
            .collect()
    }

    /// The other child of `node`'s parent.
    pub fn sibling(&self, node: NodeIndex) -> Option<NodeIndex> {
        let p = self.nodes[node].parent?;
        self.nodes[p].children.iter().copied().find(|&c| c != node)
    }

    /// True if `ancestor` lies on the path from `node` to the root
    /// (a node is its own ancestor).
    pub fn is_ancestor(&self, ancestor: NodeIndex, node: NodeIndex) -> bool {
        let mut cur = Some(node);
        while let Some(n) = cur {
            if n == ancestor {
                return true;
            }
            cur = self.nodes[n].parent;
        }
        false
    }

    /// Children before parents, root last.
    pub fn postorder(&self) -> Vec<NodeIndex> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded || self.nodes[node].children.is_empty() {
                order.push(node);
            } else {
                stack.push((node, true));
                for &c in self.nodes[node].children.iter().rev() {
                    stack.push((c, false));
                }
            }
        }
        order
    }

    /// Internal node heights in increasing order.
    pub fn sorted_internal_heights(&self) -> Vec<f64> {
        let mut heights: Vec<f64> = (self.tip_count..self.nodes.len())
            .map(|i| self.nodes[i].height)
            .collect();
        heights.sort_by(|a, b| a.total_cmp(b));
        heights
    }

    pub fn set_node_height(&mut self, node: NodeIndex, height: f64) -> Result<()> {
        self.check_node(node)?;
        if !height.is_finite() {
            return Err(ChainError::InvalidInput(format!(
                "non-finite height {} for node {} of {}",
                height, node, self.name
            )));
        }
        if self.nodes[node].height.to_bits() != height.to_bits() {
            self.nodes[node].height = height;
            self.push_change(Some(node), ChangeType::ValueChanged);
        }
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeIndex, child: NodeIndex) -> Result<()> {
        self.check_node(parent)?;
        self.check_node(child)?;
        let pos = self.nodes[parent]
            .children
            .iter()
            .position(|&c| c == child)
            .ok_or_else(|| {
                ChainError::InvalidInput(format!(
                    "node {} is not a child of {} in {}",
                    child, parent, self.name
                ))
            })?;
        self.nodes[parent].children.remove(pos);
        self.nodes[child].parent = None;
        self.push_change(Some(child), ChangeType::Removed);
        Ok(())
    }

    pub fn add_child(&mut self, parent: NodeIndex, child: NodeIndex) -> Result<()> {
        self.check_node(parent)?;
        self.check_node(child)?;
        if self.nodes[parent].children.len() >= 2 || self.nodes[child].parent.is_some() {
            return Err(ChainError::InvalidInput(format!(
                "cannot attach {} under {} in {}",
                child, parent, self.name
            )));
        }
        self.nodes[parent].children.push(child);
        self.nodes[child].parent = Some(parent);
        self.push_change(Some(child), ChangeType::Added);
        Ok(())
    }

    pub fn set_root(&mut self, node: NodeIndex) -> Result<()> {
        self.check_node(node)?;
        if self.nodes[node].parent.is_some() {
            return Err(ChainError::InvalidInput(format!(
                "new root {} of {} still has a parent",
                node, self.name
            )));
        }
        if self.root != node {
            self.root = node;
            self.push_change(Some(node), ChangeType::ValueChanged);
        }
        Ok(())
    }

    /// Multiplies every internal height by `factor`. Fails without writing
    /// anything if a parent would drop below one of its children.
    pub fn scale_heights(&mut self, factor: f64) -> Result<usize> {
        if !(factor > 0.0) || !factor.is_finite() {
            return Err(ChainError::InvalidInput(format!(
                "bad scale factor {}",
                factor
            )));
        }
        for i in self.tip_count..self.nodes.len() {
            let h = self.nodes[i].height * factor;
            for &c in &self.nodes[i].children {
                let hc = if c < self.tip_count {
                    self.nodes[c].height
                } else {
                    self.nodes[c].height * factor
                };
                if hc > h {
                    return Err(ChainError::InvalidInput(format!(
                        "scaling {} by {} inverts node {}",
                        self.name, factor, i
                    )));
                }
            }
        }
        for i in self.tip_count..self.nodes.len() {
            self.nodes[i].height *= factor;
        }
        self.push_change(None, ChangeType::AllChanged);
        Ok(self.internal_node_count())
    }

    /// Checks links, binarity, reachability and height ordering.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(ChainError::InvalidInput(format!("{}: {}", self.name, msg)));
        if self.root >= self.nodes.len() {
            return fail(format!("root {} out of range", self.root));
        }
        if self.nodes[self.root].parent.is_some() {
            return fail("root has a parent".into());
        }
        if self.tip_count < 2 || self.nodes.len() != 2 * self.tip_count - 1 {
            return fail(format!(
                "{} nodes do not form a binary tree over {} tips",
                self.nodes.len(),
                self.tip_count
            ));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            let internal = i >= self.tip_count;
            if internal && node.children.len() != 2 {
                return fail(format!("internal node {} has {} children", i, node.children.len()));
            }
            if !internal && !node.children.is_empty() {
                return fail(format!("tip {} has children", i));
            }
            for &c in &node.children {
                if self.nodes[c].parent != Some(i) {
                    return fail(format!("child {} does not point back to {}", c, i));
                }
                if self.nodes[c].height > node.height {
                    return fail(format!("child {} is older than parent {}", c, i));
                }
            }
            if i != self.root && node.parent.is_none() {
                return fail(format!("node {} is detached", i));
            }
        }
        if self.postorder().len() != self.nodes.len() {
            return fail("not every node is reachable from the root".into());
        }
        Ok(())
    }

    /// Deterministic Newick serialization with taxon names.
    pub fn to_newick(&self) -> String {
        self.to_newick_with(|tree, node| newick::quote_label(tree.taxon(node).unwrap_or("")))
    }

    /// Newick with caller-chosen tip labels, e.g. NEXUS translate numbers.
    pub fn to_newick_with<F>(&self, label: F) -> String
    where
        F: Fn(&TreeModel, NodeIndex) -> String,
    {
        let mut buf = String::new();
        self.write_subtree(self.root, &label, &mut buf);
        buf.push(';');
        buf
    }

    fn write_subtree<F>(&self, node: NodeIndex, label: &F, buf: &mut String)
    where
        F: Fn(&TreeModel, NodeIndex) -> String,
    {
        let children = &self.nodes[node].children;
        if children.is_empty() {
            buf.push_str(&label(self, node));
        } else {
            buf.push('(');
            for (i, &c) in children.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                self.write_subtree(c, label, buf);
            }
            buf.push(')');
        }
        if self.nodes[node].parent.is_some() {
            buf.push(':');
            buf.push_str(&newick::format_length(self.branch_length(node)));
        }
    }

    pub fn store_state(&mut self) {
        self.stored_nodes.clone_from(&self.nodes);
        self.stored_root = self.root;
    }

    pub fn restore_state(&mut self) {
        self.nodes.clone_from(&self.stored_nodes);
        self.root = self.stored_root;
        self.pending.clear();
    }

    pub fn accept_state(&mut self) {}

    pub(crate) fn take_changes(&mut self) -> Vec<TreeChange> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn discard_changes(&mut self) {
        self.pending.clear();
    }

    /// Maps taxon name to tip index.
    pub fn taxon_index(&self) -> HashMap<String, NodeIndex> {
        (0..self.tip_count)
            .filter_map(|i| self.nodes[i].taxon.clone().map(|t| (t, i)))
            .collect()
    }

    fn push_change(&mut self, node: Option<NodeIndex>, change: ChangeType) {
        self.pending.push(TreeChange { node, change });
    }

    fn check_node(&self, node: NodeIndex) -> Result<()> {
        if node >= self.nodes.len() {
            return Err(ChainError::InvalidInput(format!(
                "node {} out of range for {} ({} nodes)",
                node,
                self.name,
                self.nodes.len()
            )));
        }
        Ok(())
    }
}

fn label_of(node: &ParsedNode) -> String {
    node.name.clone().unwrap_or_else(|| "an internal node".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn newick_heights() {
        let tree = TreeModel::from_newick("t", "((1:1,2:1):1,(3:1,4:1):1);").unwrap();
        assert_eq!(tree.tip_count(), 4);
        assert_eq!(tree.node_count(), 7);
        assert_eq!(tree.root_height(), 2.0);
        assert_eq!(tree.sorted_internal_heights(), vec![1.0, 1.0, 2.0]);
        assert_eq!(tree.taxa(), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn dated_tips_keep_offsets() {
        let tree = TreeModel::from_newick("t", "((A:1,B:0.5):1,C:2);").unwrap();
        let idx = tree.taxon_index();
        assert_eq!(tree.height(idx["A"]), 0.0);
        assert_eq!(tree.height(idx["B"]), 0.5);
        assert_eq!(tree.root_height(), 2.0);
    }

    #[test]
    fn newick_round_trip() {
        let text = "((1:1.0,2:1.0):1.0,3:2.0);";
        let tree = TreeModel::from_newick("t", text).unwrap();
        assert_eq!(tree.to_newick(), text);
    }

    #[test]
    fn taxa_with_spaces_round_trip() {
        let text = "(('Homo sapiens':1.0,'Pan troglodytes':1.0):1.0,'gorilla, western':2.0);";
        let tree = TreeModel::from_newick("t", text).unwrap();
        assert_eq!(tree.taxa(), vec!["Homo sapiens", "Pan troglodytes", "gorilla, western"]);
        assert_eq!(tree.to_newick(), text);
        let again = TreeModel::from_newick("t", &tree.to_newick()).unwrap();
        assert_eq!(again.taxa(), tree.taxa());
    }

    #[test]
    fn rejects_polytomy() {
        assert!(TreeModel::from_newick("t", "(A:1,B:1,C:1);").is_err());
    }

    #[test]
    fn edits_queue_changes_and_restore() {
        let mut tree = TreeModel::from_newick("t", "((A:1,B:1):1,C:2);").unwrap();
        let before = tree.to_newick();
        tree.store_state();
        let internal = tree.parent(0).unwrap();
        tree.set_node_height(internal, 1.5).unwrap();
        assert_eq!(tree.take_changes().len(), 1);
        tree.scale_heights(2.0).unwrap();
        assert_eq!(tree.root_height(), 4.0);
        tree.restore_state();
        assert_eq!(tree.to_newick(), before);
        assert!(tree.take_changes().is_empty());
    }

    #[test]
    fn scale_refuses_inversion() {
        let mut tree = TreeModel::from_newick("t", "((A:1,B:0.5):1,C:2);").unwrap();
        assert!(tree.scale_heights(0.1).is_err());
        assert_eq!(tree.root_height(), 2.0);
    }

    #[test]
    fn random_tree_is_valid() {
        let taxa: Vec<String> = (0..8).map(|i| format!("t{}", i)).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let tree = TreeModel::random_coalescent("t", &taxa, 1.0, &mut rng).unwrap();
        tree.validate().unwrap();
        assert_eq!(tree.tip_count(), 8);
        assert_eq!(tree.postorder().last(), Some(&tree.root()));
    }
}
