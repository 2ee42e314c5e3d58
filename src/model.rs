//! The model graph: an arena of variables, trees and composite models.
//!
//! Models form a DAG through the "uses" relation. Each variable and tree has
//! exactly one primary owner, which is the model that stores and restores it;
//! any number of other models may reference it. Writes queue change events
//! that [`ModelGraph::drain_events`] turns into the events the likelihood
//! components listen to, including one model-level event for every model that
//! transitively uses the changed item.

use std::collections::{HashMap, HashSet};

use crate::error::{ChainError, Result};
use crate::tree::{TreeId, TreeModel};
use crate::variable::{ChangeType, Variable, VariableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub usize);

/// What a change event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Variable(VariableId),
    Tree(TreeId),
    Model(ModelId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeEvent {
    pub source: Source,
    /// Dimension for variables, node for trees, `None` for everything.
    pub index: Option<usize>,
    pub change: ChangeType,
}

#[derive(Debug, Clone)]
struct ModelNode {
    name: String,
    variables: Vec<VariableId>,
    trees: Vec<TreeId>,
    children: Vec<ModelId>,
    parents: Vec<ModelId>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelGraph {
    models: Vec<ModelNode>,
    variables: Vec<Variable>,
    variable_owner: Vec<ModelId>,
    variable_users: Vec<Vec<ModelId>>,
    trees: Vec<TreeModel>,
    tree_owner: Vec<ModelId>,
    tree_users: Vec<Vec<ModelId>>,
    model_names: HashMap<String, ModelId>,
    variable_names: HashMap<String, VariableId>,
    tree_names: HashMap<String, TreeId>,
}

impl ModelGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(&mut self, name: impl Into<String>) -> Result<ModelId> {
        let name = name.into();
        if self.model_names.contains_key(&name) {
            return Err(ChainError::InvalidInput(format!("duplicate model '{}'", name)));
        }
        let id = ModelId(self.models.len());
        self.models.push(ModelNode {
            name: name.clone(),
            variables: Vec::new(),
            trees: Vec::new(),
            children: Vec::new(),
            parents: Vec::new(),
        });
        self.model_names.insert(name, id);
        Ok(id)
    }

    /// Declares that `parent` uses `child`. Edges that would close a cycle
    /// are refused.
    pub fn add_submodel(&mut self, parent: ModelId, child: ModelId) -> Result<()> {
        self.check_model(parent)?;
        self.check_model(child)?;
        if parent == child || self.is_descendant(child, parent) {
            return Err(ChainError::InvalidInput(format!(
                "model '{}' cannot use '{}': cycle",
                self.models[parent.0].name, self.models[child.0].name
            )));
        }
        if !self.models[parent.0].children.contains(&child) {
            self.models[parent.0].children.push(child);
            self.models[child.0].parents.push(parent);
        }
        Ok(())
    }

    pub fn add_variable(&mut self, owner: ModelId, variable: Variable) -> Result<VariableId> {
        self.check_model(owner)?;
        let name = variable.name().to_string();
        if variable.dimension() == 0 {
            return Err(ChainError::InvalidInput(format!(
                "variable '{}' has no dimensions",
                name
            )));
        }
        if self.variable_names.contains_key(&name) {
            return Err(ChainError::InvalidInput(format!(
                "duplicate variable '{}'",
                name
            )));
        }
        let id = VariableId(self.variables.len());
        self.variables.push(variable);
        self.variable_owner.push(owner);
        self.variable_users.push(vec![owner]);
        self.models[owner.0].variables.push(id);
        self.variable_names.insert(name, id);
        Ok(id)
    }

    /// Lets `model` reference a variable it does not own.
    pub fn share_variable(&mut self, model: ModelId, id: VariableId) -> Result<()> {
        self.check_model(model)?;
        self.check_variable(id)?;
        if !self.variable_users[id.0].contains(&model) {
            self.variable_users[id.0].push(model);
            self.models[model.0].variables.push(id);
        }
        Ok(())
    }

    pub fn add_tree(&mut self, owner: ModelId, tree: TreeModel) -> Result<TreeId> {
        self.check_model(owner)?;
        let name = tree.name().to_string();
        if self.tree_names.contains_key(&name) {
            return Err(ChainError::InvalidInput(format!("duplicate tree '{}'", name)));
        }
        let id = TreeId(self.trees.len());
        self.trees.push(tree);
        self.tree_owner.push(owner);
        self.tree_users.push(vec![owner]);
        self.models[owner.0].trees.push(id);
        self.tree_names.insert(name, id);
        Ok(id)
    }

    pub fn share_tree(&mut self, model: ModelId, id: TreeId) -> Result<()> {
        self.check_model(model)?;
        self.check_tree(id)?;
        if !self.tree_users[id.0].contains(&model) {
            self.tree_users[id.0].push(model);
            self.models[model.0].trees.push(id);
        }
        Ok(())
    }

    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.0]
    }

    pub fn variable_mut(&mut self, id: VariableId) -> &mut Variable {
        &mut self.variables[id.0]
    }

    pub fn tree(&self, id: TreeId) -> &TreeModel {
        &self.trees[id.0]
    }

    pub fn tree_mut(&mut self, id: TreeId) -> &mut TreeModel {
        &mut self.trees[id.0]
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn model_name(&self, id: ModelId) -> &str {
        &self.models[id.0].name
    }

    pub fn variable_owner(&self, id: VariableId) -> ModelId {
        self.variable_owner[id.0]
    }

    pub fn tree_owner(&self, id: TreeId) -> ModelId {
        self.tree_owner[id.0]
    }

    pub fn variable_id(&self, name: &str) -> Result<VariableId> {
        self.variable_names
            .get(name)
            .copied()
            .ok_or_else(|| ChainError::UnknownReference {
                kind: "parameter",
                id: name.to_string(),
            })
    }

    pub fn tree_id(&self, name: &str) -> Result<TreeId> {
        self.tree_names
            .get(name)
            .copied()
            .ok_or_else(|| ChainError::UnknownReference {
                kind: "tree",
                id: name.to_string(),
            })
    }

    pub fn model_id(&self, name: &str) -> Result<ModelId> {
        self.model_names
            .get(name)
            .copied()
            .ok_or_else(|| ChainError::UnknownReference {
                kind: "model",
                id: name.to_string(),
            })
    }

    /// Name of the first variable found outside its bounds, if any.
    pub fn out_of_bounds(&self) -> Option<&str> {
        self.variables
            .iter()
            .find(|v| !v.is_within_bounds())
            .map(|v| v.name())
    }

    pub fn is_within_bounds(&self) -> bool {
        self.out_of_bounds().is_none()
    }

    /// Snapshots every variable and tree, each through its primary owner.
    pub fn store_state(&mut self) {
        for m in 0..self.models.len() {
            for i in 0..self.models[m].variables.len() {
                let v = self.models[m].variables[i];
                if self.variable_owner[v.0].0 == m {
                    self.variables[v.0].store_values();
                }
            }
            for i in 0..self.models[m].trees.len() {
                let t = self.models[m].trees[i];
                if self.tree_owner[t.0].0 == m {
                    self.trees[t.0].store_state();
                }
            }
        }
    }

    /// Rolls back to the last [`store_state`](Self::store_state). Queued
    /// events are dropped. Safe to call more than once.
    pub fn restore_state(&mut self) {
        for m in 0..self.models.len() {
            for i in 0..self.models[m].variables.len() {
                let v = self.models[m].variables[i];
                if self.variable_owner[v.0].0 == m {
                    self.variables[v.0].restore_values();
                }
            }
            for i in 0..self.models[m].trees.len() {
                let t = self.models[m].trees[i];
                if self.tree_owner[t.0].0 == m {
                    self.trees[t.0].restore_state();
                }
            }
        }
    }

    pub fn accept_state(&mut self) {
        for v in self.variables.iter_mut() {
            v.accept_values();
        }
        for t in self.trees.iter_mut() {
            t.accept_state();
        }
    }

    pub fn discard_events(&mut self) {
        for v in self.variables.iter_mut() {
            v.discard_changes();
        }
        for t in self.trees.iter_mut() {
            t.discard_changes();
        }
    }

    /// Collects the queued item events and the derived model events.
    pub fn drain_events(&mut self) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        let mut touched_models: Vec<ModelId> = Vec::new();
        let mut seen: HashSet<ModelId> = HashSet::new();

        for (i, v) in self.variables.iter_mut().enumerate() {
            let changes = v.take_changes();
            if changes.is_empty() {
                continue;
            }
            for c in changes {
                events.push(ChangeEvent {
                    source: Source::Variable(VariableId(i)),
                    index: c.index,
                    change: c.change,
                });
            }
            for &m in &self.variable_users[i] {
                if seen.insert(m) {
                    touched_models.push(m);
                }
            }
        }
        for (i, t) in self.trees.iter_mut().enumerate() {
            let changes = t.take_changes();
            if changes.is_empty() {
                continue;
            }
            for c in changes {
                events.push(ChangeEvent {
                    source: Source::Tree(TreeId(i)),
                    index: c.node,
                    change: c.change,
                });
            }
            for &m in &self.tree_users[i] {
                if seen.insert(m) {
                    touched_models.push(m);
                }
            }
        }

        // propagate to every model that uses a touched model
        let mut k = 0;
        while k < touched_models.len() {
            let m = touched_models[k];
            for &p in &self.models[m.0].parents {
                if seen.insert(p) {
                    touched_models.push(p);
                }
            }
            k += 1;
        }
        for m in touched_models {
            events.push(ChangeEvent {
                source: Source::Model(m),
                index: None,
                change: ChangeType::ValueChanged,
            });
        }
        events
    }

    /// Models that directly or transitively use `source`.
    pub fn affected_models(&self, source: Source) -> Vec<ModelId> {
        let mut out: Vec<ModelId> = match source {
            Source::Variable(v) => self.variable_users[v.0].clone(),
            Source::Tree(t) => self.tree_users[t.0].clone(),
            Source::Model(m) => vec![m],
        };
        let mut seen: HashSet<ModelId> = out.iter().copied().collect();
        let mut k = 0;
        while k < out.len() {
            let m = out[k];
            for &p in &self.models[m.0].parents {
                if seen.insert(p) {
                    out.push(p);
                }
            }
            k += 1;
        }
        out
    }

    fn is_descendant(&self, node: ModelId, target: ModelId) -> bool {
        let mut stack = vec![node];
        let mut seen = HashSet::new();
        while let Some(m) = stack.pop() {
            if m == target {
                return true;
            }
            if seen.insert(m) {
                stack.extend(self.models[m.0].children.iter().copied());
            }
        }
        false
    }

    fn check_model(&self, id: ModelId) -> Result<()> {
        if id.0 >= self.models.len() {
            return Err(ChainError::InvalidInput(format!("no model #{}", id.0)));
        }
        Ok(())
    }

    fn check_variable(&self, id: VariableId) -> Result<()> {
        if id.0 >= self.variables.len() {
            return Err(ChainError::InvalidInput(format!("no variable #{}", id.0)));
        }
        Ok(())
    }

    fn check_tree(&self, id: TreeId) -> Result<()> {
        if id.0 >= self.trees.len() {
            return Err(ChainError::InvalidInput(format!("no tree #{}", id.0)));
        }
        Ok(())
    }
}
