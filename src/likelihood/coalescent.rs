//! Kingman coalescent over the intervals of a time tree.

use crate::error::Result;
use crate::model::{ChangeEvent, ModelGraph, Source};
use crate::tree::{TreeId, TreeModel};
use crate::variable::VariableId;

#[derive(Debug, Clone)]
pub enum Demographic {
    Constant {
        pop_size: VariableId,
    },
    /// `N(t) = N0 exp(-g t)`, `t` measured back from the present.
    Exponential {
        pop_size: VariableId,
        growth_rate: VariableId,
    },
}

impl Demographic {
    pub fn dependencies(&self) -> Vec<Source> {
        match self {
            Demographic::Constant { pop_size } => vec![Source::Variable(*pop_size)],
            Demographic::Exponential {
                pop_size,
                growth_rate,
            } => vec![Source::Variable(*pop_size), Source::Variable(*growth_rate)],
        }
    }

    fn parameters(&self, graph: &ModelGraph) -> Result<(f64, f64)> {
        Ok(match self {
            Demographic::Constant { pop_size } => (graph.variable(*pop_size).value(0)?, 0.0),
            Demographic::Exponential {
                pop_size,
                growth_rate,
            } => (
                graph.variable(*pop_size).value(0)?,
                graph.variable(*growth_rate).value(0)?,
            ),
        })
    }
}

fn population(n0: f64, growth: f64, t: f64) -> f64 {
    n0 * (-growth * t).exp()
}

/// Integral of `1 / N(t)` over `[start, finish]`.
fn intensity(n0: f64, growth: f64, start: f64, finish: f64) -> f64 {
    if growth.abs() < 1e-12 {
        (finish - start) / n0
    } else {
        ((growth * finish).exp() - (growth * start).exp()) / (growth * n0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
    pub lineages: usize,
    /// True if the interval ends in a coalescence, false for a sampling event.
    pub coalescent: bool,
}

/// Intervals between successive node heights, oldest last.
pub fn tree_intervals(tree: &TreeModel) -> Vec<Interval> {
    let mut events: Vec<(f64, bool)> = (0..tree.node_count())
        .map(|n| (tree.height(n), !tree.is_external(n)))
        .collect();
    // samples before coalescences at equal heights
    events.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut intervals = Vec::with_capacity(events.len());
    let mut lineages = 0usize;
    let mut last = events.first().map_or(0.0, |e| e.0);
    for (height, coalescent) in events {
        if lineages > 0 {
            intervals.push(Interval {
                start: last,
                end: height,
                lineages,
                coalescent,
            });
        }
        if coalescent {
            lineages = lineages.saturating_sub(1);
        } else {
            lineages += 1;
        }
        last = height;
    }
    intervals
}

#[derive(Debug, Clone)]
pub struct CoalescentLikelihood {
    tree: TreeId,
    demographic: Demographic,
    intervals: Vec<Interval>,
    stored_intervals: Vec<Interval>,
    intervals_known: bool,
    stored_intervals_known: bool,
    interval_updates: u64,
}

impl CoalescentLikelihood {
    pub fn new(tree: TreeId, demographic: Demographic) -> Self {
        Self {
            tree,
            demographic,
            intervals: Vec::new(),
            stored_intervals: Vec::new(),
            intervals_known: false,
            stored_intervals_known: false,
            interval_updates: 0,
        }
    }

    pub fn dependencies(&self) -> Vec<Source> {
        let mut deps = vec![Source::Tree(self.tree)];
        deps.extend(self.demographic.dependencies());
        deps
    }

    /// How many times the interval table has been rebuilt.
    pub fn interval_updates(&self) -> u64 {
        self.interval_updates
    }

    pub fn handle_event(&mut self, event: &ChangeEvent) -> bool {
        if event.source == Source::Tree(self.tree) {
            self.intervals_known = false;
            return true;
        }
        self.demographic.dependencies().contains(&event.source)
    }

    pub fn make_dirty(&mut self) {
        self.intervals_known = false;
    }

    pub fn calculate(&mut self, graph: &ModelGraph) -> Result<f64> {
        if !self.intervals_known {
            self.intervals = tree_intervals(graph.tree(self.tree));
            self.intervals_known = true;
            self.interval_updates += 1;
        }
        let (n0, growth) = self.demographic.parameters(graph)?;
        if !(n0 > 0.0) || !growth.is_finite() {
            return Ok(f64::NEG_INFINITY);
        }
        let mut log_l = 0.0;
        for iv in &self.intervals {
            let k = iv.lineages as f64;
            if iv.lineages >= 2 {
                log_l -= k * (k - 1.0) / 2.0 * intensity(n0, growth, iv.start, iv.end);
            }
            if iv.coalescent {
                log_l -= population(n0, growth, iv.end).ln();
            }
        }
        Ok(log_l)
    }

    pub fn store_state(&mut self) {
        self.stored_intervals.clone_from(&self.intervals);
        self.stored_intervals_known = self.intervals_known;
    }

    pub fn restore_state(&mut self) {
        self.intervals.clone_from(&self.stored_intervals);
        self.intervals_known = self.stored_intervals_known;
    }
}
