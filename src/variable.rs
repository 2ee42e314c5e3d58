//! Named, bounded vectors of doubles: the leaves of the model graph.
//!
//! A variable never recomputes anything. Writes are bounds-checked and queue
//! a change event that the owning graph later routes to its listeners.

use crate::error::{ChainError, Result};

/// Stable handle into the variable arena of a [`crate::model::ModelGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    ValueChanged,
    Added,
    Removed,
    AllChanged,
}

/// Closed interval constraint on one dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub const UNBOUNDED: Bounds = Bounds {
        lower: f64::NEG_INFINITY,
        upper: f64::INFINITY,
    };

    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(ChainError::InvalidInput(format!(
                "empty bounds [{}, {}]",
                lower, upper
            )));
        }
        Ok(Self { lower, upper })
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    /// Intersection of two constraints.
    pub fn intersect(&self, other: &Bounds) -> Bounds {
        Bounds {
            lower: self.lower.max(other.lower),
            upper: self.upper.min(other.upper),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite()
    }
}

/// A change notification queued by a variable write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariableChange {
    /// `None` means every dimension.
    pub index: Option<usize>,
    pub change: ChangeType,
}

#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    values: Vec<f64>,
    stored_values: Vec<f64>,
    bounds: Vec<Bounds>,
    stored_bounds: Vec<Bounds>,
    pending: Vec<VariableChange>,
}

impl Variable {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        let dim = values.len();
        Self {
            name: name.into(),
            stored_values: values.clone(),
            values,
            bounds: vec![Bounds::UNBOUNDED; dim],
            stored_bounds: vec![Bounds::UNBOUNDED; dim],
            pending: Vec::new(),
        }
    }

    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, vec![value])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Result<f64> {
        self.values
            .get(index)
            .copied()
            .ok_or_else(|| self.index_error(index))
    }

    pub fn bounds(&self, index: usize) -> Result<Bounds> {
        self.bounds
            .get(index)
            .copied()
            .ok_or_else(|| self.index_error(index))
    }

    /// Registers a constraint on every dimension; it intersects with the
    /// constraints already present.
    pub fn add_bounds(&mut self, bounds: Bounds) {
        for b in self.bounds.iter_mut().chain(self.stored_bounds.iter_mut()) {
            *b = b.intersect(&bounds);
        }
    }

    /// Registers a constraint on a single dimension.
    pub fn add_bounds_at(&mut self, index: usize, bounds: Bounds) -> Result<()> {
        let err = self.index_error(index);
        let b = self.bounds.get_mut(index).ok_or(err)?;
        *b = b.intersect(&bounds);
        if let Some(stored) = self.stored_bounds.get_mut(index) {
            *stored = stored.intersect(&bounds);
        }
        Ok(())
    }

    pub fn is_within_bounds(&self) -> bool {
        self.values
            .iter()
            .zip(self.bounds.iter())
            .all(|(v, b)| b.contains(*v))
    }

    /// Bounds-checked write. A write that does not change the stored bits is
    /// silent.
    pub fn set_value(&mut self, index: usize, value: f64) -> Result<()> {
        let bounds = self.bounds(index)?;
        if !bounds.contains(value) {
            return Err(ChainError::BoundsViolation {
                variable: self.name.clone(),
                index,
                value,
                lower: bounds.lower,
                upper: bounds.upper,
            });
        }
        if self.values[index].to_bits() != value.to_bits() {
            self.values[index] = value;
            self.pending.push(VariableChange {
                index: Some(index),
                change: ChangeType::ValueChanged,
            });
        }
        Ok(())
    }

    /// Writes every dimension at once and fires a single `AllChanged`.
    /// Nothing is written if any value violates its bounds.
    pub fn set_all(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(ChainError::InvalidInput(format!(
                "{} has dimension {}, got {} values",
                self.name,
                self.values.len(),
                values.len()
            )));
        }
        for (index, (&value, bounds)) in values.iter().zip(self.bounds.iter()).enumerate() {
            if !bounds.contains(value) {
                return Err(ChainError::BoundsViolation {
                    variable: self.name.clone(),
                    index,
                    value,
                    lower: bounds.lower,
                    upper: bounds.upper,
                });
            }
        }
        self.values.copy_from_slice(values);
        self.pending.push(VariableChange {
            index: None,
            change: ChangeType::AllChanged,
        });
        Ok(())
    }

    /// Unchecked write with no notification.
    pub fn set_value_quietly(&mut self, index: usize, value: f64) -> Result<()> {
        let err = self.index_error(index);
        *self.values.get_mut(index).ok_or(err)? = value;
        Ok(())
    }

    /// Inserts a dimension at `index` with its own bounds.
    pub fn add_dimension(&mut self, index: usize, value: f64, bounds: Bounds) -> Result<()> {
        if index > self.values.len() {
            return Err(self.index_error(index));
        }
        self.values.insert(index, value);
        self.bounds.insert(index, bounds);
        self.pending.push(VariableChange {
            index: Some(index),
            change: ChangeType::Added,
        });
        Ok(())
    }

    pub fn remove_dimension(&mut self, index: usize) -> Result<f64> {
        if index >= self.values.len() {
            return Err(self.index_error(index));
        }
        if self.values.len() == 1 {
            return Err(ChainError::InvalidInput(format!(
                "cannot remove the last dimension of {}",
                self.name
            )));
        }
        let value = self.values.remove(index);
        self.bounds.remove(index);
        self.pending.push(VariableChange {
            index: Some(index),
            change: ChangeType::Removed,
        });
        Ok(value)
    }

    pub fn store_values(&mut self) {
        self.stored_values.clone_from(&self.values);
        if self.stored_bounds != self.bounds {
            self.stored_bounds.clone_from(&self.bounds);
        }
    }

    /// Copies the stored snapshot back; calling it twice is harmless.
    pub fn restore_values(&mut self) {
        self.values.clone_from(&self.stored_values);
        if self.bounds != self.stored_bounds {
            self.bounds.clone_from(&self.stored_bounds);
        }
        self.pending.clear();
    }

    pub fn accept_values(&mut self) {}

    pub(crate) fn take_changes(&mut self) -> Vec<VariableChange> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn discard_changes(&mut self) {
        self.pending.clear();
    }

    fn index_error(&self, index: usize) -> ChainError {
        ChainError::InvalidInput(format!(
            "index {} out of range for {} (dimension {})",
            index,
            self.name,
            self.values.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_intersect() {
        let mut v = Variable::new("x", vec![0.5, 0.5]);
        v.add_bounds(Bounds::new(0.0, 10.0).unwrap());
        v.add_bounds(Bounds::new(-5.0, 1.0).unwrap());
        assert_eq!(v.bounds(0).unwrap(), Bounds { lower: 0.0, upper: 1.0 });
        assert!(v.set_value(1, 1.5).is_err());
        assert!(v.set_value(1, 0.9).is_ok());
    }

    #[test]
    fn out_of_bounds_write_leaves_value() {
        let mut v = Variable::scalar("rate", 1.0);
        v.add_bounds(Bounds::new(0.0, f64::INFINITY).unwrap());
        let err = v.set_value(0, -1.0).unwrap_err();
        assert!(matches!(err, ChainError::BoundsViolation { index: 0, .. }));
        assert_eq!(v.value(0).unwrap(), 1.0);
        assert!(v.take_changes().is_empty());
    }

    #[test]
    fn unchanged_write_is_silent() {
        let mut v = Variable::scalar("x", 2.0);
        v.set_value(0, 2.0).unwrap();
        assert!(v.take_changes().is_empty());
        v.set_value(0, 3.0).unwrap();
        assert_eq!(
            v.take_changes(),
            vec![VariableChange {
                index: Some(0),
                change: ChangeType::ValueChanged
            }]
        );
    }

    #[test]
    fn set_all_fires_one_event() {
        let mut v = Variable::new("f", vec![0.25; 4]);
        v.set_all(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        let changes = v.take_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change, ChangeType::AllChanged);
        assert_eq!(changes[0].index, None);
    }

    #[test]
    fn restore_is_idempotent() {
        let mut v = Variable::new("x", vec![1.0, 2.0]);
        v.store_values();
        v.set_value(0, 5.0).unwrap();
        v.restore_values();
        v.restore_values();
        assert_eq!(v.values(), &[1.0, 2.0]);
    }

    #[test]
    fn dimension_changes_restore() {
        let mut v = Variable::new("x", vec![1.0, 2.0]);
        v.store_values();
        v.add_dimension(1, 7.0, Bounds::UNBOUNDED).unwrap();
        assert_eq!(v.values(), &[1.0, 7.0, 2.0]);
        assert_eq!(v.take_changes()[0].change, ChangeType::Added);
        v.restore_values();
        assert_eq!(v.dimension(), 2);
        assert_eq!(v.remove_dimension(0).unwrap(), 1.0);
        assert!(v.remove_dimension(0).is_err());
    }

    #[test]
    fn added_dimension_keeps_its_own_bounds() {
        let mut v = Variable::new("x", vec![0.5, 0.75]);
        v.add_bounds(Bounds::new(0.0, 1.0).unwrap());
        v.store_values();
        v.add_dimension(2, 5.0, Bounds::new(0.0, 10.0).unwrap()).unwrap();
        assert_eq!(v.bounds(0).unwrap(), Bounds::new(0.0, 1.0).unwrap());
        assert_eq!(v.bounds(2).unwrap(), Bounds::new(0.0, 10.0).unwrap());
        assert!(v.is_within_bounds());
        assert!(v.add_dimension(5, 1.0, Bounds::UNBOUNDED).is_err());
        v.restore_values();
        assert_eq!(v.dimension(), 2);
        assert_eq!(v.bounds(1).unwrap(), Bounds::new(0.0, 1.0).unwrap());
    }
}
