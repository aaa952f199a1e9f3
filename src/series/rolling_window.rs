// =============================================================================
// Rolling Window - fixed-capacity FIFO of raw samples
// =============================================================================

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use crate::error::IndicatorError;

/// Holds at most `capacity` samples; once full every push evicts the oldest.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    /// Create an empty window.  A zero capacity is rejected here rather than
    /// on the first push.
    pub fn new(capacity: usize) -> Result<Self, IndicatorError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(IndicatorError::InvalidWindow(capacity))?;
        Ok(Self::with_capacity(capacity))
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity.get()),
            capacity: capacity.get(),
        }
    }

    /// Admit `value`, evicting the oldest sample when full.
    ///
    /// Returns `true` once the window holds exactly `capacity` samples.
    pub fn push(&mut self, value: f64) -> bool {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.is_full()
    }

    /// Mean of the current contents (0.0 when empty).
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.values.iter()
    }
}
