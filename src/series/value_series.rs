// =============================================================================
// Value Series - append-only indicator output with bounded memory
// =============================================================================
//
// Values are stored oldest-first.  When the length exceeds `hard_cap` the
// front of the buffer is dropped in a single drain so that only the newest
// `retain_size` values survive.  History older than that must be recomputed
// from source candles.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IndicatorError;
use crate::series::Series;

/// Default length above which a series is truncated.
pub const DEFAULT_HARD_CAP: usize = 5_000;
/// Default number of newest values kept after truncation.
pub const DEFAULT_RETAIN_SIZE: usize = 100;

fn default_hard_cap() -> usize {
    DEFAULT_HARD_CAP
}

fn default_retain_size() -> usize {
    DEFAULT_RETAIN_SIZE
}

/// Growth policy for a [`ValueSeries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesLimits {
    #[serde(default = "default_hard_cap")]
    pub hard_cap: usize,
    #[serde(default = "default_retain_size")]
    pub retain_size: usize,
}

impl SeriesLimits {
    pub fn new(hard_cap: usize, retain_size: usize) -> Result<Self, IndicatorError> {
        let limits = Self {
            hard_cap,
            retain_size,
        };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<(), IndicatorError> {
        if self.retain_size == 0 || self.retain_size > self.hard_cap {
            return Err(IndicatorError::InvalidSeriesLimits {
                hard_cap: self.hard_cap,
                retain_size: self.retain_size,
            });
        }
        Ok(())
    }
}

impl Default for SeriesLimits {
    fn default() -> Self {
        Self {
            hard_cap: DEFAULT_HARD_CAP,
            retain_size: DEFAULT_RETAIN_SIZE,
        }
    }
}

/// Append-only sequence of computed values, newest at index 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSeries {
    values: Vec<f64>,
    limits: SeriesLimits,
}

impl ValueSeries {
    pub fn new(limits: SeriesLimits) -> Result<Self, IndicatorError> {
        limits.validate()?;
        Ok(Self {
            values: Vec::new(),
            limits,
        })
    }

    /// Append one value, truncating from the front when over the hard cap.
    pub fn push(&mut self, value: f64) {
        self.values.push(value);
        if self.values.len() > self.limits.hard_cap {
            let drop = self.values.len() - self.limits.retain_size;
            self.values.drain(..drop);
            debug!(
                dropped = drop,
                retained = self.values.len(),
                "value series truncated"
            );
        }
    }

    pub fn limits(&self) -> SeriesLimits {
        self.limits
    }

    /// Values oldest-first.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

impl Series for ValueSeries {
    fn last(&self) -> f64 {
        self.values.last().copied().unwrap_or(0.0)
    }

    fn index(&self, i: usize) -> f64 {
        if i >= self.values.len() {
            return 0.0;
        }
        self.values[self.values.len() - 1 - i]
    }

    fn length(&self) -> usize {
        self.values.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(hard_cap: usize, retain_size: usize) -> ValueSeries {
        ValueSeries::new(SeriesLimits::new(hard_cap, retain_size).unwrap()).unwrap()
    }

    #[test]
    fn empty_series_returns_sentinels() {
        let s = series(10, 5);
        assert_eq!(s.last(), 0.0);
        assert_eq!(s.index(3), 0.0);
        assert_eq!(s.length(), 0);
        assert_eq!(s.last_value(), None);
    }

    #[test]
    fn index_counts_back_from_newest() {
        let mut s = series(10, 5);
        for v in [1.0, 2.0, 3.0] {
            s.push(v);
        }
        assert_eq!(s.index(0), 3.0);
        assert_eq!(s.index(2), 1.0);
        assert_eq!(s.index(3), 0.0);
        assert_eq!(s.value_at(3), None);
        assert_eq!(s.value_at(1), Some(2.0));
    }

    #[test]
    fn truncation_keeps_newest_retain_size_values() {
        let mut s = series(10, 4);
        for v in 0..10 {
            s.push(v as f64);
        }
        assert_eq!(s.length(), 10);
        let before: Vec<f64> = (0..4).map(|i| s.index(i)).collect();

        // One more push crosses the cap: 11 > 10, keep 4.
        s.push(10.0);
        assert_eq!(s.length(), 4);
        assert_eq!(s.as_slice(), &[7.0, 8.0, 9.0, 10.0]);

        // The previous newest values shift back by one, unchanged.
        let after: Vec<f64> = (1..4).map(|i| s.index(i)).collect();
        assert_eq!(after, before[..3].to_vec());
    }

    #[test]
    fn invalid_limits_are_rejected() {
        assert!(SeriesLimits::new(10, 0).is_err());
        assert!(SeriesLimits::new(10, 11).is_err());
        assert!(SeriesLimits::new(10, 10).is_ok());
        let bad = SeriesLimits {
            hard_cap: 1,
            retain_size: 2,
        };
        assert_eq!(
            ValueSeries::new(bad),
            Err(IndicatorError::InvalidSeriesLimits {
                hard_cap: 1,
                retain_size: 2
            })
        );
    }

    #[test]
    fn clone_does_not_alias() {
        let mut a = series(10, 5);
        a.push(1.0);
        let mut b = a.clone();
        b.push(2.0);
        assert_eq!(a.length(), 1);
        assert_eq!(b.length(), 2);
        assert_eq!(a.last(), 1.0);
    }
}
