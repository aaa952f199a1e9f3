// =============================================================================
// Series - shared query contract for derived value sequences
// =============================================================================
//
// Every indicator exposes its output through the `Series` trait so strategy
// code can treat indicators interchangeably.  Index 0 is the newest value.
// Out-of-range queries return 0.0; the `Option` accessors distinguish "no
// data" from a genuine zero.

pub mod rolling_window;
pub mod value_series;

pub use rolling_window::RollingWindow;
pub use value_series::{SeriesLimits, ValueSeries};

/// Read-only view over a sequence of computed values, newest at index 0.
pub trait Series {
    /// Most recent value, or 0.0 when the series is empty.
    fn last(&self) -> f64;

    /// Value `i` steps back from the most recent, or 0.0 when out of range.
    fn index(&self, i: usize) -> f64;

    /// Number of values currently held.
    fn length(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Most recent value, `None` when nothing has been computed yet.
    fn last_value(&self) -> Option<f64> {
        self.value_at(0)
    }

    /// Value `i` steps back from the most recent, `None` when out of range.
    fn value_at(&self, i: usize) -> Option<f64> {
        (i < self.length()).then(|| self.index(i))
    }
}
