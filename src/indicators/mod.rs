// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Incremental indicators fed one closed kline at a time.  Each indicator
// implements `Series` for queries and `KLineIndicator` so the binding layer
// can wire it to a kline source without knowing the concrete type.

pub mod listeners;
pub mod sma;

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::types::Interval;

pub use listeners::{ListenerId, Listeners};
pub use sma::{calculate_sma, Sma};

/// Interval an indicator listens on plus its look-back window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalWindow {
    pub interval: Interval,
    pub window: usize,
}

impl IntervalWindow {
    pub fn new(interval: Interval, window: usize) -> Self {
        Self { interval, window }
    }
}

/// Which candle field feeds the indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceField {
    Open,
    High,
    Low,
    #[default]
    Close,
    Volume,
}

impl PriceField {
    pub fn of(&self, candle: &Candle) -> f64 {
        match self {
            Self::Open => candle.open,
            Self::High => candle.high,
            Self::Low => candle.low,
            Self::Close => candle.close,
            Self::Volume => candle.volume,
        }
    }
}

/// Lifecycle of an incremental indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorPhase {
    /// Nothing ingested yet.
    Empty,
    /// Some samples ingested, window not yet full.
    Warming,
    /// Every further update produces one value.
    Ready,
}

/// Indicator that consumes closed klines.
pub trait KLineIndicator {
    fn interval(&self) -> Interval;

    /// Process one closed candle.
    fn push_kline(&mut self, candle: &Candle);

    /// Process a bulk window of closed candles (oldest first) for `interval`.
    fn handle_window_update(&mut self, interval: Interval, window: &[Candle]);
}
