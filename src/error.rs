// =============================================================================
// Error Types - indicator configuration/data errors and trade-fetch errors
// =============================================================================
//
// Two families:
//   - `IndicatorError`: construction-time misconfiguration and the batch
//     helper's insufficient-data cases.  Never retried.
//   - `FetchError`: outcomes of one trade-fetch attempt (retryable) and the
//     terminal outcomes of the backoff driver (exhausted / cancelled).
// =============================================================================

use thiserror::Error;

/// Errors raised by indicator construction and batch calculation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndicatorError {
    #[error("invalid window size {0}: window must be at least 1")]
    InvalidWindow(usize),

    #[error("invalid series limits: retain_size={retain_size} must be in 1..=hard_cap ({hard_cap})")]
    InvalidSeriesLimits { hard_cap: usize, retain_size: usize },

    #[error("insufficient elements for calculating SMA with window = {window} (got {got})")]
    InsufficientData { window: usize, got: usize },

    #[error("too many klines passed in, requires only {window} klines (got {got})")]
    TooManyKLines { window: usize, got: usize },
}

/// Errors produced while fetching trades from an exchange.
#[derive(Debug, Error)]
pub enum FetchError {
    /// At least one trade in the batch still has its fee being settled.
    #[error("{pending} of {total} trades for {symbol} have a trading fee that is not ready")]
    FeePending {
        symbol: String,
        pending: usize,
        total: usize,
    },

    /// The exchange call itself failed.
    #[error("exchange query failed: {0:#}")]
    Transport(#[from] anyhow::Error),

    /// The backoff policy ran out of retries or elapsed time.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    /// The context was cancelled or its deadline passed between attempts.
    #[error("cancelled after {attempts} attempts{}", last.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    Cancelled {
        attempts: u32,
        last: Option<Box<FetchError>>,
    },
}

impl FetchError {
    /// `true` for errors the backoff driver should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FeePending { .. } | Self::Transport(_))
    }
}
