// =============================================================================
// Retry Module - backoff-governed retries for flaky exchange calls
// =============================================================================

pub mod backoff;
pub mod context;
pub mod trade;

pub use backoff::{retry_with_backoff, BackoffPolicy};
pub use context::{CancelHandle, Context};
pub use trade::{
    query_trades_until_successful, query_trades_until_successful_lite, query_trades_with_backoff,
};
