// =============================================================================
// kline-engine - incremental kline indicators and resilient trade fetch
// =============================================================================

pub mod binance;
pub mod config;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod market_data;
pub mod retry;
pub mod series;
pub mod types;
