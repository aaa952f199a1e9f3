// =============================================================================
// Binance - REST client for trade history and kline bootstrap
// =============================================================================

pub mod client;

pub use client::BinanceClient;
