// =============================================================================
// Engine Configuration - JSON settings with atomic save
// =============================================================================
//
// Every field carries a serde default so that an older or partial config
// file still loads.  Persistence writes a `.tmp` sibling and renames it over
// the target, so a crash mid-write never leaves a truncated file behind.
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::indicators::PriceField;
use crate::retry::BackoffPolicy;
use crate::series::SeriesLimits;
use crate::types::Interval;

/// Binance caps `GET /api/v3/klines` at this many rows per request.
pub const MAX_HISTORY_LIMIT: u32 = 1000;

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
}

fn default_sma_window() -> usize {
    20
}

fn default_max_candles() -> usize {
    500
}

fn default_history_limit() -> u32 {
    500
}

fn default_lite_backoff() -> BackoffPolicy {
    BackoffPolicy::lite()
}

fn default_trade_lookback_limit() -> u32 {
    500
}

/// Top-level configuration for the kline engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Market data --------------------------------------------------------

    /// Symbols to stream and compute indicators for.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Kline interval every indicator listens on.
    #[serde(default)]
    pub interval: Interval,

    /// Closed candles retained per (symbol, interval) in the hub.
    #[serde(default = "default_max_candles")]
    pub max_candles: usize,

    /// Candles requested from REST to warm indicators at startup.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,

    // --- Indicator ----------------------------------------------------------

    /// SMA look-back window, in candles.
    #[serde(default = "default_sma_window")]
    pub sma_window: usize,

    /// Candle field fed into the SMA.
    #[serde(default)]
    pub price_field: PriceField,

    /// Growth policy of each indicator's output series.
    #[serde(default)]
    pub series_limits: SeriesLimits,

    // --- Trade fetch --------------------------------------------------------

    #[serde(default)]
    pub general_backoff: BackoffPolicy,

    #[serde(default = "default_lite_backoff")]
    pub lite_backoff: BackoffPolicy,

    /// `limit` sent with the startup trade-history query.
    #[serde(default = "default_trade_lookback_limit")]
    pub trade_lookback_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            interval: Interval::default(),
            max_candles: default_max_candles(),
            history_limit: default_history_limit(),
            sma_window: default_sma_window(),
            price_field: PriceField::default(),
            series_limits: SeriesLimits::default(),
            general_backoff: BackoffPolicy::general(),
            lite_backoff: default_lite_backoff(),
            trade_lookback_limit: default_trade_lookback_limit(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing file is an error so the caller can fall back to defaults
    /// with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("invalid engine config in {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            interval = %config.interval,
            sma_window = config.sma_window,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Load `path`, falling back to defaults when it cannot be used.
    ///
    /// A missing file is seeded with the defaults.  An existing file that
    /// fails to parse or validate is left untouched.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            let config = Self::default();
            if let Err(e) = config.save(path) {
                warn!(error = %e, "Failed to write default engine config");
            }
            return config;
        }

        Self::load(path).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            Self::default()
        })
    }

    /// Persist the configuration to `path` (write `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("at least one symbol is required");
        }
        if self.sma_window == 0 {
            bail!("sma_window must be positive");
        }
        self.series_limits.validate()?;
        if self.max_candles < self.sma_window {
            bail!(
                "max_candles ({}) must be at least sma_window ({})",
                self.max_candles,
                self.sma_window
            );
        }
        if self.history_limit == 0 || self.history_limit > MAX_HISTORY_LIMIT {
            bail!("history_limit must be in 1..={MAX_HISTORY_LIMIT}, got {}", self.history_limit);
        }
        Ok(())
    }
}
