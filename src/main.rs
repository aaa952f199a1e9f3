// =============================================================================
// kline-engine - Main Entry Point
// =============================================================================
//
// Streams klines for every configured symbol, keeps one SMA per symbol warm
// from REST history, and fetches settled trade history once at startup.
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kline_engine::binance::BinanceClient;
use kline_engine::config::EngineConfig;
use kline_engine::exchange::TradeQueryOptions;
use kline_engine::indicators::{IntervalWindow, Sma};
use kline_engine::market_data::{
    bind_kline_closed, bind_window_update, run_kline_stream, CandleKey, KLineHub, Shared,
};
use kline_engine::retry::{query_trades_with_backoff, Context};
use kline_engine::series::Series;

const CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("kline-engine starting up");

    let mut config = EngineConfig::load_or_default(CONFIG_PATH);

    if let Ok(syms) = std::env::var("KLINE_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    config.validate()?;

    info!(
        symbols = ?config.symbols,
        interval = %config.interval,
        sma_window = config.sma_window,
        "Configured pairs"
    );

    // ── 2. Binance client & kline hub ────────────────────────────────────
    let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
    let has_credentials = !api_key.is_empty() && !api_secret.is_empty();
    let client = BinanceClient::new(api_key, api_secret)?;

    let hub = Arc::new(KLineHub::new(config.max_candles));

    // ── 3. Indicators ────────────────────────────────────────────────────
    let mut indicators: Vec<(String, Shared<Sma>)> = Vec::with_capacity(config.symbols.len());
    for symbol in &config.symbols {
        let mut sma = Sma::with_options(
            IntervalWindow::new(config.interval, config.sma_window),
            config.price_field,
            config.series_limits,
        )?;
        let sym = symbol.clone();
        sma.add_listener(move |value| {
            info!(symbol = %sym, sma = value, "SMA updated");
        });

        let sma: Shared<Sma> = Arc::new(Mutex::new(sma));
        bind_kline_closed(&sma, hub.as_ref(), symbol, config.interval);
        bind_window_update(&sma, hub.as_ref(), symbol);
        indicators.push((symbol.clone(), sma));
    }

    // ── 4. History bootstrap ─────────────────────────────────────────────
    for symbol in &config.symbols {
        match client.get_klines(symbol, config.interval, config.history_limit).await {
            Ok(candles) => {
                hub.load_history(&CandleKey::new(symbol.as_str(), config.interval), candles);
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "History bootstrap failed"),
        }
    }
    for (symbol, sma) in &indicators {
        let sma = sma.lock();
        info!(symbol = %symbol, phase = ?sma.phase(), last = ?sma.last_value(), "SMA warmed");
    }

    // ── 5. Kline streams ─────────────────────────────────────────────────
    for symbol in &config.symbols {
        let hub = hub.clone();
        let sym = symbol.clone();
        let interval = config.interval;
        tokio::spawn(async move {
            loop {
                if let Err(e) = run_kline_stream(&sym, interval, &hub).await {
                    error!(symbol = %sym, error = %e, "Kline stream error - reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });
    }
    info!(count = config.symbols.len(), "Kline streams launched");

    // ── 6. Shutdown signal ───────────────────────────────────────────────
    let (ctx, cancel) = Context::with_cancel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        warn!("Shutdown signal received - stopping gracefully");
        cancel.cancel();
    });

    // ── 7. Startup trade fetch ───────────────────────────────────────────
    if has_credentials {
        let options = TradeQueryOptions::with_limit(config.trade_lookback_limit);
        for symbol in &config.symbols {
            match query_trades_with_backoff(&ctx, &client, symbol, &options, &config.lite_backoff).await {
                Ok(trades) => info!(symbol = %symbol, count = trades.len(), "Trade history ready"),
                Err(e) => warn!(symbol = %symbol, error = %e, "Trade history unavailable"),
            }
        }
    } else {
        warn!("BINANCE_API_KEY / BINANCE_API_SECRET not set - skipping trade history fetch");
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    ctx.done().await;

    info!("kline-engine shut down complete.");
    Ok(())
}
