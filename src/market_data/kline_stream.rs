use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::market_data::{Candle, KLineHub};
use crate::types::Interval;

const STREAM_BASE_URL: &str = "wss://stream.binance.com:9443";

/// Single-stream URL for one (symbol, interval) pair.
pub fn stream_url(symbol: &str, interval: Interval) -> String {
    format!("{STREAM_BASE_URL}/ws/{}@kline_{interval}", symbol.to_lowercase())
}

/// Connect to the Binance kline WebSocket stream for a single (symbol,
/// interval) pair and feed candles into `hub`.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller can handle reconnection.  Replayed closed candles after a
/// reconnect are harmless: indicators drop candles they have already seen.
pub async fn run_kline_stream(symbol: &str, interval: Interval, hub: &Arc<KLineHub>) -> Result<()> {
    let url = stream_url(symbol, interval);
    info!(url = %url, symbol = %symbol, interval = %interval, "connecting to kline WebSocket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to kline WebSocket")?;

    info!(symbol = %symbol, interval = %interval, "kline WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_kline_message(&text) {
                        Ok(candle) => {
                            debug!(
                                symbol = %candle.symbol,
                                close = candle.close,
                                closed = candle.is_closed,
                                "candle update"
                            );
                            hub.update(candle);
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse kline message");
                        }
                    }
                }
                // Ping / Pong / Binary / Close frames are handled by tungstenite.
            }
            Some(Err(e)) => {
                error!(error = %e, "kline WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, interval = %interval, "kline WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse a kline message, with or without the combined-stream envelope.
///
/// ```json
/// { "e": "kline", "s": "BTCUSDT", "k": { "t": ..., "T": ..., "i": "1m", ... } }
/// ```
pub fn parse_kline_message(text: &str) -> Result<Candle> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse kline JSON")?;

    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    let symbol = data["s"]
        .as_str()
        .context("missing field s")?
        .to_uppercase();

    let k = &data["k"];

    let interval: Interval = k["i"]
        .as_str()
        .context("missing field k.i")?
        .parse()?;

    Ok(Candle {
        symbol,
        interval,
        open_time: k["t"].as_i64().context("missing field k.t")?,
        close_time: k["T"].as_i64().context("missing field k.T")?,
        open: parse_string_f64(&k["o"], "k.o")?,
        high: parse_string_f64(&k["h"], "k.h")?,
        low: parse_string_f64(&k["l"], "k.l")?,
        close: parse_string_f64(&k["c"], "k.c")?,
        volume: parse_string_f64(&k["v"], "k.v")?,
        quote_volume: parse_string_f64(&k["q"], "k.q")?,
        trades_count: k["n"].as_u64().context("missing field k.n")?,
        is_closed: k["x"].as_bool().context("missing field k.x")?,
    })
}

/// Binance sends numeric values as JSON strings inside kline objects.
pub(crate) fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}
