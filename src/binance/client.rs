// =============================================================================
// Binance REST API Client - HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. All signed requests
// include X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift between the engine and Binance servers.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::exchange::{ExchangeTradeHistoryService, Trade, TradeQueryOptions};
use crate::market_data::kline_stream::parse_string_f64;
use crate::market_data::Candle;
use crate::retry::Context as CallContext;
use crate::types::Interval;

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Binance REST API client with HMAC-SHA256 request signing.
#[derive(Clone)]
pub struct BinanceClient {
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `BinanceClient` against the production endpoint.
    ///
    /// # Arguments
    /// * `api_key` - Binance API key (sent as a header, never in query params).
    /// * `secret`  - Binance secret key used exclusively for HMAC signing.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, secret, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        let base_url = base_url.into();

        let mut default_headers = HeaderMap::new();
        // The API key header is required for all signed endpoints.
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, "BinanceClient initialised");

        Ok(Self {
            secret: secret.into(),
            base_url,
            client,
        })
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    pub fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .context("invalid HMAC key")?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Build the full query string for a signed request (appends timestamp,
    /// recvWindow, and signature).
    fn signed_query(&self, params: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base)?;
        Ok(format!("{base}&signature={sig}"))
    }

    async fn get_json(&self, path: &str, query: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}?{}", self.base_url, path, query);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("Binance GET {} returned {}: {}", path, status, body);
        }
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Trade history
    // -------------------------------------------------------------------------

    /// GET /api/v3/myTrades (signed).
    #[instrument(skip(self, options), name = "binance::get_my_trades")]
    pub async fn get_my_trades(&self, symbol: &str, options: &TradeQueryOptions) -> Result<Vec<Trade>> {
        let qs = self.signed_query(&trade_query_params(symbol, options))?;
        let body = self.get_json("/api/v3/myTrades", &qs).await?;
        let trades = parse_trades(&body)?;
        debug!(symbol, count = trades.len(), "trades retrieved");
        Ok(trades)
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/klines (public - no signature required).
    ///
    /// Candles whose close time is still in the future are returned with
    /// `is_closed == false`.
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(&self, symbol: &str, interval: Interval, limit: u32) -> Result<Vec<Candle>> {
        let qs = format!("symbol={symbol}&interval={interval}&limit={limit}");
        let body = self.get_json("/api/v3/klines", &qs).await?;
        let candles = parse_klines(&body, symbol, interval, Self::timestamp_ms() as i64)?;
        debug!(symbol, interval = %interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }
}

impl ExchangeTradeHistoryService for BinanceClient {
    /// Aborts the in-flight request as soon as `ctx` is done.
    async fn query_trades(&self, ctx: &CallContext, symbol: &str, options: &TradeQueryOptions) -> Result<Vec<Trade>> {
        tokio::select! {
            biased;
            _ = ctx.done() => anyhow::bail!("trade query for {symbol} cancelled"),
            res = self.get_my_trades(symbol, options) => res,
        }
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Request / response mapping
// -----------------------------------------------------------------------------

fn trade_query_params(symbol: &str, options: &TradeQueryOptions) -> String {
    let mut params = format!("symbol={symbol}");
    if let Some(start) = options.start_time {
        params.push_str(&format!("&startTime={}", start.timestamp_millis()));
    }
    if let Some(end) = options.end_time {
        params.push_str(&format!("&endTime={}", end.timestamp_millis()));
    }
    if let Some(from_id) = options.last_trade_id {
        params.push_str(&format!("&fromId={from_id}"));
    }
    if let Some(limit) = options.limit {
        params.push_str(&format!("&limit={limit}"));
    }
    params
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrade {
    id: u64,
    order_id: u64,
    symbol: String,
    price: String,
    qty: String,
    quote_qty: String,
    commission: String,
    #[serde(default)]
    commission_asset: Option<String>,
    time: i64,
    is_buyer: bool,
    is_maker: bool,
}

/// Map a myTrades response.  A trade without a commission asset has not had
/// its fee settled yet.
fn parse_trades(body: &serde_json::Value) -> Result<Vec<Trade>> {
    let raw: Vec<RawTrade> =
        serde_json::from_value(body.clone()).context("myTrades response is not a trade array")?;

    raw.into_iter()
        .map(|t| {
            let fee_currency = t.commission_asset.unwrap_or_default();
            Ok(Trade {
                id: t.id,
                order_id: t.order_id,
                price: t.price.parse().with_context(|| format!("bad price '{}'", t.price))?,
                quantity: t.qty.parse().with_context(|| format!("bad qty '{}'", t.qty))?,
                quote_quantity: t
                    .quote_qty
                    .parse()
                    .with_context(|| format!("bad quoteQty '{}'", t.quote_qty))?,
                fee: t
                    .commission
                    .parse()
                    .with_context(|| format!("bad commission '{}'", t.commission))?,
                fee_processing: fee_currency.is_empty(),
                fee_currency,
                is_buyer: t.is_buyer,
                is_maker: t.is_maker,
                time: Utc
                    .timestamp_millis_opt(t.time)
                    .single()
                    .with_context(|| format!("bad trade time {}", t.time))?,
                symbol: t.symbol,
            })
        })
        .collect()
}

/// Map a klines response.
///
/// Array indices:
///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
///   [6] closeTime, [7] quoteAssetVolume, [8] numberOfTrades
fn parse_klines(body: &serde_json::Value, symbol: &str, interval: Interval, now_ms: i64) -> Result<Vec<Candle>> {
    let raw = body.as_array().context("klines response is not an array")?;

    let mut candles = Vec::with_capacity(raw.len());
    for entry in raw {
        let arr = entry.as_array().context("kline entry is not an array")?;

        if arr.len() < 9 {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let close_time = arr[6].as_i64().context("kline closeTime is not an integer")?;
        candles.push(Candle {
            symbol: symbol.to_string(),
            interval,
            open_time: arr[0].as_i64().context("kline openTime is not an integer")?,
            close_time,
            open: parse_string_f64(&arr[1], "open")?,
            high: parse_string_f64(&arr[2], "high")?,
            low: parse_string_f64(&arr[3], "low")?,
            close: parse_string_f64(&arr[4], "close")?,
            volume: parse_string_f64(&arr[5], "volume")?,
            quote_volume: parse_string_f64(&arr[7], "quoteAssetVolume")?,
            trades_count: arr[8].as_u64().context("kline numberOfTrades is not an integer")?,
            is_closed: close_time < now_ms,
        });
    }
    Ok(candles)
}
