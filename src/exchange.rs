// =============================================================================
// Exchange Trade History - capability consumed by the resilient trade fetch
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retry::Context;

/// One fill reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub order_id: u64,
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    pub quote_quantity: f64,
    pub fee: f64,
    pub fee_currency: String,
    pub is_buyer: bool,
    pub is_maker: bool,
    pub time: DateTime<Utc>,
    /// The exchange has not finalized the fee for this trade yet.
    #[serde(default)]
    pub fee_processing: bool,
}

/// Filters for a trade-history query.  Unset fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeQueryOptions {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    /// Return trades with id >= this value.
    pub last_trade_id: Option<u64>,
}

impl TradeQueryOptions {
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

/// Anything that can answer "which trades happened on `symbol`".
///
/// Implementations should give up on in-flight work once `ctx` is done.
#[allow(async_fn_in_trait)]
pub trait ExchangeTradeHistoryService {
    async fn query_trades(
        &self,
        ctx: &Context,
        symbol: &str,
        options: &TradeQueryOptions,
    ) -> anyhow::Result<Vec<Trade>>;
}
