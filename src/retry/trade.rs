// =============================================================================
// Resilient Trade Fetch - query trades until every fee has settled
// =============================================================================
//
// A batch containing any trade whose fee is still being processed is rejected
// as a whole and retried; partially settled batches are never returned.
// =============================================================================

use tracing::{debug, info, instrument};

use crate::error::FetchError;
use crate::exchange::{ExchangeTradeHistoryService, Trade, TradeQueryOptions};
use crate::retry::{retry_with_backoff, BackoffPolicy, Context};

/// Query trades under the general (high-ceiling) policy.
pub async fn query_trades_until_successful<E>(
    ctx: &Context,
    exchange: &E,
    symbol: &str,
    options: &TradeQueryOptions,
) -> Result<Vec<Trade>, FetchError>
where
    E: ExchangeTradeHistoryService + ?Sized,
{
    query_trades_with_backoff(ctx, exchange, symbol, options, &BackoffPolicy::general()).await
}

/// Query trades under the lite (low-ceiling) policy.
pub async fn query_trades_until_successful_lite<E>(
    ctx: &Context,
    exchange: &E,
    symbol: &str,
    options: &TradeQueryOptions,
) -> Result<Vec<Trade>, FetchError>
where
    E: ExchangeTradeHistoryService + ?Sized,
{
    query_trades_with_backoff(ctx, exchange, symbol, options, &BackoffPolicy::lite()).await
}

/// Query trades, retrying under `policy` until the batch is fully settled.
#[instrument(skip(ctx, exchange, options, policy), fields(max_retries = policy.max_retries))]
pub async fn query_trades_with_backoff<E>(
    ctx: &Context,
    exchange: &E,
    symbol: &str,
    options: &TradeQueryOptions,
    policy: &BackoffPolicy,
) -> Result<Vec<Trade>, FetchError>
where
    E: ExchangeTradeHistoryService + ?Sized,
{
    let trades = retry_with_backoff(ctx, policy, || query_settled_trades(ctx, exchange, symbol, options)).await?;
    info!(symbol, count = trades.len(), "settled trades fetched");
    Ok(trades)
}

/// One attempt: fetch, then reject the batch if any fee is still pending.
async fn query_settled_trades<E>(
    ctx: &Context,
    exchange: &E,
    symbol: &str,
    options: &TradeQueryOptions,
) -> Result<Vec<Trade>, FetchError>
where
    E: ExchangeTradeHistoryService + ?Sized,
{
    let trades = exchange.query_trades(ctx, symbol, options).await?;
    check_fees_settled(symbol, &trades)?;
    debug!(symbol, count = trades.len(), "trade batch settled");
    Ok(trades)
}

fn check_fees_settled(symbol: &str, trades: &[Trade]) -> Result<(), FetchError> {
    let pending = trades.iter().filter(|t| t.fee_processing).count();
    if pending > 0 {
        return Err(FetchError::FeePending {
            symbol: symbol.to_string(),
            pending,
            total: trades.len(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    /// Replays scripted responses; the last one repeats once the script ends.
    struct ScriptedExchange {
        responses: Mutex<VecDeque<anyhow::Result<Vec<Trade>>>>,
        fallback: Vec<Trade>,
        calls: AtomicU32,
        seen_deadlines: Mutex<Vec<Option<tokio::time::Instant>>>,
    }

    impl ScriptedExchange {
        fn new(responses: Vec<anyhow::Result<Vec<Trade>>>, fallback: Vec<Trade>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                fallback,
                calls: AtomicU32::new(0),
                seen_deadlines: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ExchangeTradeHistoryService for ScriptedExchange {
        async fn query_trades(
            &self,
            ctx: &Context,
            _symbol: &str,
            _options: &TradeQueryOptions,
        ) -> anyhow::Result<Vec<Trade>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_deadlines.lock().push(ctx.deadline());
            let next = self.responses.lock().pop_front();
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn trade(id: u64, fee_processing: bool) -> Trade {
        Trade {
            id,
            order_id: 1_000 + id,
            symbol: "BTCUSDT".into(),
            price: 37_000.0,
            quantity: 0.01,
            quote_quantity: 370.0,
            fee: if fee_processing { 0.0 } else { 0.37 },
            fee_currency: if fee_processing { String::new() } else { "USDT".into() },
            is_buyer: true,
            is_maker: false,
            time: Utc.timestamp_millis_opt(1_700_000_000_000 + id as i64).unwrap(),
            fee_processing,
        }
    }

    fn settled_batch() -> Vec<Trade> {
        vec![trade(1, false), trade(2, false), trade(3, false)]
    }

    fn fast(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy {
            initial_interval_ms: 10,
            multiplier: 2.0,
            max_interval_ms: 1_000,
            max_elapsed_ms: None,
            randomization_factor: 0.0,
            max_retries,
        }
    }

    #[test]
    fn one_pending_trade_rejects_whole_batch() {
        let batch = vec![trade(1, false), trade(2, true), trade(3, false)];
        match check_fees_settled("BTCUSDT", &batch) {
            Err(FetchError::FeePending { pending, total, .. }) => {
                assert_eq!(pending, 1);
                assert_eq!(total, 3);
            }
            other => panic!("expected FeePending, got {other:?}"),
        }
        assert!(check_fees_settled("BTCUSDT", &settled_batch()).is_ok());
        assert!(check_fees_settled("BTCUSDT", &[]).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn general_policy_returns_settled_batch_on_third_call() {
        let exchange = ScriptedExchange::new(
            vec![Ok(vec![trade(1, true)]), Ok(vec![trade(1, true)])],
            settled_batch(),
        );

        let trades = query_trades_until_successful(
            &Context::background(),
            &exchange,
            "BTCUSDT",
            &TradeQueryOptions::with_limit(500),
        )
        .await
        .expect("settles on third call");

        assert_eq!(trades, settled_batch());
        assert_eq!(exchange.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn single_retry_policy_exhausts() {
        let exchange = ScriptedExchange::new(
            vec![Ok(vec![trade(1, true)]), Ok(vec![trade(1, true)])],
            settled_batch(),
        );

        let err = query_trades_with_backoff(
            &Context::background(),
            &exchange,
            "BTCUSDT",
            &TradeQueryOptions::default(),
            &fast(1),
        )
        .await
        .unwrap_err();

        match err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, FetchError::FeePending { .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_retried() {
        let exchange = ScriptedExchange::new(
            vec![Err(anyhow::anyhow!("502 Bad Gateway"))],
            settled_batch(),
        );

        let trades = query_trades_until_successful_lite(
            &Context::background(),
            &exchange,
            "BTCUSDT",
            &TradeQueryOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(trades.len(), 3);
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lite_policy_gives_up_before_general_would() {
        let always_pending = ScriptedExchange::new(Vec::new(), vec![trade(9, true)]);

        let err = query_trades_until_successful_lite(
            &Context::background(),
            &always_pending,
            "BTCUSDT",
            &TradeQueryOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FetchError::Exhausted { .. }));
        assert_eq!(always_pending.calls(), BackoffPolicy::lite().max_retries + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_mid_backoff_returns_promptly() {
        let always_pending = ScriptedExchange::new(Vec::new(), vec![trade(9, true)]);
        let policy = BackoffPolicy {
            initial_interval_ms: 60_000,
            ..fast(100)
        };
        let ctx = Context::background().with_timeout(Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        let err = query_trades_with_backoff(
            &ctx,
            &always_pending,
            "BTCUSDT",
            &TradeQueryOptions::default(),
            &policy,
        )
        .await
        .unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(60));
        match err {
            FetchError::Cancelled { attempts, last } => {
                assert_eq!(attempts, 1);
                assert!(matches!(last.as_deref(), Some(FetchError::FeePending { .. })));
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert_eq!(always_pending.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_receives_the_caller_context() {
        let exchange = ScriptedExchange::new(vec![Err(anyhow::anyhow!("502 Bad Gateway"))], settled_batch());
        let ctx = Context::background().with_timeout(Duration::from_secs(600));

        query_trades_with_backoff(&ctx, &exchange, "BTCUSDT", &TradeQueryOptions::default(), &fast(3))
            .await
            .unwrap();

        let seen = exchange.seen_deadlines.lock().clone();
        assert_eq!(seen, vec![ctx.deadline(), ctx.deadline()]);
        assert!(ctx.deadline().is_some());
    }
}
