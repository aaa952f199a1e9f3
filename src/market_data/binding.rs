// =============================================================================
// Indicator Binding - wire indicators to kline event sources
// =============================================================================
//
// Binding is pure wiring: the only state added is the symbol/interval filter.
// The indicator itself decides what to do with each candle.  Indicators are
// shared behind `Arc<Mutex<_>>` so the event source and strategy code can
// both reach them; the mutex is what serializes access.
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;

use crate::indicators::KLineIndicator;
use crate::market_data::{Candle, KLineClosedEmitter, KLineHandler, KLineWindowUpdater};
use crate::types::Interval;

/// Indicator handle shared between an event source and its readers.
pub type Shared<I> = Arc<Mutex<I>>;

/// Wrap `handler` so it only sees candles for `symbol` and `interval`.
pub fn kline_with(
    symbol: impl Into<String>,
    interval: Interval,
    mut handler: impl FnMut(&Candle) + Send + 'static,
) -> KLineHandler {
    let symbol = symbol.into();
    Box::new(move |candle: &Candle| {
        if candle.symbol == symbol && candle.interval == interval {
            handler(candle);
        }
    })
}

/// Feed closed candles for `symbol` + `interval` into `indicator`.
pub fn bind_kline_closed<I, E>(indicator: &Shared<I>, emitter: &E, symbol: &str, interval: Interval)
where
    I: KLineIndicator + Send + 'static,
    E: KLineClosedEmitter + ?Sized,
{
    let target = Arc::clone(indicator);
    emitter.on_kline_closed(kline_with(symbol, interval, move |candle| {
        target.lock().push_kline(candle);
    }));
}

/// Feed window updates for `symbol` into `indicator`; the indicator filters
/// on its own interval.
pub fn bind_window_update<I, U>(indicator: &Shared<I>, updater: &U, symbol: &str)
where
    I: KLineIndicator + Send + 'static,
    U: KLineWindowUpdater + ?Sized,
{
    let target = Arc::clone(indicator);
    updater.on_kline_window_update(
        symbol,
        Box::new(move |interval, window| {
            target.lock().handle_window_update(interval, window);
        }),
    );
}
