// =============================================================================
// Simple Moving Average (SMA) - incremental, kline-driven
// =============================================================================
//
// SMA_t = mean(price_{t-N+1} .. price_t)
//
// The rolling window is allocated on the first update.  No value is produced
// until N samples have been seen; after that every accepted candle appends
// exactly one value and notifies listeners with it.
//
// Candles whose close time is not after the last processed close time are
// dropped, so replays and reconnects never double-count.
// =============================================================================

use std::num::NonZeroUsize;

use tracing::debug;

use crate::error::IndicatorError;
use crate::indicators::{IndicatorPhase, IntervalWindow, KLineIndicator, ListenerId, Listeners, PriceField};
use crate::market_data::Candle;
use crate::series::{RollingWindow, Series, SeriesLimits, ValueSeries};
use crate::types::Interval;

/// Incremental simple moving average over one interval.
///
/// Not internally synchronized: all calls for one instance must happen on a
/// single logical timeline (see `market_data::binding` for shared use).
#[derive(Debug)]
pub struct Sma {
    interval_window: IntervalWindow,
    window: NonZeroUsize,
    price: PriceField,
    raw_values: Option<RollingWindow>,
    values: ValueSeries,
    last_end_time: Option<i64>,
    listeners: Listeners,
}

impl Sma {
    /// SMA on closing prices with the default series limits.
    pub fn new(interval_window: IntervalWindow) -> Result<Self, IndicatorError> {
        Self::with_options(interval_window, PriceField::Close, SeriesLimits::default())
    }

    pub fn with_options(
        interval_window: IntervalWindow,
        price: PriceField,
        limits: SeriesLimits,
    ) -> Result<Self, IndicatorError> {
        let window = NonZeroUsize::new(interval_window.window)
            .ok_or(IndicatorError::InvalidWindow(interval_window.window))?;
        Ok(Self {
            interval_window,
            window,
            price,
            raw_values: None,
            values: ValueSeries::new(limits)?,
            last_end_time: None,
            listeners: Listeners::new(),
        })
    }

    pub fn window(&self) -> usize {
        self.interval_window.window
    }

    /// Close time (ms) of the last accepted candle.
    pub fn last_end_time(&self) -> Option<i64> {
        self.last_end_time
    }

    pub fn phase(&self) -> IndicatorPhase {
        match &self.raw_values {
            None => IndicatorPhase::Empty,
            Some(raw) if raw.is_full() => IndicatorPhase::Ready,
            Some(_) => IndicatorPhase::Warming,
        }
    }

    /// Computed values oldest-first.
    pub fn values(&self) -> &[f64] {
        self.values.as_slice()
    }

    pub fn add_listener(&mut self, callback: impl FnMut(f64) + Send + 'static) -> ListenerId {
        self.listeners.add(callback)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Ingest one raw sample.
    pub fn update(&mut self, value: f64) {
        let window = self.window;
        let raw = self
            .raw_values
            .get_or_insert_with(|| RollingWindow::with_capacity(window));

        if !raw.push(value) {
            return;
        }

        let mean = raw.mean();
        self.values.push(mean);
        self.listeners.emit(mean);
    }

    /// Replay every candle in order (historical warm start).
    pub fn load_klines(&mut self, candles: &[Candle]) {
        for candle in candles {
            self.push_kline(candle);
        }
    }

    /// Full replay when nothing has been ingested yet, otherwise only the last
    /// candle of `candles` is pushed.
    pub fn calculate_and_update(&mut self, candles: &[Candle]) {
        if self.raw_values.is_none() {
            self.load_klines(candles);
        } else if let Some(last) = candles.last() {
            self.push_kline(last);
        }
    }
}

impl Clone for Sma {
    /// Deep copy of the window and computed values.  Listeners are not
    /// carried over.
    fn clone(&self) -> Self {
        Self {
            interval_window: self.interval_window,
            window: self.window,
            price: self.price,
            raw_values: self.raw_values.clone(),
            values: self.values.clone(),
            last_end_time: self.last_end_time,
            listeners: Listeners::new(),
        }
    }
}

impl Series for Sma {
    fn last(&self) -> f64 {
        self.values.last()
    }

    fn index(&self, i: usize) -> f64 {
        self.values.index(i)
    }

    fn length(&self) -> usize {
        self.values.length()
    }
}

impl KLineIndicator for Sma {
    fn interval(&self) -> Interval {
        self.interval_window.interval
    }

    fn push_kline(&mut self, candle: &Candle) {
        if candle.interval != self.interval_window.interval {
            return;
        }
        if let Some(end) = self.last_end_time {
            if candle.close_time <= end {
                debug!(
                    symbol = %candle.symbol,
                    close_time = candle.close_time,
                    last_end_time = end,
                    "stale kline ignored"
                );
                return;
            }
        }

        self.update(self.price.of(candle));
        self.last_end_time = Some(candle.close_time);
    }

    fn handle_window_update(&mut self, interval: Interval, window: &[Candle]) {
        if interval != self.interval_window.interval {
            return;
        }
        self.calculate_and_update(window);
    }
}

/// One-shot SMA over exactly `window` candles.
///
/// Fewer candles is `InsufficientData`, more is `TooManyKLines`.
pub fn calculate_sma(
    candles: &[Candle],
    window: usize,
    price: impl Fn(&Candle) -> f64,
) -> Result<f64, IndicatorError> {
    let got = candles.len();
    if got == 0 || got < window {
        return Err(IndicatorError::InsufficientData { window, got });
    }
    if got != window {
        return Err(IndicatorError::TooManyKLines { window, got });
    }

    let sum: f64 = candles.iter().map(price).sum();
    Ok(sum / window as f64)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn candle(close_time: i64, close: f64) -> Candle {
        candle_on(Interval::OneMinute, close_time, close)
    }

    fn candle_on(interval: Interval, close_time: i64, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            interval,
            open_time: close_time - interval.millis() + 1,
            close_time,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            quote_volume: 10.0 * close,
            trades_count: 5,
            is_closed: true,
        }
    }

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| candle((i as i64 + 1) * 60_000 - 1, c))
            .collect()
    }

    fn sma(window: usize) -> Sma {
        Sma::new(IntervalWindow::new(Interval::OneMinute, window)).unwrap()
    }

    // ---- construction ----------------------------------------------------

    #[test]
    fn zero_window_fails_at_construction() {
        let err = Sma::new(IntervalWindow::new(Interval::OneMinute, 0)).unwrap_err();
        assert_eq!(err, IndicatorError::InvalidWindow(0));
    }

    #[test]
    fn starts_empty() {
        let s = sma(3);
        assert_eq!(s.phase(), IndicatorPhase::Empty);
        assert_eq!(s.length(), 0);
        assert_eq!(s.last(), 0.0);
        assert_eq!(s.last_value(), None);
    }

    // ---- update ----------------------------------------------------------

    #[test]
    fn no_output_while_warming() {
        for window in 1..8 {
            let mut s = sma(window);
            for v in 0..window - 1 {
                s.update(v as f64);
            }
            assert_eq!(s.length(), 0, "window {window}");
        }
        let mut s = sma(4);
        s.update(1.0);
        assert_eq!(s.phase(), IndicatorPhase::Warming);
    }

    #[test]
    fn exact_window_yields_mean() {
        let mut s = sma(4);
        for v in [2.0, 4.0, 6.0, 9.0] {
            s.update(v);
        }
        assert_eq!(s.phase(), IndicatorPhase::Ready);
        assert_eq!(s.length(), 1);
        assert!((s.last() - 5.25).abs() < 1e-12);
    }

    #[test]
    fn sliding_window_outputs() {
        let mut s = sma(3);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            s.update(v);
        }
        assert_eq!(s.values(), &[2.0, 3.0, 4.0]);
        assert_eq!(s.index(0), 4.0);
        assert_eq!(s.index(2), 2.0);
        assert_eq!(s.index(3), 0.0);
    }

    #[test]
    fn listeners_receive_each_new_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut s = sma(2);
        let sink = seen.clone();
        let id = s.add_listener(move |v| sink.lock().push(v));

        for v in [1.0, 3.0, 5.0] {
            s.update(v);
        }
        assert_eq!(*seen.lock(), vec![2.0, 4.0]);

        assert!(s.remove_listener(id));
        s.update(7.0);
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn truncation_preserves_recent_values() {
        let limits = SeriesLimits::new(8, 3).unwrap();
        let mut s = Sma::with_options(
            IntervalWindow::new(Interval::OneMinute, 1),
            PriceField::Close,
            limits,
        )
        .unwrap();
        for v in 0..8 {
            s.update(v as f64);
        }
        let recent: Vec<f64> = (0..3).map(|i| s.index(i)).collect();
        assert_eq!(s.length(), 8);

        s.update(8.0);
        assert_eq!(s.length(), 3);
        assert_eq!(s.index(0), 8.0);
        assert_eq!(s.index(1), recent[0]);
        assert_eq!(s.index(2), recent[1]);
    }

    // ---- push_kline --------------------------------------------------------

    #[test]
    fn duplicate_and_stale_candles_are_ignored() {
        let mut s = sma(2);
        let ks = candles(&[10.0, 20.0, 30.0]);
        s.load_klines(&ks);
        assert_eq!(s.values(), &[15.0, 25.0]);

        // Same close time again: no new value.
        s.push_kline(&ks[2]);
        // Older candle: no new value.
        s.push_kline(&candle(ks[0].close_time, 1_000.0));
        assert_eq!(s.length(), 2);
        assert_eq!(s.last(), 25.0);
        assert_eq!(s.last_end_time(), Some(ks[2].close_time));
    }

    #[test]
    fn other_interval_is_ignored_and_does_not_advance_end_time() {
        let mut s = sma(1);
        s.push_kline(&candle_on(Interval::FiveMinutes, 300_000, 42.0));
        assert_eq!(s.phase(), IndicatorPhase::Empty);
        assert_eq!(s.last_end_time(), None);
    }

    #[test]
    fn price_field_selects_input() {
        let mut s = Sma::with_options(
            IntervalWindow::new(Interval::OneMinute, 2),
            PriceField::High,
            SeriesLimits::default(),
        )
        .unwrap();
        s.load_klines(&candles(&[10.0, 20.0]));
        assert_eq!(s.last(), 16.0);
    }

    // ---- batch handling ----------------------------------------------------

    #[test]
    fn calculate_and_update_replays_when_empty() {
        let mut s = sma(3);
        s.calculate_and_update(&candles(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        assert_eq!(s.values(), &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn calculate_and_update_only_pushes_last_once_warm() {
        let mut s = sma(2);
        let history = candles(&[1.0, 3.0, 5.0, 100.0]);
        s.load_klines(&history[..3]);
        assert_eq!(s.length(), 2);

        // Earlier elements (even the unseen-looking ones) are skipped.
        s.calculate_and_update(&history);
        assert_eq!(s.values(), &[2.0, 4.0, 52.5]);

        s.calculate_and_update(&[]);
        assert_eq!(s.length(), 3);
    }

    #[test]
    fn window_update_for_other_interval_is_ignored() {
        let mut s = sma(1);
        s.handle_window_update(Interval::OneHour, &candles(&[1.0, 2.0]));
        assert_eq!(s.length(), 0);
        s.handle_window_update(Interval::OneMinute, &candles(&[1.0, 2.0]));
        assert_eq!(s.values(), &[1.0, 2.0]);
    }

    // ---- clone -------------------------------------------------------------

    #[test]
    fn clone_is_independent() {
        let mut live = sma(2);
        live.update(1.0);
        live.update(3.0);

        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        live.add_listener(move |_| *h.lock() += 1);

        let mut what_if = live.clone();
        what_if.update(100.0);
        assert_eq!(what_if.length(), 2);
        assert_eq!(what_if.last(), 51.5);
        assert_eq!(live.length(), 1);
        assert_eq!(live.last(), 2.0);
        // Clone carries no listeners.
        assert_eq!(*hits.lock(), 0);

        live.update(5.0);
        assert_eq!(live.last(), 4.0);
        assert_eq!(what_if.last(), 51.5);
        assert_eq!(what_if.length(), 2);
    }

    // ---- calculate_sma -----------------------------------------------------

    #[test]
    fn calculate_sma_requires_exact_window() {
        let ks = candles(&[1.0, 2.0, 3.0]);
        let close = |c: &Candle| c.close;

        assert_eq!(calculate_sma(&ks, 3, close), Ok(2.0));
        assert_eq!(
            calculate_sma(&ks[..2], 3, close),
            Err(IndicatorError::InsufficientData { window: 3, got: 2 })
        );
        assert_eq!(
            calculate_sma(&ks, 2, close),
            Err(IndicatorError::TooManyKLines { window: 2, got: 3 })
        );
        assert_eq!(
            calculate_sma(&[], 0, close),
            Err(IndicatorError::InsufficientData { window: 0, got: 0 })
        );
    }
}
