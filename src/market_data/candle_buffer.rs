use std::collections::{HashMap, VecDeque};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::Interval;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle for one (symbol, interval).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub interval: Interval,
    pub open_time: i64,
    /// End of the candle's interval (ms).  Used for ordering and dedup.
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trades_count: u64,
    pub is_closed: bool,
}

impl Candle {
    pub fn key(&self) -> CandleKey {
        CandleKey {
            symbol: self.symbol.clone(),
            interval: self.interval,
        }
    }
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: Interval,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

// ---------------------------------------------------------------------------
// Event source contracts
// ---------------------------------------------------------------------------

/// Callback for a single closed candle.
pub type KLineHandler = Box<dyn FnMut(&Candle) + Send>;

/// Callback for the retained window of closed candles (oldest first).
pub type KLineWindowHandler = Box<dyn FnMut(Interval, &[Candle]) + Send>;

/// Source of "candle closed" events.  Every handler sees every closed candle;
/// filtering by symbol and interval is the subscriber's job.
pub trait KLineClosedEmitter {
    fn on_kline_closed(&self, handler: KLineHandler);
}

/// Source of bulk "window updated" events, scoped to one symbol.
pub trait KLineWindowUpdater {
    fn on_kline_window_update(&self, symbol: &str, handler: KLineWindowHandler);
}

// ---------------------------------------------------------------------------
// KLineHub -- ring buffer per (symbol, interval) plus event fan-out
// ---------------------------------------------------------------------------

/// Thread-safe store of recent candles per `(symbol, interval)` that fans
/// closed candles out to subscribers.
///
/// The live (unclosed) candle is updated in place; when a candle closes it
/// becomes permanent, the ring is trimmed to `max_candles`, and subscribers
/// are called synchronously: candle-closed handlers first, then window
/// handlers for that symbol.  Handlers must not subscribe from inside a
/// callback.
pub struct KLineHub {
    buffers: RwLock<HashMap<CandleKey, VecDeque<Candle>>>,
    max_candles: usize,
    closed_handlers: Mutex<Vec<KLineHandler>>,
    window_handlers: Mutex<Vec<(String, KLineWindowHandler)>>,
}

impl KLineHub {
    /// Create a hub that retains at most `max_candles` closed candles per key,
    /// plus one in-progress candle.
    pub fn new(max_candles: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_candles,
            closed_handlers: Mutex::new(Vec::new()),
            window_handlers: Mutex::new(Vec::new()),
        }
    }

    /// Insert or replace the latest candle for its key.
    ///
    /// * A closed candle replaces the in-progress version, is appended, and
    ///   triggers the event fan-out.
    /// * An open candle replaces the in-progress candle or is appended.
    /// * A candle whose `close_time` is not after the newest closed candle is
    ///   dropped, so replays after a reconnect never duplicate ring entries.
    pub fn update(&self, candle: Candle) {
        let key = candle.key();
        let closed = candle.is_closed.then(|| candle.clone());

        {
            let mut map = self.buffers.write();
            let ring = map
                .entry(key.clone())
                .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

            if let Some(newest) = Self::newest_closed(ring) {
                if candle.close_time <= newest {
                    debug!(key = %key, close_time = candle.close_time, newest, "stale candle dropped");
                    return;
                }
            }

            if let Some(last) = ring.back() {
                if !last.is_closed {
                    if candle.open_time < last.open_time {
                        debug!(key = %key, open_time = candle.open_time, "out-of-order candle dropped");
                        return;
                    }
                    ring.pop_back();
                }
            }
            ring.push_back(candle);

            if closed.is_some() {
                Self::trim(ring, self.max_candles);
            }
        }

        if let Some(candle) = closed {
            self.emit_closed(&candle);
            self.emit_window(&key);
        }
    }

    /// Bulk-load closed historical candles for one key and emit a single
    /// window update.  Candle-closed handlers are not called.
    ///
    /// History is merged with what the ring already holds by `close_time`;
    /// candles already present are skipped and the in-progress candle stays
    /// at the back.
    pub fn load_history(&self, key: &CandleKey, candles: Vec<Candle>) {
        let accepted = {
            let mut map = self.buffers.write();
            let ring = map
                .entry(key.clone())
                .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

            let open_tail = match ring.back() {
                Some(last) if !last.is_closed => ring.pop_back(),
                _ => None,
            };

            let mut merged: Vec<Candle> = ring.drain(..).collect();
            let mut accepted = 0usize;
            for candle in candles {
                if !candle.is_closed || candle.key() != *key {
                    warn!(key = %key, open_time = candle.open_time, "skipping history candle");
                    continue;
                }
                if let Err(pos) = merged.binary_search_by_key(&candle.close_time, |c| c.close_time) {
                    merged.insert(pos, candle);
                    accepted += 1;
                }
            }
            ring.extend(merged);

            if let Some(open) = open_tail {
                if Self::newest_closed(ring).map_or(true, |newest| open.close_time > newest) {
                    ring.push_back(open);
                }
            }
            Self::trim(ring, self.max_candles);
            accepted
        };

        debug!(key = %key, accepted, "history loaded");
        self.emit_window(key);
    }

    /// Return the most recent `count` **closed** candles (oldest-first order).
    pub fn get_closed(&self, key: &CandleKey, count: usize) -> Vec<Candle> {
        let map = self.buffers.read();
        match map.get(key) {
            Some(ring) => {
                let closed: Vec<&Candle> = ring.iter().filter(|c| c.is_closed).collect();
                let start = closed.len().saturating_sub(count);
                closed[start..].iter().map(|c| (*c).clone()).collect()
            }
            None => Vec::new(),
        }
    }

    /// Return the close price of the most recent closed candle, if any.
    pub fn last_close(&self, key: &CandleKey) -> Option<f64> {
        let map = self.buffers.read();
        map.get(key)
            .and_then(|ring| ring.iter().rev().find(|c| c.is_closed).map(|c| c.close))
    }

    /// Total number of candles (including any in-progress candle) for a key.
    pub fn count(&self, key: &CandleKey) -> usize {
        let map = self.buffers.read();
        map.get(key).map_or(0, VecDeque::len)
    }

    fn newest_closed(ring: &VecDeque<Candle>) -> Option<i64> {
        ring.iter().rev().find(|c| c.is_closed).map(|c| c.close_time)
    }

    fn trim(ring: &mut VecDeque<Candle>, max_candles: usize) {
        // An in-progress candle at the back does not count towards the budget.
        let open_tail = ring.back().is_some_and(|c| !c.is_closed) as usize;
        while ring.len() > max_candles + open_tail {
            ring.pop_front();
        }
    }

    fn emit_closed(&self, candle: &Candle) {
        let mut handlers = self.closed_handlers.lock();
        for handler in handlers.iter_mut() {
            handler(candle);
        }
    }

    fn emit_window(&self, key: &CandleKey) {
        let mut handlers = self.window_handlers.lock();
        if !handlers.iter().any(|(symbol, _)| *symbol == key.symbol) {
            return;
        }

        let window = self.get_closed(key, self.max_candles);
        for (symbol, handler) in handlers.iter_mut() {
            if *symbol == key.symbol {
                handler(key.interval, &window);
            }
        }
    }
}

impl KLineClosedEmitter for KLineHub {
    fn on_kline_closed(&self, handler: KLineHandler) {
        self.closed_handlers.lock().push(handler);
    }
}

impl KLineWindowUpdater for KLineHub {
    fn on_kline_window_update(&self, symbol: &str, handler: KLineWindowHandler) {
        self.window_handlers.lock().push((symbol.to_string(), handler));
    }
}

impl std::fmt::Debug for KLineHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KLineHub")
            .field("keys", &self.buffers.read().len())
            .field("max_candles", &self.max_candles)
            .field("closed_handlers", &self.closed_handlers.lock().len())
            .field("window_handlers", &self.window_handlers.lock().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
