pub mod binding;
pub mod candle_buffer;
pub mod kline_stream;

// Re-export the Candle struct for convenient access (e.g. `use crate::market_data::Candle`).
pub use binding::{bind_kline_closed, bind_window_update, kline_with, Shared};
pub use candle_buffer::{
    Candle, CandleKey, KLineClosedEmitter, KLineHandler, KLineHub, KLineWindowHandler,
    KLineWindowUpdater,
};
pub use kline_stream::run_kline_stream;
