//! Signal generation from OHLCV bars.
//!
//! - `strategy`: pluggable strategy contract and the built-in MA crossover
//! - `pipeline`: rolling window that emits a signal only when it changes
//! - `history`: historical bootstrap with bounded retries
//! - `data`: CSV bar loading for paper replay

mod data;
mod history;
mod pipeline;
mod strategy;

pub use data::CsvBarLoader;
pub use history::{fetch_history_with_retry, HistoryRequest};
pub use pipeline::{PipelineState, SignalError, SignalPipeline, SignalValue, TradeSignal};
pub use strategy::{Confidence, FnStrategy, MovingAverageCross, Strategy, StrategyRow};
