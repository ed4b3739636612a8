//! Rolling-window signal pipeline.

use super::strategy::{Confidence, Strategy, StrategyRow};
use crate::gateway::{Bar, Direction};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while turning a bar into a signal.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The strategy function failed; no order may be derived from this bar.
    #[error("Strategy {strategy} failed: {reason}")]
    Strategy { strategy: String, reason: String },

    #[error("Strategy {0} returned no rows")]
    EmptyOutput(String),

    #[error("Invalid signal value {0}, expected -1, 0 or 1")]
    InvalidSignal(i64),

    #[error("Signal {0} is missing take-profit or stop-loss levels")]
    MissingLevels(i64),
}

/// Discrete signal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SignalValue {
    Short,
    #[default]
    Flat,
    Long,
}

impl SignalValue {
    pub fn from_raw(raw: i64) -> Result<Self, SignalError> {
        match raw {
            -1 => Ok(SignalValue::Short),
            0 => Ok(SignalValue::Flat),
            1 => Ok(SignalValue::Long),
            other => Err(SignalError::InvalidSignal(other)),
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            SignalValue::Long => Some(Direction::Long),
            SignalValue::Short => Some(Direction::Short),
            SignalValue::Flat => None,
        }
    }
}

/// A trade signal, consumed once by the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSignal {
    pub direction: Direction,
    /// Reference price the entry is derived from
    pub entry_price: Decimal,
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
    pub confidence: Confidence,
    pub indicators: BTreeMap<String, Decimal>,
    pub generated_at: DateTime<Utc>,
}

/// Snapshot of the pipeline for status logging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineState {
    pub symbol: String,
    pub strategy: String,
    pub data_points: usize,
    pub current_signal: SignalValue,
    pub last_take_profit: Option<Decimal>,
    pub last_stop_loss: Option<Decimal>,
    pub ready: bool,
}

/// Maintains the OHLCV window and emits signals on changes.
pub struct SignalPipeline {
    symbol: String,
    strategy: Box<dyn Strategy>,
    window: VecDeque<Bar>,
    window_size: usize,
    min_data_points: usize,
    current: SignalValue,
    last_take_profit: Option<Decimal>,
    last_stop_loss: Option<Decimal>,
}

impl SignalPipeline {
    pub fn new(
        symbol: &str,
        strategy: Box<dyn Strategy>,
        window_size: usize,
        min_data_points: usize,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            strategy,
            window: VecDeque::with_capacity(window_size + 1),
            window_size,
            min_data_points,
            current: SignalValue::Flat,
            last_take_profit: None,
            last_stop_loss: None,
        }
    }

    fn push(&mut self, bar: Bar) {
        self.window.push_back(bar);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }
    }

    fn run_strategy(&self) -> Result<StrategyRow, SignalError> {
        let window: Vec<Bar> = self.window.iter().cloned().collect();
        let name = self.strategy.name().to_string();
        let mut rows = self
            .strategy
            .evaluate(&window)
            .map_err(|e| SignalError::Strategy {
                strategy: name.clone(),
                reason: format!("{:#}", e),
            })?;
        rows.pop().ok_or(SignalError::EmptyOutput(name))
    }

    /// Fill the window from history and establish the baseline signal.
    ///
    /// A signal already active in history is recorded but never emitted.
    pub fn seed(&mut self, bars: Vec<Bar>) -> Result<(), SignalError> {
        for bar in bars {
            self.push(bar);
        }
        if self.window.len() >= self.min_data_points {
            let row = self.run_strategy()?;
            self.current = SignalValue::from_raw(row.signal)?;
            self.last_take_profit = row.take_profit;
            self.last_stop_loss = row.stop_loss;
        }
        info!(
            symbol = %self.symbol,
            data_points = self.window.len(),
            baseline = ?self.current,
            "Signal pipeline seeded"
        );
        Ok(())
    }

    /// Append a bar and return a signal if the discrete value changed.
    pub fn process_new_bar(&mut self, bar: Bar) -> Result<Option<TradeSignal>, SignalError> {
        self.push(bar);

        if self.window.len() < self.min_data_points {
            debug!(
                symbol = %self.symbol,
                data_points = self.window.len(),
                required = self.min_data_points,
                "Warming up"
            );
            return Ok(None);
        }

        let row = self.run_strategy()?;
        let value = SignalValue::from_raw(row.signal)?;
        self.last_take_profit = row.take_profit;
        self.last_stop_loss = row.stop_loss;

        if value == self.current {
            return Ok(None);
        }
        let previous = self.current;

        let Some(direction) = value.direction() else {
            self.current = value;
            debug!(symbol = %self.symbol, ?previous, "Signal went flat");
            return Ok(None);
        };
        // a rejected bar leaves the baseline untouched
        let (Some(take_profit), Some(stop_loss)) = (row.take_profit, row.stop_loss) else {
            return Err(SignalError::MissingLevels(row.signal));
        };
        self.current = value;

        let signal = TradeSignal {
            direction,
            entry_price: row.bar.close,
            take_profit,
            stop_loss,
            confidence: row.confidence.unwrap_or_default(),
            indicators: row.indicators,
            generated_at: row.bar.time,
        };
        info!(
            symbol = %self.symbol,
            %direction,
            entry = %signal.entry_price,
            take_profit = %signal.take_profit,
            stop_loss = %signal.stop_loss,
            "Trade signal"
        );
        Ok(Some(signal))
    }

    pub fn state(&self) -> PipelineState {
        PipelineState {
            symbol: self.symbol.clone(),
            strategy: self.strategy.name().to_string(),
            data_points: self.window.len(),
            current_signal: self.current,
            last_take_profit: self.last_take_profit,
            last_stop_loss: self.last_stop_loss,
            ready: self.window.len() >= self.min_data_points,
        }
    }
}
