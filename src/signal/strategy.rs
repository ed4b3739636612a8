//! Strategy function contract and the built-in moving average crossover.

use crate::gateway::Bar;
use crate::utils::decimal::mean;
use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signal confidence reported by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    #[default]
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "LOW",
            Confidence::Medium => "MEDIUM",
            Confidence::High => "HIGH",
        }
    }
}

/// One bar of the window annotated by a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyRow {
    pub bar: Bar,
    /// -1, 0 or 1
    pub signal: i64,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub confidence: Option<Confidence>,
    pub indicators: BTreeMap<String, Decimal>,
}

impl StrategyRow {
    /// Row with no signal and no levels.
    pub fn flat(bar: &Bar) -> Self {
        Self {
            bar: bar.clone(),
            signal: 0,
            take_profit: None,
            stop_loss: None,
            confidence: None,
            indicators: BTreeMap::new(),
        }
    }
}

/// A pluggable signal function over an OHLCV window.
///
/// Implementations return one row per input bar; only the last row is
/// used to decide on a trade.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, window: &[Bar]) -> Result<Vec<StrategyRow>>;
}

/// Strategy backed by a plain function.
pub struct FnStrategy<F> {
    name: String,
    func: F,
}

impl<F> FnStrategy<F>
where
    F: Fn(&[Bar]) -> Result<Vec<StrategyRow>> + Send + Sync,
{
    pub fn new(name: &str, func: F) -> Self {
        Self {
            name: name.to_string(),
            func,
        }
    }
}

impl<F> Strategy for FnStrategy<F>
where
    F: Fn(&[Bar]) -> Result<Vec<StrategyRow>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, window: &[Bar]) -> Result<Vec<StrategyRow>> {
        (self.func)(window)
    }
}

/// Fast/slow simple moving average crossover.
///
/// Long while the fast average is above the slow one, short while below.
/// Exits are placed a multiple of the average bar range away from close.
#[derive(Debug, Clone)]
pub struct MovingAverageCross {
    pub fast_period: usize,
    pub slow_period: usize,
    pub take_profit_ranges: Decimal,
    pub stop_loss_ranges: Decimal,
}

impl MovingAverageCross {
    pub fn new(
        fast_period: usize,
        slow_period: usize,
        take_profit_ranges: Decimal,
        stop_loss_ranges: Decimal,
    ) -> Self {
        Self {
            fast_period,
            slow_period,
            take_profit_ranges,
            stop_loss_ranges,
        }
    }

    fn sma(closes: &[Decimal], end: usize, period: usize) -> Decimal {
        mean(&closes[end + 1 - period..=end])
    }
}

impl Strategy for MovingAverageCross {
    fn name(&self) -> &str {
        "ma_cross"
    }

    fn evaluate(&self, window: &[Bar]) -> Result<Vec<StrategyRow>> {
        anyhow::ensure!(
            self.fast_period >= 1 && self.fast_period < self.slow_period,
            "fast period must be >= 1 and below slow period"
        );

        let closes: Vec<Decimal> = window.iter().map(|b| b.close).collect();
        let ranges: Vec<Decimal> = window.iter().map(Bar::range).collect();

        let rows = window
            .iter()
            .enumerate()
            .map(|(i, bar)| {
                if i + 1 < self.slow_period {
                    return StrategyRow::flat(bar);
                }
                let fast = Self::sma(&closes, i, self.fast_period);
                let slow = Self::sma(&closes, i, self.slow_period);
                let avg_range = Self::sma(&ranges, i, self.slow_period);

                let signal = match fast.cmp(&slow) {
                    std::cmp::Ordering::Greater => 1,
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                };
                let direction = Decimal::from(signal);
                let (take_profit, stop_loss) = if signal == 0 {
                    (None, None)
                } else {
                    (
                        Some(bar.close + direction * self.take_profit_ranges * avg_range),
                        Some(bar.close - direction * self.stop_loss_ranges * avg_range),
                    )
                };

                let mut indicators = BTreeMap::new();
                indicators.insert("sma_fast".to_string(), fast);
                indicators.insert("sma_slow".to_string(), slow);
                indicators.insert("avg_range".to_string(), avg_range);

                StrategyRow {
                    bar: bar.clone(),
                    signal,
                    take_profit,
                    stop_loss,
                    confidence: None,
                    indicators,
                }
            })
            .collect();

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bars(closes: &[Decimal]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| Bar {
                time: start + Duration::minutes(5 * i as i64),
                open: *close,
                high: *close + dec!(1),
                low: *close - dec!(1),
                close: *close,
                volume: dec!(100),
            })
            .collect()
    }

    #[test]
    fn test_rising_prices_go_long() {
        let strategy = MovingAverageCross::new(2, 4, dec!(2), dec!(1));
        let closes: Vec<Decimal> = (0..6).map(|i| Decimal::from(100 + i)).collect();

        let rows = strategy.evaluate(&bars(&closes)).unwrap();

        assert_eq!(rows.len(), 6);
        assert_eq!(rows[2].signal, 0);
        let last = rows.last().unwrap();
        assert_eq!(last.signal, 1);
        // range is 2 on every bar
        assert_eq!(last.take_profit, Some(dec!(109)));
        assert_eq!(last.stop_loss, Some(dec!(103)));
        assert!(last.indicators.contains_key("sma_fast"));
    }

    #[test]
    fn test_falling_prices_go_short() {
        let strategy = MovingAverageCross::new(2, 4, dec!(2), dec!(1));
        let closes: Vec<Decimal> = (0..6).map(|i| Decimal::from(100 - i)).collect();

        let last = strategy.evaluate(&bars(&closes)).unwrap().pop().unwrap();
        assert_eq!(last.signal, -1);
        assert!(last.take_profit.unwrap() < last.bar.close);
        assert!(last.stop_loss.unwrap() > last.bar.close);
    }

    #[test]
    fn test_invalid_periods_error() {
        let strategy = MovingAverageCross::new(5, 5, dec!(2), dec!(1));
        assert!(strategy.evaluate(&bars(&[dec!(1)])).is_err());
    }
}
