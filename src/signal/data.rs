//! OHLCV bar loading for paper replay.

use crate::gateway::Bar;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;

/// CSV bar loader.
///
/// Expected CSV format:
/// ```csv
/// timestamp,open,high,low,close,volume
/// 2024-01-02T14:30:00Z,4150.25,4152.00,4149.75,4151.50,1200
/// ```
#[derive(Debug, Clone)]
pub struct CsvBarLoader {
    bars: Vec<Bar>,
}

impl CsvBarLoader {
    /// Load bars from a CSV file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::from_csv_content(&content)
    }

    /// Load bars from CSV content, sorted by time.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut bars = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            // Skip header
            if line_num == 0 && line.starts_with("timestamp") {
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let bar = parse_row(line)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
            bars.push(bar);
        }

        if bars.is_empty() {
            anyhow::bail!("CSV file contains no data rows");
        }

        bars.sort_by_key(|b| b.time);
        Ok(Self { bars })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Split into (history, live) at `history_len` bars.
    pub fn split(self, history_len: usize) -> (Vec<Bar>, Vec<Bar>) {
        let mut history = self.bars;
        let live = history.split_off(history_len.min(history.len()));
        (history, live)
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

fn parse_row(line: &str) -> Result<Bar> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    anyhow::ensure!(
        fields.len() == 6,
        "expected 6 columns, found {}",
        fields.len()
    );

    let time = DateTime::parse_from_rfc3339(fields[0])
        .context("Invalid timestamp")?
        .with_timezone(&Utc);
    let decimal = |idx: usize, name: &str| {
        Decimal::from_str(fields[idx]).with_context(|| format!("Invalid {}", name))
    };

    let bar = Bar {
        time,
        open: decimal(1, "open")?,
        high: decimal(2, "high")?,
        low: decimal(3, "low")?,
        close: decimal(4, "close")?,
        volume: decimal(5, "volume")?,
    };
    anyhow::ensure!(bar.low <= bar.high, "low above high");
    Ok(bar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const CSV: &str = "timestamp,open,high,low,close,volume
2024-01-02T14:35:00Z,4151.50,4153.00,4151.00,4152.75,900
2024-01-02T14:30:00Z,4150.25,4152.00,4149.75,4151.50,1200
";

    #[test]
    fn test_parse_and_sort() {
        let loader = CsvBarLoader::from_csv_content(CSV).unwrap();
        assert_eq!(loader.len(), 2);
        assert_eq!(loader.bars()[0].open, dec!(4150.25));
        assert_eq!(loader.bars()[1].close, dec!(4152.75));
    }

    #[test]
    fn test_split() {
        let (history, live) = CsvBarLoader::from_csv_content(CSV).unwrap().split(1);
        assert_eq!(history.len(), 1);
        assert_eq!(live.len(), 1);

        let (history, live) = CsvBarLoader::from_csv_content(CSV).unwrap().split(10);
        assert_eq!(history.len(), 2);
        assert!(live.is_empty());
    }

    #[test]
    fn test_rejects_bad_rows() {
        assert!(CsvBarLoader::from_csv_content("timestamp,open\n").is_err());
        assert!(CsvBarLoader::from_csv_content("2024-01-02T14:30:00Z,1,2,3\n").is_err());
        assert!(
            CsvBarLoader::from_csv_content("2024-01-02T14:30:00Z,1,1,2,1,5\n").is_err(),
            "low above high"
        );
    }
}
