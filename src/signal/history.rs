//! Historical bar bootstrap with bounded retries.

use crate::gateway::{Bar, Gateway, GatewayError, Instrument};
use std::time::Duration;
use tracing::{info, warn};

/// Retry settings for the history request.
#[derive(Debug, Clone, Copy)]
pub struct HistoryRequest {
    pub bar_count: usize,
    pub max_retries: u32,
    pub backoff: Duration,
}

/// Fetch historical bars, retrying with a fixed backoff.
///
/// An empty response counts as a failed attempt. The last error is
/// returned once every attempt has failed.
pub async fn fetch_history_with_retry<G: Gateway + ?Sized>(
    gateway: &G,
    instrument: &Instrument,
    timeframe: &str,
    request: HistoryRequest,
) -> Result<Vec<Bar>, GatewayError> {
    let max_retries = request.max_retries.max(1);
    let mut last_error = None;

    for attempt in 1..=max_retries {
        match gateway
            .historical_bars(instrument, timeframe, request.bar_count)
            .await
        {
            Ok(bars) if !bars.is_empty() => {
                info!(
                    symbol = %instrument.symbol,
                    bars = bars.len(),
                    attempt,
                    "Historical data loaded"
                );
                return Ok(bars);
            }
            Ok(_) => {
                warn!(symbol = %instrument.symbol, attempt, max_retries, "Historical data empty, retrying");
                last_error = Some(GatewayError::History("empty response".to_string()));
            }
            Err(e) => {
                warn!(
                    symbol = %instrument.symbol,
                    attempt,
                    max_retries,
                    error = %e,
                    "Historical data request failed, retrying"
                );
                last_error = Some(e);
            }
        }

        if attempt < max_retries {
            tokio::time::sleep(request.backoff).await;
        }
    }

    Err(last_error.unwrap_or_else(|| GatewayError::History("no attempts made".to_string())))
}
