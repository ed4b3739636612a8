//! Capability interface for a brokerage order-routing session.
//!
//! The engine consumes this trait; adapters translate their wire protocol
//! into these calls and into [`GatewayEvent`](super::GatewayEvent)s posted
//! on the engine's inbound channel.

use super::types::*;
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a gateway session.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway session is not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Instrument qualification failed for {symbol}: {reason}")]
    Qualification { symbol: String, reason: String },

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Unknown order id {0}")]
    UnknownOrder(u64),

    #[error("Order {0} is no longer open")]
    OrderNotOpen(u64),

    #[error("Subscription failed for {symbol}: {reason}")]
    Subscription { symbol: String, reason: String },

    #[error("Historical data request failed: {0}")]
    History(String),

    #[error("Order query failed: {0}")]
    Query(String),
}

/// A brokerage session the engine can trade through.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn connect(&self) -> Result<(), GatewayError>;

    async fn disconnect(&self) -> Result<(), GatewayError>;

    fn is_connected(&self) -> bool;

    /// Resolve a symbol into a tradable instrument.
    async fn qualify(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        exchange: &str,
    ) -> Result<Instrument, GatewayError>;

    /// Submit entry, take-profit and stop-loss as one linked group.
    ///
    /// Returns one handle per accepted leg. Callers must treat anything
    /// other than three handles as a failed placement.
    async fn submit_bracket(
        &self,
        instrument: &Instrument,
        request: &BracketRequest,
    ) -> Result<Vec<OrderHandle>, GatewayError>;

    async fn cancel(&self, order_id: u64) -> Result<(), GatewayError>;

    /// Authoritative list of every order known to the session.
    async fn list_orders(&self) -> Result<Vec<GatewayOrder>, GatewayError>;

    async fn subscribe_ticks(&self, instrument: &Instrument) -> Result<(), GatewayError>;

    async fn unsubscribe_ticks(&self, symbol: &str) -> Result<(), GatewayError>;

    async fn subscribe_bars(
        &self,
        instrument: &Instrument,
        timeframe: &str,
    ) -> Result<(), GatewayError>;

    async fn historical_bars(
        &self,
        instrument: &Instrument,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<Bar>, GatewayError>;
}
