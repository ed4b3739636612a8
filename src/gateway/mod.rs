//! Brokerage gateway capability and adapters.
//!
//! ## Capability
//! The engine talks to a brokerage session only through [`Gateway`]:
//! - Instrument qualification
//! - Bracket submission and cancellation
//! - Authoritative order listing
//! - Tick, bar and historical data subscriptions
//!
//! ## Events
//! Adapters translate raw callbacks into [`GatewayEvent`]s on a single
//! inbound channel per engine instance.
//!
//! ## Paper
//! [`PaperGateway`] simulates a session in memory for paper trading and tests.

mod events;
pub mod paper;
mod traits;
mod types;

pub use events::*;
pub use paper::{PaperFaults, PaperGateway};
pub use traits::{Gateway, GatewayError};
pub use types::*;
