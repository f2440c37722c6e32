//! Broker integration.
//!
//! - `gateway`: the [`BrokerGateway`] capability trait and [`BrokerError`]
//! - `paper`: in-memory [`PaperBroker`] for paper trading and tests
//! - `types`: positions, order requests and results

mod gateway;
pub mod paper;
mod types;

#[cfg(test)]
pub use gateway::MockBrokerGateway;
pub use gateway::{BrokerError, BrokerGateway};
pub use paper::PaperBroker;
pub use types::*;
