//! Broker capability surface consumed by the hedge tracker and the
//! recovery strategy.
//!
//! Implementations wrap a concrete terminal or API (or the in-memory
//! [`PaperBroker`](super::PaperBroker)). Timeouts and reconnects belong to
//! the implementation; callers only see [`BrokerError`].

use super::types::{BrokerPosition, OrderRequest, OrderResult};
use async_trait::async_trait;
use thiserror::Error;

/// Errors a broker gateway can report.
///
/// An empty `Ok(vec![])` from [`BrokerGateway::list_open_positions`] means the
/// broker has no open positions. Any failure to obtain the list must be an
/// `Err`, never an empty list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Terminal not connected or session expired
    #[error("Broker not connected")]
    NotConnected,

    /// Request reached the broker and was refused
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Ticket unknown to the broker
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Request did not complete in time
    #[error("Broker request timed out after {0}s")]
    Timeout(u64),

    #[error("Broker error: {0}")]
    Other(String),
}

/// Trading capability of a broker connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Full snapshot of currently open positions.
    async fn list_open_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Submit a market order.
    async fn place_order(&self, request: OrderRequest) -> Result<OrderResult, BrokerError>;

    /// Close the position opened by `order_id`. Returns `false` if the broker
    /// refused to close it.
    async fn close_order(&self, order_id: &str) -> Result<bool, BrokerError>;
}
