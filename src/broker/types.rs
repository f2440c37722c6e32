//! Type definitions shared by broker gateway implementations.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a position or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that offsets this one.
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open position as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    /// Broker ticket; this is the order id the tracker records on activation
    pub ticket: String,
    pub symbol: String,
    /// Floating profit in account currency
    pub profit: Decimal,
    /// Size in lots
    pub volume: Decimal,
    #[serde(rename = "type")]
    pub side: OrderSide,
}

/// A market order submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub volume: Decimal,
    pub comment: Option<String>,
}

impl OrderRequest {
    /// Create a market order request without a comment.
    pub fn market(symbol: impl Into<String>, side: OrderSide, volume: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            volume,
            comment: None,
        }
    }

    /// Attach a broker-side comment to the order.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Outcome of an order submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    /// Ticket of the opened position, present when `success` is true
    pub order_id: Option<String>,
    /// Broker message, usually the rejection reason
    pub message: Option<String>,
}

impl OrderResult {
    pub fn filled(order_id: impl Into<String>) -> Self {
        Self {
            success: true,
            order_id: Some(order_id.into()),
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_position_serializes_side_as_type() {
        let position = BrokerPosition {
            ticket: "555".to_string(),
            symbol: "EURGBP".to_string(),
            profit: dec!(-12.5),
            volume: dec!(0.10),
            side: OrderSide::Sell,
        };

        let json = serde_json::to_value(&position).unwrap();
        assert_eq!(json["type"], "SELL");
        assert_eq!(json["ticket"], "555");
    }

    #[test]
    fn test_order_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.to_string(), "SELL");
    }
}
