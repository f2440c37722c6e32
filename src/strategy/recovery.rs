//! Recovery hedge execution around the tracker's lock protocol.

use crate::broker::{BrokerError, BrokerGateway, OrderRequest, OrderSide};
use crate::config::RecoveryConfig;
use crate::tracker::{HedgeStatus, HedgeTracker, LockToken};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A request to hedge one losing original position.
#[derive(Debug, Clone)]
pub struct HedgeRequest {
    pub group_id: String,
    /// Original losing instrument
    pub symbol: String,
    /// Correlated instrument used as the hedge
    pub hedge_symbol: String,
    pub side: OrderSide,
    /// Lots; falls back to the configured default
    pub volume: Option<Decimal>,
}

/// Result of a hedge attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum HedgeOutcome {
    /// Hedge placed and tracked as ACTIVE.
    Opened { order_id: String },
    /// Position already hedged or in error; nothing was sent.
    Skipped { status: HedgeStatus },
    /// Order was not placed; the lock has been released.
    Failed { reason: String },
}

impl HedgeOutcome {
    pub fn is_opened(&self) -> bool {
        matches!(self, HedgeOutcome::Opened { .. })
    }
}

/// Places and closes recovery hedges, reporting every result back to the
/// tracker.
pub struct RecoveryExecutor {
    broker: Arc<dyn BrokerGateway>,
    tracker: Arc<HedgeTracker>,
    config: RecoveryConfig,
}

impl RecoveryExecutor {
    pub fn new(
        broker: Arc<dyn BrokerGateway>,
        tracker: Arc<HedgeTracker>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            broker,
            tracker,
            config,
        }
    }

    /// Lock the original position, place the hedge and activate it.
    ///
    /// A refused lock returns `Skipped` without touching the broker. Any
    /// placement failure releases the lock so the next cycle can retry, but
    /// only if the key is still held by this call's lock.
    pub async fn open_hedge(&self, request: &HedgeRequest) -> HedgeOutcome {
        let group_id = request.group_id.as_str();
        let symbol = request.symbol.as_str();

        let Some(token) = self.tracker.acquire_lock(group_id, symbol) else {
            let status = self.tracker.get_position_status(group_id, symbol);
            return HedgeOutcome::Skipped { status };
        };

        let volume = request.volume.unwrap_or(self.config.default_volume);
        let order = OrderRequest::market(&request.hedge_symbol, request.side, volume)
            .with_comment(self.order_comment(group_id, symbol));

        info!(
            group = %group_id,
            %symbol,
            hedge_symbol = %request.hedge_symbol,
            side = %request.side,
            %volume,
            "🛡️  Placing recovery hedge"
        );

        let order_id = match self.broker.place_order(order).await {
            Ok(result) if result.success => match result.order_id {
                Some(order_id) => order_id,
                None => {
                    error!(group = %group_id, %symbol, "❌ Broker reported fill without ticket");
                    return self.release(&token, "fill without ticket".to_string());
                }
            },
            Ok(result) => {
                let reason = result
                    .message
                    .unwrap_or_else(|| "order rejected".to_string());
                warn!(group = %group_id, %symbol, %reason, "⚠️  Recovery order rejected");
                return self.release(&token, reason);
            }
            Err(e) => {
                error!(group = %group_id, %symbol, error = %e, "❌ Failed to place recovery order");
                return self.release(&token, e.to_string());
            }
        };

        if self.tracker.activate_locked(&token, &order_id, &request.hedge_symbol) {
            return HedgeOutcome::Opened { order_id };
        }

        // The lock was released while the order was in flight, and possibly
        // taken by another caller. Unwind so the broker holds no untracked
        // hedge.
        error!(
            group = %group_id,
            %symbol,
            %order_id,
            "❌ Lock lost during placement - UNWINDING HEDGE"
        );
        let reason = match self.broker.close_order(&order_id).await {
            Ok(true) => "lock lost during placement; hedge unwound".to_string(),
            Ok(false) => format!("lock lost during placement; close of {order_id} refused"),
            Err(e) => format!("lock lost during placement; close of {order_id} failed: {e}"),
        };
        HedgeOutcome::Failed { reason }
    }

    /// Close the active hedge of a position and release it.
    ///
    /// Returns `Ok(false)` when there is no active hedge to close. A broker
    /// refusal or failure leaves the record in ERROR for manual review.
    pub async fn close_hedge(&self, group_id: &str, symbol: &str) -> Result<bool> {
        let Some(record) = self.tracker.get_position_info(group_id, symbol) else {
            warn!(group = %group_id, %symbol, "No tracked hedge to close");
            return Ok(false);
        };

        let order_id = match (record.status, record.order_id) {
            (HedgeStatus::Active, Some(order_id)) => order_id,
            (status, _) => {
                warn!(group = %group_id, %symbol, %status, "Hedge not active - nothing to close");
                return Ok(false);
            }
        };

        match self.broker.close_order(&order_id).await {
            Ok(true) => {
                info!(group = %group_id, %symbol, %order_id, "📤 Recovery hedge closed");
                self.tracker.reset_position(group_id, symbol);
                Ok(true)
            }
            Ok(false) => {
                self.tracker
                    .mark_error(group_id, symbol, "broker refused to close hedge");
                Ok(false)
            }
            Err(BrokerError::OrderNotFound(_)) => {
                info!(group = %group_id, %symbol, %order_id, "Hedge already closed at broker");
                self.tracker.reset_position(group_id, symbol);
                Ok(true)
            }
            Err(e) => {
                self.tracker.mark_error(group_id, symbol, &e.to_string());
                Err(e).with_context(|| {
                    format!("Failed to close hedge {order_id} for {group_id}:{symbol}")
                })
            }
        }
    }

    fn release(&self, token: &LockToken, reason: String) -> HedgeOutcome {
        if !self.tracker.release_lock(token) {
            warn!(key = %token.key, "Lock already released or taken over - not resetting");
        }
        HedgeOutcome::Failed { reason }
    }

    fn order_comment(&self, group_id: &str, symbol: &str) -> String {
        format!("{}_{}_{}", self.config.comment_prefix, group_id, symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerPosition, MockBrokerGateway, OrderResult, PaperBroker};
    use crate::config::TrackerConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    fn request(group_id: &str, symbol: &str) -> HedgeRequest {
        HedgeRequest {
            group_id: group_id.to_string(),
            symbol: symbol.to_string(),
            hedge_symbol: "EURGBP".to_string(),
            side: OrderSide::Sell,
            volume: Some(dec!(0.02)),
        }
    }

    fn setup(broker: Arc<dyn BrokerGateway>) -> (Arc<HedgeTracker>, RecoveryExecutor) {
        let tracker = Arc::new(HedgeTracker::new(broker.clone(), TrackerConfig::default()));
        let executor = RecoveryExecutor::new(broker, tracker.clone(), RecoveryConfig::default());
        (tracker, executor)
    }

    #[tokio::test]
    async fn test_open_hedge_activates_position() {
        let broker = Arc::new(PaperBroker::with_first_ticket(700));
        let (tracker, executor) = setup(broker.clone());

        let outcome = executor.open_hedge(&request("G1", "EURUSD")).await;

        assert_eq!(
            outcome,
            HedgeOutcome::Opened {
                order_id: "700".to_string()
            }
        );
        assert!(broker.is_open("700").await);
        let info = tracker.get_position_info("G1", "EURUSD").unwrap();
        assert_eq!(info.status, HedgeStatus::Active);
        assert_eq!(info.hedge_symbol.as_deref(), Some("EURGBP"));
    }

    #[tokio::test]
    async fn test_second_hedge_is_skipped() {
        let broker = Arc::new(PaperBroker::new());
        let (tracker, executor) = setup(broker.clone());

        assert!(executor.open_hedge(&request("G1", "EURUSD")).await.is_opened());
        let outcome = executor.open_hedge(&request("G1", "EURUSD")).await;

        assert_eq!(
            outcome,
            HedgeOutcome::Skipped {
                status: HedgeStatus::Active
            }
        );
        assert_eq!(broker.open_position_count().await, 1);
        assert_eq!(tracker.get_statistics().counters.duplicate_prevented, 1);
    }

    #[tokio::test]
    async fn test_rejected_order_releases_lock() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_reject_orders(true);
        let (tracker, executor) = setup(broker.clone());

        let outcome = executor.open_hedge(&request("G1", "EURUSD")).await;

        assert!(matches!(outcome, HedgeOutcome::Failed { .. }));
        assert!(tracker.is_lockable("G1", "EURUSD"));

        broker.set_reject_orders(false);
        assert!(executor.open_hedge(&request("G1", "EURUSD")).await.is_opened());
    }

    #[tokio::test]
    async fn test_broker_error_releases_lock() {
        let mut broker = MockBrokerGateway::new();
        broker
            .expect_place_order()
            .times(1)
            .returning(|_| Err(BrokerError::NotConnected));
        let (tracker, executor) = setup(Arc::new(broker));

        let outcome = executor.open_hedge(&request("G1", "EURUSD")).await;

        assert_eq!(
            outcome,
            HedgeOutcome::Failed {
                reason: "Broker not connected".to_string()
            }
        );
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_order_carries_comment_and_default_volume() {
        let mut broker = MockBrokerGateway::new();
        broker
            .expect_place_order()
            .withf(|order| {
                order.volume == dec!(0.01)
                    && order.comment.as_deref() == Some("HG_G7_AUDUSD")
                    && order.symbol == "EURGBP"
            })
            .times(1)
            .returning(|_| Ok(OrderResult::filled("9001")));
        let (tracker, executor) = setup(Arc::new(broker));

        let mut req = request("G7", "AUDUSD");
        req.volume = None;
        assert!(executor.open_hedge(&req).await.is_opened());
        assert_eq!(tracker.get_position_status("G7", "AUDUSD"), HedgeStatus::Active);
    }

    #[tokio::test]
    async fn test_close_hedge_resets_position() {
        let broker = Arc::new(PaperBroker::new());
        let (tracker, executor) = setup(broker.clone());
        executor.open_hedge(&request("G1", "EURUSD")).await;

        assert!(executor.close_hedge("G1", "EURUSD").await.unwrap());
        assert_eq!(broker.open_position_count().await, 0);
        assert!(tracker.is_lockable("G1", "EURUSD"));
    }

    #[tokio::test]
    async fn test_close_hedge_closed_externally() {
        let broker = Arc::new(PaperBroker::with_first_ticket(10));
        let (tracker, executor) = setup(broker.clone());
        executor.open_hedge(&request("G1", "EURUSD")).await;
        broker.close_externally("10").await;

        assert!(executor.close_hedge("G1", "EURUSD").await.unwrap());
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_close_failure_marks_error() {
        let broker = Arc::new(PaperBroker::new());
        let (tracker, executor) = setup(broker.clone());
        executor.open_hedge(&request("G1", "EURUSD")).await;
        broker.set_connected(false);

        assert!(executor.close_hedge("G1", "EURUSD").await.is_err());
        assert_eq!(tracker.get_position_status("G1", "EURUSD"), HedgeStatus::Error);
        assert!(!tracker.lock_position("G1", "EURUSD"));
    }

    #[tokio::test]
    async fn test_close_without_active_hedge() {
        let broker = Arc::new(PaperBroker::new());
        let (tracker, executor) = setup(broker);
        tracker.lock_position("G1", "EURUSD");

        assert!(!executor.close_hedge("G1", "EURUSD").await.unwrap());
        assert!(!executor.close_hedge("G2", "GBPUSD").await.unwrap());
        assert_eq!(tracker.get_position_status("G1", "EURUSD"), HedgeStatus::Hedging);
    }

    /// Broker whose order placement races another caller: while the order is
    /// in flight the tracker is force-reset and the key is locked again.
    struct RelockingBroker {
        tracker: Mutex<Option<Arc<HedgeTracker>>>,
        fill: bool,
        closed: Mutex<Vec<String>>,
    }

    impl RelockingBroker {
        fn new(fill: bool) -> Arc<Self> {
            Arc::new(Self {
                tracker: Mutex::new(None),
                fill,
                closed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BrokerGateway for RelockingBroker {
        async fn list_open_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
            Ok(Vec::new())
        }

        async fn place_order(&self, order: OrderRequest) -> Result<OrderResult, BrokerError> {
            let tracker = self.tracker.lock().clone().unwrap();
            tracker.force_reset_all();
            let parts: Vec<&str> = order.comment.as_deref().unwrap().split('_').collect();
            assert!(tracker.lock_position(parts[1], parts[2]));

            if self.fill {
                Ok(OrderResult::filled("555"))
            } else {
                Ok(OrderResult::rejected("no margin"))
            }
        }

        async fn close_order(&self, order_id: &str) -> Result<bool, BrokerError> {
            self.closed.lock().push(order_id.to_string());
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_failed_placement_keeps_lock_taken_by_other_caller() {
        let broker = RelockingBroker::new(false);
        let (tracker, executor) = setup(broker.clone());
        *broker.tracker.lock() = Some(tracker.clone());

        let outcome = executor.open_hedge(&request("G1", "EURUSD")).await;

        assert_eq!(
            outcome,
            HedgeOutcome::Failed {
                reason: "no margin".to_string()
            }
        );
        assert_eq!(tracker.get_position_status("G1", "EURUSD"), HedgeStatus::Hedging);
        assert!(!tracker.lock_position("G1", "EURUSD"));
        assert_eq!(tracker.get_statistics().counters.total_resets, 0);
    }

    #[tokio::test]
    async fn test_fill_after_lock_takeover_is_unwound() {
        let broker = RelockingBroker::new(true);
        let (tracker, executor) = setup(broker.clone());
        *broker.tracker.lock() = Some(tracker.clone());

        let outcome = executor.open_hedge(&request("G1", "EURUSD")).await;

        assert!(matches!(outcome, HedgeOutcome::Failed { .. }));
        assert_eq!(*broker.closed.lock(), vec!["555".to_string()]);

        // The other caller's lock is untouched and still awaits its own order
        let info = tracker.get_position_info("G1", "EURUSD").unwrap();
        assert_eq!(info.status, HedgeStatus::Hedging);
        assert!(info.order_id.is_none());
        assert_eq!(tracker.get_statistics().counters.total_activations, 0);
    }
}
