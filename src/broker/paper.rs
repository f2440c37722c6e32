//! In-memory broker for paper trading and tests.

use super::gateway::{BrokerError, BrokerGateway};
use super::types::{BrokerPosition, OrderRequest, OrderResult, OrderSide};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Simulated broker state.
#[derive(Debug, Default)]
pub struct PaperBrokerState {
    /// Open positions keyed by ticket
    pub positions: BTreeMap<String, BrokerPosition>,
    pub orders_placed: u64,
    pub orders_closed: u64,
}

/// Paper broker implementing [`BrokerGateway`] without touching a market.
///
/// Tickets are numbered from `first_ticket` upwards. Failure switches let
/// tests and dry runs exercise the tracker's error paths.
pub struct PaperBroker {
    state: Arc<RwLock<PaperBrokerState>>,
    ticket_counter: AtomicU64,
    connected: AtomicBool,
    fail_next_query: AtomicBool,
    reject_orders: AtomicBool,
}

impl PaperBroker {
    /// Create a connected paper broker with no positions.
    pub fn new() -> Self {
        Self::with_first_ticket(100_000)
    }

    /// Create a paper broker whose first ticket is `first_ticket`.
    pub fn with_first_ticket(first_ticket: u64) -> Self {
        Self {
            state: Arc::new(RwLock::new(PaperBrokerState::default())),
            ticket_counter: AtomicU64::new(first_ticket),
            connected: AtomicBool::new(true),
            fail_next_query: AtomicBool::new(false),
            reject_orders: AtomicBool::new(false),
        }
    }

    /// Open a position directly, bypassing order checks. Returns its ticket.
    pub async fn open_position(&self, symbol: &str, side: OrderSide, volume: Decimal) -> String {
        let ticket = self.next_ticket();
        let position = BrokerPosition {
            ticket: ticket.clone(),
            symbol: symbol.to_string(),
            profit: Decimal::ZERO,
            volume,
            side,
        };
        self.state.write().await.positions.insert(ticket.clone(), position);
        ticket
    }

    /// Remove a position as if it was closed outside the bot (stop loss,
    /// manual close). Returns `true` if the ticket was open.
    pub async fn close_externally(&self, ticket: &str) -> bool {
        let removed = self.state.write().await.positions.remove(ticket).is_some();
        if removed {
            info!(%ticket, "📤 [PAPER] Position closed externally");
        }
        removed
    }

    /// Set the floating profit of an open position.
    pub async fn set_profit(&self, ticket: &str, profit: Decimal) {
        if let Some(position) = self.state.write().await.positions.get_mut(ticket) {
            position.profit = profit;
        }
    }

    /// Simulate a terminal disconnect (all calls fail until reconnected).
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make the next `list_open_positions` call fail once.
    pub fn fail_next_query(&self) {
        self.fail_next_query.store(true, Ordering::SeqCst);
    }

    /// Reject every order submission while set.
    pub fn set_reject_orders(&self, reject: bool) {
        self.reject_orders.store(reject, Ordering::SeqCst);
    }

    pub async fn open_position_count(&self) -> usize {
        self.state.read().await.positions.len()
    }

    pub async fn is_open(&self, ticket: &str) -> bool {
        self.state.read().await.positions.contains_key(ticket)
    }

    /// Counters of placed and closed orders.
    pub async fn order_counts(&self) -> (u64, u64) {
        let state = self.state.read().await;
        (state.orders_placed, state.orders_closed)
    }

    fn next_ticket(&self) -> String {
        self.ticket_counter.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerGateway for PaperBroker {
    async fn list_open_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.ensure_connected()?;

        if self.fail_next_query.swap(false, Ordering::SeqCst) {
            warn!("⚠️  [PAPER] Injected position query failure");
            return Err(BrokerError::Other("injected query failure".to_string()));
        }

        let state = self.state.read().await;
        Ok(state.positions.values().cloned().collect())
    }

    async fn place_order(&self, request: OrderRequest) -> Result<OrderResult, BrokerError> {
        self.ensure_connected()?;

        if request.volume <= Decimal::ZERO {
            return Ok(OrderResult::rejected(format!(
                "invalid volume {}",
                request.volume
            )));
        }

        if self.reject_orders.load(Ordering::SeqCst) {
            warn!(symbol = %request.symbol, "⚠️  [PAPER] Order rejected by switch");
            return Ok(OrderResult::rejected("orders disabled"));
        }

        let ticket = self.open_position(&request.symbol, request.side, request.volume).await;
        self.state.write().await.orders_placed += 1;

        debug!(
            %ticket,
            symbol = %request.symbol,
            side = %request.side,
            volume = %request.volume,
            comment = ?request.comment,
            "[PAPER] Order filled"
        );

        Ok(OrderResult::filled(ticket))
    }

    async fn close_order(&self, order_id: &str) -> Result<bool, BrokerError> {
        self.ensure_connected()?;

        let mut state = self.state.write().await;
        if state.positions.remove(order_id).is_none() {
            return Err(BrokerError::OrderNotFound(order_id.to_string()));
        }
        state.orders_closed += 1;

        debug!(%order_id, "[PAPER] Position closed");
        Ok(true)
    }
}
