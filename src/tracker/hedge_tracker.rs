//! Hedge lifecycle tracking with duplicate prevention.
//!
//! Lifecycle per (group, symbol): AVAILABLE → HEDGING → ACTIVE → AVAILABLE.
//! - Lock the key before placing a hedge order so a concurrent caller cannot
//!   place a second one
//! - Activate it once the broker confirms the order
//! - Release it when the hedge closes, either explicitly or when broker
//!   reconciliation no longer finds the ticket
//!
//! Locks that never get activated are released by the stale sweep.

use super::record::{
    HedgeStatus, LockToken, PositionKey, SyncResult, TrackedHedge, TrackerStatistics,
    TrackerStats,
};
use crate::broker::{BrokerError, BrokerGateway, BrokerPosition};
use crate::config::{EmptySnapshotPolicy, TrackerConfig};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Records and counters, always mutated together under one lock.
#[derive(Debug, Default)]
struct TrackerState {
    positions: HashMap<PositionKey, TrackedHedge>,
    stats: TrackerStats,
    last_lock_id: u64,
}

impl TrackerState {
    /// Delete a record, counting the reset if one existed.
    fn release(&mut self, key: &PositionKey) -> Option<TrackedHedge> {
        let removed = self.positions.remove(key);
        if removed.is_some() {
            self.stats.total_resets += 1;
        }
        removed
    }

    fn count_status(&self, status: HedgeStatus) -> usize {
        self.positions
            .values()
            .filter(|record| record.status == status)
            .count()
    }

    fn statistics(&self) -> TrackerStatistics {
        TrackerStatistics {
            counters: self.stats.clone(),
            total_tracked_positions: self.positions.len(),
            hedging_positions: self.count_status(HedgeStatus::Hedging),
            active_positions: self.count_status(HedgeStatus::Active),
            error_positions: self.count_status(HedgeStatus::Error),
        }
    }

    /// Copies of records in `status`, ordered by key.
    fn records_in(&self, status: HedgeStatus) -> Vec<TrackedHedge> {
        let mut records: Vec<TrackedHedge> = self
            .positions
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| (&a.group_id, &a.symbol).cmp(&(&b.group_id, &b.symbol)));
        records
    }
}

/// Single source of truth for hedge state per [`PositionKey`].
///
/// All methods are safe to call from many threads. Every check-and-set runs
/// under one mutex, and readers get copies, never references into the map.
/// The lock is not held while waiting on the broker.
pub struct HedgeTracker {
    broker: Arc<dyn BrokerGateway>,
    config: TrackerConfig,
    state: Mutex<TrackerState>,
}

impl HedgeTracker {
    /// Create a tracker that reconciles against `broker`.
    pub fn new(broker: Arc<dyn BrokerGateway>, config: TrackerConfig) -> Self {
        info!(
            stale_lock_hours = config.stale_lock_hours,
            empty_snapshot_policy = ?config.empty_snapshot_policy,
            "🚀 Hedge tracker initialized"
        );

        Self {
            broker,
            config,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Claim a position before placing its hedge order.
    ///
    /// Returns `false` if the position already has a record in any state.
    /// Only HEDGING and ACTIVE rejections count as prevented duplicates; an
    /// ERROR record must be reset explicitly before the key can be reused.
    pub fn lock_position(&self, group_id: &str, symbol: &str) -> bool {
        self.acquire_lock(group_id, symbol).is_some()
    }

    /// [`lock_position`](Self::lock_position), returning a token for the new
    /// lock. Callers that may later release or activate the lock should hold
    /// the token, since the key can change hands while an order is in flight.
    pub fn acquire_lock(&self, group_id: &str, symbol: &str) -> Option<LockToken> {
        let key = PositionKey::new(group_id, symbol);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(existing) = state.positions.get(&key) {
            match existing.status {
                HedgeStatus::Hedging => {
                    state.stats.duplicate_prevented += 1;
                    warn!(%key, "🚫 Position already being hedged - preventing duplicate");
                }
                HedgeStatus::Active => {
                    state.stats.duplicate_prevented += 1;
                    warn!(
                        %key,
                        order_id = ?existing.order_id,
                        "🚫 Position already has active hedge - preventing duplicate"
                    );
                }
                HedgeStatus::Error | HedgeStatus::Available => {
                    warn!(
                        %key,
                        status = %existing.status,
                        reason = ?existing.error_reason,
                        "🚫 Position in error state - reset required before hedging"
                    );
                }
            }
            return None;
        }

        state.last_lock_id += 1;
        let lock_id = state.last_lock_id;
        state
            .positions
            .insert(key.clone(), TrackedHedge::locked(&key, lock_id, Utc::now()));
        state.stats.total_locks += 1;

        info!(%key, lock_id, "🔒 Position locked");
        Some(LockToken { key, lock_id })
    }

    /// Record the broker-confirmed hedge for a locked position.
    ///
    /// Requires the record to be in exactly HEDGING state.
    pub fn activate_position(
        &self,
        group_id: &str,
        symbol: &str,
        order_id: &str,
        hedge_symbol: &str,
    ) -> bool {
        let key = PositionKey::new(group_id, symbol);
        self.activate(&key, None, order_id, hedge_symbol)
    }

    /// [`activate_position`](Self::activate_position) for the lock `token`
    /// was issued for. Fails if the key has since been released or locked
    /// again by another caller.
    pub fn activate_locked(&self, token: &LockToken, order_id: &str, hedge_symbol: &str) -> bool {
        self.activate(&token.key, Some(token), order_id, hedge_symbol)
    }

    fn activate(
        &self,
        key: &PositionKey,
        token: Option<&LockToken>,
        order_id: &str,
        hedge_symbol: &str,
    ) -> bool {
        if order_id.is_empty() || hedge_symbol.is_empty() {
            error!(
                %key,
                %order_id,
                %hedge_symbol,
                "❌ Cannot activate position - order id and hedge symbol are required"
            );
            return false;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(record) = state.positions.get_mut(key) else {
            error!(%key, "❌ Cannot activate position - not found in tracker");
            return false;
        };

        if token.is_some_and(|token| !record.holds(token)) {
            error!(
                %key,
                current_lock = record.lock_id,
                "❌ Cannot activate position - locked by another caller"
            );
            return false;
        }

        if record.status != HedgeStatus::Hedging {
            error!(
                %key,
                attempted = %HedgeStatus::Active,
                current = %record.status,
                "❌ Cannot activate position - not in HEDGING state"
            );
            return false;
        }

        let now = Utc::now();
        record.status = HedgeStatus::Active;
        record.order_id = Some(order_id.to_string());
        record.hedge_symbol = Some(hedge_symbol.to_string());
        record.activated_at = Some(now);
        record.last_sync = now;
        state.stats.total_activations += 1;

        info!(%key, %hedge_symbol, %order_id, "✅ Position activated");
        true
    }

    /// Return a position to AVAILABLE. Always succeeds; resetting an
    /// untracked key changes nothing.
    pub fn reset_position(&self, group_id: &str, symbol: &str) -> bool {
        let key = PositionKey::new(group_id, symbol);
        let mut state = self.state.lock();

        match state.release(&key) {
            Some(previous) => {
                debug!(
                    %key,
                    was = %previous.status,
                    hedge_symbol = ?previous.hedge_symbol,
                    "🔄 Position reset"
                );
            }
            None => {
                debug!(%key, "Position not tracked - already available");
            }
        }
        true
    }

    /// Release the lock `token` was issued for, if the record still holds it
    /// and is still HEDGING. Returns whether a record was deleted.
    pub fn release_lock(&self, token: &LockToken) -> bool {
        let mut state = self.state.lock();

        let owned = state
            .positions
            .get(&token.key)
            .is_some_and(|record| record.holds(token) && record.status == HedgeStatus::Hedging);

        if !owned {
            debug!(
                key = %token.key,
                lock_id = token.lock_id,
                "Lock no longer held - leaving record untouched"
            );
            return false;
        }

        state.release(&token.key);
        debug!(key = %token.key, lock_id = token.lock_id, "🔓 Lock released");
        true
    }

    /// Flag a locked or active hedge as needing manual intervention.
    ///
    /// Returns `false` if the key is untracked or already in ERROR.
    pub fn mark_error(&self, group_id: &str, symbol: &str, reason: &str) -> bool {
        let key = PositionKey::new(group_id, symbol);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(record) = state.positions.get_mut(&key) else {
            warn!(%key, %reason, "Cannot mark error - position not tracked");
            return false;
        };

        if record.status == HedgeStatus::Error {
            return false;
        }

        let previous = record.status;
        record.status = HedgeStatus::Error;
        record.error_reason = Some(reason.to_string());
        state.stats.total_errors_marked += 1;

        error!(%key, was = %previous, %reason, "🛑 Position marked as ERROR");
        true
    }

    /// Whether the position has no in-flight hedge.
    ///
    /// ERROR records report as available for inspection, but
    /// [`lock_position`](Self::lock_position) still refuses them; use
    /// [`is_lockable`](Self::is_lockable) to predict a lock attempt.
    pub fn is_position_available(&self, group_id: &str, symbol: &str) -> bool {
        let key = PositionKey::new(group_id, symbol);
        let state = self.state.lock();

        match state.positions.get(&key) {
            None => true,
            Some(record) => record.status == HedgeStatus::Error,
        }
    }

    /// Whether `lock_position` would currently succeed for this key.
    pub fn is_lockable(&self, group_id: &str, symbol: &str) -> bool {
        let key = PositionKey::new(group_id, symbol);
        !self.state.lock().positions.contains_key(&key)
    }

    /// Current status; `Available` when untracked.
    pub fn get_position_status(&self, group_id: &str, symbol: &str) -> HedgeStatus {
        let key = PositionKey::new(group_id, symbol);
        self.state
            .lock()
            .positions
            .get(&key)
            .map(|record| record.status)
            .unwrap_or_default()
    }

    /// Snapshot of the record for a position, if tracked.
    pub fn get_position_info(&self, group_id: &str, symbol: &str) -> Option<TrackedHedge> {
        let key = PositionKey::new(group_id, symbol);
        self.state.lock().positions.get(&key).cloned()
    }

    /// Snapshot of every tracked record, ordered by key.
    pub fn get_all_positions(&self) -> Vec<TrackedHedge> {
        let state = self.state.lock();
        let mut records: Vec<TrackedHedge> = state.positions.values().cloned().collect();
        records.sort_by(|a, b| (&a.group_id, &a.symbol).cmp(&(&b.group_id, &b.symbol)));
        records
    }

    /// Snapshot of records in `status`. `Available` always yields nothing.
    pub fn get_positions_by_status(&self, status: HedgeStatus) -> Vec<TrackedHedge> {
        self.state.lock().records_in(status)
    }

    /// Number of tracked records (HEDGING, ACTIVE or ERROR).
    pub fn tracked_count(&self) -> usize {
        self.state.lock().positions.len()
    }

    /// Reconcile tracked hedges against the broker's open positions.
    ///
    /// Records whose ticket no longer appears in the broker snapshot are
    /// released. Records without a ticket are left to the stale sweep.
    /// Broker failures are counted in [`SyncResult::errors`] and leave all
    /// records untouched.
    pub async fn sync_with_broker(&self) -> SyncResult {
        let snapshot_requested = Utc::now();

        match self.query_broker().await {
            Ok(snapshot) => self.reconcile(&snapshot, snapshot_requested),
            Err(e) => {
                error!(error = %e, "❌ Error during broker sync");
                let mut result = SyncResult::new(snapshot_requested);
                result.errors += 1;
                result
            }
        }
    }

    async fn query_broker(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let timeout = self.config.sync_timeout();
        match tokio::time::timeout(timeout, self.broker.list_open_positions()).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(timeout.as_secs())),
        }
    }

    /// Apply a broker snapshot requested at `snapshot_requested`. Records
    /// that changed after that moment are counted but left alone.
    fn reconcile(
        &self,
        snapshot: &[BrokerPosition],
        snapshot_requested: DateTime<Utc>,
    ) -> SyncResult {
        let mut state = self.state.lock();
        let now = Utc::now();
        let mut result = SyncResult::new(now);

        if snapshot.is_empty() && !state.positions.is_empty() {
            self.apply_empty_snapshot(&mut state, snapshot_requested, &mut result);
        } else {
            Self::apply_snapshot(&mut state, snapshot, snapshot_requested, now, &mut result);
        }

        state.stats.sync_operations += 1;
        state.stats.last_sync = Some(now);

        if result.reset > 0 {
            info!(
                checked = result.checked,
                reset = result.reset,
                "🔄 Sync completed"
            );
        }

        result
    }

    fn apply_empty_snapshot(
        &self,
        state: &mut TrackerState,
        snapshot_requested: DateTime<Utc>,
        result: &mut SyncResult,
    ) {
        result.checked = state.positions.len();

        match self.config.empty_snapshot_policy {
            EmptySnapshotPolicy::Ignore => {
                warn!(
                    tracked = state.positions.len(),
                    "⚠️  Broker returned no positions - keeping tracked hedges (policy: ignore)"
                );
            }
            EmptySnapshotPolicy::ResetAll => {
                warn!(
                    tracked = state.positions.len(),
                    "⚠️  Broker returned no positions - releasing tracked hedges"
                );
                let keys: Vec<PositionKey> = state
                    .positions
                    .iter()
                    .filter(|(_, record)| record.last_transition() <= snapshot_requested)
                    .map(|(key, _)| key.clone())
                    .collect();

                for key in keys {
                    if state.release(&key).is_some() {
                        debug!(%key, "🔄 Position released by empty broker snapshot");
                        result.reset += 1;
                    }
                }
            }
        }
    }

    fn apply_snapshot(
        state: &mut TrackerState,
        snapshot: &[BrokerPosition],
        snapshot_requested: DateTime<Utc>,
        now: DateTime<Utc>,
        result: &mut SyncResult,
    ) {
        let open_tickets: HashSet<&str> = snapshot
            .iter()
            .map(|position| position.ticket.as_str())
            .filter(|ticket| !ticket.is_empty())
            .collect();

        let mut closed = Vec::new();
        for (key, record) in state.positions.iter_mut() {
            result.checked += 1;

            let Some(order_id) = record.order_id.as_deref() else {
                continue;
            };

            if open_tickets.contains(order_id) {
                record.last_sync = now;
                debug!(%key, %order_id, "✅ Hedge still open at broker");
            } else if record.last_transition() > snapshot_requested {
                // Activated after the snapshot was requested; next sync decides.
                debug!(%key, %order_id, "Hedge newer than broker snapshot - skipping");
            } else {
                debug!(%key, %order_id, "🔄 Hedge no longer open at broker - will reset");
                closed.push(key.clone());
            }
        }

        for key in closed {
            if state.release(&key).is_some() {
                result.reset += 1;
            }
        }
    }

    /// Release HEDGING locks older than `max_age`. Returns how many were
    /// released. ACTIVE and ERROR records are never touched.
    pub fn cleanup_stale_positions(&self, max_age: Duration) -> usize {
        self.cleanup_stale_positions_at(max_age, Utc::now())
    }

    /// Release HEDGING locks older than the configured stale age.
    pub fn cleanup_stale_positions_default(&self) -> usize {
        self.cleanup_stale_positions(self.config.stale_lock_age())
    }

    /// [`cleanup_stale_positions`](Self::cleanup_stale_positions) evaluated
    /// as of `now`.
    pub fn cleanup_stale_positions_at(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();

        let stale: Vec<PositionKey> = state
            .positions
            .iter()
            .filter(|(_, record)| {
                record.status == HedgeStatus::Hedging && record.lock_age(now) > max_age
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            warn!(%key, max_age_hours = max_age.num_hours(), "🧹 Cleaning up stale position");
            state.release(key);
        }

        if !stale.is_empty() {
            info!(count = stale.len(), "🧹 Cleaned up stale positions");
        }
        stale.len()
    }

    /// Drop every record. Emergency recovery only.
    pub fn force_reset_all(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.positions.len();
        warn!(count, "🚨 FORCE RESET: clearing all tracked positions");
        state.positions.clear();
        count
    }

    /// Counters plus current per-status breakdown.
    pub fn get_statistics(&self) -> TrackerStatistics {
        self.state.lock().statistics()
    }

    /// Log a summary of tracker state (call periodically for monitoring).
    pub fn log_status_summary(&self) {
        let (stats, active, errored) = {
            let state = self.state.lock();
            (
                state.statistics(),
                state.records_in(HedgeStatus::Active),
                state.records_in(HedgeStatus::Error),
            )
        };

        info!(
            tracked = stats.total_tracked_positions,
            active = stats.active_positions,
            hedging = stats.hedging_positions,
            errors = stats.error_positions,
            duplicates_prevented = stats.counters.duplicate_prevented,
            last_sync = ?stats.counters.last_sync,
            "📊 Hedge tracker status summary"
        );
        debug!(
            target: "hedge_stats",
            "HEDGE_STATS: {}",
            serde_json::to_string(&stats).unwrap_or_default()
        );

        for record in active {
            info!(
                key = %record.key(),
                hedge_symbol = ?record.hedge_symbol,
                order_id = ?record.order_id,
                since = ?record.activated_at,
                "   Active hedge"
            );
        }

        for record in errored {
            warn!(
                key = %record.key(),
                reason = ?record.error_reason,
                "   Hedge in error state"
            );
        }
    }
}

impl fmt::Display for HedgeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.get_statistics();
        write!(
            f,
            "HedgeTracker(positions={}, active={}, duplicates_prevented={})",
            stats.total_tracked_positions,
            stats.active_positions,
            stats.counters.duplicate_prevented
        )
    }
}
