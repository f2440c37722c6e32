//! Hedge record types: keys, statuses, records and statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Identifies the original position a hedge protects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PositionKey {
    /// Trading group that owns the original losing position
    pub group_id: String,
    /// Original instrument being hedged (not the hedge instrument)
    pub symbol: String,
}

impl PositionKey {
    pub fn new(group_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.symbol)
    }
}

/// Hedge lifecycle status.
///
/// `Available` is what an absent record reports; it is never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HedgeStatus {
    #[default]
    Available,
    /// Locked while the hedge order is being placed
    Hedging,
    /// Hedge order confirmed by the broker
    Active,
    /// Needs manual intervention; cleared only by reset
    Error,
}

impl HedgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HedgeStatus::Available => "AVAILABLE",
            HedgeStatus::Hedging => "HEDGING",
            HedgeStatus::Active => "ACTIVE",
            HedgeStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for HedgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof of one specific lock on a key.
///
/// A key can be released and locked again while a hedge order is in flight.
/// Operations taking a token only act on the lock it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: PositionKey,
    pub lock_id: u64,
}

/// A tracked hedge. Existence of a record means the key is not available.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedHedge {
    pub group_id: String,
    pub symbol: String,
    pub status: HedgeStatus,
    /// Unique per lock for the life of the tracker
    pub lock_id: u64,
    pub locked_at: DateTime<Utc>,
    /// Broker ticket of the hedge, set on activation
    pub order_id: Option<String>,
    /// Hedge instrument, set on activation
    pub hedge_symbol: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub last_sync: DateTime<Utc>,
    pub error_reason: Option<String>,
}

impl TrackedHedge {
    /// New record in HEDGING state.
    pub(crate) fn locked(key: &PositionKey, lock_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            group_id: key.group_id.clone(),
            symbol: key.symbol.clone(),
            status: HedgeStatus::Hedging,
            lock_id,
            locked_at: now,
            order_id: None,
            hedge_symbol: None,
            activated_at: None,
            last_sync: now,
            error_reason: None,
        }
    }

    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.group_id.clone(), self.symbol.clone())
    }

    pub(crate) fn holds(&self, token: &LockToken) -> bool {
        self.lock_id == token.lock_id
    }

    /// Time since the lock was taken, relative to `now`.
    pub fn lock_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.locked_at
    }

    /// Latest moment the record changed in a way a broker snapshot must
    /// already reflect.
    pub(crate) fn last_transition(&self) -> DateTime<Utc> {
        self.activated_at.unwrap_or(self.locked_at)
    }
}

/// Running counters. Monotonic for the life of the process.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackerStats {
    pub total_locks: u64,
    pub total_activations: u64,
    pub total_resets: u64,
    pub duplicate_prevented: u64,
    pub total_errors_marked: u64,
    pub sync_operations: u64,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Counters plus a breakdown of the current records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerStatistics {
    #[serde(flatten)]
    pub counters: TrackerStats,
    pub total_tracked_positions: usize,
    pub hedging_positions: usize,
    pub active_positions: usize,
    pub error_positions: usize,
}

/// Outcome of one broker reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    /// Records examined
    pub checked: usize,
    /// Records released because their hedge is gone
    pub reset: usize,
    /// Broker failures encountered
    pub errors: usize,
    pub sync_time: DateTime<Utc>,
}

impl SyncResult {
    pub(crate) fn new(sync_time: DateTime<Utc>) -> Self {
        Self {
            checked: 0,
            reset: 0,
            errors: 0,
            sync_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_and_equality() {
        let key = PositionKey::new("G1", "EURUSD");
        assert_eq!(key.to_string(), "G1:EURUSD");

        // Separator inside a component cannot collide with another key
        let a = PositionKey::new("G:1", "EURUSD");
        let b = PositionKey::new("G", "1:EURUSD");
        assert_eq!(a.to_string(), b.to_string());
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_default_is_available() {
        assert_eq!(HedgeStatus::default(), HedgeStatus::Available);
        assert_eq!(HedgeStatus::Hedging.to_string(), "HEDGING");
    }

    #[test]
    fn test_statistics_flatten_counters() {
        let stats = TrackerStatistics {
            counters: TrackerStats {
                total_locks: 3,
                ..Default::default()
            },
            total_tracked_positions: 1,
            hedging_positions: 1,
            active_positions: 0,
            error_positions: 0,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_locks"], 3);
        assert_eq!(json["hedging_positions"], 1);
    }
}
