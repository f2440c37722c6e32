//! Hedge position lifecycle tracking.
//!
//! Guarantees at most one in-flight hedge per (group, symbol):
//! - Atomic lock before order placement
//! - Activation once the broker confirms the hedge
//! - Reconciliation against the broker's open positions
//! - Stale lock cleanup and emergency reset

mod hedge_tracker;
mod record;

pub use hedge_tracker::HedgeTracker;
pub use record::{
    HedgeStatus, LockToken, PositionKey, SyncResult, TrackedHedge, TrackerStatistics,
    TrackerStats,
};
