//! Hedging strategy components.
//!
//! - Recovery execution: lock, place, activate and close hedges

mod recovery;

pub use recovery::{HedgeOutcome, HedgeRequest, RecoveryExecutor};
