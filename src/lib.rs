//! # FX Hedge Tracker
//!
//! Lifecycle tracking for recovery hedges opened against losing FX
//! positions, guaranteeing at most one in-flight hedge per (group, symbol).
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `broker`: Broker capability trait and the in-memory paper broker
//! - `tracker`: Hedge lifecycle state machine and broker reconciliation
//! - `strategy`: Recovery hedge execution around the tracker's lock protocol
//! - `scheduler`: Periodic sync, stale cleanup and status summaries

pub mod broker;
pub mod config;
pub mod scheduler;
pub mod strategy;
pub mod tracker;

pub use config::Config;
pub use tracker::HedgeTracker;
