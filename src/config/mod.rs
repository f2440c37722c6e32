//! Configuration management for the hedge tracker.
//!
//! Loads settings from an optional `config` file and `FXH__`-prefixed
//! environment variables (e.g. `FXH__TRACKER__STALE_LOCK_HOURS=12`).

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Hedge lifecycle tracker settings
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Periodic maintenance intervals
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Recovery order parameters
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Paper broker bootstrap
    #[serde(default)]
    pub paper: PaperConfig,
}

/// What reconciliation does when the broker reports no open positions while
/// hedges are still tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptySnapshotPolicy {
    /// Treat the empty list as authoritative and release every tracked record
    ResetAll,
    /// Treat the empty list as inconclusive and leave records untouched
    Ignore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Hours a HEDGING lock may be held before cleanup releases it
    #[serde(default = "default_stale_lock_hours")]
    pub stale_lock_hours: u32,
    /// Empty broker snapshot handling during sync
    #[serde(default = "default_empty_snapshot_policy")]
    pub empty_snapshot_policy: EmptySnapshotPolicy,
    /// Upper bound on the broker position query during sync
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,
}

impl TrackerConfig {
    pub fn stale_lock_age(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.stale_lock_hours))
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between broker reconciliations
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Seconds between stale lock sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Seconds between status summaries
    #[serde(default = "default_summary_interval")]
    pub summary_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Hedge size in lots when the request does not specify one
    #[serde(default = "default_volume")]
    pub default_volume: Decimal,
    /// Prefix of the broker comment attached to hedge orders
    #[serde(default = "default_comment_prefix")]
    pub comment_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Symbols opened as losing originals when paper mode starts
    #[serde(default = "default_seed_symbols")]
    pub seed_symbols: Vec<String>,
    /// Hedge instrument used for each seeded original
    #[serde(default = "default_hedge_symbol")]
    pub hedge_symbol: String,
}

// Default value functions
fn default_stale_lock_hours() -> u32 {
    24
}

fn default_empty_snapshot_policy() -> EmptySnapshotPolicy {
    EmptySnapshotPolicy::ResetAll
}

fn default_sync_timeout() -> u64 {
    10
}

fn default_sync_interval() -> u64 {
    5
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_summary_interval() -> u64 {
    60
}

fn default_volume() -> Decimal {
    Decimal::new(1, 2) // 0.01 lots
}

fn default_comment_prefix() -> String {
    "HG".to_string()
}

fn default_seed_symbols() -> Vec<String> {
    vec!["EURUSD".to_string(), "GBPUSD".to_string()]
}

fn default_hedge_symbol() -> String {
    "EURGBP".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("FXH"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.tracker.stale_lock_hours > 0,
            "stale_lock_hours must be at least 1"
        );

        anyhow::ensure!(
            self.tracker.sync_timeout_secs > 0,
            "sync_timeout_secs must be positive"
        );

        anyhow::ensure!(
            self.scheduler.sync_interval_secs > 0
                && self.scheduler.cleanup_interval_secs > 0
                && self.scheduler.summary_interval_secs > 0,
            "scheduler intervals must be positive"
        );

        anyhow::ensure!(
            self.recovery.default_volume > Decimal::ZERO,
            "default_volume must be positive"
        );

        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            stale_lock_hours: default_stale_lock_hours(),
            empty_snapshot_policy: default_empty_snapshot_policy(),
            sync_timeout_secs: default_sync_timeout(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
            summary_interval_secs: default_summary_interval(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            comment_prefix: default_comment_prefix(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            seed_symbols: default_seed_symbols(),
            hedge_symbol: default_hedge_symbol(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tracker.stale_lock_age(), chrono::Duration::hours(24));
        assert_eq!(
            config.tracker.empty_snapshot_policy,
            EmptySnapshotPolicy::ResetAll
        );
    }

    #[test]
    fn test_zero_stale_hours_rejected() {
        let mut config = Config::default();
        config.tracker.stale_lock_hours = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_deserializes_snake_case() {
        let tracker: TrackerConfig =
            serde_json::from_str(r#"{"empty_snapshot_policy": "ignore"}"#).unwrap();
        assert_eq!(tracker.empty_snapshot_policy, EmptySnapshotPolicy::Ignore);
        assert_eq!(tracker.stale_lock_hours, 24);
    }

    #[test]
    fn test_paper_section_fields() {
        let paper: PaperConfig = serde_json::from_str(r#"{"hedge_symbol": "USDCHF"}"#).unwrap();
        assert_eq!(paper.seed_symbols, vec!["EURUSD", "GBPUSD"]);
        assert_eq!(paper.hedge_symbol, "USDCHF");
        assert_eq!(Config::default().paper.hedge_symbol, "EURGBP");
    }
}
