//! Periodic maintenance of the hedge tracker.
//!
//! The tracker runs no tasks of its own. [`HedgeMonitor`] is the external
//! driver: broker reconciliation, stale lock sweeps and status summaries on
//! independent intervals until shutdown.

use crate::config::SchedulerConfig;
use crate::tracker::{HedgeTracker, SyncResult};
use chrono::Duration as ChronoDuration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Totals accumulated by a monitor run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorReport {
    pub sync_cycles: u64,
    pub sync_errors: u64,
    pub hedges_released: u64,
    pub stale_released: u64,
}

impl MonitorReport {
    fn record_sync(&mut self, result: &SyncResult) {
        self.sync_cycles += 1;
        self.sync_errors += result.errors as u64;
        self.hedges_released += result.reset as u64;
    }
}

/// Drives tracker maintenance on fixed intervals.
pub struct HedgeMonitor {
    tracker: Arc<HedgeTracker>,
    config: SchedulerConfig,
    stale_after: ChronoDuration,
    shutdown: Arc<AtomicBool>,
}

impl HedgeMonitor {
    pub fn new(
        tracker: Arc<HedgeTracker>,
        config: SchedulerConfig,
        stale_after: ChronoDuration,
    ) -> Self {
        Self {
            tracker,
            config,
            stale_after,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops [`run`](Self::run) after the current tick.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until shutdown, or until `max_sync_cycles` reconciliations when
    /// given.
    pub async fn run(&self, max_sync_cycles: Option<u64>) -> MonitorReport {
        let mut report = MonitorReport::default();

        let mut sync_tick = interval(Duration::from_secs(self.config.sync_interval_secs));
        let mut cleanup_tick = interval(Duration::from_secs(self.config.cleanup_interval_secs));
        let mut summary_tick = interval(Duration::from_secs(self.config.summary_interval_secs));
        for tick in [&mut sync_tick, &mut cleanup_tick, &mut summary_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        info!(
            sync_secs = self.config.sync_interval_secs,
            cleanup_secs = self.config.cleanup_interval_secs,
            summary_secs = self.config.summary_interval_secs,
            "🚀 Starting hedge monitor loop"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            tokio::select! {
                _ = sync_tick.tick() => {
                    let result = self.tracker.sync_with_broker().await;
                    report.record_sync(&result);
                    if result.errors > 0 {
                        warn!(errors = result.errors, "⚠️  [SYNC] Broker reconciliation failed");
                    } else {
                        debug!(checked = result.checked, reset = result.reset, "[SYNC] Cycle complete");
                    }

                    if max_sync_cycles.is_some_and(|max| report.sync_cycles >= max) {
                        break;
                    }
                }
                _ = cleanup_tick.tick() => {
                    let released = self.tracker.cleanup_stale_positions(self.stale_after);
                    report.stale_released += released as u64;
                }
                _ = summary_tick.tick() => {
                    self.tracker.log_status_summary();
                }
            }
        }

        info!(
            sync_cycles = report.sync_cycles,
            sync_errors = report.sync_errors,
            hedges_released = report.hedges_released,
            stale_released = report.stale_released,
            "👋 Hedge monitor stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerGateway, OrderSide, PaperBroker};
    use crate::config::TrackerConfig;
    use crate::tracker::HedgeStatus;
    use rust_decimal_macros::dec;

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            sync_interval_secs: 1,
            cleanup_interval_secs: 60,
            summary_interval_secs: 60,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_releases_externally_closed_hedge() {
        let broker = Arc::new(PaperBroker::new());
        let keep = broker.open_position("USDJPY", OrderSide::Buy, dec!(0.1)).await;
        let hedge = broker.open_position("EURGBP", OrderSide::Sell, dec!(0.01)).await;
        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let tracker = Arc::new(HedgeTracker::new(gateway, TrackerConfig::default()));

        tracker.lock_position("G1", "EURUSD");
        tracker.activate_position("G1", "EURUSD", &hedge, "EURGBP");
        broker.close_externally(&hedge).await;

        let monitor = HedgeMonitor::new(tracker.clone(), fast_config(), ChronoDuration::hours(24));
        let report = monitor.run(Some(2)).await;

        assert_eq!(report.sync_cycles, 2);
        assert_eq!(report.hedges_released, 1);
        assert_eq!(report.sync_errors, 0);
        assert_eq!(
            tracker.get_position_status("G1", "EURUSD"),
            HedgeStatus::Available
        );
        assert!(broker.is_open(&keep).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_counts_broker_errors() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_connected(false);
        let gateway: Arc<dyn BrokerGateway> = broker.clone();
        let tracker = Arc::new(HedgeTracker::new(gateway, TrackerConfig::default()));
        tracker.lock_position("G1", "EURUSD");

        let monitor = HedgeMonitor::new(tracker.clone(), fast_config(), ChronoDuration::hours(24));
        let report = monitor.run(Some(3)).await;

        assert_eq!(report.sync_errors, 3);
        assert_eq!(tracker.tracked_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flag_stops_loop() {
        let broker: Arc<dyn BrokerGateway> = Arc::new(PaperBroker::new());
        let tracker = Arc::new(HedgeTracker::new(broker, TrackerConfig::default()));
        let monitor = HedgeMonitor::new(tracker, fast_config(), ChronoDuration::hours(24));

        monitor.shutdown_handle().store(true, Ordering::SeqCst);
        let report = monitor.run(None).await;

        assert_eq!(report, MonitorReport::default());
    }
}
