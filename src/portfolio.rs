use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PortfolioConfig;
use crate::supervisor::TaskSupervisor;
use crate::types::RiskMetrics;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotPerformance {
    pub change_24h: Decimal,
    pub change_24h_percent: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSnapshot {
    pub address: Address,
    pub timestamp: DateTime<Utc>,
    pub total_value_usd: Decimal,
    /// USD value per token symbol.
    pub balances: HashMap<String, Decimal>,
    pub performance: SnapshotPerformance,
    pub risk: RiskMetrics,
}

/// Value movement across the retained history of one address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioPerformance {
    pub address: Address,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub start_value_usd: Decimal,
    pub end_value_usd: Decimal,
    pub change_usd: Decimal,
    pub change_percent: Decimal,
    pub high_usd: Decimal,
    pub low_usd: Decimal,
    pub snapshots: usize,
}

/// Per-address snapshot history bounded by a retention window.
pub struct PortfolioTracker {
    config: PortfolioConfig,
    snapshots: Arc<RwLock<HashMap<Address, Vec<PortfolioSnapshot>>>>,
    supervisor: Mutex<Option<TaskSupervisor>>,
}

impl PortfolioTracker {
    pub fn new(config: PortfolioConfig) -> Self {
        Self {
            config,
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            supervisor: Mutex::new(None),
        }
    }

    pub async fn start(&self, ctx: &CancellationToken) {
        if !self.config.enabled {
            info!("Portfolio tracker disabled, not starting");
            return;
        }

        let mut guard = self.supervisor.lock().await;
        if guard.is_some() {
            warn!("Portfolio tracker already running");
            return;
        }

        let mut supervisor = TaskSupervisor::new(ctx);
        let token = supervisor.token();
        let snapshots = self.snapshots.clone();
        let config = self.config.clone();
        let period = self.config.update_interval();

        supervisor.spawn("portfolio-maintenance", async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = prune_history(&mut *snapshots.write().await, config.retention_cutoff(Utc::now()));
                        if removed > 0 {
                            debug!("Pruned {} expired portfolio snapshots", removed);
                        }
                    }
                }
            }
        });

        *guard = Some(supervisor);
        info!("Portfolio tracker started, retention {}h", self.config.history_retention_hours);
    }

    pub async fn stop(&self) {
        let supervisor = self.supervisor.lock().await.take();
        if let Some(supervisor) = supervisor {
            supervisor.shutdown().await;
            info!("Portfolio tracker stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.lock().await.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Append a snapshot and prune that address's history.
    pub async fn add_snapshot(&self, snapshot: PortfolioSnapshot) {
        let cutoff = self.config.retention_cutoff(Utc::now());
        let address = snapshot.address;

        let mut snapshots = self.snapshots.write().await;
        let history = snapshots.entry(address).or_default();
        let position = history.partition_point(|existing| existing.timestamp <= snapshot.timestamp);
        history.insert(position, snapshot);
        if let Some(cutoff) = cutoff {
            history.retain(|existing| existing.timestamp >= cutoff);
        }

        if let Some(max) = self.config.max_snapshots_per_address {
            if history.len() > max {
                let excess = history.len() - max;
                history.drain(..excess);
            }
        }

        if history.is_empty() {
            snapshots.remove(&address);
        }
    }

    /// Snapshots of `address`, oldest first.
    pub async fn get_snapshots(&self, address: Address) -> Vec<PortfolioSnapshot> {
        self.snapshots.read().await.get(&address).cloned().unwrap_or_default()
    }

    pub async fn latest_snapshot(&self, address: Address) -> Option<PortfolioSnapshot> {
        self.snapshots
            .read()
            .await
            .get(&address)
            .and_then(|history| history.last().cloned())
    }

    pub async fn performance(&self, address: Address) -> Option<PortfolioPerformance> {
        let snapshots = self.snapshots.read().await;
        let history = snapshots.get(&address)?;
        let first = history.first()?;
        let last = history.last()?;

        let change = last.total_value_usd - first.total_value_usd;
        let change_percent = if first.total_value_usd.is_zero() {
            Decimal::ZERO
        } else {
            change / first.total_value_usd * Decimal::ONE_HUNDRED
        };
        let values = history.iter().map(|snapshot| snapshot.total_value_usd);

        Some(PortfolioPerformance {
            address,
            from: first.timestamp,
            to: last.timestamp,
            start_value_usd: first.total_value_usd,
            end_value_usd: last.total_value_usd,
            change_usd: change,
            change_percent,
            high_usd: values.clone().max().unwrap_or(Decimal::ZERO),
            low_usd: values.min().unwrap_or(Decimal::ZERO),
            snapshots: history.len(),
        })
    }

    /// Drop every snapshot older than the retention window relative to `now`.
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.config.retention_cutoff(now);
        prune_history(&mut *self.snapshots.write().await, cutoff)
    }
}

fn prune_history(snapshots: &mut HashMap<Address, Vec<PortfolioSnapshot>>, cutoff: Option<DateTime<Utc>>) -> usize {
    let Some(cutoff) = cutoff else {
        return 0;
    };
    let mut removed = 0;
    for history in snapshots.values_mut() {
        let before = history.len();
        history.retain(|snapshot| snapshot.timestamp >= cutoff);
        removed += before - history.len();
    }
    snapshots.retain(|_, history| !history.is_empty());
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    const OWNER: Address = address!("00000000000000000000000000000000000000aa");

    fn snapshot(at: DateTime<Utc>, value: Decimal) -> PortfolioSnapshot {
        PortfolioSnapshot {
            address: OWNER,
            timestamp: at,
            total_value_usd: value,
            balances: HashMap::new(),
            performance: SnapshotPerformance {
                change_24h: Decimal::ZERO,
                change_24h_percent: Decimal::ZERO,
            },
            risk: RiskMetrics::default(),
        }
    }

    fn tracker(retention_hours: u64, max: Option<usize>) -> PortfolioTracker {
        PortfolioTracker::new(PortfolioConfig {
            enabled: true,
            update_interval_seconds: 60,
            history_retention_hours: retention_hours,
            max_snapshots_per_address: max,
        })
    }

    #[tokio::test]
    async fn test_insert_prunes_expired_history() {
        let tracker = tracker(24, None);
        let now = Utc::now();

        tracker.add_snapshot(snapshot(now - Duration::hours(30), dec!(100))).await;
        tracker.add_snapshot(snapshot(now - Duration::hours(2), dec!(200))).await;

        let history = tracker.get_snapshots(OWNER).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].total_value_usd, dec!(200));
    }

    #[tokio::test]
    async fn test_prune_relative_to_now() {
        let tracker = tracker(24, None);
        let now = Utc::now();
        tracker.add_snapshot(snapshot(now - Duration::hours(20), dec!(100))).await;
        tracker.add_snapshot(snapshot(now - Duration::hours(1), dec!(150))).await;

        let removed = tracker.prune(now + Duration::hours(10)).await;
        assert_eq!(removed, 1);
        assert_eq!(tracker.get_snapshots(OWNER).await.len(), 1);

        assert_eq!(tracker.prune(now + Duration::hours(48)).await, 1);
        assert!(tracker.latest_snapshot(OWNER).await.is_none());
    }

    #[tokio::test]
    async fn test_unbounded_retention_keeps_everything() {
        let tracker = tracker(100_000_000_000, None);
        let now = Utc::now();
        tracker.add_snapshot(snapshot(now - Duration::days(3650), dec!(100))).await;
        tracker.add_snapshot(snapshot(now, dec!(150))).await;

        assert_eq!(tracker.prune(now).await, 0);
        assert_eq!(tracker.get_snapshots(OWNER).await.len(), 2);
    }

    #[tokio::test]
    async fn test_performance_over_history() {
        let tracker = tracker(24, None);
        let now = Utc::now();
        tracker.add_snapshot(snapshot(now - Duration::hours(3), dec!(1000))).await;
        tracker.add_snapshot(snapshot(now - Duration::hours(2), dec!(1400))).await;
        tracker.add_snapshot(snapshot(now - Duration::hours(1), dec!(900))).await;
        tracker.add_snapshot(snapshot(now, dec!(1100))).await;

        let performance = tracker.performance(OWNER).await.unwrap();
        assert_eq!(performance.change_usd, dec!(100));
        assert_eq!(performance.change_percent, dec!(10));
        assert_eq!(performance.high_usd, dec!(1400));
        assert_eq!(performance.low_usd, dec!(900));
        assert_eq!(performance.snapshots, 4);
    }

    #[tokio::test]
    async fn test_snapshot_cap_keeps_newest() {
        let tracker = tracker(24, Some(2));
        let now = Utc::now();
        for (offset, value) in [(3, dec!(1)), (2, dec!(2)), (1, dec!(3))] {
            tracker.add_snapshot(snapshot(now - Duration::minutes(offset), value)).await;
        }

        let values: Vec<Decimal> = tracker
            .get_snapshots(OWNER)
            .await
            .into_iter()
            .map(|s| s.total_value_usd)
            .collect();
        assert_eq!(values, vec![dec!(2), dec!(3)]);
    }
}
