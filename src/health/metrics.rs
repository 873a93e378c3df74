use super::models::{AggregateResult, ProbeIdentity};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub check: ProbeIdentity,
    pub healthy: bool,
}

/// Bounded history of per-check verdicts as served by the health endpoint.
pub struct HealthMetrics {
    snapshots: Arc<RwLock<VecDeque<MetricSnapshot>>>,
    max_snapshots: usize,
}

impl HealthMetrics {
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(VecDeque::new())),
            max_snapshots,
        }
    }

    pub async fn record(&self, result: &AggregateResult) {
        let timestamp = Utc::now();
        let mut snapshots = self.snapshots.write().await;

        for check in result.checks() {
            snapshots.push_back(MetricSnapshot {
                timestamp,
                check: check.identity,
                healthy: check.healthy,
            });
        }

        while snapshots.len() > self.max_snapshots {
            snapshots.pop_front();
        }
    }

    pub async fn get_check_stats(
        &self,
        check: ProbeIdentity,
    ) -> Option<HashMap<String, serde_json::Value>> {
        let snapshots = self.snapshots.read().await;
        Self::stats_for(&snapshots, check)
    }

    fn stats_for(
        snapshots: &VecDeque<MetricSnapshot>,
        check: ProbeIdentity,
    ) -> Option<HashMap<String, serde_json::Value>> {
        let check_snapshots: Vec<_> = snapshots.iter().filter(|s| s.check == check).collect();

        if check_snapshots.is_empty() {
            return None;
        }

        let total = check_snapshots.len();
        let healthy = check_snapshots.iter().filter(|s| s.healthy).count();
        let unhealthy = total - healthy;
        let uptime_percentage = (healthy as f64 / total as f64) * 100.0;

        let mut stats = HashMap::new();
        stats.insert("total_checks".to_string(), serde_json::json!(total));
        stats.insert("healthy_count".to_string(), serde_json::json!(healthy));
        stats.insert("unhealthy_count".to_string(), serde_json::json!(unhealthy));
        stats.insert(
            "uptime_percentage".to_string(),
            serde_json::json!(format!("{:.2}", uptime_percentage)),
        );

        if let Some(last) = check_snapshots.last() {
            stats.insert(
                "last_checked".to_string(),
                serde_json::json!(last.timestamp.to_rfc3339()),
            );
        }

        Some(stats)
    }

    /// Stats for every check seen so far, keyed by the response detail key.
    pub async fn get_all_stats(&self) -> HashMap<String, HashMap<String, serde_json::Value>> {
        let snapshots = self.snapshots.read().await;

        ProbeIdentity::ALL
            .iter()
            .filter_map(|check| {
                Self::stats_for(&snapshots, *check)
                    .map(|stats| (check.detail_key().to_string(), stats))
            })
            .collect()
    }

    pub async fn clear(&self) {
        let mut snapshots = self.snapshots.write().await;
        snapshots.clear();
    }
}
