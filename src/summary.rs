//! Cluster-level statistics over original (non-normalized) engagement metrics

use crate::aggregate::EngagementAggregate;
use crate::error::AnalyticsError;
use crate::model::{AssignedSubscriber, ClusterAssignment, ClusterId};
use crate::schema::EngagementMetric;
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// min / max / mean / sum of one metric within one cluster
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sum: f64,
}

impl MetricStats {
    fn from_values(values: impl Iterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for v in values {
            count += 1;
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        (count > 0).then(|| Self {
            min,
            max,
            mean: sum / count as f64,
            sum,
        })
    }
}

/// Original metrics of one subscriber joined with its cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusteredSubscriber {
    #[serde(flatten)]
    pub metrics: EngagementAggregate,
    pub cluster: ClusterId,
    pub tier: String,
}

/// Summary row of one cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummaryRow {
    pub cluster: ClusterId,
    pub tier: String,
    pub subscribers: usize,
    pub session_count: MetricStats,
    pub total_duration: MetricStats,
    pub total_traffic: MetricStats,
}

impl ClusterSummaryRow {
    pub fn metric(&self, metric: EngagementMetric) -> &MetricStats {
        match metric {
            EngagementMetric::SessionCount => &self.session_count,
            EngagementMetric::TotalDuration => &self.total_duration,
            EngagementMetric::TotalTraffic => &self.total_traffic,
        }
    }
}

/// One row per cluster that has members, ordered by cluster id
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub clusters: Vec<ClusterSummaryRow>,
}

impl ClusterSummary {
    pub fn get(&self, cluster: ClusterId) -> Option<&ClusterSummaryRow> {
        self.clusters.iter().find(|row| row.cluster == cluster)
    }
}

/// Attach each original aggregate to its cluster.
///
/// Every subscriber in `originals` must appear in `assignment`; assignments
/// for subscribers outside `originals` are ignored.
pub fn join(
    assignment: &ClusterAssignment,
    originals: &[EngagementAggregate],
) -> crate::Result<Vec<ClusteredSubscriber>> {
    let lookup: HashMap<&str, &AssignedSubscriber> = assignment
        .entries()
        .iter()
        .map(|entry| (entry.subscriber.as_str(), entry))
        .collect();

    originals
        .iter()
        .map(|original| {
            let entry = lookup
                .get(original.subscriber.as_str())
                .ok_or_else(|| AnalyticsError::UnassignedSubscriber(original.subscriber.clone()))?;
            Ok(ClusteredSubscriber {
                metrics: original.clone(),
                cluster: entry.cluster,
                tier: entry.tier.clone(),
            })
        })
        .collect()
}

/// Per-cluster min/max/mean/sum of the original engagement metrics
pub fn summarize(
    assignment: &ClusterAssignment,
    originals: &[EngagementAggregate],
) -> crate::Result<ClusterSummary> {
    if originals.is_empty() {
        return Err(AnalyticsError::EmptyInput);
    }
    let joined = join(assignment, originals)?;
    Ok(summarize_joined(&joined))
}

/// Summary of an already joined table
pub fn summarize_joined(joined: &[ClusteredSubscriber]) -> ClusterSummary {
    let mut groups: BTreeMap<ClusterId, Vec<&ClusteredSubscriber>> = BTreeMap::new();
    for row in joined {
        groups.entry(row.cluster).or_default().push(row);
    }

    let clusters = groups
        .into_iter()
        .filter_map(|(cluster, members)| {
            let stats = |metric: EngagementMetric| {
                MetricStats::from_values(members.iter().map(|m| m.metrics.metric(metric)))
            };
            Some(ClusterSummaryRow {
                cluster,
                tier: members.first()?.tier.clone(),
                subscribers: members.len(),
                session_count: stats(EngagementMetric::SessionCount)?,
                total_duration: stats(EngagementMetric::TotalDuration)?,
                total_traffic: stats(EngagementMetric::TotalTraffic)?,
            })
        })
        .collect::<Vec<_>>();

    debug!("Summarized {} clusters", clusters.len());
    ClusterSummary { clusters }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate(id: &str, sessions: u64, duration: f64, traffic: f64) -> EngagementAggregate {
        EngagementAggregate {
            subscriber: id.to_string(),
            session_count: sessions,
            total_duration: duration,
            total_traffic: traffic,
        }
    }

    fn assigned(id: &str, cluster: usize, tier: &str) -> AssignedSubscriber {
        AssignedSubscriber {
            subscriber: id.to_string(),
            cluster: ClusterId(cluster),
            tier: tier.to_string(),
        }
    }

    #[test]
    fn test_summary_uses_original_units() {
        let originals = vec![
            aggregate("a", 1, 100.0, 1_000.0),
            aggregate("b", 3, 300.0, 3_000.0),
            aggregate("c", 10, 5_000.0, 90_000.0),
        ];
        let assignment = ClusterAssignment::new(vec![
            assigned("c", 1, "High Engagement"),
            assigned("a", 0, "Low Engagement"),
            assigned("b", 0, "Low Engagement"),
        ]);

        let summary = summarize(&assignment, &originals).unwrap();
        assert_eq!(summary.clusters.len(), 2);

        let low = summary.get(ClusterId(0)).unwrap();
        assert_eq!(low.tier, "Low Engagement");
        assert_eq!(low.subscribers, 2);
        assert_eq!(
            low.total_traffic,
            MetricStats {
                min: 1_000.0,
                max: 3_000.0,
                mean: 2_000.0,
                sum: 4_000.0
            }
        );
        assert_eq!(low.session_count.mean, 2.0);

        let high = summary.get(ClusterId(1)).unwrap();
        assert_eq!(high.total_duration.sum, 5_000.0);
        assert_eq!(high.metric(EngagementMetric::TotalTraffic).max, 90_000.0);
    }

    #[test]
    fn test_empty_clusters_are_not_fabricated() {
        let originals = vec![aggregate("a", 1, 1.0, 1.0), aggregate("b", 2, 2.0, 2.0)];
        let assignment = ClusterAssignment::new(vec![assigned("a", 2, "x"), assigned("b", 2, "x")]);

        let summary = summarize(&assignment, &originals).unwrap();
        assert_eq!(summary.clusters.len(), 1);
        assert_eq!(summary.clusters[0].cluster, ClusterId(2));
        assert!(summary.get(ClusterId(0)).is_none());
    }

    #[test]
    fn test_unassigned_subscriber() {
        let originals = vec![aggregate("a", 1, 1.0, 1.0), aggregate("b", 2, 2.0, 2.0)];
        let assignment = ClusterAssignment::new(vec![assigned("a", 0, "x")]);

        let err = summarize(&assignment, &originals).unwrap_err();
        assert!(matches!(err, AnalyticsError::UnassignedSubscriber(id) if id == "b"));
    }

    #[test]
    fn test_join_keeps_original_order() {
        let originals = vec![aggregate("b", 2, 2.0, 2.0), aggregate("a", 1, 1.0, 1.0)];
        let assignment = ClusterAssignment::new(vec![
            assigned("a", 0, "x"),
            assigned("b", 1, "y"),
            assigned("z", 1, "y"),
        ]);

        let joined = join(&assignment, &originals).unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(joined[0].metrics.subscriber, "b");
        assert_eq!(joined[0].tier, "y");
        assert_eq!(joined[1].cluster, ClusterId(0));
    }
}
