//! Property tests for aggregation, normalization and clustering invariants

use ndarray::Array2;
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;
use std::collections::{BTreeMap, HashMap, HashSet};
use xdrscope::model::{fit_kmeans, KMeansConfig};
use xdrscope::normalize::{metric_matrix, normalize, ZeroVariancePolicy};
use xdrscope::{
    aggregate_engagement, cluster, summarize, ClusterId, EngagementMetric, SessionRecord, SessionTable,
};

const REL_TOL: f64 = 1e-9;

fn relative_close(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() <= REL_TOL * (1.0 + expected.abs())
}

/// (subscriber, duration, dl, ul) with integral values so sums stay exact
fn sessions_strategy() -> impl Strategy<Value = Vec<(u8, u32, u32, u32)>> {
    prop::collection::vec((0u8..8, 0u32..100_000, 0u32..5_000_000, 0u32..500_000), 1..60)
}

fn table_of(sessions: &[(u8, u32, u32, u32)]) -> SessionTable {
    SessionTable::from_records(
        sessions
            .iter()
            .map(|&(id, duration, dl, ul)| {
                SessionRecord::for_msisdn(
                    &format!("msisdn-{}", id),
                    duration as f64,
                    dl as f64,
                    ul as f64,
                )
            })
            .collect(),
    )
}

fn distinct_rows(features: &Array2<f64>) -> usize {
    features
        .outer_iter()
        .map(|row| row.iter().map(|&v| (v + 0.0).to_bits()).collect::<Vec<_>>())
        .collect::<HashSet<_>>()
        .len()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn aggregation_preserves_totals(sessions in sessions_strategy()) {
        let aggregates = aggregate_engagement(&table_of(&sessions)).unwrap();

        let count: u64 = aggregates.iter().map(|a| a.session_count).sum();
        let duration: f64 = aggregates.iter().map(|a| a.total_duration).sum();
        let traffic: f64 = aggregates.iter().map(|a| a.total_traffic).sum();

        prop_assert_eq!(count, sessions.len() as u64);
        prop_assert_eq!(duration, sessions.iter().map(|s| s.1 as f64).sum::<f64>());
        prop_assert_eq!(traffic, sessions.iter().map(|s| s.2 as f64 + s.3 as f64).sum::<f64>());

        let ids: HashSet<u8> = sessions.iter().map(|s| s.0).collect();
        prop_assert_eq!(aggregates.len(), ids.len());
    }

    #[test]
    fn aggregation_ignores_row_order(sessions in sessions_strategy()) {
        let mut reversed = sessions.clone();
        reversed.reverse();
        prop_assert_eq!(
            aggregate_engagement(&table_of(&sessions)).unwrap(),
            aggregate_engagement(&table_of(&reversed)).unwrap()
        );
    }

    #[test]
    fn normalization_round_trips(sessions in sessions_strategy()) {
        let aggregates = aggregate_engagement(&table_of(&sessions)).unwrap();
        let metrics = EngagementMetric::ALL.to_vec();
        let normalized = normalize(&aggregates, &metrics, ZeroVariancePolicy::Zero).unwrap();

        let raw = metric_matrix(&aggregates, &metrics);
        let restored = normalized.scaler.inverse_transform(&normalized.features).unwrap();
        for (actual, expected) in restored.iter().zip(raw.iter()) {
            prop_assert!(relative_close(*actual, *expected), "{} != {}", actual, expected);
        }

        for j in 0..metrics.len() {
            let mean = normalized.features.column(j).sum() / aggregates.len() as f64;
            prop_assert!(mean.abs() < 1e-9);
            if normalized.scaler.is_degenerate(j) {
                prop_assert!(normalized.features.column(j).iter().all(|&z| z == 0.0));
            }
        }
    }

    #[test]
    fn cluster_summary_reconciles(sessions in sessions_strategy(), k in 1usize..=3, seed in any::<u64>()) {
        let aggregates = aggregate_engagement(&table_of(&sessions)).unwrap();
        let normalized =
            normalize(&aggregates, &EngagementMetric::ALL, ZeroVariancePolicy::Zero).unwrap();
        let k = k.min(distinct_rows(&normalized.features));

        let assignment = cluster(&normalized, k, seed).unwrap();
        prop_assert_eq!(assignment.len(), aggregates.len());

        let summary = summarize(&assignment, &aggregates).unwrap();
        let members: usize = summary.clusters.iter().map(|c| c.subscribers).sum();
        prop_assert_eq!(members, aggregates.len());

        let sessions_total: f64 = summary.clusters.iter().map(|c| c.session_count.sum).sum();
        prop_assert_eq!(sessions_total, sessions.len() as f64);
        let traffic: HashMap<&str, f64> = aggregates
            .iter()
            .map(|a| (a.subscriber.as_str(), a.total_traffic))
            .collect();
        let mut expected: BTreeMap<ClusterId, (usize, f64)> = BTreeMap::new();
        for entry in assignment.entries() {
            let slot = expected.entry(entry.cluster).or_default();
            slot.0 += 1;
            slot.1 += traffic[entry.subscriber.as_str()];
        }
        prop_assert_eq!(summary.clusters.len(), expected.len());

        for row in &summary.clusters {
            let (members, traffic_sum) = expected[&row.cluster];
            prop_assert_eq!(row.subscribers, members);
            prop_assert_eq!(row.total_traffic.sum, traffic_sum);
            prop_assert!(row.total_traffic.min <= row.total_traffic.mean);
            prop_assert!(row.total_traffic.mean <= row.total_traffic.max * (1.0 + REL_TOL));
        }
    }

    #[test]
    fn kmeans_is_deterministic(sessions in sessions_strategy(), seed in any::<u64>()) {
        let aggregates = aggregate_engagement(&table_of(&sessions)).unwrap();
        let normalized =
            normalize(&aggregates, &EngagementMetric::ALL, ZeroVariancePolicy::Zero).unwrap();
        let config = KMeansConfig {
            n_clusters: distinct_rows(&normalized.features).min(3),
            seed,
            ..Default::default()
        };

        let first = fit_kmeans(&normalized, &config).unwrap();
        let second = fit_kmeans(&normalized, &config).unwrap();
        prop_assert_eq!(&first.labels, &second.labels);
        prop_assert_eq!(&first.centroids, &second.centroids);
        prop_assert!(first.labels.iter().all(|&label| label < config.n_clusters));
        prop_assert_eq!(first.trajectory.len(), first.iterations + usize::from(!first.converged));
    }
}
