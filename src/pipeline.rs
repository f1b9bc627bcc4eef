//! Stage orchestration for the engagement and user overview reports

use crate::aggregate::{self, EngagementAggregate};
use crate::data::SessionTable;
use crate::leaderboard::{
    self, CountedItem, DecileSummary, ManufacturerHandsets, RankedSubscriber, DEFAULT_TOP_N,
};
use crate::model::{self, ClusterId, KMeansConfig, KMeansModel, TierPolicy};
use crate::normalize::{self, NormalizedAggregate, ZeroVariancePolicy};
use crate::schema::{self, Application, EngagementMetric};
use crate::stats::{self, BasicMetrics, CorrelationMatrix, Dispersion};
use crate::summary::{self, ClusterSummary, ClusteredSubscriber};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

const TOP_MANUFACTURERS: usize = 3;
const HANDSETS_PER_MANUFACTURER: usize = 5;

/// Settings shared by every stage of a run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub kmeans: KMeansConfig,
    pub zero_variance: ZeroVariancePolicy,
    pub tier_policy: TierPolicy,
    pub top_n: usize,
    /// Points used for the sampled silhouette score
    pub silhouette_sample: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            kmeans: KMeansConfig::default(),
            zero_variance: ZeroVariancePolicy::default(),
            tier_policy: TierPolicy::default(),
            top_n: DEFAULT_TOP_N,
            silhouette_sample: 1_000,
        }
    }
}

/// Centroid of one cluster in both normalized and original units
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CentroidRow {
    pub cluster: ClusterId,
    pub tier: String,
    pub normalized: Vec<f64>,
    pub original: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterDiagnostics {
    pub iterations: usize,
    pub converged: bool,
    pub inertia: f64,
    pub silhouette: f64,
    pub sizes: Vec<usize>,
}

/// Everything the engagement analysis reports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementReport {
    pub subscribers: usize,
    pub metrics: Vec<EngagementMetric>,
    pub top: BTreeMap<EngagementMetric, Vec<RankedSubscriber>>,
    pub clustered: Vec<ClusteredSubscriber>,
    pub summary: ClusterSummary,
    pub centroids: Vec<CentroidRow>,
    pub diagnostics: ClusterDiagnostics,
}

/// Intermediate results of an engagement run, kept for follow-up predictions
#[derive(Debug, Clone)]
pub struct EngagementRun {
    pub aggregates: Vec<EngagementAggregate>,
    pub normalized: NormalizedAggregate,
    pub model: KMeansModel,
    pub report: EngagementReport,
}

/// Aggregate per MSISDN, normalize, cluster and summarize on original units
pub fn run_engagement(table: &SessionTable, config: &PipelineConfig) -> crate::Result<EngagementRun> {
    let metrics = EngagementMetric::ALL.to_vec();

    let aggregates = aggregate::aggregate_engagement(table)?;
    let normalized = normalize::normalize(&aggregates, &metrics, config.zero_variance)?;
    let model = model::fit_kmeans(&normalized, &config.kmeans)?;
    let assignment = model.assignment(&normalized, config.tier_policy)?;

    let clustered = summary::join(&assignment, &aggregates)?;
    let cluster_summary = summary::summarize_joined(&clustered);

    let tiers = model.tier_labels(&normalized.scaler, config.tier_policy)?;
    let mut centroids = Vec::with_capacity(model.n_clusters);
    for (cluster, centroid) in model.centroids.outer_iter().enumerate() {
        centroids.push(CentroidRow {
            cluster: ClusterId(cluster),
            tier: tiers[cluster].clone(),
            normalized: centroid.to_vec(),
            original: normalized.scaler.inverse_transform_row(centroid)?.to_vec(),
        });
    }

    let diagnostics = ClusterDiagnostics {
        iterations: model.iterations,
        converged: model.converged,
        inertia: model.inertia,
        silhouette: model.compute_silhouette_sample(
            &normalized.features,
            config.silhouette_sample,
            config.kmeans.seed,
        ),
        sizes: model.cluster_sizes(),
    };

    let top = metrics
        .iter()
        .map(|&metric| (metric, leaderboard::top_by_metric(&aggregates, metric, config.top_n)))
        .collect();

    info!(
        "Engagement analysis complete: {} subscribers in {} clusters",
        aggregates.len(),
        cluster_summary.clusters.len()
    );

    let report = EngagementReport {
        subscribers: aggregates.len(),
        metrics,
        top,
        clustered,
        summary: cluster_summary,
        centroids,
        diagnostics,
    };

    Ok(EngagementRun {
        aggregates,
        normalized,
        model,
        report,
    })
}

/// Handset usage rankings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandsetReport {
    pub top_handsets: Vec<CountedItem>,
    pub top_manufacturers: Vec<CountedItem>,
    pub per_manufacturer: Vec<ManufacturerHandsets>,
}

/// Everything the user overview analysis reports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserOverviewReport {
    pub subscribers: usize,
    pub application_leaders: BTreeMap<Application, Vec<RankedSubscriber>>,
    pub deciles: Vec<DecileSummary>,
    pub basic_metrics: Vec<BasicMetrics>,
    pub dispersion: Vec<Dispersion>,
    pub correlation: CorrelationMatrix,
    pub handsets: Option<HandsetReport>,
}

/// Aggregate per IMSI and derive leaderboards, deciles and descriptive statistics
pub fn run_user_overview(table: &SessionTable, config: &PipelineConfig) -> crate::Result<UserOverviewReport> {
    let usage = aggregate::aggregate_usage(table)?;
    let columns = stats::usage_columns(&usage);

    let handset_columns = [schema::HANDSET_TYPE, schema::HANDSET_MANUFACTURER];
    let handsets = if table.missing_columns(&handset_columns).is_empty() {
        Some(HandsetReport {
            top_handsets: leaderboard::top_handsets(table, config.top_n)?,
            top_manufacturers: leaderboard::top_manufacturers(table, TOP_MANUFACTURERS)?,
            per_manufacturer: leaderboard::top_handsets_per_manufacturer(
                table,
                TOP_MANUFACTURERS,
                HANDSETS_PER_MANUFACTURER,
            )?,
        })
    } else {
        warn!("Handset columns missing; skipping handset rankings");
        None
    };

    let report = UserOverviewReport {
        subscribers: usage.len(),
        application_leaders: leaderboard::top_per_application(&usage, config.top_n),
        deciles: leaderboard::segment_by_duration(&usage)?,
        basic_metrics: stats::describe(&columns)?,
        dispersion: stats::dispersion(&columns)?,
        correlation: stats::correlation_matrix(&stats::application_columns(&usage)),
        handsets,
    };
    info!("User overview complete: {} subscribers", report.subscribers);
    Ok(report)
}
