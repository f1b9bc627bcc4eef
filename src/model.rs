//! K-Means clustering of normalized engagement metrics and tier labelling

use crate::error::AnalyticsError;
use crate::normalize::{NormalizedAggregate, StandardScaler};
use crate::schema::EngagementMetric;
use clap::ValueEnum;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

pub const DEFAULT_CLUSTERS: usize = 3;
pub const DEFAULT_MAX_ITERATIONS: usize = 300;
pub const DEFAULT_SEED: u64 = 42;

/// Tier names by ascending engagement rank, used when k = 3
pub const TIER_LABELS: [&str; 3] = ["Low Engagement", "Medium Engagement", "High Engagement"];

/// Opaque cluster index in `[0, k)`. Carries no ordering by engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClusterId(pub usize);

impl ClusterId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How tier names are attached to cluster ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
pub enum TierPolicy {
    /// Rank clusters by mean total traffic (original units), lowest first
    #[default]
    RankedByTraffic,
    /// Name clusters by raw index: 0 Low, 1 Medium, 2 High
    FixedIndex,
}

/// K-Means parameters
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansConfig {
    pub n_clusters: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            n_clusters: DEFAULT_CLUSTERS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: DEFAULT_SEED,
        }
    }
}

/// Fitted K-Means model
#[derive(Debug, Clone)]
pub struct KMeansModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignments for the training rows
    pub labels: Array1<usize>,
    /// Cluster centroids in normalized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares (inertia)
    pub inertia: f64,
    /// Assignment passes performed
    pub iterations: usize,
    /// Whether assignments stopped changing before the iteration cap
    pub converged: bool,
    /// Initial centroids followed by the centroids after every update
    pub trajectory: Vec<Array2<f64>>,
}

impl KMeansModel {
    /// Predict cluster for a normalized data point
    pub fn predict(&self, features: ArrayView1<f64>) -> crate::Result<ClusterId> {
        if features.len() != self.centroids.ncols() {
            return Err(ndarray::ShapeError::from_kind(ndarray::ErrorKind::IncompatibleShape).into());
        }
        Ok(ClusterId(nearest_centroid(&features, &self.centroids)))
    }

    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Mean silhouette coefficient over at most `sample_size` rows.
    ///
    /// When the data has more rows than `sample_size`, the rows are drawn
    /// without replacement by a `StdRng` seeded from `seed`. Distances are
    /// measured within the sample only. A point alone in its cluster scores 0.
    pub fn compute_silhouette_sample(&self, features: &Array2<f64>, sample_size: usize, seed: u64) -> f64 {
        let n = features.nrows().min(self.labels.len());
        let rows: Vec<usize> = if sample_size >= n {
            (0..n).collect()
        } else {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut rows = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
            rows.sort_unstable();
            rows
        };
        if rows.len() < 2 {
            return 0.0;
        }

        let mut total = 0.0;
        for &i in &rows {
            let point = features.row(i);
            let own = self.labels[i];
            let mut sums = vec![0.0; self.n_clusters];
            let mut counts = vec![0usize; self.n_clusters];
            for &j in rows.iter().filter(|&&j| j != i) {
                let label = self.labels[j];
                sums[label] += euclidean_distance(&point, &features.row(j));
                counts[label] += 1;
            }
            if counts[own] == 0 {
                continue;
            }

            let a = sums[own] / counts[own] as f64;
            let b = (0..self.n_clusters)
                .filter(|&c| c != own && counts[c] > 0)
                .map(|c| sums[c] / counts[c] as f64)
                .fold(f64::INFINITY, f64::min);
            if b.is_finite() && a.max(b) > 0.0 {
                total += (b - a) / a.max(b);
            }
        }

        total / rows.len() as f64
    }

    /// Tier name of every cluster id, indexed by id
    pub fn tier_labels(&self, scaler: &StandardScaler, policy: TierPolicy) -> crate::Result<Vec<String>> {
        let k = self.n_clusters;
        match policy {
            TierPolicy::FixedIndex => Ok((0..k).map(|c| tier_name(c, k)).collect()),
            TierPolicy::RankedByTraffic => {
                let keys = self
                    .centroids
                    .outer_iter()
                    .map(|centroid| ranking_key(scaler, centroid))
                    .collect::<crate::Result<Vec<f64>>>()?;
                let mut order: Vec<usize> = (0..k).collect();
                order.sort_by(|&a, &b| keys[a].total_cmp(&keys[b]).then(a.cmp(&b)));

                let mut labels = vec![String::new(); k];
                for (rank, &cluster) in order.iter().enumerate() {
                    labels[cluster] = tier_name(rank, k);
                }
                Ok(labels)
            }
        }
    }

    /// Per-subscriber assignment for the rows the model was fitted on
    pub fn assignment(
        &self,
        normalized: &NormalizedAggregate,
        policy: TierPolicy,
    ) -> crate::Result<ClusterAssignment> {
        if normalized.subscribers.len() != self.labels.len() {
            return Err(ndarray::ShapeError::from_kind(ndarray::ErrorKind::IncompatibleShape).into());
        }
        let tiers = self.tier_labels(&normalized.scaler, policy)?;
        let entries = normalized
            .subscribers
            .iter()
            .zip(self.labels.iter())
            .map(|(subscriber, &label)| AssignedSubscriber {
                subscriber: subscriber.clone(),
                cluster: ClusterId(label),
                tier: tiers[label].clone(),
            })
            .collect();
        Ok(ClusterAssignment { entries })
    }
}

fn tier_name(rank: usize, k: usize) -> String {
    if k == TIER_LABELS.len() {
        TIER_LABELS[rank].to_string()
    } else {
        format!("Engagement Tier {}", rank + 1)
    }
}

/// Centroid total traffic in original units; falls back to the mean
/// normalized coordinate when traffic was not clustered on
fn ranking_key(scaler: &StandardScaler, centroid: ArrayView1<f64>) -> crate::Result<f64> {
    match scaler.position(EngagementMetric::TotalTraffic) {
        Some(j) => Ok(scaler.inverse_transform_row(centroid)?[j]),
        None => Ok(centroid.mean().unwrap_or(0.0)),
    }
}

/// Cluster and tier of one subscriber
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignedSubscriber {
    pub subscriber: String,
    pub cluster: ClusterId,
    pub tier: String,
}

/// Subscriber → cluster mapping produced by the cluster engine
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterAssignment {
    entries: Vec<AssignedSubscriber>,
}

impl ClusterAssignment {
    pub fn new(entries: Vec<AssignedSubscriber>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[AssignedSubscriber] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fit K-Means on normalized engagement metrics
///
/// # Arguments
/// * `normalized` - Standardized metrics with their fitted scaler
/// * `config` - Cluster count, iteration cap and seed
///
/// # Returns
/// * Fitted `KMeansModel` with labels, centroids and diagnostics
pub fn fit_kmeans(normalized: &NormalizedAggregate, config: &KMeansConfig) -> crate::Result<KMeansModel> {
    fit_kmeans_features(&normalized.features, config)
}

/// Lloyd's algorithm on a raw feature matrix.
///
/// Initial centroids are `k` distinct rows: the first drawn by a `StdRng`
/// seeded from `config.seed`, each further one the row farthest from the
/// centroids chosen so far. Each pass assigns every point to its
/// nearest centroid (ties go to the lower index) and moves each centroid to
/// the mean of its points; a centroid with no points stays put. Stops once a
/// pass changes no assignment or after `max_iterations` passes.
pub fn fit_kmeans_features(features: &Array2<f64>, config: &KMeansConfig) -> crate::Result<KMeansModel> {
    let n_samples = features.nrows();
    if n_samples == 0 {
        return Err(AnalyticsError::EmptyInput);
    }

    let distinct = distinct_rows(features);
    let k = config.n_clusters;
    if k < 1 || k > distinct.len() {
        return Err(AnalyticsError::InvalidK {
            k,
            distinct: distinct.len(),
        });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut centroids = Array2::zeros((k, features.ncols()));
    for (cluster, row) in farthest_first(features, &distinct, k, &mut rng).into_iter().enumerate() {
        centroids.row_mut(cluster).assign(&features.row(row));
    }
    debug!("Initial centroids (seed {}): {:?}", config.seed, centroids);

    let mut labels = Array1::from_elem(n_samples, usize::MAX);
    let mut trajectory = vec![centroids.clone()];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations.max(1) {
        iterations += 1;

        let mut changed = false;
        for (i, point) in features.outer_iter().enumerate() {
            let nearest = nearest_centroid(&point, &centroids);
            if labels[i] != nearest {
                labels[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            converged = true;
            break;
        }

        update_centroids(features, &labels, &mut centroids);
        trajectory.push(centroids.clone());
    }

    if !converged {
        warn!(
            "K-Means stopped after {} iterations without converging",
            iterations
        );
    }

    let inertia = compute_inertia(features, &labels, &centroids);
    info!(
        "K-Means with k={} finished after {} iterations, inertia {:.4}",
        k, iterations, inertia
    );

    Ok(KMeansModel {
        n_clusters: k,
        labels,
        centroids,
        inertia,
        iterations,
        converged,
        trajectory,
    })
}

/// Fit with defaults apart from `k` and `seed`, labelling tiers by traffic rank
pub fn cluster(normalized: &NormalizedAggregate, k: usize, seed: u64) -> crate::Result<ClusterAssignment> {
    let config = KMeansConfig {
        n_clusters: k,
        seed,
        ..Default::default()
    };
    fit_kmeans(normalized, &config)?.assignment(normalized, TierPolicy::default())
}

/// Predict cluster and tier for raw engagement values
///
/// # Arguments
/// * `model` - Fitted K-Means model
/// * `scaler` - Scaler the model's training data was standardized with
/// * `values` - Raw metric values in the scaler's column order
/// * `policy` - Tier naming policy
pub fn predict_tier(
    model: &KMeansModel,
    scaler: &StandardScaler,
    values: &[f64],
    policy: TierPolicy,
) -> crate::Result<(ClusterId, String)> {
    let scaled = scaler.transform_row(values)?;
    let cluster = model.predict(scaled.view())?;
    let tier = model.tier_labels(scaler, policy)?[cluster.index()].clone();
    Ok((cluster, tier))
}

/// Row indices of the first occurrence of every distinct row
fn distinct_rows(features: &Array2<f64>) -> Vec<usize> {
    let mut seen: HashSet<Vec<u64>> = HashSet::new();
    features
        .outer_iter()
        .enumerate()
        .filter(|(_, row)| {
            // -0.0 and 0.0 are the same point
            let key = row.iter().map(|&v| (v + 0.0).to_bits()).collect();
            seen.insert(key)
        })
        .map(|(i, _)| i)
        .collect()
}

/// Seeded farthest-first traversal over the distinct rows.
/// Distance ties go to the earlier row.
fn farthest_first(features: &Array2<f64>, distinct: &[usize], k: usize, rng: &mut StdRng) -> Vec<usize> {
    let first = distinct[rng.gen_range(0..distinct.len())];
    let mut chosen = vec![first];
    let mut nearest: Vec<f64> = distinct
        .iter()
        .map(|&i| squared_distance(&features.row(i), &features.row(first)))
        .collect();

    while chosen.len() < k {
        let mut best = 0;
        for (pos, &distance) in nearest.iter().enumerate() {
            if distance > nearest[best] {
                best = pos;
            }
        }
        let next = distinct[best];
        chosen.push(next);

        for (pos, &i) in distinct.iter().enumerate() {
            let distance = squared_distance(&features.row(i), &features.row(next));
            if distance < nearest[pos] {
                nearest[pos] = distance;
            }
        }
    }

    chosen
}

fn nearest_centroid(point: &ArrayView1<f64>, centroids: &Array2<f64>) -> usize {
    let mut min_distance = f64::INFINITY;
    let mut closest_cluster = 0;

    for (cluster_idx, centroid) in centroids.outer_iter().enumerate() {
        let distance = squared_distance(point, &centroid);
        if distance < min_distance {
            min_distance = distance;
            closest_cluster = cluster_idx;
        }
    }

    closest_cluster
}

fn update_centroids(features: &Array2<f64>, labels: &Array1<usize>, centroids: &mut Array2<f64>) {
    let mut sums = Array2::<f64>::zeros(centroids.dim());
    let mut counts = vec![0usize; centroids.nrows()];

    for (point, &label) in features.outer_iter().zip(labels.iter()) {
        let mut sum = sums.row_mut(label);
        sum += &point;
        counts[label] += 1;
    }

    for (cluster, &count) in counts.iter().enumerate() {
        if count == 0 {
            debug!("Cluster {} is empty; keeping its previous centroid", cluster);
            continue;
        }
        let mean = &sums.row(cluster) / count as f64;
        centroids.row_mut(cluster).assign(&mean);
    }
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    let mut inertia = 0.0;

    for (i, &cluster) in labels.iter().enumerate() {
        if cluster < centroids.nrows() {
            inertia += squared_distance(&features.row(i), &centroids.row(cluster));
        }
    }

    inertia
}

fn squared_distance(point1: &ArrayView1<f64>, point2: &ArrayView1<f64>) -> f64 {
    point1
        .iter()
        .zip(point2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
}

/// Calculate Euclidean distance between two points
fn euclidean_distance(point1: &ArrayView1<f64>, point2: &ArrayView1<f64>) -> f64 {
    squared_distance(point1, point2).sqrt()
}
