//! Z-score standardization of engagement metrics

use crate::aggregate::EngagementAggregate;
use crate::error::AnalyticsError;
use crate::schema::EngagementMetric;
use clap::ValueEnum;
use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView1, ErrorKind, ShapeError};
use serde::Serialize;

/// What to do with a metric whose values are all identical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
pub enum ZeroVariancePolicy {
    /// Standardize the column to all zeros
    #[default]
    Zero,
    /// Fail with `DegenerateColumn`
    Error,
}

/// Fitted per-column mean and sample standard deviation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandardScaler {
    metrics: Vec<EngagementMetric>,
    means: Array1<f64>,
    stds: Array1<f64>,
    degenerate: Vec<bool>,
}

impl StandardScaler {
    /// Fit on a raw `(n_rows, n_metrics)` matrix whose columns follow `metrics`
    pub fn fit(
        raw: &Array2<f64>,
        metrics: &[EngagementMetric],
        policy: ZeroVariancePolicy,
    ) -> crate::Result<Self> {
        if raw.nrows() == 0 {
            return Err(AnalyticsError::EmptyInput);
        }
        if raw.ncols() != metrics.len() {
            return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
        }

        let n = raw.nrows() as f64;
        let mut means = Array1::zeros(metrics.len());
        let mut stds = Array1::zeros(metrics.len());
        let mut degenerate = vec![false; metrics.len()];

        for (j, column) in raw.columns().into_iter().enumerate() {
            if let Some((row, value)) = column.iter().enumerate().find(|(_, v)| !v.is_finite()) {
                return Err(AnalyticsError::InvalidNumber {
                    row,
                    column: metrics[j].to_string(),
                    value: value.to_string(),
                });
            }

            let mean = column.sum() / n;
            means[j] = mean;

            let first = column[0];
            let std = if raw.nrows() < 2 || column.iter().all(|&v| v == first) {
                0.0
            } else {
                (column.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
            };

            // Covers identical values as well as a variance that under- or overflows
            if std > 0.0 && std.is_finite() {
                stds[j] = std;
                continue;
            }
            match policy {
                ZeroVariancePolicy::Zero => {
                    warn!(
                        "Metric {} has zero variance; standardizing it to 0.0",
                        metrics[j]
                    );
                    degenerate[j] = true;
                }
                ZeroVariancePolicy::Error => {
                    return Err(AnalyticsError::DegenerateColumn(metrics[j].to_string()));
                }
            }
        }

        debug!("Fitted scaler: means={:?} stds={:?}", means, stds);
        Ok(Self {
            metrics: metrics.to_vec(),
            means,
            stds,
            degenerate,
        })
    }

    pub fn metrics(&self) -> &[EngagementMetric] {
        &self.metrics
    }

    pub fn means(&self) -> &Array1<f64> {
        &self.means
    }

    /// Sample standard deviations; zero for degenerate columns
    pub fn stds(&self) -> &Array1<f64> {
        &self.stds
    }

    pub fn is_degenerate(&self, column: usize) -> bool {
        self.degenerate[column]
    }

    /// Column position of `metric`, if it was fitted
    pub fn position(&self, metric: EngagementMetric) -> Option<usize> {
        self.metrics.iter().position(|&m| m == metric)
    }

    fn scale(&self, j: usize, value: f64) -> f64 {
        if self.degenerate[j] {
            0.0
        } else {
            (value - self.means[j]) / self.stds[j]
        }
    }

    fn unscale(&self, j: usize, z: f64) -> f64 {
        if self.degenerate[j] {
            self.means[j]
        } else {
            z * self.stds[j] + self.means[j]
        }
    }

    /// Standardize a raw matrix into a new matrix
    pub fn transform(&self, raw: &Array2<f64>) -> crate::Result<Array2<f64>> {
        self.check_width(raw.ncols())?;
        Ok(Array2::from_shape_fn(raw.dim(), |(i, j)| {
            self.scale(j, raw[[i, j]])
        }))
    }

    /// Map standardized values back to original units
    pub fn inverse_transform(&self, normalized: &Array2<f64>) -> crate::Result<Array2<f64>> {
        self.check_width(normalized.ncols())?;
        Ok(Array2::from_shape_fn(normalized.dim(), |(i, j)| {
            self.unscale(j, normalized[[i, j]])
        }))
    }

    /// Standardize a single raw observation
    pub fn transform_row(&self, values: &[f64]) -> crate::Result<Array1<f64>> {
        self.check_width(values.len())?;
        Ok(values
            .iter()
            .enumerate()
            .map(|(j, &v)| self.scale(j, v))
            .collect())
    }

    pub fn inverse_transform_row(&self, normalized: ArrayView1<f64>) -> crate::Result<Array1<f64>> {
        self.check_width(normalized.len())?;
        Ok(normalized
            .iter()
            .enumerate()
            .map(|(j, &z)| self.unscale(j, z))
            .collect())
    }

    fn check_width(&self, width: usize) -> crate::Result<()> {
        if width != self.metrics.len() {
            return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
        }
        Ok(())
    }
}

/// Standardized engagement metrics, row-aligned with the aggregates they came from
#[derive(Debug, Clone)]
pub struct NormalizedAggregate {
    /// Subscriber id of each row
    pub subscribers: Vec<String>,
    /// Z-scores as ndarray (n_subscribers, n_metrics)
    pub features: Array2<f64>,
    /// Scaler fitted on exactly these rows
    pub scaler: StandardScaler,
}

/// Raw `(n_subscribers, n_metrics)` matrix in original units
pub fn metric_matrix(aggregates: &[EngagementAggregate], metrics: &[EngagementMetric]) -> Array2<f64> {
    Array2::from_shape_fn((aggregates.len(), metrics.len()), |(i, j)| {
        aggregates[i].metric(metrics[j])
    })
}

/// Standardize the selected metrics with this population's own mean and
/// sample standard deviation. The aggregates are only read.
pub fn normalize(
    aggregates: &[EngagementAggregate],
    metrics: &[EngagementMetric],
    policy: ZeroVariancePolicy,
) -> crate::Result<NormalizedAggregate> {
    if aggregates.is_empty() {
        return Err(AnalyticsError::EmptyInput);
    }

    let raw = metric_matrix(aggregates, metrics);
    let scaler = StandardScaler::fit(&raw, metrics, policy)?;
    let features = scaler.transform(&raw)?;

    Ok(NormalizedAggregate {
        subscribers: aggregates.iter().map(|a| a.subscriber.clone()).collect(),
        features,
        scaler,
    })
}
