//! Descriptive statistics over the user overview table

use crate::aggregate::UsageAggregate;
use crate::error::AnalyticsError;
use crate::schema::Application;
use ndarray::Array2;
use serde::Serialize;

/// A named numeric column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// mean, median, std, min and max of one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicMetrics {
    pub column: String,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; undefined for a single value
    pub std: Option<f64>,
    pub min: f64,
    pub max: f64,
}

/// Spread of one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispersion {
    pub column: String,
    pub std_dev: Option<f64>,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
    pub range: f64,
}

/// Pearson correlation between named columns
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Array2<f64>,
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Standard deviation with an n - 1 denominator
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Quantile of sorted values with linear interpolation between ranks
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

fn sorted_copy(column: &Column) -> crate::Result<Vec<f64>> {
    if column.values.is_empty() {
        return Err(AnalyticsError::EmptyInput);
    }
    let mut sorted = column.values.clone();
    sorted.sort_by(f64::total_cmp);
    Ok(sorted)
}

pub fn describe(columns: &[Column]) -> crate::Result<Vec<BasicMetrics>> {
    columns
        .iter()
        .map(|column| {
            let sorted = sorted_copy(column)?;
            Ok(BasicMetrics {
                column: column.name.clone(),
                mean: mean(&sorted).unwrap_or_default(),
                median: quantile_sorted(&sorted, 0.5),
                std: sample_std(&sorted),
                min: sorted[0],
                max: sorted[sorted.len() - 1],
            })
        })
        .collect()
}

pub fn dispersion(columns: &[Column]) -> crate::Result<Vec<Dispersion>> {
    columns
        .iter()
        .map(|column| {
            let sorted = sorted_copy(column)?;
            let min = sorted[0];
            let max = sorted[sorted.len() - 1];
            Ok(Dispersion {
                column: column.name.clone(),
                std_dev: sample_std(&sorted),
                min,
                q25: quantile_sorted(&sorted, 0.25),
                median: quantile_sorted(&sorted, 0.5),
                q75: quantile_sorted(&sorted, 0.75),
                max,
                range: max - min,
            })
        })
        .collect()
}

/// Numeric columns of the user overview table
pub fn usage_columns(usage: &[UsageAggregate]) -> Vec<Column> {
    let mut columns = vec![
        Column::new("num_sessions", usage.iter().map(|u| u.session_count as f64).collect()),
        Column::new("total_duration", usage.iter().map(|u| u.total_duration).collect()),
        Column::new("total_data", usage.iter().map(|u| u.total_data).collect()),
    ];
    columns.extend(application_columns(usage));
    columns
}

/// Per-application DL + UL totals, one column per application
pub fn application_columns(usage: &[UsageAggregate]) -> Vec<Column> {
    Application::ALL
        .iter()
        .map(|&app| {
            Column::new(
                format!("{} Total", app),
                usage.iter().map(|u| u.app_total(app)).collect(),
            )
        })
        .collect()
}

/// Pearson correlation. A constant column correlates 0 with anything else.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let (Some(mean_a), Some(mean_b)) = (mean(a), mean(b)) else {
        return 0.0;
    };
    let mut covariance = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        covariance += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    covariance / (var_a.sqrt() * var_b.sqrt())
}

/// Correlation between the columns; the diagonal is always 1
pub fn correlation_matrix(columns: &[Column]) -> CorrelationMatrix {
    let n = columns.len();
    let values = Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            1.0
        } else {
            pearson(&columns[i].values, &columns[j].values)
        }
    });
    CorrelationMatrix {
        columns: columns.iter().map(|c| c.name.clone()).collect(),
        values,
    }
}
