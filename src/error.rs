//! Error taxonomy shared by every pipeline stage

use thiserror::Error;

/// Errors raised by the analytics pipeline. All of them abort the current run.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("required column `{0}` is missing from the session table")]
    MissingColumn(String),

    #[error("input contains no rows")]
    EmptyInput,

    #[error("row {row}: missing value in required column `{column}`")]
    MissingValue { row: usize, column: String },

    #[error("row {row}: cannot parse `{value}` in column `{column}` as a number")]
    InvalidNumber {
        row: usize,
        column: String,
        value: String,
    },

    #[error("metric `{0}` has zero variance and cannot be standardized")]
    DegenerateColumn(String),

    #[error("invalid cluster count {k}: must be between 1 and {distinct} (distinct input rows)")]
    InvalidK { k: usize, distinct: usize },

    #[error("subscriber `{0}` has no cluster assignment")]
    UnassignedSubscriber(String),

    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}
