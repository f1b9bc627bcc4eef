//! xdrscope: engagement and usage analytics over telecom session records (xDR)
//!
//! Sessions are aggregated per subscriber, standardized and segmented into
//! engagement tiers with K-Means clustering. A sibling user overview ranks
//! subscribers per application and segments them by session duration.

pub mod aggregate;
pub mod cli;
pub mod data;
pub mod error;
pub mod leaderboard;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod stats;
pub mod summary;

// Re-export public items for easier access
pub use aggregate::{aggregate_engagement, aggregate_usage, EngagementAggregate, UsageAggregate};
pub use cli::Args;
pub use data::{load_sessions, read_sessions, SessionRecord, SessionTable};
pub use error::AnalyticsError;
pub use model::{cluster, fit_kmeans, predict_tier, ClusterId, KMeansConfig, KMeansModel, TierPolicy};
pub use normalize::{normalize, NormalizedAggregate, StandardScaler, ZeroVariancePolicy};
pub use pipeline::{run_engagement, run_user_overview, PipelineConfig};
pub use schema::{Application, EngagementMetric, IdScheme};
pub use summary::{summarize, ClusterSummary};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, AnalyticsError>;
