//! Command-line interface definitions and argument parsing

use crate::leaderboard::DEFAULT_TOP_N;
use crate::model::{KMeansConfig, TierPolicy, DEFAULT_CLUSTERS, DEFAULT_MAX_ITERATIONS, DEFAULT_SEED};
use crate::normalize::ZeroVariancePolicy;
use crate::pipeline::PipelineConfig;
use clap::Parser;

/// Subscriber engagement analytics over xDR session exports
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long, default_value = "xdr_data.csv")]
    pub input: String,

    /// Number of engagement clusters
    #[arg(short = 'k', long, default_value_t = DEFAULT_CLUSTERS)]
    pub clusters: usize,

    /// Seed for centroid initialization
    #[arg(short, long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Maximum iterations for K-Means algorithm
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    pub max_iters: usize,

    /// Length of every leaderboard
    #[arg(short = 'n', long, default_value_t = DEFAULT_TOP_N)]
    pub top: usize,

    /// How tier names are attached to clusters
    #[arg(long, value_enum, default_value_t = TierPolicy::RankedByTraffic)]
    pub tier_policy: TierPolicy,

    /// What to do with a metric whose values are all identical
    #[arg(long, value_enum, default_value_t = ZeroVariancePolicy::Zero)]
    pub zero_variance: ZeroVariancePolicy,

    /// Fill missing numeric cells with the column mean and handset fields with the mode
    #[arg(long)]
    pub impute_missing: bool,

    /// Prediction mode: engagement values as comma-separated string
    /// Example: --predict "12,360000,1500000000" for sessions, duration (ms), traffic (bytes)
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Print the full report as JSON instead of tables
    #[arg(long)]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse engagement values from the predict string
    /// Expected format: "sessions,duration,traffic"
    pub fn parse_prediction_values(&self) -> anyhow::Result<Option<[f64; 3]>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let parts: Vec<&str> = predict_str.split(',').collect();
        if parts.len() != 3 {
            anyhow::bail!("Predict values must be in format 'sessions,duration,traffic'");
        }

        let mut values = [0.0; 3];
        for ((value, part), name) in values
            .iter_mut()
            .zip(&parts)
            .zip(["sessions", "duration", "traffic"])
        {
            *value = part
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid {} value: {}", name, part))?;
        }
        Ok(Some(values))
    }

    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            kmeans: KMeansConfig {
                n_clusters: self.clusters,
                max_iterations: self.max_iters,
                seed: self.seed,
            },
            zero_variance: self.zero_variance,
            tier_policy: self.tier_policy,
            top_n: self.top,
            ..Default::default()
        }
    }
}
