//! xdrscope: subscriber engagement analytics over xDR session exports
//!
//! This is the main entrypoint that orchestrates loading, aggregation,
//! clustering, reporting and prediction.

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::time::Instant;
use xdrscope::pipeline::{self, EngagementRun, PipelineConfig};
use xdrscope::report::{self, format_number, RunReport};
use xdrscope::{aggregate, load_sessions, predict_tier, Args, SessionTable};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::default().default_filter_or(default_level));

    let prediction = args.parse_prediction_values()?;
    let config = args.to_pipeline_config();
    debug!("Pipeline configuration: {:?}", config);

    let start_time = Instant::now();
    let table = load_table(&args)?;

    let model_start = Instant::now();
    let run = pipeline::run_engagement(&table, &config)
        .context("Engagement analysis failed")?;
    info!("Clustering took {:.2}s", model_start.elapsed().as_secs_f64());

    // Check if in prediction mode
    if let Some(values) = prediction {
        run_prediction_mode(&run, &config, values)?;
    } else {
        run_full_pipeline(&args, &table, &config, run)?;
    }

    info!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

fn load_table(args: &Args) -> Result<SessionTable> {
    let data_start = Instant::now();
    let table = load_sessions(&args.input)
        .with_context(|| format!("Failed to load sessions from {}", args.input))?;
    let table = if args.impute_missing {
        table.impute_missing()
    } else {
        table
    };
    info!(
        "Loaded {} sessions in {:.2}s",
        table.len(),
        data_start.elapsed().as_secs_f64()
    );
    Ok(table)
}

/// Run prediction mode for a single subscriber
fn run_prediction_mode(run: &EngagementRun, config: &PipelineConfig, values: [f64; 3]) -> Result<()> {
    println!("=== Prediction Mode ===");
    println!(
        "Input values: sessions={}, duration={}, traffic={}",
        values[0], values[1], values[2]
    );

    let (cluster, tier) = predict_tier(&run.model, &run.normalized.scaler, &values, config.tier_policy)?;

    println!("\nPredicted cluster: {} ({})", cluster, tier);

    // Show cluster context
    let sizes = run.model.cluster_sizes();
    let total = run.report.subscribers;
    println!(
        "  Size: {} subscribers ({:.1}% of total)",
        sizes[cluster.index()],
        (sizes[cluster.index()] as f64 / total as f64) * 100.0
    );
    if let Some(centroid) = run.report.centroids.get(cluster.index()) {
        println!(
            "  Centroid: sessions={}, duration={}, traffic={}",
            format_number(centroid.original[0]),
            format_number(centroid.original[1]),
            format_number(centroid.original[2])
        );
    }

    Ok(())
}

/// Run the engagement report and, when the table allows it, the user overview
fn run_full_pipeline(
    args: &Args,
    table: &SessionTable,
    config: &PipelineConfig,
    run: EngagementRun,
) -> Result<()> {
    let missing = table.missing_columns(&aggregate::usage_columns());
    let overview = if missing.is_empty() {
        Some(pipeline::run_user_overview(table, config).context("User overview failed")?)
    } else {
        warn!(
            "Skipping user overview, missing columns: {}",
            missing.join(", ")
        );
        None
    };

    if args.json {
        let report = RunReport::new(&args.input, run.report, overview);
        println!("{}", report.to_json()?);
    } else {
        report::print_engagement_report(&run.report);
        if let Some(overview) = &overview {
            report::print_user_overview(overview);
        }
    }

    Ok(())
}
