//! Console and JSON rendering of pipeline results

use crate::pipeline::{EngagementReport, UserOverviewReport};
use crate::schema::EngagementMetric;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Full run output as emitted with `--json`
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub input: String,
    pub engagement: EngagementReport,
    pub user_overview: Option<UserOverviewReport>,
}

impl RunReport {
    pub fn new(
        input: &str,
        engagement: EngagementReport,
        user_overview: Option<UserOverviewReport>,
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            input: input.to_string(),
            engagement,
            user_overview,
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Format a number with thousands separators and two decimals, e.g. `1,234.50`
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let formatted = format!("{:.2}", value.abs());
    let (integer, fraction) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if value < 0.0 && formatted.chars().any(|c| c != '0' && c != '.') {
        "-"
    } else {
        ""
    };
    format!("{}{}.{}", sign, grouped, fraction)
}

/// Print cluster statistics to console
pub fn print_engagement_report(report: &EngagementReport) {
    println!("\n=== Engagement Clusters ===");
    println!("Total subscribers: {}", report.subscribers);
    println!(
        "Iterations: {} ({})",
        report.diagnostics.iterations,
        if report.diagnostics.converged {
            "converged"
        } else {
            "iteration cap reached"
        }
    );
    println!("Within-cluster sum of squares (Inertia): {:.2}", report.diagnostics.inertia);
    println!("Silhouette score (sample): {:.3}", report.diagnostics.silhouette);

    println!("\nCluster sizes:");
    for (i, &size) in report.diagnostics.sizes.iter().enumerate() {
        let percentage = (size as f64 / report.subscribers as f64) * 100.0;
        println!("  Cluster {}: {} subscribers ({:.1}%)", i, size, percentage);
    }

    println!("\nCluster centroids (original units):");
    println!("  Cluster | Tier              | Sessions     | Duration (ms)     | Traffic (Bytes)");
    println!("  --------|-------------------|--------------|-------------------|--------------------");
    for centroid in &report.centroids {
        println!(
            "  {:7} | {:17} | {:>12} | {:>17} | {:>18}",
            centroid.cluster.index(),
            centroid.tier,
            format_number(centroid.original[0]),
            format_number(centroid.original[1]),
            format_number(centroid.original[2]),
        );
    }

    println!("\nCluster summary (min / max / mean / sum):");
    for row in &report.summary.clusters {
        println!("  Cluster {} - {} ({} subscribers)", row.cluster, row.tier, row.subscribers);
        for metric in EngagementMetric::ALL {
            let stats = row.metric(metric);
            println!(
                "    {:15} {:>18} {:>18} {:>18} {:>20}",
                metric.as_str(),
                format_number(stats.min),
                format_number(stats.max),
                format_number(stats.mean),
                format_number(stats.sum),
            );
        }
    }

    for (metric, leaders) in &report.top {
        println!("\nTop {} subscribers by {}:", leaders.len(), metric);
        for leader in leaders {
            println!(
                "  {:>3}. {:20} {:>20}",
                leader.rank,
                leader.subscriber,
                format_number(leader.value)
            );
        }
    }
}

pub fn print_user_overview(report: &UserOverviewReport) {
    println!("\n=== User Overview ===");
    println!("Total subscribers (IMSI): {}", report.subscribers);

    println!("\nDuration deciles (1-5):");
    println!("  Decile | Subscribers | Total data (Bytes)");
    for decile in &report.deciles {
        println!(
            "  {:6} | {:11} | {:>20}",
            decile.decile,
            decile.subscribers,
            format_number(decile.total_data)
        );
    }

    println!("\nDispersion:");
    println!(
        "  {:22} {:>16} {:>16} {:>16} {:>16} {:>16}",
        "Column", "Std dev", "Q25", "Median", "Q75", "Range"
    );
    for row in &report.dispersion {
        println!(
            "  {:22} {:>16} {:>16} {:>16} {:>16} {:>16}",
            row.column,
            row.std_dev.map(format_number).unwrap_or_else(|| "-".to_string()),
            format_number(row.q25),
            format_number(row.median),
            format_number(row.q75),
            format_number(row.range),
        );
    }

    for (app, leaders) in &report.application_leaders {
        println!("\nTop {} subscribers for {}:", leaders.len(), app);
        for leader in leaders {
            println!(
                "  {:>3}. {:20} {:>20}",
                leader.rank,
                leader.subscriber,
                format_number(leader.value)
            );
        }
    }

    if let Some(handsets) = &report.handsets {
        println!("\nTop handsets:");
        for item in &handsets.top_handsets {
            println!("  {:40} {:>8}", item.name, item.sessions);
        }
        println!("\nTop manufacturers:");
        for maker in &handsets.per_manufacturer {
            println!("  {} ({} sessions)", maker.manufacturer, maker.sessions);
            for item in &maker.handsets {
                println!("    {:38} {:>8}", item.name, item.sessions);
            }
        }
    }
}
