//! Top-N leaderboards, handset rankings and duration deciles

use crate::aggregate::{EngagementAggregate, UsageAggregate};
use crate::data::SessionTable;
use crate::error::AnalyticsError;
use crate::schema::{self, Application, EngagementMetric};
use crate::stats::quantile_sorted;
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

pub const DEFAULT_TOP_N: usize = 10;
pub const DECILE_COUNT: usize = 10;
/// Deciles kept in the duration segmentation report
pub const REPORTED_DECILES: usize = 5;

/// One leaderboard entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedSubscriber {
    pub rank: usize,
    pub subscriber: String,
    pub value: f64,
}

/// Descending by value; equal values keep their input order
fn rank_descending<'a>(entries: impl Iterator<Item = (&'a str, f64)>, n: usize) -> Vec<RankedSubscriber> {
    let mut entries: Vec<(&str, f64)> = entries.collect();
    entries.sort_by(|a, b| b.1.total_cmp(&a.1));
    entries
        .into_iter()
        .take(n)
        .enumerate()
        .map(|(i, (subscriber, value))| RankedSubscriber {
            rank: i + 1,
            subscriber: subscriber.to_string(),
            value,
        })
        .collect()
}

/// Top `n` subscribers by the named engagement metric
pub fn top_n(
    aggregates: &[EngagementAggregate],
    metric: &str,
    n: usize,
) -> crate::Result<Vec<RankedSubscriber>> {
    let metric: EngagementMetric = metric.parse()?;
    Ok(top_by_metric(aggregates, metric, n))
}

pub fn top_by_metric(
    aggregates: &[EngagementAggregate],
    metric: EngagementMetric,
    n: usize,
) -> Vec<RankedSubscriber> {
    rank_descending(
        aggregates.iter().map(|a| (a.subscriber.as_str(), a.metric(metric))),
        n,
    )
}

/// Independent top-`n` list of DL + UL traffic for every application
pub fn top_per_application(
    usage: &[UsageAggregate],
    n: usize,
) -> BTreeMap<Application, Vec<RankedSubscriber>> {
    Application::ALL
        .iter()
        .map(|&app| {
            let ranked = rank_descending(
                usage.iter().map(|u| (u.subscriber.as_str(), u.app_total(app))),
                n,
            );
            (app, ranked)
        })
        .collect()
}

/// Data volume of one duration decile
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecileSummary {
    pub decile: usize,
    pub total_data: f64,
    pub subscribers: usize,
}

/// Equal-frequency bin (1-based) of every value.
///
/// Bin edges are the 0%, 10%, ..., 100% quantiles. Repeated edges are merged,
/// so a column with few distinct values yields fewer than ten bins; the
/// lowest edge belongs to the first bin.
pub fn assign_deciles(values: &[f64]) -> Vec<usize> {
    if values.is_empty() {
        return Vec::new();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut edges: Vec<f64> = (0..=DECILE_COUNT)
        .map(|q| quantile_sorted(&sorted, q as f64 / DECILE_COUNT as f64))
        .collect();
    edges.dedup();
    if edges.len() < DECILE_COUNT + 1 {
        debug!(
            "Duration deciles collapsed to {} bins",
            edges.len().saturating_sub(1).max(1)
        );
    }

    values
        .iter()
        .map(|&v| {
            edges[1..]
                .iter()
                .position(|&edge| v <= edge)
                .map_or(1, |i| i + 1)
        })
        .collect()
}

/// Segment subscribers by total session duration and report the data volume
/// and unique subscriber count of the first five deciles
pub fn segment_by_duration(usage: &[UsageAggregate]) -> crate::Result<Vec<DecileSummary>> {
    if usage.is_empty() {
        return Err(AnalyticsError::EmptyInput);
    }
    let durations: Vec<f64> = usage.iter().map(|u| u.total_duration).collect();
    let deciles = assign_deciles(&durations);

    let mut bins: BTreeMap<usize, (f64, HashSet<&str>)> = BTreeMap::new();
    for (row, decile) in usage.iter().zip(deciles) {
        if decile > REPORTED_DECILES {
            continue;
        }
        let (total, subscribers) = bins.entry(decile).or_default();
        *total += row.total_data;
        subscribers.insert(row.subscriber.as_str());
    }

    Ok(bins
        .into_iter()
        .map(|(decile, (total_data, subscribers))| DecileSummary {
            decile,
            total_data,
            subscribers: subscribers.len(),
        })
        .collect())
}

/// A categorical value with its session count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountedItem {
    pub name: String,
    pub sessions: usize,
}

/// Handsets of one manufacturer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManufacturerHandsets {
    pub manufacturer: String,
    pub sessions: usize,
    pub handsets: Vec<CountedItem>,
}

/// Count occurrences, most frequent first, ties by name
fn value_counts<'a>(values: impl Iterator<Item = &'a str>, n: usize) -> Vec<CountedItem> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    let mut items: Vec<(&str, usize)> = counts.into_iter().collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    items
        .into_iter()
        .take(n)
        .map(|(name, sessions)| CountedItem {
            name: name.to_string(),
            sessions,
        })
        .collect()
}

/// Most used handset types by session count
pub fn top_handsets(table: &SessionTable, n: usize) -> crate::Result<Vec<CountedItem>> {
    table.require(&[schema::HANDSET_TYPE])?;
    Ok(value_counts(
        table.rows().iter().filter_map(|r| r.handset_type.as_deref()),
        n,
    ))
}

/// Most common handset manufacturers by session count
pub fn top_manufacturers(table: &SessionTable, n: usize) -> crate::Result<Vec<CountedItem>> {
    table.require(&[schema::HANDSET_MANUFACTURER])?;
    Ok(value_counts(
        table.rows().iter().filter_map(|r| r.handset_manufacturer.as_deref()),
        n,
    ))
}

/// Top `handsets` handset types within each of the top `manufacturers`
pub fn top_handsets_per_manufacturer(
    table: &SessionTable,
    manufacturers: usize,
    handsets: usize,
) -> crate::Result<Vec<ManufacturerHandsets>> {
    table.require(&[schema::HANDSET_TYPE])?;
    let leaders = top_manufacturers(table, manufacturers)?;

    Ok(leaders
        .into_iter()
        .map(|leader| {
            let models = table
                .rows()
                .iter()
                .filter(|r| r.handset_manufacturer.as_deref() == Some(leader.name.as_str()))
                .filter_map(|r| r.handset_type.as_deref());
            ManufacturerHandsets {
                handsets: value_counts(models, handsets),
                manufacturer: leader.name,
                sessions: leader.sessions,
            }
        })
        .collect())
}
