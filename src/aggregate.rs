//! Per-subscriber aggregation of session rows

use crate::data::{SessionRecord, SessionTable};
use crate::error::AnalyticsError;
use crate::schema::{self, Application, EngagementMetric, IdScheme};
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;

/// Engagement metrics of one subscriber (MSISDN)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementAggregate {
    pub subscriber: String,
    pub session_count: u64,
    pub total_duration: f64,
    pub total_traffic: f64,
}

impl EngagementAggregate {
    fn empty(subscriber: &str) -> Self {
        Self {
            subscriber: subscriber.to_string(),
            session_count: 0,
            total_duration: 0.0,
            total_traffic: 0.0,
        }
    }

    pub fn metric(&self, metric: EngagementMetric) -> f64 {
        match metric {
            EngagementMetric::SessionCount => self.session_count as f64,
            EngagementMetric::TotalDuration => self.total_duration,
            EngagementMetric::TotalTraffic => self.total_traffic,
        }
    }
}

/// Summed download/upload bytes of one application
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AppUsage {
    pub dl: f64,
    pub ul: f64,
}

impl AppUsage {
    pub fn total(&self) -> f64 {
        self.dl + self.ul
    }
}

/// User overview of one subscriber (IMSI) including the per-application matrix
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageAggregate {
    pub subscriber: String,
    pub session_count: u64,
    pub total_duration: f64,
    pub total_dl: f64,
    pub total_ul: f64,
    pub total_data: f64,
    pub apps: [AppUsage; 7],
}

impl UsageAggregate {
    fn empty(subscriber: &str) -> Self {
        Self {
            subscriber: subscriber.to_string(),
            session_count: 0,
            total_duration: 0.0,
            total_dl: 0.0,
            total_ul: 0.0,
            total_data: 0.0,
            apps: [AppUsage::default(); 7],
        }
    }

    pub fn app(&self, app: Application) -> AppUsage {
        self.apps[app.index()]
    }

    pub fn app_total(&self, app: Application) -> f64 {
        self.app(app).total()
    }
}

/// Columns required by [`aggregate_engagement`]
pub fn engagement_columns() -> Vec<&'static str> {
    vec![
        schema::MSISDN,
        schema::DURATION_MS,
        schema::TOTAL_DL,
        schema::TOTAL_UL,
    ]
}

/// Columns required by [`aggregate_usage`]
pub fn usage_columns() -> Vec<&'static str> {
    let mut columns = vec![
        schema::IMSI,
        schema::DURATION_MS,
        schema::TOTAL_DL,
        schema::TOTAL_UL,
    ];
    columns.extend(schema::application_columns());
    columns
}

/// A present, finite, non-negative cell. NaN counts as missing.
fn required(value: Option<f64>, row: usize, column: &str) -> crate::Result<f64> {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 => Ok(v),
        Some(v) if !v.is_nan() => Err(AnalyticsError::InvalidNumber {
            row,
            column: column.to_string(),
            value: v.to_string(),
        }),
        _ => Err(AnalyticsError::MissingValue {
            row,
            column: column.to_string(),
        }),
    }
}

fn subscriber_of(record: &SessionRecord, scheme: IdScheme, row: usize) -> crate::Result<&str> {
    record
        .subscriber(scheme)
        .ok_or_else(|| AnalyticsError::MissingValue {
            row,
            column: scheme.column().to_string(),
        })
}

fn check_input(table: &SessionTable, columns: &[&str]) -> crate::Result<()> {
    table.require(columns)?;
    if table.is_empty() {
        return Err(AnalyticsError::EmptyInput);
    }
    Ok(())
}

/// Aggregate engagement metrics per MSISDN.
///
/// Traffic is summed per row as DL + UL. Any missing required cell fails the
/// whole aggregation. Output is sorted by subscriber id.
pub fn aggregate_engagement(table: &SessionTable) -> crate::Result<Vec<EngagementAggregate>> {
    check_input(table, &engagement_columns())?;

    let mut groups: BTreeMap<&str, EngagementAggregate> = BTreeMap::new();
    for (row, record) in table.rows().iter().enumerate() {
        let subscriber = subscriber_of(record, IdScheme::Msisdn, row)?;
        let duration = required(record.duration_ms, row, schema::DURATION_MS)?;
        let dl = required(record.total_dl, row, schema::TOTAL_DL)?;
        let ul = required(record.total_ul, row, schema::TOTAL_UL)?;

        let entry = groups
            .entry(subscriber)
            .or_insert_with(|| EngagementAggregate::empty(subscriber));
        entry.session_count += 1;
        entry.total_duration += duration;
        entry.total_traffic += dl + ul;
    }

    info!(
        "Aggregated {} sessions into {} subscribers",
        table.len(),
        groups.len()
    );
    Ok(groups.into_values().collect())
}

/// Aggregate the user overview per IMSI, including per-application DL/UL sums
pub fn aggregate_usage(table: &SessionTable) -> crate::Result<Vec<UsageAggregate>> {
    check_input(table, &usage_columns())?;

    let mut groups: BTreeMap<&str, UsageAggregate> = BTreeMap::new();
    for (row, record) in table.rows().iter().enumerate() {
        let subscriber = subscriber_of(record, IdScheme::Imsi, row)?;
        let duration = required(record.duration_ms, row, schema::DURATION_MS)?;
        let dl = required(record.total_dl, row, schema::TOTAL_DL)?;
        let ul = required(record.total_ul, row, schema::TOTAL_UL)?;

        let mut apps = [AppUsage::default(); 7];
        for app in Application::ALL {
            let (dl_column, ul_column) = app.columns();
            let bytes = record.app(app);
            apps[app.index()] = AppUsage {
                dl: required(bytes.dl, row, dl_column)?,
                ul: required(bytes.ul, row, ul_column)?,
            };
        }

        let entry = groups
            .entry(subscriber)
            .or_insert_with(|| UsageAggregate::empty(subscriber));
        entry.session_count += 1;
        entry.total_duration += duration;
        entry.total_dl += dl;
        entry.total_ul += ul;
        for (total, usage) in entry.apps.iter_mut().zip(apps) {
            total.dl += usage.dl;
            total.ul += usage.ul;
        }
    }

    let mut aggregates: Vec<UsageAggregate> = groups.into_values().collect();
    for aggregate in aggregates.iter_mut() {
        aggregate.total_data = aggregate.total_dl + aggregate.total_ul;
    }

    info!(
        "Aggregated {} sessions into {} user overview rows",
        table.len(),
        aggregates.len()
    );
    Ok(aggregates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage_session(imsi: &str, duration: f64, youtube: (f64, f64)) -> SessionRecord {
        let mut record = SessionRecord {
            imsi: Some(imsi.to_string()),
            duration_ms: Some(duration),
            ..Default::default()
        };
        for app in Application::ALL {
            let bytes = record.app_mut(app);
            bytes.dl = Some(1.0);
            bytes.ul = Some(1.0);
        }
        let youtube_bytes = record.app_mut(Application::Youtube);
        youtube_bytes.dl = Some(youtube.0);
        youtube_bytes.ul = Some(youtube.1);

        let dl: f64 = record.apps.iter().map(|b| b.dl.unwrap()).sum();
        let ul: f64 = record.apps.iter().map(|b| b.ul.unwrap()).sum();
        record.total_dl = Some(dl);
        record.total_ul = Some(ul);
        record
    }

    #[test]
    fn test_engagement_scenario() {
        let table = SessionTable::from_records(vec![
            SessionRecord::for_msisdn("A", 100.0, 50.0, 50.0),
            SessionRecord::for_msisdn("A", 200.0, 100.0, 100.0),
            SessionRecord::for_msisdn("B", 50.0, 10.0, 10.0),
        ]);

        let aggregates = aggregate_engagement(&table).unwrap();
        assert_eq!(
            aggregates,
            vec![
                EngagementAggregate {
                    subscriber: "A".to_string(),
                    session_count: 2,
                    total_duration: 300.0,
                    total_traffic: 300.0,
                },
                EngagementAggregate {
                    subscriber: "B".to_string(),
                    session_count: 1,
                    total_duration: 50.0,
                    total_traffic: 20.0,
                },
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        let table = SessionTable::from_records(Vec::new());
        assert!(matches!(
            aggregate_engagement(&table),
            Err(AnalyticsError::EmptyInput)
        ));
        assert!(matches!(
            aggregate_usage(&table),
            Err(AnalyticsError::EmptyInput)
        ));
    }

    #[test]
    fn test_missing_column() {
        let table = SessionTable::new(
            [schema::MSISDN, schema::DURATION_MS, schema::TOTAL_DL],
            vec![SessionRecord::for_msisdn("A", 1.0, 1.0, 1.0)],
        );
        let err = aggregate_engagement(&table).unwrap_err();
        assert!(matches!(err, AnalyticsError::MissingColumn(c) if c == schema::TOTAL_UL));
    }

    #[test]
    fn test_missing_value_fails_loudly() {
        let mut broken = SessionRecord::for_msisdn("B", 10.0, 1.0, 1.0);
        broken.total_ul = None;
        let table = SessionTable::from_records(vec![
            SessionRecord::for_msisdn("A", 10.0, 1.0, 1.0),
            broken,
        ]);

        let err = aggregate_engagement(&table).unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::MissingValue { row: 1, ref column } if column == schema::TOTAL_UL
        ));
    }

    #[test]
    fn test_non_finite_and_negative_cells_are_rejected() {
        let table = SessionTable::from_records(vec![SessionRecord::for_msisdn("A", f64::NAN, 50.0, 50.0)]);
        assert!(matches!(
            aggregate_engagement(&table),
            Err(AnalyticsError::MissingValue { row: 0, ref column }) if column == schema::DURATION_MS
        ));

        let table = SessionTable::from_records(vec![
            SessionRecord::for_msisdn("A", 10.0, 1.0, 1.0),
            SessionRecord::for_msisdn("B", 10.0, f64::INFINITY, 1.0),
        ]);
        assert!(matches!(
            aggregate_engagement(&table),
            Err(AnalyticsError::InvalidNumber { row: 1, ref column, .. }) if column == schema::TOTAL_DL
        ));

        let table = SessionTable::from_records(vec![SessionRecord::for_msisdn("A", -500.0, 1.0, 2.0)]);
        assert!(matches!(
            aggregate_engagement(&table),
            Err(AnalyticsError::InvalidNumber { row: 0, ref column, ref value }) if column == schema::DURATION_MS && value == "-500"
        ));
    }

    #[test]
    fn test_identifier_schemes_are_not_conflated() {
        // Keyed by IMSI only: the MSISDN aggregation must refuse it
        let table = SessionTable::from_records(vec![usage_session("208201", 10.0, (5.0, 1.0))]);
        let err = aggregate_engagement(&table).unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::MissingValue { ref column, .. } if column == schema::MSISDN
        ));
    }

    #[test]
    fn test_usage_aggregation() {
        let table = SessionTable::from_records(vec![
            usage_session("208201", 10.0, (100.0, 10.0)),
            usage_session("208202", 5.0, (1.0, 1.0)),
            usage_session("208201", 20.0, (200.0, 20.0)),
        ]);

        let usage = aggregate_usage(&table).unwrap();
        assert_eq!(usage.len(), 2);

        let first = &usage[0];
        assert_eq!(first.subscriber, "208201");
        assert_eq!(first.session_count, 2);
        assert_eq!(first.total_duration, 30.0);
        assert_eq!(first.app(Application::Youtube), AppUsage { dl: 300.0, ul: 30.0 });
        assert_eq!(first.app_total(Application::Gaming), 4.0);
        assert_eq!(first.total_data, first.total_dl + first.total_ul);

        let app_sum: f64 = Application::ALL.iter().map(|&a| first.app_total(a)).sum();
        assert_eq!(app_sum, first.total_data);
    }

    #[test]
    fn test_usage_requires_application_columns() {
        let mut columns = usage_columns();
        columns.retain(|c| *c != "Netflix UL (Bytes)");
        let table = SessionTable::new(columns, vec![usage_session("1", 1.0, (1.0, 1.0))]);

        let err = aggregate_usage(&table).unwrap_err();
        assert!(matches!(err, AnalyticsError::MissingColumn(c) if c == "Netflix UL (Bytes)"));
    }
}
