//! Session table loading, schema validation and missing-value imputation

use crate::error::AnalyticsError;
use crate::schema::{self, Application, IdScheme};
use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Cell spellings treated as a missing value
const MISSING_MARKERS: [&str; 5] = ["", "NaN", "nan", "NA", "\\N"];

/// Download/upload byte counters of one application within one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AppBytes {
    pub dl: Option<f64>,
    pub ul: Option<f64>,
}

/// One network session (xDR row)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionRecord {
    pub msisdn: Option<String>,
    pub imsi: Option<String>,
    pub bearer_id: Option<String>,
    pub duration_ms: Option<f64>,
    pub total_dl: Option<f64>,
    pub total_ul: Option<f64>,
    pub apps: [AppBytes; 7],
    pub handset_type: Option<String>,
    pub handset_manufacturer: Option<String>,
}

impl SessionRecord {
    /// Session keyed by MSISDN carrying only the global counters
    pub fn for_msisdn(msisdn: &str, duration_ms: f64, total_dl: f64, total_ul: f64) -> Self {
        Self {
            msisdn: Some(msisdn.to_string()),
            duration_ms: Some(duration_ms),
            total_dl: Some(total_dl),
            total_ul: Some(total_ul),
            ..Default::default()
        }
    }

    pub fn subscriber(&self, scheme: IdScheme) -> Option<&str> {
        match scheme {
            IdScheme::Msisdn => self.msisdn.as_deref(),
            IdScheme::Imsi => self.imsi.as_deref(),
        }
    }

    pub fn app(&self, app: Application) -> &AppBytes {
        &self.apps[app.index()]
    }

    pub fn app_mut(&mut self, app: Application) -> &mut AppBytes {
        &mut self.apps[app.index()]
    }

    fn numeric_cells(&self) -> Vec<Option<f64>> {
        let mut cells = vec![self.duration_ms, self.total_dl, self.total_ul];
        for bytes in &self.apps {
            cells.push(bytes.dl);
            cells.push(bytes.ul);
        }
        cells
    }

    fn numeric_cells_mut(&mut self) -> Vec<&mut Option<f64>> {
        let mut cells = vec![&mut self.duration_ms, &mut self.total_dl, &mut self.total_ul];
        for bytes in self.apps.iter_mut() {
            cells.push(&mut bytes.dl);
            cells.push(&mut bytes.ul);
        }
        cells
    }
}

/// Session rows together with the set of columns the source provided
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    columns: BTreeSet<String>,
    rows: Vec<SessionRecord>,
}

impl SessionTable {
    pub fn new<I, S>(columns: I, rows: Vec<SessionRecord>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// Table built in memory; every known column counts as present
    pub fn from_records(rows: Vec<SessionRecord>) -> Self {
        Self::new(schema::known_columns(), rows)
    }

    pub fn rows(&self) -> &[SessionRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    pub fn missing_columns<'a>(&self, names: &[&'a str]) -> Vec<&'a str> {
        names
            .iter()
            .copied()
            .filter(|name| !self.has_column(name))
            .collect()
    }

    /// Fail with `MissingColumn` on the first absent column
    pub fn require(&self, names: &[&str]) -> crate::Result<()> {
        match self.missing_columns(names).first() {
            Some(name) => Err(AnalyticsError::MissingColumn(name.to_string())),
            None => Ok(()),
        }
    }

    /// Copy of the table with missing numeric cells set to the column mean and
    /// missing handset fields set to the column mode.
    ///
    /// Identifier cells are left untouched; a row without an identifier still
    /// fails aggregation.
    pub fn impute_missing(&self) -> SessionTable {
        let width = SessionRecord::default().numeric_cells().len();
        let mut sums = vec![0.0; width];
        let mut counts = vec![0usize; width];
        for row in &self.rows {
            for (i, cell) in row.numeric_cells().into_iter().enumerate() {
                if let Some(v) = cell {
                    sums[i] += v;
                    counts[i] += 1;
                }
            }
        }
        let means: Vec<Option<f64>> = sums
            .iter()
            .zip(&counts)
            .map(|(&sum, &count)| (count > 0).then(|| sum / count as f64))
            .collect();

        let handset_mode = mode(self.rows.iter().map(|r| r.handset_type.as_deref()));
        let manufacturer_mode = mode(self.rows.iter().map(|r| r.handset_manufacturer.as_deref()));

        let mut filled = 0usize;
        let mut rows = self.rows.clone();
        for row in rows.iter_mut() {
            for (cell, mean) in row.numeric_cells_mut().into_iter().zip(&means) {
                if cell.is_none() && mean.is_some() {
                    *cell = *mean;
                    filled += 1;
                }
            }
            if row.handset_type.is_none() {
                row.handset_type = handset_mode.clone();
            }
            if row.handset_manufacturer.is_none() {
                row.handset_manufacturer = manufacturer_mode.clone();
            }
        }
        debug!("Imputed {} missing numeric cells", filled);

        SessionTable {
            columns: self.columns.clone(),
            rows,
        }
    }
}

/// Most frequent value; ties go to the lexicographically smallest
fn mode<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values.flatten() {
        *counts.entry(value).or_default() += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value.to_string())
}

/// Header positions of the columns the loader understands
struct ColumnLayout {
    msisdn: Option<usize>,
    imsi: Option<usize>,
    bearer_id: Option<usize>,
    duration_ms: Option<usize>,
    total_dl: Option<usize>,
    total_ul: Option<usize>,
    apps: [(Option<usize>, Option<usize>); 7],
    handset_type: Option<usize>,
    handset_manufacturer: Option<usize>,
}

impl ColumnLayout {
    fn resolve(headers: &StringRecord) -> Self {
        let index: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim(), i))
            .collect();
        let find = |name: &str| index.get(name).copied();

        let mut apps = [(None, None); 7];
        for app in Application::ALL {
            let (dl, ul) = app.columns();
            apps[app.index()] = (find(dl), find(ul));
        }

        Self {
            msisdn: schema::MSISDN_ALIASES.iter().find_map(|alias| find(*alias)),
            imsi: find(schema::IMSI),
            bearer_id: find(schema::BEARER_ID),
            duration_ms: find(schema::DURATION_MS),
            total_dl: find(schema::TOTAL_DL),
            total_ul: find(schema::TOTAL_UL),
            apps,
            handset_type: find(schema::HANDSET_TYPE),
            handset_manufacturer: find(schema::HANDSET_MANUFACTURER),
        }
    }

    /// Canonical names of the columns found in the header
    fn present_columns(&self) -> Vec<&'static str> {
        let mut present = Vec::new();
        let singles = [
            (self.msisdn, schema::MSISDN),
            (self.imsi, schema::IMSI),
            (self.bearer_id, schema::BEARER_ID),
            (self.duration_ms, schema::DURATION_MS),
            (self.total_dl, schema::TOTAL_DL),
            (self.total_ul, schema::TOTAL_UL),
            (self.handset_type, schema::HANDSET_TYPE),
            (self.handset_manufacturer, schema::HANDSET_MANUFACTURER),
        ];
        present.extend(singles.iter().filter(|(i, _)| i.is_some()).map(|(_, n)| *n));
        for app in Application::ALL {
            let (dl_idx, ul_idx) = self.apps[app.index()];
            let (dl, ul) = app.columns();
            if dl_idx.is_some() {
                present.push(dl);
            }
            if ul_idx.is_some() {
                present.push(ul);
            }
        }
        present
    }

    fn parse_row(&self, record: &StringRecord, row: usize) -> crate::Result<SessionRecord> {
        let text = |idx: Option<usize>| -> Option<String> {
            idx.and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|s| !is_missing(s))
                .map(str::to_string)
        };
        let number = |idx: Option<usize>, column: &str| -> crate::Result<Option<f64>> {
            match idx.and_then(|i| record.get(i)) {
                Some(raw) => parse_number(raw, row, column),
                None => Ok(None),
            }
        };

        let mut session = SessionRecord {
            msisdn: text(self.msisdn),
            imsi: text(self.imsi),
            bearer_id: text(self.bearer_id),
            duration_ms: number(self.duration_ms, schema::DURATION_MS)?,
            total_dl: number(self.total_dl, schema::TOTAL_DL)?,
            total_ul: number(self.total_ul, schema::TOTAL_UL)?,
            handset_type: text(self.handset_type),
            handset_manufacturer: text(self.handset_manufacturer),
            ..Default::default()
        };
        for app in Application::ALL {
            let (dl_idx, ul_idx) = self.apps[app.index()];
            let (dl, ul) = app.columns();
            *session.app_mut(app) = AppBytes {
                dl: number(dl_idx, dl)?,
                ul: number(ul_idx, ul)?,
            };
        }
        Ok(session)
    }
}

fn is_missing(raw: &str) -> bool {
    MISSING_MARKERS.contains(&raw.trim())
}

fn parse_number(raw: &str, row: usize, column: &str) -> crate::Result<Option<f64>> {
    let trimmed = raw.trim();
    if is_missing(trimmed) {
        return Ok(None);
    }
    // Durations and byte counters are finite and non-negative
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_nan() => Ok(None),
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(Some(v)),
        _ => Err(AnalyticsError::InvalidNumber {
            row,
            column: column.to_string(),
            value: trimmed.to_string(),
        }),
    }
}

/// Load an xDR CSV export into a session table
///
/// # Arguments
/// * `file_path` - Path to the CSV file with a header row
///
/// # Returns
/// * `SessionTable` with one record per data row
pub fn load_sessions<P: AsRef<Path>>(file_path: P) -> crate::Result<SessionTable> {
    let file = File::open(file_path.as_ref())?;
    info!("Reading sessions from {:?}", file_path.as_ref());
    read_sessions(file)
}

/// Parse sessions from any CSV source.
///
/// Headers are resolved once against the known schema; columns the header
/// lacks are reported here and rejected later by the stage that needs them.
pub fn read_sessions<R: Read>(reader: R) -> crate::Result<SessionTable> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let layout = ColumnLayout::resolve(&headers);
    let present = layout.present_columns();

    let absent: Vec<&str> = schema::known_columns()
        .into_iter()
        .filter(|c| !present.contains(c))
        .collect();
    if !absent.is_empty() {
        warn!("Session table lacks columns: {}", absent.join(", "));
    }

    let mut rows = Vec::new();
    for (row, record) in reader.records().enumerate() {
        rows.push(layout.parse_row(&record?, row)?);
    }
    info!("Parsed {} session rows", rows.len());

    Ok(SessionTable::new(present, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Bearer Id,IMSI,MSISDN/Number,Dur. (ms),Total DL (Bytes),Total UL (Bytes),Youtube DL (Bytes),Youtube UL (Bytes),Handset Type,Handset Manufacturer").unwrap();
        writeln!(file, "1,208201,33664,1000,500,50,300,30,Apple iPhone 6S,Apple").unwrap();
        writeln!(file, "2,208201,33664,,700,70,,40,Apple iPhone 6S,Apple").unwrap();
        writeln!(file, "3,208202,33665,3000,NaN,90,100,10,,Samsung").unwrap();
        file
    }

    #[test]
    fn test_load_sessions() {
        let test_file = create_test_csv();
        let table = load_sessions(test_file.path()).unwrap();

        assert_eq!(table.len(), 3);
        assert!(table.has_column(schema::MSISDN));
        assert!(table.has_column("Youtube DL (Bytes)"));
        assert!(!table.has_column("Netflix DL (Bytes)"));

        let first = &table.rows()[0];
        assert_eq!(first.msisdn.as_deref(), Some("33664"));
        assert_eq!(first.imsi.as_deref(), Some("208201"));
        assert_eq!(first.duration_ms, Some(1000.0));
        assert_eq!(first.app(Application::Youtube).ul, Some(30.0));

        assert_eq!(table.rows()[1].duration_ms, None);
        assert_eq!(table.rows()[2].total_dl, None);
        assert_eq!(table.rows()[2].handset_type, None);
    }

    #[test]
    fn test_msisdn_alias_header() {
        let csv = "MSISDN,Dur. (ms),Total DL (Bytes),Total UL (Bytes)\n42,10,1,2\n";
        let table = read_sessions(csv.as_bytes()).unwrap();
        assert!(table.has_column(schema::MSISDN));
        assert_eq!(table.rows()[0].msisdn.as_deref(), Some("42"));
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let csv = "MSISDN,Dur. (ms),Total DL (Bytes),Total UL (Bytes)\n42,ten,1,2\n";
        let err = read_sessions(csv.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::InvalidNumber { row: 0, ref column, .. } if column == schema::DURATION_MS
        ));
    }

    #[test]
    fn test_infinite_and_negative_numbers_are_rejected() {
        for (cells, column, value) in [
            ("inf,1,2", schema::DURATION_MS, "inf"),
            ("10,infinity,2", schema::TOTAL_DL, "infinity"),
            ("-500,1,2", schema::DURATION_MS, "-500"),
            ("10,1,-2", schema::TOTAL_UL, "-2"),
        ] {
            let csv = format!("MSISDN,Dur. (ms),Total DL (Bytes),Total UL (Bytes)\n42,1,1,1\n7,{}\n", cells);
            let err = read_sessions(csv.as_bytes()).unwrap_err();
            assert!(
                matches!(
                    err,
                    AnalyticsError::InvalidNumber { row: 1, column: ref c, value: ref v } if c == column && v == value
                ),
                "{cells}: {err:?}"
            );
        }
    }

    #[test]
    fn test_require_reports_missing_column() {
        let csv = "MSISDN,Dur. (ms),Total DL (Bytes)\n42,10,1\n";
        let table = read_sessions(csv.as_bytes()).unwrap();
        let err = table
            .require(&[schema::MSISDN, schema::TOTAL_DL, schema::TOTAL_UL])
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::MissingColumn(c) if c == schema::TOTAL_UL));
    }

    #[test]
    fn test_impute_missing() {
        let test_file = create_test_csv();
        let table = load_sessions(test_file.path()).unwrap();
        let filled = table.impute_missing();

        // Original stays untouched
        assert_eq!(table.rows()[1].duration_ms, None);

        assert_eq!(filled.rows()[1].duration_ms, Some(2000.0));
        assert_eq!(filled.rows()[2].total_dl, Some(600.0));
        assert_eq!(filled.rows()[1].app(Application::Youtube).dl, Some(200.0));
        assert_eq!(filled.rows()[2].handset_type.as_deref(), Some("Apple iPhone 6S"));
        // A column that was never present stays empty
        assert_eq!(filled.rows()[0].app(Application::Netflix).dl, None);
    }

    #[test]
    fn test_mode_ties_prefer_smallest() {
        let values = [Some("b"), Some("a"), None, Some("b"), Some("a")];
        assert_eq!(mode(values.into_iter()), Some("a".to_string()));
    }
}
