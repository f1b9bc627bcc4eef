//! Column names of the xDR session table and the enumerated mappings built on them

use crate::error::AnalyticsError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub const MSISDN: &str = "MSISDN/Number";
pub const IMSI: &str = "IMSI";
pub const BEARER_ID: &str = "Bearer Id";
pub const DURATION_MS: &str = "Dur. (ms)";
pub const TOTAL_DL: &str = "Total DL (Bytes)";
pub const TOTAL_UL: &str = "Total UL (Bytes)";
pub const HANDSET_TYPE: &str = "Handset Type";
pub const HANDSET_MANUFACTURER: &str = "Handset Manufacturer";

/// Header spellings accepted for the MSISDN column
pub const MSISDN_ALIASES: [&str; 2] = [MSISDN, "MSISDN"];

/// Application categories tracked with their own byte counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Application {
    #[serde(rename = "Social Media")]
    SocialMedia,
    Google,
    Email,
    Youtube,
    Netflix,
    Gaming,
    Other,
}

impl Application {
    pub const ALL: [Application; 7] = [
        Application::SocialMedia,
        Application::Google,
        Application::Email,
        Application::Youtube,
        Application::Netflix,
        Application::Gaming,
        Application::Other,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Application::SocialMedia => "Social Media",
            Application::Google => "Google",
            Application::Email => "Email",
            Application::Youtube => "Youtube",
            Application::Netflix => "Netflix",
            Application::Gaming => "Gaming",
            Application::Other => "Other",
        }
    }

    /// (download, upload) column names for this application
    pub fn columns(self) -> (&'static str, &'static str) {
        match self {
            Application::SocialMedia => ("Social Media DL (Bytes)", "Social Media UL (Bytes)"),
            Application::Google => ("Google DL (Bytes)", "Google UL (Bytes)"),
            Application::Email => ("Email DL (Bytes)", "Email UL (Bytes)"),
            Application::Youtube => ("Youtube DL (Bytes)", "Youtube UL (Bytes)"),
            Application::Netflix => ("Netflix DL (Bytes)", "Netflix UL (Bytes)"),
            Application::Gaming => ("Gaming DL (Bytes)", "Gaming UL (Bytes)"),
            Application::Other => ("Other DL (Bytes)", "Other UL (Bytes)"),
        }
    }

    /// Position of this application in per-application arrays
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// All 14 per-application byte columns, download before upload
pub fn application_columns() -> Vec<&'static str> {
    Application::ALL
        .iter()
        .flat_map(|app| {
            let (dl, ul) = app.columns();
            [dl, ul]
        })
        .collect()
}

/// Every column the loader understands, under its canonical name
pub fn known_columns() -> Vec<&'static str> {
    let mut columns = vec![MSISDN, IMSI, BEARER_ID, DURATION_MS, TOTAL_DL, TOTAL_UL];
    columns.extend(application_columns());
    columns.extend([HANDSET_TYPE, HANDSET_MANUFACTURER]);
    columns
}

/// Identifier scheme used to group sessions.
///
/// MSISDN identifies the line (phone number), IMSI the subscriber identity
/// module. Reports keyed by one are never joined against reports keyed by
/// the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IdScheme {
    Msisdn,
    Imsi,
}

impl IdScheme {
    pub fn column(self) -> &'static str {
        match self {
            IdScheme::Msisdn => MSISDN,
            IdScheme::Imsi => IMSI,
        }
    }
}

/// The three engagement metrics clustering is based on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementMetric {
    SessionCount,
    TotalDuration,
    TotalTraffic,
}

impl EngagementMetric {
    pub const ALL: [EngagementMetric; 3] = [
        EngagementMetric::SessionCount,
        EngagementMetric::TotalDuration,
        EngagementMetric::TotalTraffic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EngagementMetric::SessionCount => "session_count",
            EngagementMetric::TotalDuration => "total_duration",
            EngagementMetric::TotalTraffic => "total_traffic",
        }
    }
}

impl fmt::Display for EngagementMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngagementMetric {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "session_count" | "sessions_frequency" => Ok(EngagementMetric::SessionCount),
            "total_duration" | "session_duration" => Ok(EngagementMetric::TotalDuration),
            "total_traffic" => Ok(EngagementMetric::TotalTraffic),
            other => Err(AnalyticsError::UnknownMetric(other.to_string())),
        }
    }
}
