//! Data models for census statistics.
//!
//! This module contains the record types read from CSV, the per-occupation
//! statistics built from them, and the names used for database containers.

use crate::error::{CensusError, RowError, RowErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// What to do with a row that cannot be parsed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum InvalidRowPolicy {
    /// Abort the run on the first invalid row (default)
    #[default]
    Fail,
    /// Log the row, leave it out of the statistics, and continue
    Skip,
}

impl fmt::Display for InvalidRowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidRowPolicy::Fail => write!(f, "fail"),
            InvalidRowPolicy::Skip => write!(f, "skip"),
        }
    }
}

/// A CSV row as read, before any numeric validation.
///
/// Columns are matched by header name; other columns are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawRecord {
    pub occupation: String,
    pub income: String,
    pub family_size: String,
}

/// A validated census record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub occupation: String,
    pub income: i64,
    pub family_size: i32,
}

impl Record {
    pub fn new(occupation: impl Into<String>, income: i64, family_size: i32) -> Self {
        Self {
            occupation: occupation.into(),
            income,
            family_size,
        }
    }

    /// Validate a raw row. Numbers must be base-10 integers in range.
    pub fn parse(raw: &RawRecord) -> Result<Self, RowErrorKind> {
        let occupation = raw.occupation.trim();
        if occupation.is_empty() {
            return Err(RowErrorKind::EmptyOccupation);
        }

        Ok(Self {
            occupation: occupation.to_string(),
            income: parse_integer("income", &raw.income)?,
            family_size: parse_integer("family_size", &raw.family_size)?,
        })
    }
}

fn parse_integer<T: FromStr>(field: &'static str, value: &str) -> Result<T, RowErrorKind> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| RowErrorKind::InvalidInteger {
            field,
            value: value.to_string(),
        })
}

/// Income and family size bounds for one occupation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupationStats {
    pub min_income: i64,
    pub max_income: i64,
    pub min_family_size: i32,
    pub max_family_size: i32,
}

impl OccupationStats {
    /// Stats seeded from a single observation.
    pub fn new(income: i64, family_size: i32) -> Self {
        Self {
            min_income: income,
            max_income: income,
            min_family_size: family_size,
            max_family_size: family_size,
        }
    }

    /// Widen the bounds to include one more observation.
    pub fn observe(&mut self, income: i64, family_size: i32) {
        self.min_income = self.min_income.min(income);
        self.max_income = self.max_income.max(income);
        self.min_family_size = self.min_family_size.min(family_size);
        self.max_family_size = self.max_family_size.max(family_size);
    }

    /// Widen the bounds to include everything `other` has seen.
    pub fn merge(&mut self, other: &OccupationStats) {
        self.min_income = self.min_income.min(other.min_income);
        self.max_income = self.max_income.max(other.max_income);
        self.min_family_size = self.min_family_size.min(other.min_family_size);
        self.max_family_size = self.max_family_size.max(other.max_family_size);
    }
}

/// Statistics keyed by occupation, iterated in occupation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsTable {
    entries: BTreeMap<String, OccupationStats>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the table.
    pub fn observe(&mut self, record: &Record) {
        match self.entries.get_mut(&record.occupation) {
            Some(stats) => stats.observe(record.income, record.family_size),
            None => {
                self.entries.insert(
                    record.occupation.clone(),
                    OccupationStats::new(record.income, record.family_size),
                );
            }
        }
    }

    /// Combine another table into this one.
    pub fn merge(&mut self, other: &StatsTable) {
        for (occupation, stats) in &other.entries {
            self.entries
                .entry(occupation.clone())
                .and_modify(|existing| existing.merge(stats))
                .or_insert(*stats);
        }
    }

    #[allow(dead_code)] // Lookup by key; output paths iterate instead
    pub fn get(&self, occupation: &str) -> Option<&OccupationStats> {
        self.entries.get(occupation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OccupationStats)> {
        self.entries.iter()
    }
}

impl FromIterator<(String, OccupationStats)> for StatsTable {
    fn from_iter<I: IntoIterator<Item = (String, OccupationStats)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A validated database container (table) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ContainerName(String);

impl ContainerName {
    const MAX_LEN: usize = 64;

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name quoted for use as an SQL identifier.
    ///
    /// Valid names never contain quotes, so no escaping is needed.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl FromStr for ContainerName {
    type Err = CensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.len() <= Self::MAX_LEN
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(CensusError::InvalidContainerName(s.to_string()))
        }
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a container was found or had to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Existing,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Existing => write!(f, "existing"),
        }
    }
}

/// Metadata about a statistics run.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    /// CSV files that were read.
    pub inputs: Vec<PathBuf>,
    /// Database file, if the run wrote to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// Container written to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_status: Option<ContainerStatus>,
    /// Date and time the report was generated.
    pub generated_at: DateTime<Utc>,
    pub rows_read: u64,
    pub rows_accepted: u64,
    pub rows_rejected: u64,
    /// Rows written to the container.
    pub rows_written: usize,
    /// Duration of the run in seconds.
    pub duration_seconds: f64,
}

/// The complete statistics report.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub metadata: ReportMetadata,
    pub statistics: StatsTable,
    /// Rows left out of the statistics.
    pub rejected: Vec<RowError>,
}
