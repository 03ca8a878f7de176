//! Error types for the census pipeline.
//!
//! Every stage returns [`CensusError`] so the caller can tell a bad input
//! file apart from a database failure and pick the exit code accordingly.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code for runtime failures (I/O, database, configuration).
pub const EXIT_RUNTIME: i32 = 1;

/// Exit code for input data that cannot be aggregated.
pub const EXIT_INPUT: i32 = 2;

/// Errors raised while reading, aggregating or persisting census data.
#[derive(Debug, Error)]
pub enum CensusError {
    /// The input path could not be opened.
    #[error("failed to open input '{}': {}", .path.display(), .source)]
    InputOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The input directory contains no CSV files.
    #[error("no CSV files found in '{}'", .path.display())]
    NoInput { path: PathBuf },

    /// The CSV reader failed below the row level.
    #[error("failed to read CSV '{}': {}", .path.display(), .source)]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A required column is absent from the header row.
    #[error("'{}' is missing required column '{}'", .path.display(), .column)]
    MissingColumn { path: PathBuf, column: &'static str },

    /// A row was rejected under the `fail` policy.
    #[error("invalid record: {0}")]
    InvalidRecord(RowError),

    #[error("invalid container name '{0}' (expected 1-64 of [A-Za-z0-9_-])")]
    InvalidContainerName(String),

    /// The database could not be opened.
    #[error("failed to open database '{}': {}", .path.display(), .source)]
    Connection {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A database statement failed.
    #[error("database error while {context}: {source}")]
    Database {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// An existing container lacks expected columns or the occupation key.
    #[error("container '{}' exists but lacks: {}", .name, .missing.join(", "))]
    ContainerSchema { name: String, missing: Vec<String> },
}

impl CensusError {
    /// Wrap a rusqlite error with a short description of the operation.
    pub fn database(context: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Database {
            context: context.into(),
            source,
        }
    }

    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CensusError::NoInput { .. }
            | CensusError::MissingColumn { .. }
            | CensusError::InvalidRecord(_) => EXIT_INPUT,
            _ => EXIT_RUNTIME,
        }
    }
}

/// Why a single row was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowErrorKind {
    /// A numeric column did not hold a base-10 integer in range.
    InvalidInteger { field: &'static str, value: String },
    /// The occupation column was blank.
    EmptyOccupation,
    /// The CSV layer could not map the row onto the expected columns.
    Malformed { message: String },
}

impl fmt::Display for RowErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowErrorKind::InvalidInteger { field, value } => {
                write!(f, "{} '{}' is not a valid integer", field, value)
            }
            RowErrorKind::EmptyOccupation => write!(f, "occupation is empty"),
            RowErrorKind::Malformed { message } => write!(f, "malformed row: {}", message),
        }
    }
}

/// A rejected row and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    /// Source file.
    pub path: PathBuf,
    /// 1-based line number in the source file.
    pub line: u64,
    /// What was wrong with the row.
    #[serde(flatten)]
    pub kind: RowErrorKind,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.path.display(), self.line, self.kind)
    }
}
