//! CSV input discovery and row streaming.
//!
//! An input path is either a single CSV file or a directory whose CSV files
//! are read in name order. Rows are streamed to a visitor one at a time;
//! nothing here interprets the numeric columns.

use crate::error::{CensusError, RowErrorKind};
use crate::models::RawRecord;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Columns every input file must carry.
pub const REQUIRED_COLUMNS: [&str; 3] = ["occupation", "income", "family_size"];

/// Reader settings for CSV input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Lines starting with this byte are skipped.
    pub comment: Option<u8>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            comment: None,
        }
    }
}

impl TryFrom<&crate::config::InputConfig> for CsvOptions {
    type Error = anyhow::Error;

    fn try_from(config: &crate::config::InputConfig) -> Result<Self, Self::Error> {
        let delimiter = ascii_byte("delimiter", config.delimiter)?;
        let comment = config
            .comment
            .map(|c| ascii_byte("comment", c))
            .transpose()?;

        if comment == Some(delimiter) {
            anyhow::bail!(
                "CSV delimiter and comment character must differ, both are {:?}",
                config.delimiter
            );
        }

        Ok(Self { delimiter, comment })
    }
}

fn ascii_byte(name: &str, c: char) -> anyhow::Result<u8> {
    if c.is_ascii() && c != '\n' && c != '\r' {
        Ok(c as u8)
    } else {
        anyhow::bail!("CSV {} must be a single ASCII character, got {:?}", name, c)
    }
}

/// Resolve an input path to the CSV files it names.
///
/// Directories are not searched recursively. Hidden files and files whose
/// name starts with `_` are ignored.
pub fn collect_inputs(path: &Path) -> Result<Vec<PathBuf>, CensusError> {
    let open_err = |source: std::io::Error| CensusError::InputOpen {
        path: path.to_path_buf(),
        source,
    };

    let metadata = fs::metadata(path).map_err(open_err)?;
    if metadata.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| open_err(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || name.starts_with('_') {
            debug!("Ignoring {}", entry.path().display());
            continue;
        }

        let is_csv = entry
            .path()
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if is_csv {
            files.push(entry.into_path());
        }
    }

    if files.is_empty() {
        return Err(CensusError::NoInput {
            path: path.to_path_buf(),
        });
    }

    debug!("Resolved {} input files under {}", files.len(), path.display());
    Ok(files)
}

/// Stream every data row of `path` to `visit`.
///
/// The visitor gets the 1-based line number and either the row's columns or
/// the reason they could not be read. Returns the number of rows visited.
/// Failures of the underlying reader abort the stream.
pub fn for_each_row<F>(path: &Path, options: &CsvOptions, mut visit: F) -> Result<u64, CensusError>
where
    F: FnMut(u64, Result<RawRecord, RowErrorKind>) -> Result<(), CensusError>,
{
    let file = File::open(path).map_err(|source| CensusError::InputOpen {
        path: path.to_path_buf(),
        source,
    })?;

    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .comment(options.comment)
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(file);

    let csv_err = |source: csv::Error| CensusError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let headers = reader.headers().map_err(csv_err)?.clone();
    ensure_required_columns(path, &headers)?;

    let mut visited = 0u64;
    let mut record = StringRecord::new();
    loop {
        let (line, row) = match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                let line = record.position().map(|p| p.line()).unwrap_or(0);
                let row: Result<RawRecord, RowErrorKind> = record
                    .deserialize(Some(&headers))
                    .map_err(|e| RowErrorKind::Malformed {
                        message: e.to_string(),
                    });
                (line, row)
            }
            Err(e) if e.is_io_error() => return Err(csv_err(e)),
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                let message = match e.kind() {
                    csv::ErrorKind::UnequalLengths {
                        expected_len, len, ..
                    } => format!("found {} fields, expected {}", len, expected_len),
                    _ => e.to_string(),
                };
                (line, Err(RowErrorKind::Malformed { message }))
            }
        };

        visited += 1;
        visit(line, row)?;
    }

    debug!("Read {} rows from {}", visited, path.display());
    Ok(visited)
}

fn ensure_required_columns(path: &Path, headers: &StringRecord) -> Result<(), CensusError> {
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(CensusError::MissingColumn {
                path: path.to_path_buf(),
                column,
            });
        }
    }
    Ok(())
}
