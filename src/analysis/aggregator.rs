//! Per-occupation aggregation.
//!
//! Folds census records into a [`StatsTable`]. The fold is order
//! independent: any permutation of the input, or any split of it into
//! tables merged afterwards, gives the same result.

use crate::error::{CensusError, RowError, RowErrorKind};
use crate::models::{InvalidRowPolicy, RawRecord, Record, StatsTable};
use std::path::Path;
use tracing::warn;

/// Aggregate already validated records.
pub fn aggregate<'a, I>(records: I) -> StatsTable
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut table = StatsTable::new();
    fold_into(&mut table, records);
    table
}

/// Fold validated records into an existing table.
pub fn fold_into<'a, I>(table: &mut StatsTable, records: I)
where
    I: IntoIterator<Item = &'a Record>,
{
    for record in records {
        table.observe(record);
    }
}

/// Occupations ordered by income spread (max - min), widest first.
pub fn widest_income_ranges(table: &StatsTable, n: usize) -> Vec<(&String, i64)> {
    let mut ranges: Vec<_> = table
        .iter()
        .map(|(occupation, stats)| {
            (
                occupation,
                stats.max_income.saturating_sub(stats.min_income),
            )
        })
        .collect();

    // Stable sort keeps ties in occupation order.
    ranges.sort_by_key(|(_, spread)| std::cmp::Reverse(*spread));
    ranges.truncate(n);
    ranges
}

/// Result of aggregating raw rows.
#[derive(Debug, Clone, Default)]
pub struct AggregateOutcome {
    pub table: StatsTable,
    /// Rows handed to the aggregator, valid or not.
    pub rows_read: u64,
    /// Rows folded into the table.
    pub rows_accepted: u64,
    /// Rows left out under [`InvalidRowPolicy::Skip`].
    pub rejected: Vec<RowError>,
}

impl AggregateOutcome {
    /// Fold the outcome of another input into this one.
    pub fn absorb(&mut self, other: AggregateOutcome) {
        self.table.merge(&other.table);
        self.rows_read += other.rows_read;
        self.rows_accepted += other.rows_accepted;
        self.rejected.extend(other.rejected);
    }
}

/// Incremental aggregator over raw CSV rows.
#[derive(Debug)]
pub struct Aggregator {
    policy: InvalidRowPolicy,
    outcome: AggregateOutcome,
}

impl Aggregator {
    pub fn new(policy: InvalidRowPolicy) -> Self {
        Self {
            policy,
            outcome: AggregateOutcome::default(),
        }
    }

    /// Validate and fold one row.
    ///
    /// `row` is either the deserialized columns or the reason the CSV layer
    /// could not produce them. Invalid rows fail the run or are recorded,
    /// depending on the policy.
    pub fn observe_row(
        &mut self,
        path: &Path,
        line: u64,
        row: Result<RawRecord, RowErrorKind>,
    ) -> Result<(), CensusError> {
        self.outcome.rows_read += 1;

        match row.and_then(|raw| Record::parse(&raw)) {
            Ok(record) => {
                fold_into(&mut self.outcome.table, [&record]);
                self.outcome.rows_accepted += 1;
                Ok(())
            }
            Err(kind) => {
                let error = RowError {
                    path: path.to_path_buf(),
                    line,
                    kind,
                };
                match self.policy {
                    InvalidRowPolicy::Fail => Err(CensusError::InvalidRecord(error)),
                    InvalidRowPolicy::Skip => {
                        warn!("Skipping {}", error);
                        self.outcome.rejected.push(error);
                        Ok(())
                    }
                }
            }
        }
    }

    pub fn finish(self) -> AggregateOutcome {
        self.outcome
    }
}
