//! Persistence of occupation statistics.
//!
//! A store is opened explicitly, handed to the code that writes, and closed
//! when the run is done. Containers are created if absent and rows are
//! upserted by occupation, so repeated runs never duplicate rows.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::CensusError;
use crate::models::{ContainerName, ContainerStatus, StatsTable};

/// Column layout of a statistics container, in order.
pub const CONTAINER_COLUMNS: [&str; 6] = [
    "occupation",
    "minIncome",
    "maxIncome",
    "minFamilySize",
    "maxFamilySize",
    "updatedAt",
];

/// A database that can hold occupation statistics.
pub trait StatsStore {
    /// Make sure the container exists with the expected columns.
    fn ensure_container(&mut self, name: &ContainerName) -> Result<ContainerStatus, CensusError>;

    /// Write every occupation in `table`, replacing stored rows with the
    /// same occupation. Returns the number of rows written.
    fn upsert_stats(
        &mut self,
        name: &ContainerName,
        table: &StatsTable,
    ) -> Result<usize, CensusError>;

    /// Read a container back into a table.
    fn fetch_stats(&self, name: &ContainerName) -> Result<StatsTable, CensusError>;

    fn row_count(&self, name: &ContainerName) -> Result<usize, CensusError>;

    /// Release the connection, reporting any failure to do so.
    fn close(self) -> Result<(), CensusError>
    where
        Self: Sized;
}
