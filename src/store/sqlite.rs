//! SQLite-backed statistics store.

use super::{StatsStore, CONTAINER_COLUMNS};
use crate::error::CensusError;
use crate::models::{ContainerName, ContainerStatus, OccupationStats, StatsTable};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// A statistics store in a SQLite database file.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, CensusError> {
        Self::open_with_flags(path, busy_timeout, OpenFlags::default())
    }

    /// Open the database at `path`, failing if the file does not exist.
    pub fn open_existing(path: &Path, busy_timeout: Duration) -> Result<Self, CensusError> {
        Self::open_with_flags(
            path,
            busy_timeout,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )
    }

    fn open_with_flags(
        path: &Path,
        busy_timeout: Duration,
        flags: OpenFlags,
    ) -> Result<Self, CensusError> {
        let conn_err = |source: rusqlite::Error| CensusError::Connection {
            path: path.to_path_buf(),
            source,
        };

        let conn = Connection::open_with_flags(path, flags).map_err(conn_err)?;
        conn.busy_timeout(busy_timeout).map_err(conn_err)?;

        debug!("Opened database {}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open a private in-memory database.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, CensusError> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|source| CensusError::Connection {
            path: path.clone(),
            source,
        })?;
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a trivial query and return the SQLite library version.
    pub fn check_connection(&self) -> Result<String, CensusError> {
        self.conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))
            .map_err(|e| CensusError::database("checking the connection", e))
    }

    fn container_exists(&self, name: &ContainerName) -> Result<bool, CensusError> {
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name.as_str()],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(|e| CensusError::database(format!("looking up container '{}'", name), e))
    }

    fn container_columns(&self, name: &ContainerName) -> Result<Vec<String>, CensusError> {
        let context = || format!("reading columns of container '{}'", name);

        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", name.quoted()))
            .map_err(|e| CensusError::database(context(), e))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| CensusError::database(context(), e))?;

        Ok(columns)
    }

    /// Whether `occupation` alone is the primary key or a full unique index.
    /// `ON CONFLICT(occupation)` needs one of the two.
    fn has_occupation_key(&self, name: &ContainerName) -> Result<bool, CensusError> {
        let context = || format!("reading keys of container '{}'", name);

        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", name.quoted()))
            .map_err(|e| CensusError::database(context(), e))?;
        let primary_key: Vec<String> = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(5)?)))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| CensusError::database(context(), e))?
            .into_iter()
            .filter(|(_, pk)| *pk > 0)
            .map(|(column, _)| column)
            .collect();
        if is_occupation_only(&primary_key) {
            return Ok(true);
        }

        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA index_list({})", name.quoted()))
            .map_err(|e| CensusError::database(context(), e))?;
        let unique_indexes: Vec<String> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| CensusError::database(context(), e))?
            .into_iter()
            .filter(|(_, unique, partial)| *unique == 1 && *partial == 0)
            .map(|(index, _, _)| index)
            .collect();

        for index in unique_indexes {
            let mut stmt = self
                .conn
                .prepare(&format!("PRAGMA index_info(\"{}\")", index.replace('"', "\"\"")))
                .map_err(|e| CensusError::database(context(), e))?;
            let columns = stmt
                .query_map([], |row| row.get::<_, Option<String>>(2))
                .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
                .map_err(|e| CensusError::database(context(), e))?;
            let columns: Option<Vec<String>> = columns.into_iter().collect();
            if columns.map_or(false, |columns| is_occupation_only(&columns)) {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

fn is_occupation_only(columns: &[String]) -> bool {
    matches!(columns, [only] if only.eq_ignore_ascii_case("occupation"))
}

impl StatsStore for SqliteStore {
    fn ensure_container(&mut self, name: &ContainerName) -> Result<ContainerStatus, CensusError> {
        if self.container_exists(name)? {
            let columns = self.container_columns(name)?;
            let mut missing: Vec<String> = CONTAINER_COLUMNS
                .iter()
                .filter(|expected| !columns.iter().any(|c| c.eq_ignore_ascii_case(expected)))
                .map(|c| format!("column {}", c))
                .collect();

            if missing.is_empty() && !self.has_occupation_key(name)? {
                missing.push("unique key on occupation".to_string());
            }

            if !missing.is_empty() {
                return Err(CensusError::ContainerSchema {
                    name: name.to_string(),
                    missing,
                });
            }

            info!("Container '{}' already exists", name);
            return Ok(ContainerStatus::Existing);
        }

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                occupation TEXT PRIMARY KEY NOT NULL,
                minIncome INTEGER NOT NULL,
                maxIncome INTEGER NOT NULL,
                minFamilySize INTEGER NOT NULL,
                maxFamilySize INTEGER NOT NULL,
                updatedAt TEXT NOT NULL
            )",
            name.quoted()
        );
        self.conn
            .execute_batch(&sql)
            .map_err(|e| CensusError::database(format!("creating container '{}'", name), e))?;

        info!("Created container '{}'", name);
        Ok(ContainerStatus::Created)
    }

    fn upsert_stats(
        &mut self,
        name: &ContainerName,
        table: &StatsTable,
    ) -> Result<usize, CensusError> {
        let context = || format!("writing to container '{}'", name);
        let updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let tx = self
            .conn
            .transaction()
            .map_err(|e| CensusError::database(context(), e))?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {} (occupation, minIncome, maxIncome, minFamilySize, maxFamilySize, updatedAt)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(occupation) DO UPDATE SET
                        minIncome = excluded.minIncome,
                        maxIncome = excluded.maxIncome,
                        minFamilySize = excluded.minFamilySize,
                        maxFamilySize = excluded.maxFamilySize,
                        updatedAt = excluded.updatedAt",
                    name.quoted()
                ))
                .map_err(|e| CensusError::database(context(), e))?;

            for (occupation, stats) in table.iter() {
                stmt.execute(params![
                    occupation,
                    stats.min_income,
                    stats.max_income,
                    stats.min_family_size,
                    stats.max_family_size,
                    updated_at,
                ])
                .map_err(|e| CensusError::database(context(), e))?;
            }
        }
        tx.commit().map_err(|e| CensusError::database(context(), e))?;

        debug!("Upserted {} rows into '{}'", table.len(), name);
        Ok(table.len())
    }

    fn fetch_stats(&self, name: &ContainerName) -> Result<StatsTable, CensusError> {
        let context = || format!("reading container '{}'", name);

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT occupation, minIncome, maxIncome, minFamilySize, maxFamilySize
                 FROM {} ORDER BY occupation",
                name.quoted()
            ))
            .map_err(|e| CensusError::database(context(), e))?;

        let table = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    OccupationStats {
                        min_income: row.get(1)?,
                        max_income: row.get(2)?,
                        min_family_size: row.get(3)?,
                        max_family_size: row.get(4)?,
                    },
                ))
            })
            .and_then(|rows| rows.collect::<Result<StatsTable, _>>())
            .map_err(|e| CensusError::database(context(), e))?;

        Ok(table)
    }

    fn row_count(&self, name: &ContainerName) -> Result<usize, CensusError> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", name.quoted()), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|count| count as usize)
            .map_err(|e| CensusError::database(format!("counting rows of '{}'", name), e))
    }

    fn close(self) -> Result<(), CensusError> {
        let path = self.path;
        self.conn
            .close()
            .map_err(|(_, e)| CensusError::database(format!("closing '{}'", path.display()), e))?;
        debug!("Closed database {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use tempfile::TempDir;

    fn container(name: &str) -> ContainerName {
        name.parse().unwrap()
    }

    fn sample_table() -> StatsTable {
        let mut table = StatsTable::new();
        table.observe(&Record::new("Clerk", 30000, 2));
        table.observe(&Record::new("Clerk", 45000, 4));
        table.observe(&Record::new("Engineer", 80000, 3));
        table
    }

    #[test]
    fn test_check_connection() {
        let store = SqliteStore::open_in_memory().unwrap();
        let version = store.check_connection().unwrap();
        assert!(version.starts_with('3'));
    }

    #[test]
    fn test_ensure_container_is_idempotent() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let name = container("census-analysis");

        assert_eq!(store.ensure_container(&name).unwrap(), ContainerStatus::Created);
        assert_eq!(store.ensure_container(&name).unwrap(), ContainerStatus::Existing);
        assert_eq!(store.row_count(&name).unwrap(), 0);
    }

    #[test]
    fn test_upsert_and_fetch() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let name = container("occupation_statistics");
        store.ensure_container(&name).unwrap();

        let table = sample_table();
        assert_eq!(store.upsert_stats(&name, &table).unwrap(), 2);
        assert_eq!(store.fetch_stats(&name).unwrap(), table);
    }

    #[test]
    fn test_upsert_replaces_rows_by_occupation() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let name = container("occupation_stats");
        store.ensure_container(&name).unwrap();

        store.upsert_stats(&name, &sample_table()).unwrap();

        let mut second = StatsTable::new();
        second.observe(&Record::new("Clerk", 10000, 1));
        second.observe(&Record::new("Nurse", 52000, 5));
        store.upsert_stats(&name, &second).unwrap();

        assert_eq!(store.row_count(&name).unwrap(), 3);
        let stored = store.fetch_stats(&name).unwrap();
        assert_eq!(stored.get("Clerk"), Some(&OccupationStats::new(10000, 1)));
        assert_eq!(stored.get("Engineer"), Some(&OccupationStats::new(80000, 3)));
        assert_eq!(stored.get("Nurse"), Some(&OccupationStats::new(52000, 5)));
    }

    #[test]
    fn test_existing_container_with_wrong_schema() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .execute_batch("CREATE TABLE legacy (id INTEGER, occupation TEXT, minIncome INTEGER)")
            .unwrap();

        let err = store.ensure_container(&container("legacy")).unwrap_err();
        match err {
            CensusError::ContainerSchema { name, missing } => {
                assert_eq!(name, "legacy");
                assert_eq!(
                    missing,
                    vec![
                        "column maxIncome",
                        "column minFamilySize",
                        "column maxFamilySize",
                        "column updatedAt"
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_existing_container_without_occupation_key() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .execute_batch(
                "CREATE TABLE keyless (
                    id INTEGER PRIMARY KEY,
                    occupation TEXT,
                    minIncome INTEGER,
                    maxIncome INTEGER,
                    minFamilySize INTEGER,
                    maxFamilySize INTEGER,
                    updatedAt TEXT
                )",
            )
            .unwrap();

        let err = store.ensure_container(&container("keyless")).unwrap_err();
        match err {
            CensusError::ContainerSchema { name, missing } => {
                assert_eq!(name, "keyless");
                assert_eq!(missing, vec!["unique key on occupation"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_existing_container_with_unique_index_on_occupation() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .execute_batch(
                "CREATE TABLE indexed (
                    id INTEGER PRIMARY KEY,
                    occupation TEXT,
                    minIncome INTEGER,
                    maxIncome INTEGER,
                    minFamilySize INTEGER,
                    maxFamilySize INTEGER,
                    updatedAt TEXT
                );
                CREATE UNIQUE INDEX indexed_occupation ON indexed (occupation);",
            )
            .unwrap();

        let name = container("indexed");
        assert_eq!(store.ensure_container(&name).unwrap(), ContainerStatus::Existing);
        assert_eq!(store.upsert_stats(&name, &sample_table()).unwrap(), 2);
        assert_eq!(store.upsert_stats(&name, &sample_table()).unwrap(), 2);
        assert_eq!(store.row_count(&name).unwrap(), 2);
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("census.db");
        let name = container("occupation_statistics");

        let mut store = SqliteStore::open(&path, Duration::from_millis(100)).unwrap();
        store.ensure_container(&name).unwrap();
        store.upsert_stats(&name, &sample_table()).unwrap();
        store.close().unwrap();

        let mut reopened = SqliteStore::open(&path, Duration::from_millis(100)).unwrap();
        assert_eq!(reopened.ensure_container(&name).unwrap(), ContainerStatus::Existing);
        assert_eq!(reopened.fetch_stats(&name).unwrap(), sample_table());
        reopened.close().unwrap();
    }

    #[test]
    fn test_check_connection_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("typo.db");

        let err = SqliteStore::open_existing(&path, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, CensusError::Connection { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_open_existing_reads_written_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("census.db");
        let name = container("occupation_statistics");

        let mut store = SqliteStore::open(&path, Duration::from_millis(100)).unwrap();
        store.ensure_container(&name).unwrap();
        store.upsert_stats(&name, &sample_table()).unwrap();
        store.close().unwrap();

        let existing = SqliteStore::open_existing(&path, Duration::from_millis(100)).unwrap();
        assert!(existing.check_connection().unwrap().starts_with('3'));
        assert_eq!(existing.fetch_stats(&name).unwrap(), sample_table());
        existing.close().unwrap();
    }

    #[test]
    fn test_open_unwritable_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("census.db");
        let err = SqliteStore::open(&path, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, CensusError::Connection { .. }));
    }
}
