#![forbid(unsafe_code)]

mod error;

pub use error::StoreError;

use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, params};
use sqh_core::{
    Column, MAX_TRACKED_COLUMNS, backfill_sql, history_table_name, history_table_sql, triggers_sql,
};
use std::path::Path;
use std::time::Duration;

/// Outcome of configuring one table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigureOutcome {
    /// History table, triggers, and backfill were all created.
    Configured,
    /// The history table already existed; nothing was touched.
    Skipped,
}

/// Owns the single connection. One transaction at a time; tables are
/// configured strictly sequentially.
#[derive(Debug)]
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    /// Opens an existing database. The file is not created here; callers
    /// decide how to report a missing path.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            db_path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self { conn })
    }

    pub fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Ordered column list for a table, straight from the catalog. The
    /// reported order is the single source of truth for mask bit
    /// assignment downstream.
    pub fn table_columns(&self, table: &str) -> Result<Vec<Column>, StoreError> {
        let introspection = |source: rusqlite::Error| StoreError::Introspection {
            table: table.to_string(),
            source,
        };
        let mut stmt = self
            .conn
            .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(introspection)?;
        let columns = stmt
            .query_map(params![table], |row| {
                Ok(Column {
                    name: row.get(0)?,
                    decl_type: row.get(1)?,
                })
            })
            .map_err(introspection)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(introspection)?;
        if columns.is_empty() {
            // pragma_table_info answers with zero rows for a missing table.
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        Ok(columns)
    }

    /// All regular tables: everything in the catalog minus FTS virtual
    /// tables, their shadow tables (which share the virtual table's name as
    /// a prefix), and SQLite's own bookkeeping tables.
    pub fn regular_tables(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table'
             AND (
                 sql LIKE '%VIRTUAL TABLE%USING FTS%'
                 OR name IN ('sqlite_sequence', 'sqlite_stat1', 'sqlite_stat2',
                             'sqlite_stat3', 'sqlite_stat4')
             )",
        )?;
        let hidden = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
        let all = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(all
            .into_iter()
            .filter(|name| !hidden.iter().any(|prefix| name.starts_with(prefix.as_str())))
            .collect())
    }

    /// Sets up history tracking for one table: create the history table and
    /// its index, install the three triggers, backfill current rows, all in
    /// one transaction. A failed step rolls the whole transaction back, so
    /// either every artifact exists afterwards or none do.
    ///
    /// Re-running over an already-tracked table is a no-op `Skipped`.
    pub fn configure(&mut self, table: &str) -> Result<ConfigureOutcome, StoreError> {
        if self.table_exists(&history_table_name(table))? {
            return Ok(ConfigureOutcome::Skipped);
        }
        let columns = self.table_columns(table)?;
        // Mask bits live in a signed 64-bit integer; a wider table would wrap
        // the insert/backfill mask into the delete sentinel.
        if columns.len() > MAX_TRACKED_COLUMNS {
            return Err(StoreError::TooManyColumns {
                table: table.to_string(),
                count: columns.len(),
            });
        }

        let configure_err = |source: rusqlite::Error| StoreError::Configure {
            table: table.to_string(),
            source,
        };
        let tx = self.conn.transaction().map_err(configure_err)?;
        install_history(&tx, table, &columns).map_err(configure_err)?;
        tx.commit().map_err(configure_err)?;
        Ok(ConfigureOutcome::Configured)
    }
}

fn install_history(
    tx: &Transaction<'_>,
    table: &str,
    columns: &[Column],
) -> Result<(), rusqlite::Error> {
    tx.execute_batch(&history_table_sql(table, columns))?;
    let triggers = triggers_sql(table, columns);
    tx.execute_batch(&triggers.insert)?;
    tx.execute_batch(&triggers.update)?;
    tx.execute_batch(&triggers.delete)?;
    // Backfill runs after the triggers exist, but the rows it writes are the
    // same shape the insert trigger would have produced.
    tx.execute_batch(&backfill_sql(table, columns))?;
    Ok(())
}
