#![forbid(unsafe_code)]

use sqh_core::MAX_TRACKED_COLUMNS;

#[derive(Debug)]
pub enum StoreError {
    Sql(rusqlite::Error),
    Introspection {
        table: String,
        source: rusqlite::Error,
    },
    Configure {
        table: String,
        source: rusqlite::Error,
    },
    UnknownTable(String),
    TooManyColumns {
        table: String,
        count: usize,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::Introspection { table, source } => {
                write!(f, "failed to read schema for table {table}: {source}")
            }
            Self::Configure { table, source } => {
                write!(f, "failed to configure history for table {table}: {source}")
            }
            Self::UnknownTable(table) => write!(f, "no such table: {table}"),
            Self::TooManyColumns { table, count } => write!(
                f,
                "table {table} has {count} columns; at most {MAX_TRACKED_COLUMNS} can be tracked"
            ),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}
