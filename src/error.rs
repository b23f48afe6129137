use thiserror::Error;

/// Fatal ingestion failures surfaced to callers.
///
/// Recoverable conditions (introspection errors, numeric coercion failures,
/// registry upsert failures) never reach this type; they are handled where
/// they occur.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid table identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Failed to create table {table}: {source}")]
    CreateTable {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to add column {column} to {table}: {source}")]
    AddColumn {
        table: String,
        column: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to write {attempted} records into {table}: {source}")]
    Write {
        table: String,
        attempted: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to upsert {attempted} records into the employee registry: {source}")]
    Registry {
        attempted: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("All {count} rows have invalid month_year values. Sample values: {}", .samples.join(", "))]
    NoValidDates { count: usize, samples: Vec<String> },

    #[error("{count} rows have invalid month_year values at rows {rows:?}. Sample values: {}", .samples.join(", "))]
    InvalidDates {
        count: usize,
        rows: Vec<usize>,
        samples: Vec<String>,
    },
}

impl IngestError {
    /// The table a storage failure relates to, if any
    pub fn table(&self) -> Option<&str> {
        match self {
            IngestError::CreateTable { table, .. }
            | IngestError::AddColumn { table, .. }
            | IngestError::Write { table, .. } => Some(table),
            _ => None,
        }
    }
}
