use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::Enricher;
use crate::config::SALARY_KEY_COLUMNS;
use crate::db::pool::Transaction;
use crate::db::{ColumnTypeMap, Pool, Record, SchemaManager};
use crate::error::IngestError;

/// Result of writing one table's batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    pub rows_written: usize,
    /// Columns added because enrichment introduced them
    pub backfilled_columns: Vec<String>,
}

/// Writes enriched records into a year table with full-row replace semantics
#[derive(Debug, Clone)]
pub struct PartitionedWriter {
    pool: Pool,
    schema: SchemaManager,
    enricher: Enricher,
}

impl PartitionedWriter {
    pub fn new(pool: Pool, schema: SchemaManager, enricher: Enricher) -> Self {
        Self {
            pool,
            schema,
            enricher,
        }
    }

    /// Enrich `records` and replace their rows in `table`.
    ///
    /// All rows are written in one transaction; the first failing row rolls
    /// back the whole batch.
    pub async fn write(
        &self,
        table: &str,
        records: Vec<Record>,
    ) -> Result<WriteOutcome, IngestError> {
        let records = self.enricher.enrich(records).await;

        // Registry backfill may introduce columns the table has never seen
        let columns = carried_columns(&records);
        let backfilled_columns = self.schema.extend_table(table, &columns, &records).await?;
        if !backfilled_columns.is_empty() {
            debug!(table, columns = ?backfilled_columns, "added backfilled columns");
        }

        let types = self.schema.column_types(table).await;
        let records: Vec<Record> = records
            .into_iter()
            .map(|record| coerce_record(record, &types))
            .collect();

        let attempted = records.len();
        self.replace_all(table, &records, &types)
            .await
            .map_err(|source| IngestError::Write {
                table: table.to_string(),
                attempted,
                source,
            })?;

        info!(table, rows = attempted, "wrote rows");
        Ok(WriteOutcome {
            rows_written: attempted,
            backfilled_columns,
        })
    }

    async fn replace_all(
        &self,
        table: &str,
        records: &[Record],
        types: &ColumnTypeMap,
    ) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        match replace_rows(&mut tx, table, records, types).await {
            Ok(()) => tx.commit().await,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(table, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

async fn replace_rows(
    tx: &mut Transaction<'_>,
    table: &str,
    records: &[Record],
    types: &ColumnTypeMap,
) -> Result<(), sqlx::Error> {
    for record in records {
        tx.replace_row(table, &SALARY_KEY_COLUMNS, record, types)
            .await?;
    }
    Ok(())
}

/// Every column present in at least one record, in first-seen order
fn carried_columns(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for column in records.iter().flat_map(|record| record.keys()) {
        if seen.insert(column.as_str()) {
            columns.push(column.clone());
        }
    }
    columns
}

/// Integer-family columns get numeric coercion (null on failure); everything else passes through
fn coerce_record(record: Record, types: &ColumnTypeMap) -> Record {
    record
        .into_iter()
        .map(|(column, value)| {
            let value = match types.get(&column) {
                Some(sql_type) if sql_type.is_integer() => value.coerce_integer(),
                _ => value,
            };
            (column, value)
        })
        .collect()
}
