use chrono::Datelike;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

use super::{Batch, Enricher, Identity, PartitionedWriter, Registry};
use crate::config::{MONTH_YEAR, YEAR, YEAR_TABLE_PREFIX};
use crate::db::schema::year_table_name;
use crate::db::{Pool, Record, SchemaManager, TableChange, Value};
use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Success,
    /// At least one year failed; the others were written
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum YearStatus {
    Created,
    Updated,
    Failed,
}

/// Outcome for one year table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearReport {
    pub table: String,
    pub status: YearStatus,
    pub rows: usize,
    /// Columns this upload added; for a new table only those registry backfill added
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_columns: Option<Vec<String>>,
    pub unique_employees: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one ingestion call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub status: IngestStatus,
    pub total_rows_processed: usize,
    pub employees_synced: usize,
    pub years_processed: BTreeMap<i32, YearReport>,
    pub invalid_dates_dropped: usize,
}

/// Routes a normalized batch through schema evolution, enrichment and the
/// partitioned writer, one year at a time.
#[derive(Debug, Clone)]
pub struct Ingestor {
    registry: Registry,
    schema: SchemaManager,
    writer: PartitionedWriter,
}

impl Ingestor {
    pub fn new(pool: Pool) -> Self {
        let registry = Registry::new(pool.clone());
        let schema = SchemaManager::new(pool.clone());
        let writer =
            PartitionedWriter::new(pool, schema.clone(), Enricher::new(registry.clone()));
        Self {
            registry,
            schema,
            writer,
        }
    }

    /// Ingest a batch. Years are processed in ascending order; a failing year
    /// is reported and does not stop the others.
    pub async fn ingest(&self, batch: Batch) -> Result<IngestReport, IngestError> {
        self.registry.ensure_table().await?;

        let Batch { columns, records } = batch;
        let total_rows_processed = records.len();
        let employees_synced = distinct_identities(&records);

        let mut years_processed = BTreeMap::new();
        for (year, year_records) in group_by_year(records) {
            let rows = year_records.len();
            let unique_employees = distinct_identities(&year_records);

            let report = match self.ingest_year(year, &columns, year_records).await {
                Ok((table, change, rows_written, backfilled)) => {
                    let (status, new_columns) = match change {
                        // A new table only reports columns registry backfill added
                        TableChange::Created if backfilled.is_empty() => {
                            (YearStatus::Created, None)
                        }
                        TableChange::Created => (YearStatus::Created, Some(backfilled)),
                        TableChange::Extended(mut added) => {
                            added.extend(backfilled);
                            (YearStatus::Updated, Some(added))
                        }
                    };
                    YearReport {
                        table,
                        status,
                        rows: rows_written,
                        new_columns,
                        unique_employees,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(year, rows, error = %e, "year failed");
                    YearReport {
                        table: e
                            .table()
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("{YEAR_TABLE_PREFIX}{year}")),
                        status: YearStatus::Failed,
                        rows: 0,
                        new_columns: None,
                        unique_employees,
                        error: Some(e.to_string()),
                    }
                }
            };
            years_processed.insert(year, report);
        }

        let status = if years_processed
            .values()
            .any(|r| r.status == YearStatus::Failed)
        {
            IngestStatus::Partial
        } else {
            IngestStatus::Success
        };

        info!(
            rows = total_rows_processed,
            employees = employees_synced,
            years = years_processed.len(),
            ?status,
            "ingestion finished"
        );

        Ok(IngestReport {
            status,
            total_rows_processed,
            employees_synced,
            years_processed,
            invalid_dates_dropped: 0,
        })
    }

    async fn ingest_year(
        &self,
        year: i32,
        columns: &[String],
        records: Vec<Record>,
    ) -> Result<(String, TableChange, usize, Vec<String>), IngestError> {
        let table = year_table_name(year)?;
        let change = self.schema.ensure_table(&table, columns, &records).await?;
        let outcome = self.writer.write(&table, records).await?;
        Ok((table, change, outcome.rows_written, outcome.backfilled_columns))
    }
}

/// The year a record belongs to: its `year` column, else the year of its `month_year`
fn year_of(record: &Record) -> Option<i32> {
    match (record.get(YEAR), record.get(MONTH_YEAR)) {
        (Some(Value::Integer(year)), _) => i32::try_from(*year).ok(),
        (_, Some(Value::Date(date))) => Some(date.year()),
        _ => None,
    }
}

/// Group records by year, preserving input order within each year
fn group_by_year(records: Vec<Record>) -> BTreeMap<i32, Vec<Record>> {
    let mut groups: BTreeMap<i32, Vec<Record>> = BTreeMap::new();
    let mut skipped = 0usize;

    for record in records {
        match year_of(&record) {
            Some(year) => groups.entry(year).or_default().push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(skipped, "records without a year were not written");
    }
    groups
}

fn distinct_identities(records: &[Record]) -> usize {
    records
        .iter()
        .filter_map(Identity::of)
        .collect::<HashSet<_>>()
        .len()
}
