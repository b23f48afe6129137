//! Employee master registry.
//!
//! Holds the durable attributes of each employee keyed by (person_no,
//! personnel_area). Writes merge field by field; stale duplicates left by
//! out-of-order ingestion are removed only by an explicit cleanup.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::Identity;
use crate::config::{
    CURRENCY_PRECISION, CURRENCY_SCALE, FOR_PERIOD, IDENTITY_TEXT_CAPACITY, MASTER_TABLE,
    MONTH_YEAR, PERSON_NO, PERSONNEL_AREA, REGISTRY_SAMPLE_SIZE,
};
use crate::db::pool::Transaction;
use crate::db::schema::quote_ident;
use crate::db::value::Bind;
use crate::db::{ColumnTypeMap, Pool, Record, SqlType, Upsert, Value};
use crate::error::IngestError;

/// Every column the registry stores
pub const MASTER_FIELDS: [&str; 22] = [
    PERSON_NO,
    "employee_name",
    "designation",
    MONTH_YEAR,
    FOR_PERIOD,
    PERSONNEL_AREA,
    "personnel_subarea",
    "employee_group",
    "employee_subgroup",
    "pay_scale_type",
    "pay_scale_area",
    "pay_scale_group",
    "pay_scale_level",
    "bank_account_number",
    "ifsc_code",
    "pf_number",
    "aadhar_no",
    "pan_no",
    "profit_center",
    "cost_center",
    "basic_pay",
    "basic_pay_adjustment",
];

/// Attributes copied from the registry into salary records that lack them.
/// The writable fields minus identity and reporting period.
pub const TRANSFERABLE_FIELDS: [&str; 18] = [
    "employee_name",
    "designation",
    "personnel_subarea",
    "employee_group",
    "employee_subgroup",
    "pay_scale_type",
    "pay_scale_area",
    "pay_scale_group",
    "pay_scale_level",
    "bank_account_number",
    "ifsc_code",
    "pf_number",
    "aadhar_no",
    "pan_no",
    "profit_center",
    "cost_center",
    "basic_pay",
    "basic_pay_adjustment",
];

const IDENTITY_COLUMNS: [&str; 2] = [PERSON_NO, PERSONNEL_AREA];

const IDENTITY_INDEX: &str = "employee_master_identity_idx";

/// Storage type of a registry column
fn master_column_type(column: &str) -> SqlType {
    match column {
        PERSON_NO | PERSONNEL_AREA => SqlType::Varchar(IDENTITY_TEXT_CAPACITY),
        MONTH_YEAR => SqlType::Date,
        "basic_pay" | "basic_pay_adjustment" => {
            SqlType::Numeric(CURRENCY_PRECISION, CURRENCY_SCALE)
        }
        _ => SqlType::Text,
    }
}

/// Counts from one `batch_upsert` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    /// Records without a usable identity
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    pub duplicates_removed: u64,
    pub unique_employees_remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStats {
    pub total_employees: i64,
    pub unique_employees: i64,
    /// Identities with more than one stored record
    pub duplicates_found: i64,
    /// Most recent records by month_year
    pub sample_records: Vec<Record>,
}

/// Handle to the employee master table
#[derive(Debug, Clone)]
pub struct Registry {
    pool: Pool,
    column_types: ColumnTypeMap,
}

impl Registry {
    pub fn new(pool: Pool) -> Self {
        let column_types = MASTER_FIELDS
            .iter()
            .map(|field| (field.to_string(), master_column_type(field)))
            .collect();
        Self { pool, column_types }
    }

    /// Create the registry table and its identity index if missing
    pub async fn ensure_table(&self) -> Result<(), IngestError> {
        let columns: Vec<String> = MASTER_FIELDS
            .iter()
            .map(|field| {
                let not_null = if IDENTITY_COLUMNS.contains(field) {
                    " NOT NULL"
                } else {
                    ""
                };
                format!(
                    "  {} {}{}",
                    quote_ident(field),
                    master_column_type(field).to_sql(),
                    not_null
                )
            })
            .collect();

        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            quote_ident(MASTER_TABLE),
            columns.join(",\n")
        );
        let index = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({}, {})",
            quote_ident(IDENTITY_INDEX),
            quote_ident(MASTER_TABLE),
            quote_ident(PERSON_NO),
            quote_ident(PERSONNEL_AREA)
        );

        for ddl in [create, index] {
            self.pool
                .execute_query(&ddl)
                .await
                .map_err(|source| IngestError::CreateTable {
                    table: MASTER_TABLE.to_string(),
                    source,
                })?;
        }

        debug!(table = MASTER_TABLE, "registry table ready");
        Ok(())
    }

    /// Look up one employee. With stale duplicates present, the latest month_year wins.
    pub async fn get(
        &self,
        person_no: &str,
        personnel_area: &str,
    ) -> Result<Option<Record>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let backend = conn.backend();
        let sql = format!(
            "SELECT * FROM {} WHERE {} = {} AND {} = {}",
            quote_ident(MASTER_TABLE),
            quote_ident(PERSON_NO),
            backend.placeholder(1),
            quote_ident(PERSONNEL_AREA),
            backend.placeholder(2)
        );
        let rows = conn
            .fetch_records(
                &sql,
                &[
                    Bind::Text(Some(person_no.trim().to_string())),
                    Bind::Text(Some(personnel_area.trim().to_string())),
                ],
            )
            .await?;

        Ok(rows.into_iter().reduce(latest))
    }

    /// Load the whole registry as an identity lookup
    pub async fn get_all(&self) -> Result<HashMap<Identity, Record>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT * FROM {}", quote_ident(MASTER_TABLE));
        let rows = conn.fetch_records(&sql, &[]).await?;

        let mut lookup: HashMap<Identity, Record> = HashMap::with_capacity(rows.len());
        for row in rows {
            let Some(identity) = Identity::of(&row) else {
                continue;
            };
            let winner = match lookup.remove(&identity) {
                Some(current) => latest(current, row),
                None => row,
            };
            lookup.insert(identity, winner);
        }

        Ok(lookup)
    }

    /// Merge every record carrying a full identity into the registry.
    ///
    /// Runs in one transaction: if any record fails, nothing from this batch
    /// is kept.
    pub async fn batch_upsert(&self, records: &[Record]) -> Result<UpsertSummary, IngestError> {
        let candidates: Vec<Record> = records.iter().filter_map(project).collect();
        let mut summary = UpsertSummary {
            skipped: records.len() - candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            return Ok(summary);
        }

        let attempted = candidates.len();
        let registry_error = |source| IngestError::Registry { attempted, source };

        let mut conn = self.pool.acquire().await.map_err(registry_error)?;
        let mut tx = conn.begin().await.map_err(registry_error)?;

        match self.upsert_all(&mut tx, &candidates, &mut summary).await {
            Ok(()) => tx.commit().await.map_err(registry_error)?,
            Err(source) => {
                if let Err(e) = tx.rollback().await {
                    warn!(error = %e, "registry rollback failed");
                }
                return Err(registry_error(source));
            }
        }

        info!(
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            "registry upserted"
        );
        Ok(summary)
    }

    async fn upsert_all(
        &self,
        tx: &mut Transaction<'_>,
        candidates: &[Record],
        summary: &mut UpsertSummary,
    ) -> Result<(), sqlx::Error> {
        for record in candidates {
            match tx
                .merge_upsert(MASTER_TABLE, &IDENTITY_COLUMNS, record, &self.column_types)
                .await?
            {
                Upsert::Inserted => summary.inserted += 1,
                Upsert::Updated => summary.updated += 1,
            }
        }
        Ok(())
    }

    /// Remove every record older than the latest month_year of its identity
    pub async fn cleanup(&self) -> Result<CleanupReport, sqlx::Error> {
        let table = quote_ident(MASTER_TABLE);
        let (person_no, area, month_year) = (
            quote_ident(PERSON_NO),
            quote_ident(PERSONNEL_AREA),
            quote_ident(MONTH_YEAR),
        );
        let sql = format!(
            "DELETE FROM {table} WHERE {month_year} < (\
                SELECT MAX(m.{month_year}) FROM {table} m \
                WHERE m.{person_no} = {table}.{person_no} AND m.{area} = {table}.{area})"
        );

        let mut conn = self.pool.acquire().await?;
        let duplicates_removed = conn.execute(&sql, &[]).await?;
        let unique_employees_remaining = conn.fetch_count(&distinct_identities_sql(), &[]).await?;

        info!(duplicates_removed, unique_employees_remaining, "registry cleaned up");
        Ok(CleanupReport {
            duplicates_removed,
            unique_employees_remaining,
        })
    }

    pub async fn stats(&self) -> Result<RegistryStats, sqlx::Error> {
        let table = quote_ident(MASTER_TABLE);
        let (person_no, area, month_year) = (
            quote_ident(PERSON_NO),
            quote_ident(PERSONNEL_AREA),
            quote_ident(MONTH_YEAR),
        );

        let mut conn = self.pool.acquire().await?;
        let total_employees = conn
            .fetch_count(&format!("SELECT COUNT(*) FROM {table}"), &[])
            .await?;
        let unique_employees = conn.fetch_count(&distinct_identities_sql(), &[]).await?;
        let duplicates_found = conn
            .fetch_count(
                &format!(
                    "SELECT COUNT(*) FROM (SELECT {person_no}, {area} FROM {table} \
                     GROUP BY {person_no}, {area} HAVING COUNT(*) > 1) d"
                ),
                &[],
            )
            .await?;
        // Null dates sort last on every backend
        let sample_records = conn
            .fetch_records(
                &format!(
                    "SELECT * FROM {table} ORDER BY {month_year} IS NULL, {month_year} DESC LIMIT {REGISTRY_SAMPLE_SIZE}"
                ),
                &[],
            )
            .await?;

        Ok(RegistryStats {
            total_employees,
            unique_employees,
            duplicates_found,
            sample_records,
        })
    }
}

fn distinct_identities_sql() -> String {
    format!(
        "SELECT COUNT(*) FROM (SELECT DISTINCT {}, {} FROM {}) d",
        quote_ident(PERSON_NO),
        quote_ident(PERSONNEL_AREA),
        quote_ident(MASTER_TABLE)
    )
}

/// Project a record onto the registry attributes.
///
/// Returns `None` when the record has no usable identity. Null values are
/// left out so they never overwrite what the registry already knows.
fn project(record: &Record) -> Option<Record> {
    let identity = Identity::of(record)?;
    let mut projected: Record = record
        .iter()
        .filter(|(column, value)| MASTER_FIELDS.contains(&column.as_str()) && !value.is_null())
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect();
    identity.stamp(&mut projected);
    Some(projected)
}

fn month_year_of(record: &Record) -> Option<NaiveDate> {
    match record.get(MONTH_YEAR) {
        Some(Value::Date(date)) => Some(*date),
        _ => None,
    }
}

/// Of two records for one identity, keep the one with the later month_year
fn latest(current: Record, candidate: Record) -> Record {
    if month_year_of(&candidate) > month_year_of(&current) {
        candidate
    } else {
        current
    }
}
