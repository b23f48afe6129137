//! High-level runner API for the payroll ingester.
//!
//! This module provides a simplified public interface that encapsulates
//! setting up connection pools, sheet readers and the ingestion pipeline.
//!
//! This is the primary API for external users and for the CLI.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use crate::db::pool as db_pool;
use crate::db::schema::{quote_ident, year_table_name};
use crate::db::{Pool, PoolArgsBuilder, SchemaManager};
use crate::formats::{ReaderFactory, normalize_sheet};
use crate::pipeline::Ingestor;

pub use crate::config::InvalidDatePolicy;
pub use crate::db::{Record, Value};
pub use crate::formats::Format;
pub use crate::pipeline::ingest::IngestStatus;
pub use crate::pipeline::{
    CleanupReport, IngestReport, Registry, RegistryStats, YearReport, YearStatus,
};
pub use crate::telemetry::init_tracing;

/// Connection settings shared by every command
#[derive(Debug, Clone)]
pub struct DatabaseArgs {
    /// `postgres://...` or `sqlite:...`
    pub database_url: String,
    pub max_connections: u32,
}

/// Arguments for ingesting one spreadsheet export
#[derive(Debug, Clone)]
pub struct IngestArgs {
    pub database: DatabaseArgs,
    pub source: PathBuf,
    /// Detected from the file extension when not given
    pub format: Option<Format>,
    pub invalid_dates: InvalidDatePolicy,

    // Test-only: inject a pre-created pool (for SQLite testing)
    #[cfg(test)]
    pub test_pool: Option<Pool>,
}

/// Every row of one year table
#[derive(Debug, Clone, Serialize)]
pub struct YearDump {
    pub year: i32,
    pub total_records: usize,
    pub data: Vec<Record>,
}

async fn connect(args: &DatabaseArgs) -> Result<Pool> {
    let pool_args = PoolArgsBuilder::default()
        .database_url(&args.database_url)
        .max_pool_size(args.max_connections)
        .build()?;
    db_pool::pool(pool_args).await
}

/// Ingest a spreadsheet export.
///
/// Reads and normalizes the file, then runs the pipeline: registry upsert,
/// enrichment, per-year schema evolution and full-row replace.
///
/// # Example
///
/// ```no_run
/// use payroll_ingest::runner::{DatabaseArgs, IngestArgs, InvalidDatePolicy, run_ingest};
///
/// # async fn example() -> anyhow::Result<()> {
/// let args = IngestArgs {
///     database: DatabaseArgs {
///         database_url: "postgres://payroll@localhost/payroll".to_string(),
///         max_connections: 4,
///     },
///     source: "uploads/march-2024.csv".into(),
///     format: None,
///     invalid_dates: InvalidDatePolicy::Drop,
/// };
///
/// let report = run_ingest(args).await?;
/// println!("{} rows into {} years", report.total_rows_processed, report.years_processed.len());
/// # Ok(())
/// # }
/// ```
pub async fn run_ingest(args: IngestArgs) -> Result<IngestReport> {
    // Create connection pool (or use test pool if provided)
    #[cfg(test)]
    let pool = match args.test_pool.clone() {
        Some(test_pool) => test_pool,
        None => connect(&args.database).await?,
    };

    #[cfg(not(test))]
    let pool = connect(&args.database).await?;

    ingest_with_pool(&pool, &args).await
}

async fn ingest_with_pool(pool: &Pool, args: &IngestArgs) -> Result<IngestReport> {
    let run_id = Uuid::new_v4();
    let format = match args.format {
        Some(format) => format,
        None => Format::detect_from_path(&args.source)?,
    };
    info!(%run_id, source = %args.source.display(), ?format, "starting ingestion");

    let reader = ReaderFactory::create_reader(&args.source, format);
    let sheet = reader.read_sheet().await?;
    let normalized = normalize_sheet(sheet, args.invalid_dates)?;

    let ingestor = Ingestor::new(pool.clone());
    let mut report = ingestor
        .ingest(normalized.batch)
        .await
        .context("Ingestion failed")?;
    report.invalid_dates_dropped = normalized.invalid_dates_dropped;

    info!(%run_id, status = ?report.status, "ingestion complete");
    Ok(report)
}

/// Look up one employee in the registry
pub async fn lookup_employee(
    database: &DatabaseArgs,
    person_no: &str,
    personnel_area: &str,
) -> Result<Option<Record>> {
    let pool = connect(database).await?;
    lookup_employee_with_pool(&pool, person_no, personnel_area).await
}

async fn lookup_employee_with_pool(
    pool: &Pool,
    person_no: &str,
    personnel_area: &str,
) -> Result<Option<Record>> {
    let registry = ready_registry(pool).await?;
    registry
        .get(person_no, personnel_area)
        .await
        .context("Failed to fetch employee")
}

pub async fn registry_stats(database: &DatabaseArgs) -> Result<RegistryStats> {
    let pool = connect(database).await?;
    registry_stats_with_pool(&pool).await
}

async fn registry_stats_with_pool(pool: &Pool) -> Result<RegistryStats> {
    let registry = ready_registry(pool).await?;
    registry.stats().await.context("Failed to fetch registry stats")
}

/// Remove stale registry duplicates, keeping the latest month_year per employee
pub async fn cleanup_registry(database: &DatabaseArgs) -> Result<CleanupReport> {
    let pool = connect(database).await?;
    cleanup_registry_with_pool(&pool).await
}

async fn cleanup_registry_with_pool(pool: &Pool) -> Result<CleanupReport> {
    let registry = ready_registry(pool).await?;
    registry.cleanup().await.context("Failed to clean up registry")
}

/// Dump every row of the table for `year`
pub async fn dump_year(database: &DatabaseArgs, year: i32) -> Result<YearDump> {
    let pool = connect(database).await?;
    dump_year_with_pool(&pool, year).await
}

async fn dump_year_with_pool(pool: &Pool, year: i32) -> Result<YearDump> {
    let table = year_table_name(year)?;
    if !SchemaManager::new(pool.clone()).table_exists(&table).await {
        anyhow::bail!("No salary data for year {}", year);
    }

    let sql = format!(
        "SELECT * FROM {} ORDER BY {}, {}, {}",
        quote_ident(&table),
        quote_ident("person_no"),
        quote_ident("personnel_area"),
        quote_ident("month_year")
    );
    let mut conn = pool.acquire().await?;
    let data = conn
        .fetch_records(&sql, &[])
        .await
        .with_context(|| format!("Failed to read {table}"))?;

    Ok(YearDump {
        year,
        total_records: data.len(),
        data,
    })
}

async fn ready_registry(pool: &Pool) -> Result<Registry> {
    let registry = Registry::new(pool.clone());
    registry.ensure_table().await?;
    Ok(registry)
}
