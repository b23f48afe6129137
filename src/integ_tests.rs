//! Integration tests for the ingestion pipeline
//!
//! These tests use SQLite in-memory databases and real CSV files to test
//! end to end scenarios of the ingester.

#[cfg(test)]
mod tests {
    use crate::{
        config::InvalidDatePolicy,
        db::{Pool, SchemaManager, Value, value::Bind},
        error::IngestError,
        pipeline::{IngestReport, Registry, YearStatus, ingest::IngestStatus},
        runner::{DatabaseArgs, Format, IngestArgs, run_ingest},
    };
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::fs::File;
    use tokio::io::AsyncWriteExt;

    // ============ Test Helpers ============

    /// Helper to create a CSV export with custom content (lines include header)
    async fn create_csv_with_content(dir: &TempDir, filename: &str, content: &[&str]) -> PathBuf {
        let path = dir.path().join(filename);
        let mut file = File::create(&path).await.unwrap();
        for line in content {
            file.write_all(line.as_bytes()).await.unwrap();
            file.write_all(b"\n").await.unwrap();
        }
        file.flush().await.unwrap();
        path
    }

    fn ingest_args(pool: &Pool, source: PathBuf, invalid_dates: InvalidDatePolicy) -> IngestArgs {
        IngestArgs {
            database: DatabaseArgs {
                database_url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            source,
            format: Some(Format::Csv),
            invalid_dates,
            test_pool: Some(pool.clone()),
        }
    }

    /// Helper to ingest a CSV export with the default invalid-date policy
    async fn ingest_csv(pool: &Pool, dir: &TempDir, filename: &str, content: &[&str]) -> IngestReport {
        let path = create_csv_with_content(dir, filename, content).await;
        run_ingest(ingest_args(pool, path, InvalidDatePolicy::Drop))
            .await
            .unwrap()
    }

    async fn count_rows(pool: &Pool, table: &str) -> i64 {
        let mut conn = pool.acquire().await.unwrap();
        conn.fetch_count(&format!("SELECT COUNT(*) FROM \"{table}\""), &[])
            .await
            .unwrap()
    }

    async fn fetch_salary_row(
        pool: &Pool,
        table: &str,
        person_no: &str,
        month_year: NaiveDate,
    ) -> crate::db::Record {
        let mut conn = pool.acquire().await.unwrap();
        let rows = conn
            .fetch_records(
                &format!("SELECT * FROM \"{table}\" WHERE person_no = ?1 AND month_year = ?2"),
                &[
                    Bind::Text(Some(person_no.to_string())),
                    Bind::Date(Some(month_year)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1, "expected exactly one row for {person_no}");
        rows.into_iter().next().unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    const HEADER: &str = "Person No,Personnel Area,Month,Name of Employee,Designation,Basic,Net Pay";

    // ============ Tests ============

    #[tokio::test]
    async fn test_single_row_end_to_end() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let report = ingest_csv(
            &pool,
            &dir,
            "march.csv",
            &[HEADER, "E1,A1,2024-03-01,Asha Rao,Clerk,25000,23150.75"],
        )
        .await;

        assert_eq!(report.status, IngestStatus::Success);
        assert_eq!(report.total_rows_processed, 1);
        assert_eq!(report.employees_synced, 1);
        let year = &report.years_processed[&2024];
        assert_eq!(year.table, "salaryregister2024");
        assert_eq!(year.status, YearStatus::Created);
        assert_eq!(year.rows, 1);
        assert_eq!(year.new_columns, None);
        assert_eq!(year.unique_employees, 1);

        assert_eq!(count_rows(&pool, "salaryregister2024").await, 1);
        let row = fetch_salary_row(&pool, "salaryregister2024", "E1", date(2024, 3, 1)).await;
        assert_eq!(row["personnel_area"], Value::from("A1"));
        assert_eq!(row["employee_name"], Value::from("Asha Rao"));
        assert_eq!(row["basic_salary"], Value::Integer(25000));
        assert_eq!(row["year"], Value::Integer(2024));

        let registry = Registry::new(pool.clone());
        let lookup = registry.get_all().await.unwrap();
        assert_eq!(lookup.len(), 1);
        let employee = registry.get("E1", "A1").await.unwrap().unwrap();
        assert_eq!(employee["designation"], Value::from("Clerk"));
        assert_eq!(employee["month_year"], Value::Date(date(2024, 3, 1)));
    }

    #[tokio::test]
    async fn test_reingest_issues_no_ddl() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let content = [HEADER, "E1,A1,2024-03-01,Asha Rao,Clerk,25000,23150.75"];

        ingest_csv(&pool, &dir, "first.csv", &content).await;
        let schema = SchemaManager::new(pool.clone());
        let before = schema.column_set("salaryregister2024").await;

        let report = ingest_csv(&pool, &dir, "second.csv", &content).await;
        let year = &report.years_processed[&2024];
        assert_eq!(year.status, YearStatus::Updated);
        assert_eq!(year.new_columns, Some(vec![]));

        assert_eq!(schema.column_set("salaryregister2024").await, before);
        assert_eq!(count_rows(&pool, "salaryregister2024").await, 1);
    }

    #[tokio::test]
    async fn test_new_column_extends_table() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();

        ingest_csv(
            &pool,
            &dir,
            "march.csv",
            &[HEADER, "E1,A1,2024-03-01,Asha Rao,Clerk,25000,23150.75"],
        )
        .await;
        let schema = SchemaManager::new(pool.clone());
        let before = schema.column_set("salaryregister2024").await;

        let report = ingest_csv(
            &pool,
            &dir,
            "april.csv",
            &[
                &format!("{HEADER},HRA %"),
                "E1,A1,2024-04-01,Asha Rao,Clerk,25000,23150.75,12.5",
            ],
        )
        .await;

        let year = &report.years_processed[&2024];
        assert_eq!(year.new_columns, Some(vec!["hra_percent".to_string()]));

        let after = schema.column_set("salaryregister2024").await;
        assert!(after.is_superset(&before));
        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(count_rows(&pool, "salaryregister2024").await, 2);

        // Earlier rows keep null for the new column
        let march = fetch_salary_row(&pool, "salaryregister2024", "E1", date(2024, 3, 1)).await;
        assert_eq!(march["hra_percent"], Value::Null);
    }

    #[tokio::test]
    async fn test_registry_fills_gaps_in_later_uploads() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();

        ingest_csv(
            &pool,
            &dir,
            "march.csv",
            &[HEADER, "E1,A1,2024-03-01,Asha Rao,Clerk,25000,23150.75"],
        )
        .await;

        // April export omits the designation entirely and leaves the name blank
        let report = ingest_csv(
            &pool,
            &dir,
            "april.csv",
            &[
                "Person No,Personnel Area,Month,Name of Employee,Net Pay",
                "E1,A1,April 2024,,23900",
            ],
        )
        .await;
        assert_eq!(report.status, IngestStatus::Success);

        let april = fetch_salary_row(&pool, "salaryregister2024", "E1", date(2024, 4, 1)).await;
        assert_eq!(april["designation"], Value::from("Clerk"));
        assert_eq!(april["employee_name"], Value::from("Asha Rao"));

        // The registry now reflects the latest period
        let employee = Registry::new(pool.clone())
            .get("E1", "A1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(employee["month_year"], Value::Date(date(2024, 4, 1)));
        assert_eq!(employee["employee_name"], Value::from("Asha Rao"));
    }

    #[tokio::test]
    async fn test_reupload_replaces_whole_row() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();

        ingest_csv(
            &pool,
            &dir,
            "first.csv",
            &[
                "Person No,Personnel Area,Month,Arrears,Remarks",
                "E1,A1,2024-03-01,500,late joining",
            ],
        )
        .await;
        ingest_csv(
            &pool,
            &dir,
            "second.csv",
            &[
                "Person No,Personnel Area,Month,Arrears",
                "E1,A1,2024-03-01,650",
            ],
        )
        .await;

        let row = fetch_salary_row(&pool, "salaryregister2024", "E1", date(2024, 3, 1)).await;
        assert_eq!(row["arrears"], Value::Integer(650));
        assert_eq!(row["remarks"], Value::Null);
        assert_eq!(count_rows(&pool, "salaryregister2024").await, 1);
    }

    #[tokio::test]
    async fn test_multi_year_batch() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let report = ingest_csv(
            &pool,
            &dir,
            "fy.csv",
            &[
                "Person No,Personnel Area,Month,Gross Pay",
                "E1,A1,2023-12-01,1000",
                "E2,A1,2023-12-01,1100",
                "E1,A1,2024-01-01,1000",
            ],
        )
        .await;

        assert_eq!(report.total_rows_processed, 3);
        assert_eq!(report.employees_synced, 2);
        assert_eq!(
            report.years_processed.keys().copied().collect::<Vec<_>>(),
            vec![2023, 2024]
        );
        assert_eq!(report.years_processed[&2023].unique_employees, 2);
        assert_eq!(report.years_processed[&2024].rows, 1);
        assert_eq!(count_rows(&pool, "salaryregister2023").await, 2);
        assert_eq!(count_rows(&pool, "salaryregister2024").await, 1);
    }

    #[tokio::test]
    async fn test_invalid_dates_drop_policy() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let report = ingest_csv(
            &pool,
            &dir,
            "mixed.csv",
            &[
                "Person No,Personnel Area,Month",
                "E1,A1,2024-03-01",
                "E2,A1,sometime",
            ],
        )
        .await;

        assert_eq!(report.invalid_dates_dropped, 1);
        assert_eq!(report.total_rows_processed, 1);
        assert_eq!(count_rows(&pool, "salaryregister2024").await, 1);
    }

    #[tokio::test]
    async fn test_invalid_dates_reject_policy() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let path = create_csv_with_content(
            &dir,
            "mixed.csv",
            &[
                "Person No,Personnel Area,Month",
                "E1,A1,2024-03-01",
                "E2,A1,sometime",
            ],
        )
        .await;

        let err = run_ingest(ingest_args(&pool, path, InvalidDatePolicy::Reject))
            .await
            .unwrap_err();
        match err.downcast_ref::<IngestError>() {
            Some(IngestError::InvalidDates { count, rows, .. }) => {
                assert_eq!(*count, 1);
                assert_eq!(rows, &vec![3]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!SchemaManager::new(pool.clone()).table_exists("salaryregister2024").await);
    }

    #[tokio::test]
    async fn test_missing_required_columns() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let path =
            create_csv_with_content(&dir, "bad.csv", &["Person No,Net Pay", "E1,100"]).await;

        let err = run_ingest(ingest_args(&pool, path, InvalidDatePolicy::Drop))
            .await
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("Missing required columns: month_year, personnel_area")
        );
    }

    #[tokio::test]
    async fn test_ddl_failure_is_isolated_to_its_year() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();
        // A view squatting on the 2023 table name makes CREATE TABLE fail
        pool.execute_query("CREATE VIEW salaryregister2023 AS SELECT 1 AS x")
            .await
            .unwrap();

        let report = ingest_csv(
            &pool,
            &dir,
            "fy.csv",
            &[
                "Person No,Personnel Area,Month,Gross Pay",
                "E1,A1,2023-12-01,1000",
                "E1,A1,2024-01-01,1000",
            ],
        )
        .await;

        assert_eq!(report.status, IngestStatus::Partial);
        let failed = &report.years_processed[&2023];
        assert_eq!(failed.status, YearStatus::Failed);
        assert_eq!(failed.table, "salaryregister2023");
        assert_eq!(failed.rows, 0);
        assert!(failed.error.as_deref().unwrap().contains("salaryregister2023"));

        let ok = &report.years_processed[&2024];
        assert_eq!(ok.status, YearStatus::Created);
        assert_eq!(count_rows(&pool, "salaryregister2024").await, 1);
    }

    #[tokio::test]
    async fn test_month_name_lands_in_its_year() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let report = ingest_csv(
            &pool,
            &dir,
            "january.csv",
            &[HEADER, "E1,A1,January 2025,Asha Rao,Clerk,25000,23150.75"],
        )
        .await;

        assert_eq!(report.years_processed.keys().copied().collect::<Vec<_>>(), vec![2025]);
        assert_eq!(report.years_processed[&2025].table, "salaryregister2025");
        let row = fetch_salary_row(&pool, "salaryregister2025", "E1", date(2025, 1, 1)).await;
        assert_eq!(row["year"], Value::Integer(2025));
    }

    #[tokio::test]
    async fn test_long_header_reingest_is_stable() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let content = [
            "Person No,Personnel Area,Month,\
             Deduction towards recovery of excess payment of dearness allowance arrears",
            "E1,A1,2024-03-01,1200",
        ];

        ingest_csv(&pool, &dir, "first.csv", &content).await;
        let report = ingest_csv(&pool, &dir, "second.csv", &content).await;
        assert_eq!(report.years_processed[&2024].new_columns, Some(vec![]));

        let columns = SchemaManager::new(pool.clone())
            .column_set("salaryregister2024")
            .await;
        assert!(columns.iter().all(|c| c.len() <= 63));
        let row = fetch_salary_row(&pool, "salaryregister2024", "E1", date(2024, 3, 1)).await;
        assert_eq!(
            row["deduction_towards_recovery_of_excess_payment_of_dearness_allowa"],
            Value::Integer(1200)
        );
    }

    #[tokio::test]
    async fn test_created_at_header_does_not_clash() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let report = ingest_csv(
            &pool,
            &dir,
            "march.csv",
            &["Person No,Personnel Area,Month,Created At", "E1,A1,2024-03-01,batch 7"],
        )
        .await;
        assert_eq!(report.status, IngestStatus::Success);

        let row = fetch_salary_row(&pool, "salaryregister2024", "E1", date(2024, 3, 1)).await;
        assert_eq!(row["created_at_2"], Value::from("batch 7"));
        assert_ne!(row["created_at"], Value::Null);
    }

    #[tokio::test]
    async fn test_created_table_reports_backfilled_columns() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();

        ingest_csv(
            &pool,
            &dir,
            "december.csv",
            &[HEADER, "E1,A1,2024-12-01,Asha Rao,Clerk,25000,23150.75"],
        )
        .await;

        // The first 2025 export has no designation column; the registry supplies it
        let report = ingest_csv(
            &pool,
            &dir,
            "january.csv",
            &[
                "Person No,Personnel Area,Month,Name of Employee,Net Pay",
                "E1,A1,2025-01-01,Asha Rao,23900",
            ],
        )
        .await;

        let year = &report.years_processed[&2025];
        assert_eq!(year.status, YearStatus::Created);
        assert_eq!(year.new_columns, Some(vec!["designation".to_string()]));
        let row = fetch_salary_row(&pool, "salaryregister2025", "E1", date(2025, 1, 1)).await;
        assert_eq!(row["designation"], Value::from("Clerk"));
    }

    // ============ Registry Tests ============

    #[tokio::test]
    async fn test_cleanup_after_out_of_order_uploads() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::sqlite_in_memory().await.unwrap();

        ingest_csv(
            &pool,
            &dir,
            "march.csv",
            &["Person No,Personnel Area,Month", "E1,A1,2024-03-01"],
        )
        .await;

        // A stale duplicate left behind by an older system
        pool.execute_query(
            "INSERT INTO employee_master (person_no, personnel_area, month_year, designation) \
             VALUES ('E1', 'A1', '2024-01-01', 'Trainee')",
        )
        .await
        .unwrap();

        let registry = Registry::new(pool.clone());
        assert_eq!(registry.stats().await.unwrap().duplicates_found, 1);

        let report = registry.cleanup().await.unwrap();
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(report.unique_employees_remaining, 1);

        let again = registry.cleanup().await.unwrap();
        assert_eq!(again.duplicates_removed, 0);

        let employee = registry.get("E1", "A1").await.unwrap().unwrap();
        assert_eq!(employee["month_year"], Value::Date(date(2024, 3, 1)));
    }
}
