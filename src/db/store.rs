//! Row-level write operations shared by the registry and the year tables.
//!
//! The two upsert policies are deliberately separate operations: the registry
//! merges field by field, year tables replace whole rows.

use std::collections::BTreeMap;

use super::pool::{Backend, Transaction};
use super::schema::{SqlType, quote_ident};
use super::value::{Bind, Record, Value};

/// Column name to declared type, as read from the store
pub type ColumnTypeMap = BTreeMap<String, SqlType>;

/// What a merge upsert did to the stored row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

impl Transaction<'_> {
    /// Per-field merge keyed by `key_columns`.
    ///
    /// If a row with the record's key exists, every non-key field present in
    /// the record is overwritten and all other stored fields are left alone.
    /// Otherwise the record is inserted as is.
    pub async fn merge_upsert(
        &mut self,
        table: &str,
        key_columns: &[&str],
        record: &Record,
        types: &ColumnTypeMap,
    ) -> Result<Upsert, sqlx::Error> {
        let backend = self.backend();
        let (predicate, key_params) = key_predicate(backend, key_columns, record, types, 1);

        let exists_sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            quote_ident(table),
            predicate
        );
        if self.fetch_count(&exists_sql, &key_params).await? == 0 {
            self.insert_row(table, record, types).await?;
            return Ok(Upsert::Inserted);
        }

        let updates: Vec<(&String, &Value)> = record
            .iter()
            .filter(|(column, _)| !key_columns.contains(&column.as_str()))
            .collect();
        if updates.is_empty() {
            return Ok(Upsert::Updated);
        }

        let mut params = Vec::with_capacity(updates.len() + key_params.len());
        let assignments: Vec<String> = updates
            .iter()
            .enumerate()
            .map(|(i, (column, value))| {
                params.push(bind_for(value, types.get(column.as_str())));
                format!("{} = {}", quote_ident(column), backend.placeholder(i + 1))
            })
            .collect();

        let (predicate, key_params) =
            key_predicate(backend, key_columns, record, types, updates.len() + 1);
        params.extend(key_params);

        let update_sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(table),
            assignments.join(", "),
            predicate
        );
        self.execute(&update_sql, &params).await?;

        Ok(Upsert::Updated)
    }

    /// Full-row replace keyed by `key_columns`.
    ///
    /// Any stored row with the same key is deleted and the record inserted in
    /// its place; columns the record omits fall back to their defaults.
    pub async fn replace_row(
        &mut self,
        table: &str,
        key_columns: &[&str],
        record: &Record,
        types: &ColumnTypeMap,
    ) -> Result<(), sqlx::Error> {
        let (predicate, key_params) =
            key_predicate(self.backend(), key_columns, record, types, 1);

        let delete_sql = format!("DELETE FROM {} WHERE {}", quote_ident(table), predicate);
        self.execute(&delete_sql, &key_params).await?;
        self.insert_row(table, record, types).await?;

        Ok(())
    }

    /// Insert one record, binding each value for its column type
    pub async fn insert_row(
        &mut self,
        table: &str,
        record: &Record,
        types: &ColumnTypeMap,
    ) -> Result<(), sqlx::Error> {
        let backend = self.backend();
        let columns: Vec<String> = record.keys().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=record.len())
            .map(|i| backend.placeholder(i))
            .collect();
        let params: Vec<Bind> = record
            .iter()
            .map(|(column, value)| bind_for(value, types.get(column.as_str())))
            .collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders.join(", ")
        );
        self.execute(&sql, &params).await?;

        Ok(())
    }
}

/// Build `"k1" = $n AND "k2" = $n+1 ...` with placeholders numbered from `first`
fn key_predicate(
    backend: Backend,
    key_columns: &[&str],
    record: &Record,
    types: &ColumnTypeMap,
    first: usize,
) -> (String, Vec<Bind>) {
    let mut params = Vec::with_capacity(key_columns.len());
    let clauses: Vec<String> = key_columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let value = record.get(*column).unwrap_or(&Value::Null);
            params.push(bind_for(value, types.get(*column)));
            format!("{} = {}", quote_ident(column), backend.placeholder(first + i))
        })
        .collect();

    (clauses.join(" AND "), params)
}

/// Bind a value for its column type, or by its own kind for unknown columns
fn bind_for(value: &Value, sql_type: Option<&SqlType>) -> Bind {
    match (sql_type, value) {
        (Some(sql_type), _) => value.to_bind(sql_type),
        (None, Value::Integer(i)) => Bind::Int(Some(*i)),
        (None, Value::Decimal(d)) => Bind::Decimal(Some(*d)),
        (None, Value::Date(d)) => Bind::Date(Some(*d)),
        (None, Value::Text(s)) => Bind::Text(Some(s.clone())),
        (None, Value::Null) => Bind::Text(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Pool;
    use chrono::NaiveDate;

    const KEY: [&str; 2] = ["k", "d"];

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn types() -> ColumnTypeMap {
        [
            ("k".to_string(), SqlType::Varchar(100)),
            ("d".to_string(), SqlType::Date),
            ("a".to_string(), SqlType::Text),
            ("b".to_string(), SqlType::BigInt),
        ]
        .into_iter()
        .collect()
    }

    async fn setup() -> Pool {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        pool.execute_query(
            "CREATE TABLE \"t\" (\"k\" VARCHAR(100) NOT NULL, \"d\" DATE NOT NULL, \"a\" TEXT, \"b\" BIGINT)",
        )
        .await
        .unwrap();
        pool
    }

    fn day() -> Value {
        Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
    }

    #[tokio::test]
    async fn test_merge_upsert_keeps_unmentioned_fields() {
        let pool = setup().await;
        let types = types();
        let mut conn = pool.acquire().await.unwrap();

        let mut tx = conn.begin().await.unwrap();
        let first = record(&[
            ("k", Value::from("E1")),
            ("d", day()),
            ("a", Value::from("x")),
            ("b", Value::Integer(1)),
        ]);
        assert_eq!(
            tx.merge_upsert("t", &KEY, &first, &types).await.unwrap(),
            Upsert::Inserted
        );

        let second = record(&[("k", Value::from("E1")), ("d", day()), ("b", Value::Integer(2))]);
        assert_eq!(
            tx.merge_upsert("t", &KEY, &second, &types).await.unwrap(),
            Upsert::Updated
        );
        tx.commit().await.unwrap();

        let rows = conn.fetch_records("SELECT * FROM \"t\"", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["a"], Value::from("x"));
        assert_eq!(rows[0]["b"], Value::Integer(2));
    }

    #[tokio::test]
    async fn test_replace_row_discards_omitted_fields() {
        let pool = setup().await;
        let types = types();
        let mut conn = pool.acquire().await.unwrap();

        let mut tx = conn.begin().await.unwrap();
        let first = record(&[
            ("k", Value::from("E1")),
            ("d", day()),
            ("a", Value::from("x")),
            ("b", Value::Integer(1)),
        ]);
        tx.replace_row("t", &KEY, &first, &types).await.unwrap();

        let second = record(&[("k", Value::from("E1")), ("d", day()), ("a", Value::from("y"))]);
        tx.replace_row("t", &KEY, &second, &types).await.unwrap();
        tx.commit().await.unwrap();

        let rows = conn.fetch_records("SELECT * FROM \"t\"", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["a"], Value::from("y"));
        assert_eq!(rows[0]["b"], Value::Null);
    }

    #[test]
    fn test_bind_for_untyped_columns() {
        assert_eq!(bind_for(&Value::Integer(3), None), Bind::Int(Some(3)));
        assert_eq!(bind_for(&Value::Null, None), Bind::Text(None));
        assert_eq!(
            bind_for(&Value::Integer(3), Some(&SqlType::Text)),
            Bind::Text(Some("3".to_string()))
        );
    }
}
