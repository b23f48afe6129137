//! Adapter between bb8 and the sqlx::Postgres driver, plus a SQLite pool for
//! local runs and tests.
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use derive_builder::Builder;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, ConnectOptions, Database, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use std::sync::Arc;

use super::value::{Bind, Record, Value};
use crate::config::{CONNECT_TIMEOUT, MAX_CONNECTION_LIFETIME, PING_TIMEOUT};

pub type Bb8Connection = bb8::PooledConnection<'static, ConnectionManager>;

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, <sqlx::Postgres as Database>::Arguments<'q>>;
type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, <sqlx::Sqlite as Database>::Arguments<'q>>;

/// SQL dialect of the underlying store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    /// Positional parameter placeholder (1-based)
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Backend::Postgres => format!("${index}"),
            Backend::Sqlite => format!("?{index}"),
        }
    }
}

/// Inner pool variants
#[derive(Debug, Clone)]
enum PoolInner {
    Postgres(bb8::Pool<ConnectionManager>),
    Sqlite(sqlx::SqlitePool),
}

/// Connection that can be either Postgres or SQLite
pub enum PoolConnection {
    Postgres(Bb8Connection),
    Sqlite(sqlx::pool::PoolConnection<sqlx::Sqlite>),
}

/// An open transaction on a pooled connection.
///
/// Dropping it without calling [`Transaction::commit`] rolls it back.
pub enum Transaction<'c> {
    Postgres(sqlx::Transaction<'c, sqlx::Postgres>),
    Sqlite(sqlx::Transaction<'c, sqlx::Sqlite>),
}

// Wrap pool implementations so callers do not care which store is configured.
#[derive(Debug, Clone)]
pub struct Pool {
    inner: PoolInner,
}

#[derive(Builder)]
pub struct PoolArgs {
    /// `postgres://...` or `sqlite:...`
    #[builder(setter(into))]
    database_url: String,
    #[builder(default = "1")]
    min_idle: u32,
    #[builder(default = "4")]
    max_pool_size: u32,
}

pub async fn pool(args: PoolArgs) -> anyhow::Result<Pool> {
    let PoolArgs {
        database_url,
        min_idle,
        max_pool_size,
    } = args;

    if database_url.starts_with("sqlite:") {
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context("Invalid SQLite database URL")?
            .create_if_missing(true);
        let sqlite_pool = SqlitePoolOptions::new()
            .min_connections(min_idle)
            .max_connections(max_pool_size)
            .connect_with(connect_options)
            .await
            .context("Failed to open SQLite database")?;
        return Ok(Pool {
            inner: PoolInner::Sqlite(sqlite_pool),
        });
    }

    if !(database_url.starts_with("postgres://") || database_url.starts_with("postgresql://")) {
        anyhow::bail!(
            "Unsupported database URL '{}'. Expected postgres://... or sqlite:...",
            database_url
        );
    }

    let connect_options =
        PgConnectOptions::from_str(&database_url).context("Invalid Postgres database URL")?;
    let conn_manager = ConnectionManager::new(connect_options);

    let bb8_pool = bb8::Builder::new()
        .min_idle(min_idle)
        .max_size(max_pool_size)
        .max_lifetime(MAX_CONNECTION_LIFETIME)
        .build(conn_manager)
        .await
        .context("Failed to create connection pool")?;

    Ok(Pool {
        inner: PoolInner::Postgres(bb8_pool),
    })
}

impl Pool {
    /// Create an in-memory SQLite pool.
    ///
    /// The pool is pinned to a single long-lived connection, since every
    /// SQLite in-memory connection is its own database.
    pub async fn sqlite_in_memory() -> Result<Self, sqlx::Error> {
        let sqlite_pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Pool {
            inner: PoolInner::Sqlite(sqlite_pool),
        })
    }

    pub fn backend(&self) -> Backend {
        match &self.inner {
            PoolInner::Postgres(_) => Backend::Postgres,
            PoolInner::Sqlite(_) => Backend::Sqlite,
        }
    }

    pub async fn acquire(&self) -> Result<PoolConnection, sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => {
                let conn = pool.get_owned().await.map_err(|e| match e {
                    bb8::RunError::User(e) => e,
                    bb8::RunError::TimedOut => sqlx::Error::PoolTimedOut,
                })?;
                Ok(PoolConnection::Postgres(conn))
            }
            PoolInner::Sqlite(pool) => {
                let conn = pool.acquire().await?;
                Ok(PoolConnection::Sqlite(conn))
            }
        }
    }

    /// Execute a parameterless statement (DDL) on its own connection
    pub async fn execute_query(&self, sql: &str) -> Result<(), sqlx::Error> {
        let mut conn = self.acquire().await?;
        conn.execute(sql, &[]).await?;
        Ok(())
    }

    /// Close the pool; subsequent acquires fail
    pub async fn close(&self) {
        match &self.inner {
            // bb8 has no explicit close; connections are dropped with the pool.
            PoolInner::Postgres(_) => {}
            PoolInner::Sqlite(pool) => pool.close().await,
        }
    }
}

impl PoolConnection {
    pub fn backend(&self) -> Backend {
        match self {
            PoolConnection::Postgres(_) => Backend::Postgres,
            PoolConnection::Sqlite(_) => Backend::Sqlite,
        }
    }

    /// Execute a statement, returning the number of affected rows
    pub async fn execute(&mut self, sql: &str, params: &[Bind]) -> Result<u64, sqlx::Error> {
        let affected = match self {
            PoolConnection::Postgres(conn) => bind_pg(sqlx::query(sql), params)
                .execute(&mut **conn)
                .await?
                .rows_affected(),
            PoolConnection::Sqlite(conn) => bind_sqlite(sqlx::query(sql), params)
                .execute(&mut **conn)
                .await?
                .rows_affected(),
        };
        Ok(affected)
    }

    /// Fetch every row of a query as dynamically typed records
    pub async fn fetch_records(
        &mut self,
        sql: &str,
        params: &[Bind],
    ) -> Result<Vec<Record>, sqlx::Error> {
        match self {
            PoolConnection::Postgres(conn) => {
                let rows = bind_pg(sqlx::query(sql), params)
                    .fetch_all(&mut **conn)
                    .await?;
                rows.iter().map(decode_pg_row).collect()
            }
            PoolConnection::Sqlite(conn) => {
                let rows = bind_sqlite(sqlx::query(sql), params)
                    .fetch_all(&mut **conn)
                    .await?;
                rows.iter().map(decode_sqlite_row).collect()
            }
        }
    }

    /// Fetch a single integer (e.g. `COUNT(*)`) from the first column of the first row
    pub async fn fetch_count(&mut self, sql: &str, params: &[Bind]) -> Result<i64, sqlx::Error> {
        match self {
            PoolConnection::Postgres(conn) => {
                let row = bind_pg(sqlx::query(sql), params)
                    .fetch_one(&mut **conn)
                    .await?;
                row.try_get::<i64, _>(0)
            }
            PoolConnection::Sqlite(conn) => {
                let row = bind_sqlite(sqlx::query(sql), params)
                    .fetch_one(&mut **conn)
                    .await?;
                row.try_get::<i64, _>(0)
            }
        }
    }

    /// Begin a transaction scoped to this connection
    pub async fn begin(&mut self) -> Result<Transaction<'_>, sqlx::Error> {
        match self {
            PoolConnection::Postgres(conn) => Ok(Transaction::Postgres(
                sqlx::Connection::begin(&mut **conn).await?,
            )),
            PoolConnection::Sqlite(conn) => Ok(Transaction::Sqlite(
                sqlx::Connection::begin(&mut **conn).await?,
            )),
        }
    }
}

impl Transaction<'_> {
    pub fn backend(&self) -> Backend {
        match self {
            Transaction::Postgres(_) => Backend::Postgres,
            Transaction::Sqlite(_) => Backend::Sqlite,
        }
    }

    pub async fn execute(&mut self, sql: &str, params: &[Bind]) -> Result<u64, sqlx::Error> {
        let affected = match self {
            Transaction::Postgres(tx) => bind_pg(sqlx::query(sql), params)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
            Transaction::Sqlite(tx) => bind_sqlite(sqlx::query(sql), params)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
        };
        Ok(affected)
    }

    pub async fn fetch_count(&mut self, sql: &str, params: &[Bind]) -> Result<i64, sqlx::Error> {
        match self {
            Transaction::Postgres(tx) => {
                let row = bind_pg(sqlx::query(sql), params)
                    .fetch_one(&mut **tx)
                    .await?;
                row.try_get::<i64, _>(0)
            }
            Transaction::Sqlite(tx) => {
                let row = bind_sqlite(sqlx::query(sql), params)
                    .fetch_one(&mut **tx)
                    .await?;
                row.try_get::<i64, _>(0)
            }
        }
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        match self {
            Transaction::Postgres(tx) => tx.commit().await,
            Transaction::Sqlite(tx) => tx.commit().await,
        }
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        match self {
            Transaction::Postgres(tx) => tx.rollback().await,
            Transaction::Sqlite(tx) => tx.rollback().await,
        }
    }
}

fn bind_pg<'q>(mut query: PgQuery<'q>, params: &[Bind]) -> PgQuery<'q> {
    for param in params {
        query = match param {
            Bind::Int(v) => query.bind(*v),
            Bind::Decimal(v) => query.bind(*v),
            Bind::Date(v) => query.bind(*v),
            Bind::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

fn bind_sqlite<'q>(mut query: SqliteQuery<'q>, params: &[Bind]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            Bind::Int(v) => query.bind(*v),
            // SQLite has no decimal type; NUMERIC affinity converts the text form.
            Bind::Decimal(v) => query.bind(v.map(|d| d.to_string())),
            Bind::Date(v) => query.bind(*v),
            Bind::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

/// Decode a Postgres row using the column type reported by the server
fn decode_pg_row(row: &PgRow) -> Result<Record, sqlx::Error> {
    let mut record = Record::new();

    for (idx, column) in row.columns().iter().enumerate() {
        let value: Value = match column.type_info().name() {
            "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(i64::from).into(),
            "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(i64::from).into(),
            "INT8" => row.try_get::<Option<i64>, _>(idx)?.into(),
            "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(i64::from).into(),
            "NUMERIC" => row.try_get::<Option<Decimal>, _>(idx)?.into(),
            "FLOAT4" | "FLOAT8" => row
                .try_get::<Option<f64>, _>(idx)?
                .and_then(|f| Decimal::try_from(f).ok())
                .into(),
            "DATE" => row.try_get::<Option<NaiveDate>, _>(idx)?.into(),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(idx)?
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                .into(),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)?
                .map(|ts| ts.to_rfc3339())
                .into(),
            _ => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .into(),
        };
        record.insert(column.name().to_string(), value);
    }

    Ok(record)
}

/// Decode a SQLite row using each value's storage class.
///
/// SQLite types are per value, so the declared column type is only used to
/// recognise dates stored as text.
fn decode_sqlite_row(row: &SqliteRow) -> Result<Record, sqlx::Error> {
    let mut record = Record::new();

    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_string();
            match storage.as_str() {
                "INTEGER" | "BOOLEAN" => Value::Integer(row.try_get_unchecked::<i64, _>(idx)?),
                "REAL" => {
                    let f = row.try_get_unchecked::<f64, _>(idx)?;
                    Decimal::try_from(f).map_or(Value::Null, Value::Decimal)
                }
                "BLOB" => Value::Null,
                _ => {
                    let text = row.try_get_unchecked::<String, _>(idx)?;
                    let declared_date = column.type_info().name().eq_ignore_ascii_case("DATE");
                    match NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
                        Ok(date) if declared_date => Value::Date(date),
                        _ => Value::Text(text),
                    }
                }
            }
        };
        record.insert(column.name().to_string(), value);
    }

    Ok(record)
}

// Wrap the Postgres connect options so that we can implement the bb8::ManageConnection trait.
pub struct ConnectionManager {
    connect_options: Arc<PgConnectOptions>,
}

impl ConnectionManager {
    /// Create a new `ConnectionManager` with the specified connect options.
    pub fn new(connect_options: PgConnectOptions) -> Self {
        Self {
            connect_options: Arc::new(connect_options),
        }
    }
}

impl bb8::ManageConnection for ConnectionManager {
    type Connection = PgConnection;
    type Error = sqlx::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let connect_options = Arc::clone(&self.connect_options);
        tokio::time::timeout(CONNECT_TIMEOUT, connect_options.connect())
            .await
            .map_err(|_| sqlx::Error::PoolTimedOut)?
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        tokio::time::timeout(PING_TIMEOUT, sqlx::Connection::ping(conn))
            .await
            // Convert tokio timeouts into sqlx pool timeouts. bb8 will retry a different connection on ping failure.
            .map_err(|_| sqlx::Error::PoolTimedOut)
            // Make sure that we also look at the actual ping result
            .and_then(|result| result)?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        // sqlx::PgConnection provides no non-async way to check for closed/broken connections.
        false
    }
}
