use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use super::pool::{Pool, PoolConnection};
use super::value::{Bind, Record, Value};
use crate::config::{
    CREATED_AT, CURRENCY_PRECISION, CURRENCY_SCALE, IDENTITY_TEXT_CAPACITY, MAX_IDENTIFIER_LEN,
    MONTH_YEAR, PERSON_NO, PERSONNEL_AREA, SALARY_KEY_COLUMNS, YEAR, YEAR_TABLE_PREFIX,
};
use crate::error::IngestError;

/// SQL data type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    /// Fixed point with (precision, scale)
    Numeric(u8, u8),
    Real,
    DoublePrecision,
    /// Bounded text with a maximum length
    Varchar(u32),
    Text,
    Date,
    Timestamp,
    TimestampTz,
}

impl SqlType {
    /// Returns the SQL type declaration
    pub fn to_sql(&self) -> String {
        match self {
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Numeric(precision, scale) => format!("NUMERIC({precision},{scale})"),
            SqlType::Real => "REAL".to_string(),
            SqlType::DoublePrecision => "DOUBLE PRECISION".to_string(),
            SqlType::Varchar(len) => format!("VARCHAR({len})"),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::TimestampTz => "TIMESTAMP WITH TIME ZONE".to_string(),
        }
    }

    /// Integer family: values written to these columns are coerced to integers
    pub fn is_integer(&self) -> bool {
        matches!(self, SqlType::SmallInt | SqlType::Integer | SqlType::BigInt)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::Numeric(..) | SqlType::Real | SqlType::DoublePrecision
        )
    }

    /// Parse a declared column type such as `VARCHAR(100)` or `DECIMAL(15,2)`.
    /// Unknown declarations are treated as text.
    pub fn parse(declared: &str) -> SqlType {
        let upper = declared.trim().to_uppercase();
        let (base, args) = match upper.find('(') {
            Some(pos) => {
                let args: Vec<u32> = upper[pos + 1..]
                    .trim_end_matches(')')
                    .split(',')
                    .filter_map(|a| a.trim().parse().ok())
                    .collect();
                (upper[..pos].trim().to_string(), args)
            }
            None => (upper.clone(), Vec::new()),
        };

        match base.as_str() {
            "BOOLEAN" | "BOOL" => SqlType::Boolean,
            "SMALLINT" | "INT2" => SqlType::SmallInt,
            "INTEGER" | "INT" | "INT4" => SqlType::Integer,
            "BIGINT" | "INT8" => SqlType::BigInt,
            "NUMERIC" | "DECIMAL" => match args.as_slice() {
                [precision, scale] => SqlType::Numeric(*precision as u8, *scale as u8),
                [precision] => SqlType::Numeric(*precision as u8, 0),
                _ => SqlType::Numeric(CURRENCY_PRECISION, CURRENCY_SCALE),
            },
            "REAL" | "FLOAT4" => SqlType::Real,
            "DOUBLE PRECISION" | "FLOAT8" | "DOUBLE" | "FLOAT" => SqlType::DoublePrecision,
            "VARCHAR" | "CHARACTER VARYING" => match args.first() {
                Some(len) => SqlType::Varchar(*len),
                None => SqlType::Text,
            },
            "DATE" => SqlType::Date,
            "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" | "DATETIME" => SqlType::Timestamp,
            "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => SqlType::TimestampTz,
            _ => SqlType::Text, // Default to TEXT for unsupported types
        }
    }

    /// Rebuild a type from a Postgres `information_schema.columns` row
    fn from_information_schema(
        data_type: &str,
        max_length: Option<i32>,
        precision: Option<i32>,
        scale: Option<i32>,
    ) -> SqlType {
        match (data_type.to_lowercase().as_str(), max_length, precision) {
            ("character varying", Some(len), _) => SqlType::Varchar(len as u32),
            ("numeric", _, Some(precision)) => {
                SqlType::Numeric(precision as u8, scale.unwrap_or(0) as u8)
            }
            (other, _, _) => SqlType::parse(other),
        }
    }
}

/// Infer the storage type of a column from its name and sample values.
///
/// Identity and period columns have forced types. Every other column is
/// `TEXT` when all samples are null, `BIGINT` when all non-null samples are
/// integers, currency `NUMERIC` when they are all numeric with at least one
/// fractional value, and `TEXT` otherwise.
pub fn infer_sql_type<'a, I>(column_name: &str, samples: I) -> SqlType
where
    I: IntoIterator<Item = &'a Value>,
{
    match column_name.to_lowercase().as_str() {
        PERSON_NO | PERSONNEL_AREA => return SqlType::Varchar(IDENTITY_TEXT_CAPACITY),
        MONTH_YEAR => return SqlType::Date,
        YEAR => return SqlType::Integer,
        _ => {}
    }

    let mut saw_value = false;
    let mut all_integral = true;
    let mut all_numeric = true;

    for sample in samples {
        match sample {
            Value::Null => continue,
            Value::Integer(_) => {}
            Value::Decimal(_) => all_integral = false,
            Value::Text(_) | Value::Date(_) => {
                all_integral = false;
                all_numeric = false;
            }
        }
        saw_value = true;
    }

    if !saw_value {
        SqlType::Text
    } else if all_integral {
        SqlType::BigInt
    } else if all_numeric {
        SqlType::Numeric(CURRENCY_PRECISION, CURRENCY_SCALE)
    } else {
        SqlType::Text
    }
}

/// A column in a schema
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

/// A year table schema (collection of columns)
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub columns: Vec<Column>,
}

/// Schema inferrer for analyzing a batch and generating DDL
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaInferrer;

impl SchemaInferrer {
    /// Infer a year-table schema for `columns` (in order) from the batch records
    pub fn infer_from_batch(&self, columns: &[String], records: &[Record]) -> Schema {
        let columns = columns
            .iter()
            .map(|name| Column {
                name: name.clone(),
                sql_type: self.infer_column(name, records),
                nullable: !SALARY_KEY_COLUMNS.contains(&name.as_str()),
            })
            .collect();

        Schema { columns }
    }

    /// Infer the type of a single column across the batch
    pub fn infer_column(&self, name: &str, records: &[Record]) -> SqlType {
        infer_sql_type(name, records.iter().filter_map(|r| r.get(name)))
    }

    /// Generate DDL statement for creating a year table
    pub fn generate_ddl(&self, table_name: &str, schema: &Schema) -> String {
        let mut ddl = format!("CREATE TABLE {} (\n", quote_ident(table_name));

        let mut column_defs: Vec<String> = schema
            .columns
            .iter()
            .filter(|col| col.name != CREATED_AT)
            .map(|col| {
                let nullable_clause = if col.nullable { "" } else { " NOT NULL" };
                format!(
                    "  {} {}{}",
                    quote_ident(&col.name),
                    col.sql_type.to_sql(),
                    nullable_clause
                )
            })
            .collect();

        column_defs.push(format!(
            "  {} TIMESTAMP DEFAULT CURRENT_TIMESTAMP",
            quote_ident(CREATED_AT)
        ));

        let key: Vec<String> = SALARY_KEY_COLUMNS.iter().map(|c| quote_ident(c)).collect();
        column_defs.push(format!("  PRIMARY KEY ({})", key.join(", ")));

        ddl.push_str(&column_defs.join(",\n"));
        ddl.push_str("\n)");

        ddl
    }

    /// Generate DDL statement for appending one nullable column
    pub fn generate_add_column(&self, table_name: &str, column: &str, sql_type: &SqlType) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table_name),
            quote_ident(column),
            sql_type.to_sql()
        )
    }
}

/// Quote an identifier for use in SQL, escaping embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Validate a table name derived from data before it reaches DDL
pub fn validate_table_name(name: &str) -> Result<(), IngestError> {
    let mut chars = name.chars();
    let valid = name.len() <= MAX_IDENTIFIER_LEN
        && chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(IngestError::InvalidIdentifier(name.to_string()))
    }
}

/// Name of the table holding salary records for `year`
pub fn year_table_name(year: i32) -> Result<String, IngestError> {
    let name = format!("{YEAR_TABLE_PREFIX}{year}");
    if !(1000..=9999).contains(&year) {
        return Err(IngestError::InvalidIdentifier(name));
    }
    validate_table_name(&name)?;
    Ok(name)
}

/// Outcome of asking the store about an object.
///
/// `Failed` means the store could not answer. Callers decide how to treat it;
/// the schema manager treats it as absence so ingestion falls through to
/// creation rather than silently skipping data.
#[derive(Debug, Clone, PartialEq)]
pub enum Introspection<T> {
    Found(T),
    Absent,
    Failed(String),
}

impl<T> Introspection<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Introspection::Found(value) => Some(value),
            Introspection::Absent | Introspection::Failed(_) => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Introspection::Found(_))
    }
}

/// Columns of an existing table, in ordinal order
pub type ColumnTypes = Vec<(String, SqlType)>;

/// How `ensure_table` brought a table up to date
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableChange {
    Created,
    /// Table existed; lists the columns that were added (possibly none)
    Extended(Vec<String>),
}

/// Creates and evolves year tables by introspecting the store
#[derive(Debug, Clone)]
pub struct SchemaManager {
    pool: Pool,
    inferrer: SchemaInferrer,
}

impl SchemaManager {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            inferrer: SchemaInferrer,
        }
    }

    /// Ask the store whether `table` exists
    pub async fn inspect_table(&self, table: &str) -> Introspection<()> {
        let result = async {
            let mut conn = self.pool.acquire().await?;
            let sql = match &conn {
                PoolConnection::Postgres(_) => {
                    "SELECT COUNT(*) FROM information_schema.tables \
                     WHERE table_schema = current_schema() AND table_name = $1"
                }
                PoolConnection::Sqlite(_) => {
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1"
                }
            };
            conn.fetch_count(sql, &[Bind::Text(Some(table.to_string()))])
                .await
        }
        .await;

        match result {
            Ok(0) => Introspection::Absent,
            Ok(_) => Introspection::Found(()),
            Err(e) => {
                warn!(table, error = %e, "table existence check failed, treating as absent");
                Introspection::Failed(e.to_string())
            }
        }
    }

    /// Whether `table` exists. Introspection failure counts as "does not exist".
    pub async fn table_exists(&self, table: &str) -> bool {
        self.inspect_table(table).await.is_found()
    }

    /// Ask the store for the columns of `table`
    pub async fn inspect_columns(&self, table: &str) -> Introspection<ColumnTypes> {
        match query_table_columns(&self.pool, table).await {
            Ok(columns) if columns.is_empty() => Introspection::Absent,
            Ok(columns) => Introspection::Found(columns),
            Err(e) => {
                warn!(table, error = %e, "column introspection failed, treating as empty");
                Introspection::Failed(e.to_string())
            }
        }
    }

    /// Column name to type map; empty if the table is missing or introspection fails
    pub async fn column_types(&self, table: &str) -> BTreeMap<String, SqlType> {
        self.inspect_columns(table)
            .await
            .found()
            .unwrap_or_default()
            .into_iter()
            .collect()
    }

    /// Column names; empty if the table is missing or introspection fails
    pub async fn column_set(&self, table: &str) -> BTreeSet<String> {
        self.column_types(table).await.into_keys().collect()
    }

    /// Create a year table with the composite salary key
    pub async fn create_table(&self, table: &str, schema: &Schema) -> Result<(), IngestError> {
        validate_table_name(table)?;
        let ddl = self.inferrer.generate_ddl(table, schema);
        debug!(table, %ddl, "creating table");

        self.pool
            .execute_query(&ddl)
            .await
            .map_err(|source| IngestError::CreateTable {
                table: table.to_string(),
                source,
            })?;

        info!(table, columns = schema.columns.len(), "created table");
        Ok(())
    }

    /// Append one nullable column. Existing columns are never touched.
    pub async fn add_column(
        &self,
        table: &str,
        column: &str,
        sql_type: &SqlType,
    ) -> Result<(), IngestError> {
        validate_table_name(table)?;
        let ddl = self.inferrer.generate_add_column(table, column, sql_type);

        self.pool
            .execute_query(&ddl)
            .await
            .map_err(|source| IngestError::AddColumn {
                table: table.to_string(),
                column: column.to_string(),
                source,
            })?;

        info!(table, column, sql_type = %sql_type.to_sql(), "added column");
        Ok(())
    }

    /// Make sure `table` exists and carries every one of `columns`.
    ///
    /// Creates the table on first sight; otherwise adds only the columns not
    /// already present, so a repeat batch issues no DDL at all.
    pub async fn ensure_table(
        &self,
        table: &str,
        columns: &[String],
        records: &[Record],
    ) -> Result<TableChange, IngestError> {
        if !self.table_exists(table).await {
            let schema = self.inferrer.infer_from_batch(columns, records);
            self.create_table(table, &schema).await?;
            return Ok(TableChange::Created);
        }

        let added = self.extend_table(table, columns, records).await?;
        Ok(TableChange::Extended(added))
    }

    /// Add the columns of `columns` missing from `table`, returning the names added
    pub async fn extend_table(
        &self,
        table: &str,
        columns: &[String],
        records: &[Record],
    ) -> Result<Vec<String>, IngestError> {
        let existing = self.column_set(table).await;
        let mut added = Vec::new();

        for column in columns {
            if existing.contains(column) || added.contains(column) {
                continue;
            }
            let sql_type = self.inferrer.infer_column(column, records);
            self.add_column(table, column, &sql_type).await?;
            added.push(column.clone());
        }

        Ok(added)
    }
}

/// Query the columns of an existing table from the store
pub async fn query_table_columns(pool: &Pool, table: &str) -> Result<ColumnTypes, sqlx::Error> {
    let mut conn = pool.acquire().await?;

    match &mut conn {
        PoolConnection::Postgres(pg) => {
            // Casts strip the information_schema domain types
            let query = r#"
                SELECT
                    column_name::text,
                    data_type::text,
                    character_maximum_length::int4,
                    numeric_precision::int4,
                    numeric_scale::int4
                FROM information_schema.columns
                WHERE table_schema = current_schema() AND table_name = $1
                ORDER BY ordinal_position
            "#;
            let rows: Vec<(String, String, Option<i32>, Option<i32>, Option<i32>)> =
                sqlx::query_as(query)
                    .bind(table)
                    .fetch_all(&mut **pg)
                    .await?;

            Ok(rows
                .into_iter()
                .map(|(name, data_type, max_length, precision, scale)| {
                    let sql_type =
                        SqlType::from_information_schema(&data_type, max_length, precision, scale);
                    (name, sql_type)
                })
                .collect())
        }
        PoolConnection::Sqlite(sqlite) => {
            let rows: Vec<(String, String)> =
                sqlx::query_as("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
                    .bind(table)
                    .fetch_all(&mut **sqlite)
                    .await?;

            Ok(rows
                .into_iter()
                .map(|(name, declared)| (name, SqlType::parse(&declared)))
                .collect())
        }
    }
}
