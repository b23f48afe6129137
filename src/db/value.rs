use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::schema::SqlType;

/// A single cell value flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
}

/// One row, keyed by canonical column name
pub type Record = BTreeMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Render the value as an identity component.
    /// Null, empty and zero-like values are not valid identities.
    pub fn as_identity_part(&self) -> Option<String> {
        match self {
            Value::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Integer(i) if *i != 0 => Some(i.to_string()),
            Value::Decimal(d) if !d.is_zero() => Some(d.normalize().to_string()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            _ => None,
        }
    }

    /// Coerce the value for an integer-family column.
    ///
    /// Never fails: anything that is not an integer (or a numeric value that
    /// truncates to one) becomes null.
    pub fn coerce_integer(&self) -> Value {
        match self {
            Value::Integer(i) => Value::Integer(*i),
            Value::Decimal(d) => d.trunc().to_i64().map_or(Value::Null, Value::Integer),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_or(Value::Null, Value::Integer),
            Value::Null | Value::Date(_) => Value::Null,
        }
    }

    /// Convert the value into a parameter suitable for a column of `sql_type`
    pub fn to_bind(&self, sql_type: &SqlType) -> Bind {
        if sql_type.is_integer() {
            return match self.coerce_integer() {
                Value::Integer(i) => Bind::Int(Some(i)),
                _ => Bind::Int(None),
            };
        }

        if sql_type.is_numeric() {
            return match self {
                Value::Null => Bind::Decimal(None),
                Value::Integer(i) => Bind::Decimal(Some(Decimal::from(*i))),
                Value::Decimal(d) => Bind::Decimal(Some(*d)),
                Value::Text(s) => match s.trim().parse::<Decimal>() {
                    Ok(d) => Bind::Decimal(Some(d)),
                    Err(_) => Bind::Text(Some(s.clone())),
                },
                Value::Date(_) => Bind::Text(Some(self.to_string())),
            };
        }

        if *sql_type == SqlType::Date {
            return match self {
                Value::Null => Bind::Date(None),
                Value::Date(d) => Bind::Date(Some(*d)),
                Value::Text(s) => match NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
                    Ok(d) => Bind::Date(Some(d)),
                    Err(_) => Bind::Text(Some(s.clone())),
                },
                other => Bind::Text(Some(other.to_string())),
            };
        }

        match self {
            Value::Null => Bind::Text(None),
            other => Bind::Text(Some(other.to_string())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// A typed query parameter.
///
/// Nulls carry their family so that strongly typed backends receive a
/// correctly typed NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Int(Option<i64>),
    Decimal(Option<Decimal>),
    Date(Option<NaiveDate>),
    Text(Option<String>),
}
