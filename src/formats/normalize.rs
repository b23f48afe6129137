//! Turns a raw [`Sheet`] into a [`Batch`] the pipeline can consume:
//! canonical column names, typed cells, parsed `month_year` and derived `year`.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, warn};

use super::reader::Sheet;
use crate::config::{
    CREATED_AT, INVALID_DATE_SAMPLES, InvalidDatePolicy, MAX_IDENTIFIER_LEN, MONTH_YEAR,
    PERSON_NO, PERSONNEL_AREA, YEAR,
};
use crate::db::{Record, Value};
use crate::error::IngestError;
use crate::pipeline::Batch;

/// Columns every upload must carry
pub const REQUIRED_COLUMNS: [&str; 3] = [PERSON_NO, MONTH_YEAR, PERSONNEL_AREA];

/// Canonical names that are renamed after cleanup
const RENAMES: [(&str, &str); 3] = [
    ("name_of_employee", "employee_name"),
    ("basic", "basic_salary"),
    ("month", MONTH_YEAR),
];

/// A normalized upload plus how many rows were dropped for bad dates
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSheet {
    pub batch: Batch,
    pub invalid_dates_dropped: usize,
}

/// Canonicalize a spreadsheet header.
///
/// Lowercases, maps separators to `_`, spells out a few symbols, strips the
/// remaining punctuation, then collapses and trims underscores. A header that
/// cleans up to nothing becomes `column_<position>`. Names are capped at
/// [`MAX_IDENTIFIER_LEN`] bytes so the store keeps them intact.
pub fn canonical_column_name(header: &str, position: usize) -> String {
    let mut cleaned = String::with_capacity(header.len());
    for c in header.trim().to_lowercase().chars() {
        match c {
            ' ' | '-' | '.' | '/' | '\\' | ':' | ';' | ',' | '|' | '\t' => cleaned.push('_'),
            '&' => cleaned.push_str("and"),
            '%' => cleaned.push_str("percent"),
            '#' => cleaned.push_str("num"),
            '@' => cleaned.push_str("at"),
            '+' => cleaned.push_str("plus"),
            '(' | ')' | '\'' | '"' | '*' | '=' | '<' | '>' | '?' | '!' | '$' | '^' | '['
            | ']' | '{' | '}' => {}
            other => cleaned.push(other),
        }
    }

    let mut name = String::with_capacity(cleaned.len());
    for part in cleaned.split('_').filter(|part| !part.is_empty()) {
        if !name.is_empty() {
            name.push('_');
        }
        name.push_str(part);
    }

    if name.is_empty() {
        return format!("column_{}", position + 1);
    }

    let name = RENAMES
        .iter()
        .find(|(from, _)| *from == name)
        .map_or(name, |(_, to)| to.to_string());
    truncate_identifier(&name, MAX_IDENTIFIER_LEN)
}

/// Cut `name` to at most `max_len` bytes on a char boundary, dropping a trailing `_`
fn truncate_identifier(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    let mut end = max_len;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].trim_end_matches('_').to_string()
}

/// Type a raw cell.
///
/// Identity columns always stay text, as do digit strings with a leading zero
/// (account and PF numbers) so the zero survives.
pub fn parse_cell(column: &str, raw: &str) -> Value {
    let text = raw.trim();
    if text.is_empty() {
        return Value::Null;
    }
    if column == PERSON_NO || column == PERSONNEL_AREA {
        return Value::from(text);
    }

    let unsigned = text.strip_prefix('-').unwrap_or(text);
    let leading_zero = unsigned.len() > 1
        && unsigned.starts_with('0')
        && !unsigned[1..].starts_with('.');
    if leading_zero {
        return Value::from(text);
    }

    if let Ok(i) = text.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(d) = Decimal::from_str(text) {
        return Value::Decimal(d);
    }
    Value::from(text)
}

const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y%m%d",
];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
];

/// Month-name forms after separators are replaced by spaces
const NAMED_MONTH_FORMATS: [&str; 5] =
    ["%d %B %Y", "%d %b %Y", "%B %d %Y", "%d %B %y", "%Y %B %d"];

/// chrono's `%Y` accepts any digit count; payroll periods always have four
fn four_digit_year(date: NaiveDate) -> Option<NaiveDate> {
    (1000..=9999).contains(&date.year()).then_some(date)
}

/// Parse a `month_year` cell.
///
/// Tries numeric calendar forms (month-first before day-first on slashes),
/// timestamps, `YYYY-MM`, then month names such as `January 2025`,
/// `Mar-2024` or `01-Mar-2024`. A bare month and year means the 1st.
pub fn parse_month_year(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    let numeric = DATE_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(text, format)
            .ok()
            .and_then(four_digit_year)
    });
    if numeric.is_some() {
        return numeric;
    }
    let timestamp = DATETIME_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(text, format)
            .ok()
            .and_then(|datetime| four_digit_year(datetime.date()))
    });
    if timestamp.is_some() {
        return timestamp;
    }
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d") {
        return four_digit_year(date);
    }

    let spaced = text
        .replace(['-', '/', ',', '.'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    // Month and year alone must not be read as month, day and a short year
    let candidates = [format!("01 {spaced}"), spaced];
    candidates.iter().find_map(|candidate| {
        NAMED_MONTH_FORMATS.iter().find_map(|format| {
            NaiveDate::parse_from_str(candidate, format)
                .ok()
                .and_then(four_digit_year)
        })
    })
}

/// Normalize a raw sheet into a batch.
///
/// Invalid `month_year` rows are dropped or fail the upload according to
/// `policy`; an upload where no row has a valid date always fails.
pub fn normalize_sheet(
    sheet: Sheet,
    policy: InvalidDatePolicy,
) -> Result<NormalizedSheet, IngestError> {
    let columns = canonical_columns(&sheet.headers);

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|required| !columns.iter().any(|c| c.as_str() == **required))
        .map(|required| required.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns(missing));
    }

    let mut records = Vec::with_capacity(sheet.rows.len());
    let mut invalid_rows = Vec::new();
    let mut invalid_samples = Vec::new();

    for (index, row) in sheet.rows.iter().enumerate() {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let mut record = Record::new();
        for (position, column) in columns.iter().enumerate() {
            let raw = row.get(position).map(String::as_str).unwrap_or("");
            let value = if column == MONTH_YEAR {
                match parse_month_year(raw) {
                    Some(date) => Value::Date(date),
                    None => Value::Null,
                }
            } else {
                parse_cell(column, raw)
            };
            record.insert(column.clone(), value);
        }

        match record.get(MONTH_YEAR) {
            Some(Value::Date(date)) => {
                let year = i64::from(date.year());
                record.insert(YEAR.to_string(), Value::Integer(year));
                records.push(record);
            }
            _ => {
                // Header is line 1, so data row `index` sits on line index + 2
                invalid_rows.push(index + 2);
                if invalid_samples.len() < INVALID_DATE_SAMPLES {
                    let position = columns.iter().position(|c| c == MONTH_YEAR);
                    let raw = position
                        .and_then(|p| row.get(p))
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default();
                    invalid_samples.push(format!("{raw:?}"));
                }
            }
        }
    }

    if !invalid_rows.is_empty() {
        if records.is_empty() {
            return Err(IngestError::NoValidDates {
                count: invalid_rows.len(),
                samples: invalid_samples,
            });
        }
        if policy == InvalidDatePolicy::Reject {
            return Err(IngestError::InvalidDates {
                count: invalid_rows.len(),
                rows: invalid_rows,
                samples: invalid_samples,
            });
        }
        warn!(
            dropped = invalid_rows.len(),
            rows = ?invalid_rows,
            "dropping rows with invalid month_year"
        );
    }

    let mut columns = columns;
    if !columns.iter().any(|c| c == YEAR) {
        columns.push(YEAR.to_string());
    }
    debug!(columns = columns.len(), rows = records.len(), "normalized sheet");

    Ok(NormalizedSheet {
        batch: Batch { columns, records },
        invalid_dates_dropped: invalid_rows.len(),
    })
}

/// Canonicalize every header; repeated names get a numeric suffix.
///
/// `created_at` belongs to the year tables, so an upload column of that name
/// is suffixed like a duplicate.
fn canonical_columns(headers: &[String]) -> Vec<String> {
    let mut seen = HashSet::from([CREATED_AT.to_string()]);
    headers
        .iter()
        .enumerate()
        .map(|(position, header)| {
            let base = canonical_column_name(header, position);
            let mut name = base.clone();
            let mut n = 2;
            while !seen.insert(name.clone()) {
                let suffix = format!("_{n}");
                let stem = truncate_identifier(&base, MAX_IDENTIFIER_LEN - suffix.len());
                name = format!("{stem}{suffix}");
                n += 1;
            }
            name
        })
        .collect()
}
