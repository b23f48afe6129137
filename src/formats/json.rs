use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{Sheet, SheetReader};
use crate::io::{ByteReader, read_bounded};

/// Reads a JSON array of flat objects, one object per row
pub struct JsonReader<R: ByteReader> {
    reader: R,
}

impl<R: ByteReader> JsonReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R: ByteReader + 'static> SheetReader for JsonReader<R> {
    async fn read_sheet(&self) -> Result<Sheet> {
        let buffer = read_bounded(&self.reader)
            .await
            .context("Failed to read JSON file")?;
        parse_json_rows(&buffer)
    }
}

/// Headers are the union of object keys in first-seen order
pub fn parse_json_rows(buffer: &[u8]) -> Result<Sheet> {
    let rows: Vec<serde_json::Map<String, JsonValue>> =
        serde_json::from_slice(buffer).context("Expected a JSON array of objects")?;

    let mut headers: Vec<String> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
    }

    let rows = rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|header| row.get(header).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();

    Ok(Sheet { headers, rows })
}

fn cell_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}
