use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use calamine::{Data, DataType, Range, Reader, open_workbook_auto_from_rs};
use std::io::Cursor;

use super::{Sheet, SheetReader};
use crate::io::{ByteReader, read_bounded};

/// Reads the first worksheet of an Excel workbook (xlsx, xlsm, xls)
pub struct ExcelReader<R: ByteReader> {
    reader: R,
}

impl<R: ByteReader> ExcelReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R: ByteReader + 'static> SheetReader for ExcelReader<R> {
    async fn read_sheet(&self) -> Result<Sheet> {
        let buffer = read_bounded(&self.reader)
            .await
            .context("Failed to read workbook")?;
        parse_workbook(buffer)
    }
}

pub fn parse_workbook(buffer: Vec<u8>) -> Result<Sheet> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(buffer)).context("Not a readable workbook")?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow!("Workbook has no worksheets"))?
        .context("Failed to read first worksheet")?;
    Ok(range_to_sheet(&range))
}

/// First row is the header
fn range_to_sheet(range: &Range<Data>) -> Sheet {
    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<String>>());
    let headers = rows.next().unwrap_or_default();
    Sheet {
        headers,
        rows: rows.collect(),
    }
}

/// Cell text as the normalizer expects it; date cells become ISO dates
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        // Excel stores every number as a float
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => (*f as i64).to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_datetime() {
            Some(datetime) if datetime.time() == chrono::NaiveTime::MIN => {
                datetime.format("%Y-%m-%d").to_string()
            }
            Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => cell.to_string(),
        },
        Data::DurationIso(s) => s.clone(),
    }
}
