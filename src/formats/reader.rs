use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::delimited::DelimitedReader;
use super::excel::ExcelReader;
use super::json::JsonReader;
use crate::io::LocalFileByteReader;

/// Raw rectangular contents of a spreadsheet export, before normalization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub headers: Vec<String>,
    /// Cell text per row; rows may be shorter than the header
    pub rows: Vec<Vec<String>>,
}

/// Trait for reading the different export formats into a [`Sheet`]
#[async_trait]
pub trait SheetReader: Send + Sync {
    async fn read_sheet(&self) -> Result<Sheet>;
}

/// Configuration for delimited file reading (CSV, TSV, etc.)
#[derive(Debug, Clone)]
pub struct DelimitedConfig {
    pub delimiter: u8,
    pub quote: u8,
}

impl Default for DelimitedConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}

impl DelimitedConfig {
    pub fn csv() -> Self {
        Self::default()
    }

    pub fn tsv() -> Self {
        Self {
            delimiter: b'\t',
            quote: b'"',
        }
    }
}

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Tsv,
    /// A JSON array of flat objects
    Json,
    /// First worksheet of an xlsx, xlsm or xls workbook
    Excel,
}

impl Format {
    /// Parse format from string (case-insensitive)
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Format::Csv),
            "tsv" => Ok(Format::Tsv),
            "json" => Ok(Format::Json),
            "xlsx" | "xlsm" | "xls" | "excel" => Ok(Format::Excel),
            _ => Err(anyhow::anyhow!(
                "Unsupported format: {}. Supported formats: csv, tsv, json, xlsx",
                s
            )),
        }
    }

    /// Detect the format from a file extension
    pub fn detect_from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Cannot detect format of {}; pass --format explicitly",
                    path.display()
                )
            })?;
        Self::parse(extension)
    }
}

/// Factory for creating SheetReader instances based on path and format
pub struct ReaderFactory;

impl ReaderFactory {
    pub fn create_reader(path: impl Into<PathBuf>, format: Format) -> Box<dyn SheetReader> {
        let byte_reader = LocalFileByteReader::new(path.into());
        match format {
            Format::Csv => Box::new(DelimitedReader::new(byte_reader, DelimitedConfig::csv())),
            Format::Tsv => Box::new(DelimitedReader::new(byte_reader, DelimitedConfig::tsv())),
            Format::Json => Box::new(JsonReader::new(byte_reader)),
            Format::Excel => Box::new(ExcelReader::new(byte_reader)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("CSV").unwrap(), Format::Csv);
        assert_eq!(Format::parse("tsv").unwrap(), Format::Tsv);
        assert_eq!(Format::parse("Json").unwrap(), Format::Json);
        assert_eq!(Format::parse("XLSX").unwrap(), Format::Excel);
        assert_eq!(Format::parse("xls").unwrap(), Format::Excel);
        assert!(Format::parse("pdf").is_err());
    }

    #[test]
    fn test_detect_from_path() {
        assert_eq!(
            Format::detect_from_path(Path::new("uploads/march.csv")).unwrap(),
            Format::Csv
        );
        assert_eq!(
            Format::detect_from_path(Path::new("march.TSV")).unwrap(),
            Format::Tsv
        );
        assert_eq!(
            Format::detect_from_path(Path::new("salary register.xlsx")).unwrap(),
            Format::Excel
        );
        assert!(Format::detect_from_path(Path::new("march")).is_err());
    }
}
