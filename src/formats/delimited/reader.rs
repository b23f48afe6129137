use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::formats::{DelimitedConfig, Sheet, SheetReader};
use crate::io::{ByteReader, read_bounded};

/// Delimited sheet reader that works with any ByteReader implementation
pub struct DelimitedReader<R: ByteReader> {
    reader: R,
    config: DelimitedConfig,
}

impl<R: ByteReader> DelimitedReader<R> {
    pub fn new(reader: R, config: DelimitedConfig) -> Self {
        Self { reader, config }
    }
}

#[async_trait]
impl<R: ByteReader + 'static> SheetReader for DelimitedReader<R> {
    async fn read_sheet(&self) -> Result<Sheet> {
        let buffer = read_bounded(&self.reader)
            .await
            .context("Failed to read delimited file")?;
        parse_delimited(&buffer, &self.config)
    }
}

/// Parse delimited bytes whose first record is the header row
pub fn parse_delimited(buffer: &[u8], config: &DelimitedConfig) -> Result<Sheet> {
    // Spreadsheet tools often prepend a UTF-8 BOM
    let buffer = buffer.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(buffer);

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter)
        .quote(config.quote)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(buffer);

    let headers = csv_reader
        .headers()
        .context("Failed to parse header row")?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result.context("Failed to parse CSV record")?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(Sheet { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LocalFileByteReader;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_read_csv_sheet() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "Person No,Personnel Area,Month").unwrap();
        writeln!(temp_file, "E1, A1 ,2024-03-01").unwrap();
        writeln!(temp_file, "E2,\"A, 2\",2024-03-01").unwrap();
        temp_file.flush().unwrap();

        let reader = DelimitedReader::new(
            LocalFileByteReader::new(temp_file.path()),
            DelimitedConfig::csv(),
        );
        let sheet = reader.read_sheet().await.unwrap();

        assert_eq!(sheet.headers, vec!["Person No", "Personnel Area", "Month"]);
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[0], vec!["E1", "A1", "2024-03-01"]);
        assert_eq!(sheet.rows[1][1], "A, 2");
    }

    #[test]
    fn test_tsv_with_bom_and_short_rows() {
        let data = b"\xEF\xBB\xBFperson_no\tpersonnel_area\tnet_pay\nE1\tA1\n";
        let sheet = parse_delimited(data, &DelimitedConfig::tsv()).unwrap();

        assert_eq!(sheet.headers[0], "person_no");
        assert_eq!(sheet.rows[0], vec!["E1", "A1"]);
    }
}
