use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::byte_reader::ByteReader;

/// ByteReader implementation for local files
#[derive(Debug, Clone)]
pub struct LocalFileByteReader {
    file_path: PathBuf,
}

impl LocalFileByteReader {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ByteReader for LocalFileByteReader {
    async fn size(&self) -> Result<u64> {
        let metadata = tokio::fs::metadata(&self.file_path)
            .await
            .with_context(|| format!("Failed to open {}", self.file_path.display()))?;
        Ok(metadata.len())
    }

    async fn read_all(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.file_path)
            .await
            .with_context(|| format!("Failed to read {}", self.file_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read_bounded;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_read_local_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "person_no,personnel_area").unwrap();
        temp_file.flush().unwrap();

        let reader = LocalFileByteReader::new(temp_file.path());
        assert_eq!(reader.size().await.unwrap(), 24);
        assert_eq!(read_bounded(&reader).await.unwrap(), b"person_no,personnel_area");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let reader = LocalFileByteReader::new("/nonexistent/payroll.csv");
        let err = reader.size().await.unwrap_err();
        assert!(err.to_string().contains("Failed to open"));
    }
}
