use anyhow::Result;
use async_trait::async_trait;

use crate::config::MAX_SHEET_BYTES;

/// Abstraction for byte-level I/O so sheet readers do not care where an
/// upload lives
#[async_trait]
pub trait ByteReader: Send + Sync {
    /// Total size of the source in bytes
    async fn size(&self) -> Result<u64>;

    /// Read the whole source
    async fn read_all(&self) -> Result<Vec<u8>>;
}

/// Read the whole source, refusing anything larger than [`MAX_SHEET_BYTES`]
pub async fn read_bounded(reader: &dyn ByteReader) -> Result<Vec<u8>> {
    let size = reader.size().await?;
    if size > MAX_SHEET_BYTES {
        anyhow::bail!(
            "Sheet is {} bytes, larger than the {} byte limit",
            size,
            MAX_SHEET_BYTES
        );
    }
    reader.read_all().await
}
