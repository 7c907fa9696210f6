//! The output file. A thin wrapper over `tokio::fs::File` — exclusively
//! owned by the driver for the lifetime of one fetch, never shared.

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::SabrError;

pub struct Output {
    path: std::path::PathBuf,
    file: File,
    bytes_written: u64,
}

impl Output {
    pub async fn create(path: impl Into<std::path::PathBuf>) -> Result<Self, SabrError> {
        let path = path.into();
        let file = File::create(&path)
            .await
            .map_err(|e| SabrError::transport(format!("failed to create output file: {e}")))?;
        Ok(Self {
            path,
            file,
            bytes_written: 0,
        })
    }

    pub async fn append(&mut self, bytes: &[u8]) -> Result<(), SabrError> {
        self.file
            .write_all(bytes)
            .await
            .map_err(|e| SabrError::transport(format!("failed writing output file: {e}")))?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush and close on the success path.
    pub async fn finish(mut self) -> Result<u64, SabrError> {
        self.file
            .flush()
            .await
            .map_err(|e| SabrError::transport(format!("failed flushing output file: {e}")))?;
        Ok(self.bytes_written)
    }

    /// Drop the file and delete it from disk: used when a fetch ends with
    /// zero bytes written, or aborts before any were.
    pub async fn discard(self) {
        let path = self.path.clone();
        drop(self.file);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
