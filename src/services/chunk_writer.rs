use crate::models::{ChunkDescriptor, PayloadSource, UploadTarget};
use crate::services::error::{UploadError, UploadResult};
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Persists the bytes of one incoming chunk into its part slot.
#[derive(Debug, Clone)]
pub struct ChunkWriter {
    buffer_size: usize,
}

impl ChunkWriter {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Creates the working directory if it is missing. Failures are only logged;
    /// a directory that really is unusable surfaces when it is listed or written.
    pub async fn ensure_working_dir(dir: &Path) {
        if let Err(e) = fs::create_dir_all(dir).await {
            tracing::warn!("Could not create working directory {}: {}", dir.display(), e);
        }
    }

    /// Streams `source` into the slot for `chunk`, returning the number of bytes written.
    ///
    /// Chunked uploads append to the slot so a retried sequential chunk extends the
    /// accumulating file; a single unchunked upload truncates it.
    pub async fn write(
        &self,
        target: &UploadTarget,
        chunk: &ChunkDescriptor,
        source: PayloadSource,
    ) -> UploadResult<u64> {
        Self::ensure_working_dir(&target.working_dir).await;

        let slot_path = target.slot_path(chunk.index);
        let mut options = OpenOptions::new();
        options.create(true);
        if chunk.is_chunked() {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }

        let mut slot = options.open(&slot_path).await.map_err(|e| {
            tracing::error!("Failed to open slot {}: {}", slot_path.display(), e);
            UploadError::io("Failed to open output stream", e)
        })?;

        // Bytes already in the slot belong to earlier chunks.
        let kept_len = slot
            .metadata()
            .await
            .map_err(|e| UploadError::io("Failed to open output stream", e))?
            .len();

        let reader: Box<dyn AsyncRead + Send + Unpin> = match source {
            PayloadSource::File(path) => {
                let file = fs::File::open(&path).await.map_err(|e| {
                    tracing::error!("Failed to open payload {}: {}", path.display(), e);
                    UploadError::io("Failed to open input stream", e)
                })?;
                Box::new(file)
            }
            PayloadSource::Stream(stream) => stream,
        };

        let written = match self.copy(reader, &mut slot).await {
            Ok(written) => written,
            Err(e) => {
                Self::truncate_to(&slot, kept_len, &slot_path).await;
                return Err(e);
            }
        };

        tracing::debug!(
            "Wrote {} bytes of chunk {} to {}",
            written,
            chunk.index,
            slot_path.display()
        );
        Ok(written)
    }

    async fn copy(
        &self,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        slot: &mut fs::File,
    ) -> UploadResult<u64> {
        let mut buffer = vec![0u8; self.buffer_size];
        let mut written = 0u64;
        loop {
            let n = reader
                .read(&mut buffer)
                .await
                .map_err(|e| UploadError::io("Failed to read input stream", e))?;
            if n == 0 {
                break;
            }
            slot.write_all(&buffer[..n])
                .await
                .map_err(|e| UploadError::io("Failed to write output stream", e))?;
            written += n as u64;
        }

        slot.flush()
            .await
            .map_err(|e| UploadError::io("Failed to write output stream", e))?;
        Ok(written)
    }

    /// Drops the bytes of an interrupted chunk so a retry starts clean.
    async fn truncate_to(slot: &fs::File, len: u64, slot_path: &Path) {
        if let Err(e) = slot.set_len(len).await {
            tracing::error!(
                "Failed to roll back slot {} to {} bytes: {}",
                slot_path.display(),
                len,
                e
            );
        }
    }
}
