use crate::models::{ChunkDescriptor, UploadMethod, UploadTarget};
use crate::services::error::{UploadError, UploadResult};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Turns the part slots of a finished upload into one working file.
#[derive(Debug, Clone)]
pub struct ChunkAssembler {
    buffer_size: usize,
}

impl ChunkAssembler {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Returns the path of the assembled working file (`{id}.part`).
    ///
    /// In parallel mode every slot `0..total` must be present before anything is
    /// merged; a gap fails with [`UploadError::Assembly`] and leaves all slots in
    /// place. Slots are removed only after the merged file is fully written.
    pub async fn assemble(
        &self,
        target: &UploadTarget,
        chunk: &ChunkDescriptor,
    ) -> UploadResult<PathBuf> {
        match target.method {
            UploadMethod::Sequential => Ok(target.accumulating_path()),
            UploadMethod::Parallel => self.merge_parallel(target, chunk).await,
        }
    }

    async fn merge_parallel(
        &self,
        target: &UploadTarget,
        chunk: &ChunkDescriptor,
    ) -> UploadResult<PathBuf> {
        // An unchunked parallel upload still lands in slot 0.
        let slot_count = chunk.total_count.max(1);

        let mut slots = Vec::with_capacity(slot_count as usize);
        for index in 0..slot_count {
            let slot = target.parallel_slot_path(index);
            let present = fs::try_exists(&slot)
                .await
                .map_err(|e| UploadError::io("Failed to inspect part files", e))?;
            if !present {
                tracing::warn!(
                    "Upload {} is missing chunk {} of {}",
                    target.working_id,
                    index,
                    slot_count
                );
                return Err(UploadError::Assembly { missing: index });
            }
            slots.push(slot);
        }

        let working = target.accumulating_path();
        if let Err(e) = self.concatenate(&slots, &working).await {
            if let Err(cleanup) = fs::remove_file(&working).await {
                tracing::debug!("No partial merge to discard at {}: {}", working.display(), cleanup);
            }
            return Err(e);
        }

        for slot in &slots {
            if let Err(e) = fs::remove_file(slot).await {
                tracing::warn!("Failed to remove merged slot {}: {}", slot.display(), e);
            }
        }

        tracing::info!(
            "Merged {} chunks of upload {} into {}",
            slots.len(),
            target.working_id,
            working.display()
        );
        Ok(working)
    }

    async fn concatenate(&self, slots: &[PathBuf], working: &Path) -> UploadResult<()> {
        let mut out = File::create(working)
            .await
            .map_err(|e| UploadError::io("Failed to open output stream", e))?;
        let mut buffer = vec![0u8; self.buffer_size];

        for slot in slots {
            let mut input = File::open(slot)
                .await
                .map_err(|e| UploadError::io("Failed to open input stream", e))?;
            loop {
                let n = input
                    .read(&mut buffer)
                    .await
                    .map_err(|e| UploadError::io("Failed to read part file", e))?;
                if n == 0 {
                    break;
                }
                out.write_all(&buffer[..n])
                    .await
                    .map_err(|e| UploadError::io("Failed to write output stream", e))?;
            }
        }

        out.flush()
            .await
            .map_err(|e| UploadError::io("Failed to write output stream", e))?;
        Ok(())
    }
}
