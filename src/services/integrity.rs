use crate::models::{UploadTarget, VerificationResult};
use crate::services::error::{UploadError, UploadResult};
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::AsyncReadExt;

/// Bytes inspected when sniffing the content type.
const SNIFF_LEN: usize = 8192;

/// Size and sniffed type of a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub size: u64,
    pub content_type: String,
}

/// Checks a finalized file against what the client declared and removes it on mismatch.
#[derive(Debug, Clone, Default)]
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    pub fn new() -> Self {
        Self
    }

    pub async fn measure(&self, path: &Path) -> UploadResult<Measurement> {
        let size = fs::metadata(path)
            .await
            .map_err(|e| UploadError::io("Failed to inspect uploaded file", e))?
            .len();

        let mut file = File::open(path)
            .await
            .map_err(|e| UploadError::io("Failed to inspect uploaded file", e))?;
        let mut header = Vec::with_capacity(SNIFF_LEN);
        (&mut file)
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut header)
            .await
            .map_err(|e| UploadError::io("Failed to inspect uploaded file", e))?;

        Ok(Measurement {
            size,
            content_type: detect_content_type(&header, size),
        })
    }

    /// Compares the file at `path` with the declared size and type.
    pub async fn verify(
        &self,
        path: &Path,
        declared_size: u64,
        declared_type: &str,
    ) -> UploadResult<(VerificationResult, Measurement)> {
        let actual = self.measure(path).await?;
        let verdict = if actual.size == declared_size
            && normalize_mime(&actual.content_type) == normalize_mime(declared_type)
        {
            VerificationResult::Verified
        } else {
            VerificationResult::Failed
        };
        Ok((verdict, actual))
    }

    /// Verifies the finalized file and deletes it when it does not match.
    pub async fn verify_or_rollback(
        &self,
        target: &UploadTarget,
        finalized: &Path,
    ) -> UploadResult<VerificationResult> {
        let (verdict, actual) = match self
            .verify(finalized, target.declared_size, &target.declared_type)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Could not verify {}: {}", finalized.display(), e);
                roll_back(finalized).await;
                return Err(e);
            }
        };

        if verdict == VerificationResult::Verified {
            return Ok(verdict);
        }

        tracing::warn!(
            "Integrity mismatch for {}: declared {} bytes of {}, found {} bytes of {}",
            finalized.display(),
            target.declared_size,
            target.declared_type,
            actual.size,
            actual.content_type
        );
        roll_back(finalized).await;

        Err(UploadError::Integrity {
            expected_size: target.declared_size,
            actual_size: actual.size,
            expected_type: target.declared_type.clone(),
            actual_type: actual.content_type,
        })
    }
}

async fn roll_back(finalized: &Path) {
    if let Err(e) = fs::remove_file(finalized).await {
        tracing::error!("Failed to roll back {}: {}", finalized.display(), e);
    }
}

/// Sniffs a MIME type from the leading bytes of a file of `total_len` bytes.
pub fn detect_content_type(header: &[u8], total_len: u64) -> String {
    if total_len == 0 {
        return "application/x-empty".to_string();
    }
    if let Some(kind) = infer::get(header) {
        return kind.mime_type().to_string();
    }
    if looks_like_text(header) {
        "text/plain".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

fn looks_like_text(header: &[u8]) -> bool {
    if header.contains(&0) {
        return false;
    }
    match std::str::from_utf8(header) {
        Ok(_) => true,
        // A multi-byte character cut off by the sniff window is still text.
        Err(e) => e.error_len().is_none() && header.len() == SNIFF_LEN,
    }
}

fn normalize_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}
