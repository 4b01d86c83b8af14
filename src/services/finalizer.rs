use crate::models::UploadTarget;
use crate::services::error::{UploadError, UploadResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Attempts at drawing a fresh unique name before giving up.
const MAX_NAME_ATTEMPTS: usize = 8;

/// Promotes an assembled working file to its client-visible name without ever
/// replacing an existing file.
#[derive(Debug, Clone)]
pub struct FinalizationResolver {
    token: fn() -> String,
}

impl Default for FinalizationResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalizationResolver {
    pub fn new() -> Self {
        Self {
            token: unique_token,
        }
    }

    /// Uses `token` instead of a random uuid when deriving collision names.
    pub fn with_token_source(token: fn() -> String) -> Self {
        Self { token }
    }

    /// Moves `working` straight to the display name, or to
    /// `{base}_{token}.{ext}` when the display name is taken.
    ///
    /// Every move is no-clobber. When no name can be claimed the working file
    /// is discarded so the failed upload leaves nothing behind.
    pub async fn finalize(&self, target: &UploadTarget, working: &Path) -> UploadResult<PathBuf> {
        match self.claim_name(target, working).await {
            Ok(finalized) => Ok(finalized),
            Err(e) => {
                discard(working).await;
                Err(e)
            }
        }
    }

    async fn claim_name(&self, target: &UploadTarget, working: &Path) -> UploadResult<PathBuf> {
        let display_path = target.display_path();
        if promote(working, &display_path).await? {
            tracing::info!(
                "Finalized upload {} as {}",
                target.working_id,
                display_path.display()
            );
            return Ok(display_path);
        }

        for _ in 0..MAX_NAME_ATTEMPTS {
            let candidate = target
                .working_dir
                .join(collision_name(&target.display_name, &(self.token)()));
            if promote(working, &candidate).await? {
                tracing::info!(
                    "Display name {} is taken; finalized upload {} as {}",
                    target.display_name,
                    target.working_id,
                    candidate.display()
                );
                return Ok(candidate);
            }
        }

        Err(UploadError::io(
            "Failed to move uploaded file",
            std::io::Error::new(ErrorKind::AlreadyExists, "no free name for finalized file"),
        ))
    }
}

async fn discard(working: &Path) {
    match fs::remove_file(working).await {
        Ok(()) => tracing::warn!("Discarded unfinalized upload {}", working.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::error!("Failed to discard {}: {}", working.display(), e),
    }
}

/// Moves `source` to `dest` only if `dest` is free. Returns false when occupied.
async fn promote(source: &Path, dest: &Path) -> UploadResult<bool> {
    match fs::hard_link(source, dest).await {
        Ok(()) => {
            if let Err(e) = fs::remove_file(source).await {
                tracing::warn!("Failed to drop working link {}: {}", source.display(), e);
            }
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) if matches!(e.kind(), ErrorKind::Unsupported | ErrorKind::PermissionDenied) => {
            // No hard links on this filesystem.
            let occupied = fs::try_exists(dest)
                .await
                .map_err(|e| UploadError::io("Failed to move uploaded file", e))?;
            if occupied {
                return Ok(false);
            }
            fs::rename(source, dest)
                .await
                .map_err(|e| UploadError::io("Failed to move uploaded file", e))?;
            Ok(true)
        }
        Err(e) => Err(UploadError::io("Failed to move uploaded file", e)),
    }
}

/// Derives `{base}_{token}.{ext}` from `display_name`. Names without an
/// extension become `{base}_{token}`.
pub fn collision_name(display_name: &str, token: &str) -> String {
    let path = Path::new(display_name);
    let base = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(display_name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{base}_{token}.{ext}"),
        None => format!("{base}_{token}"),
    }
}

fn unique_token() -> String {
    Uuid::new_v4().simple().to_string()
}
