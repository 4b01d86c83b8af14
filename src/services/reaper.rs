use crate::models::PART_SUFFIX;
use crate::services::error::{UploadError, UploadResult};
use crate::utils::keyed_mutex::KeyedMutex;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::fs;

/// Counts from one sweep of a working directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Reclaims part files left behind by uploads that never completed.
#[derive(Debug, Clone)]
pub struct StaleUploadReaper {
    max_age: Duration,
    locks: Option<KeyedMutex>,
}

impl StaleUploadReaper {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            locks: None,
        }
    }

    /// Skip part files of uploads currently held in `locks`.
    pub fn with_locks(mut self, locks: KeyedMutex) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Deletes every part file in `dir` last modified before `now - max_age`.
    ///
    /// Slots owned by `current_working_id` are never touched. Individual delete
    /// failures are counted and logged; only an unlistable directory is an error.
    pub async fn sweep(
        &self,
        dir: &Path,
        current_working_id: Option<&str>,
    ) -> UploadResult<ReapReport> {
        let mut entries = fs::read_dir(dir).await.map_err(|e| {
            UploadError::io(
                format!("Failed to open temp directory, {}", dir.display()),
                e,
            )
        })?;

        let Some(cutoff) = SystemTime::now().checked_sub(self.max_age) else {
            return Ok(ReapReport::default());
        };

        let mut report = ReapReport::default();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Stopped sweeping {}: {}", dir.display(), e);
                    break;
                }
            };

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(owner) = part_owner(name) else {
                continue;
            };
            report.scanned += 1;

            if Some(owner) == current_working_id {
                continue;
            }
            if let Some(locks) = &self.locks {
                if locks.is_held(&dir.join(owner).to_string_lossy()) {
                    tracing::debug!("Skipping {} while its upload is assembling", name);
                    continue;
                }
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::debug!("Skipping {}: no modification time ({})", name, e);
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => {
                    tracing::info!("Reclaimed stale part file {}", entry.path().display());
                    report.deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to reclaim stale part file {}: {}",
                        entry.path().display(),
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Returns the working id owning `file_name` if it names a part slot
/// (`{id}.part` or `{id}.part{index}`).
pub fn part_owner(file_name: &str) -> Option<&str> {
    let digits_start = file_name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let stem = file_name[..digits_start].strip_suffix(PART_SUFFIX)?;
    if stem.is_empty() { None } else { Some(stem) }
}
