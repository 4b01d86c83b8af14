use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for chunked upload handling
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Root that every target directory is resolved against (default: current dir)
    pub document_root: PathBuf,

    /// Target directory used when the caller sends none (default: "uploads/appUploads")
    pub default_target_dir: String,

    /// Part files untouched for longer than this are reclaimed (default: 2 days)
    pub cleanup_max_age: Duration,

    /// Buffer size used when streaming chunk bytes (default: 4 KB)
    pub read_buffer_size: usize,

    /// Maximum accepted request body for one chunk in bytes (default: 64 MB)
    pub max_chunk_size: usize,

    /// Interval between background sweeps of the default directory (default: 1 hour)
    pub sweep_interval: Duration,

    /// Run the background sweeper alongside the API (default: true)
    pub enable_background_sweep: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            document_root: PathBuf::from("."),
            default_target_dir: "uploads/appUploads".to_string(),
            cleanup_max_age: Duration::from_secs(172_800), // 2 days
            read_buffer_size: 4096,
            max_chunk_size: 64 * 1024 * 1024, // 64 MB
            sweep_interval: Duration::from_secs(3600),
            enable_background_sweep: true,
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            document_root: env::var("UPLOAD_DOCUMENT_ROOT")
                .or_else(|_| env::var("DOCUMENT_ROOT"))
                .map(PathBuf::from)
                .unwrap_or(default.document_root),

            default_target_dir: env::var("UPLOAD_DEFAULT_TARGET_DIR")
                .unwrap_or(default.default_target_dir),

            cleanup_max_age: env::var("UPLOAD_CLEANUP_MAX_AGE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.cleanup_max_age),

            read_buffer_size: env::var("UPLOAD_READ_BUFFER_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|size: &usize| *size > 0)
                .unwrap_or(default.read_buffer_size),

            max_chunk_size: env::var("MAX_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_chunk_size),

            sweep_interval: env::var("UPLOAD_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(default.sweep_interval),

            enable_background_sweep: env::var("ENABLE_BACKGROUND_SWEEP")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.enable_background_sweep),
        }
    }

    /// Config for local development and tests, rooted at `root`
    pub fn development(root: impl Into<PathBuf>) -> Self {
        Self {
            document_root: root.into(),
            enable_background_sweep: false,
            ..Self::default()
        }
    }
}
