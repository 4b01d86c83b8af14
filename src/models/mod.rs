use crate::services::error::{FailureKind, UploadError, UploadResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::io::AsyncRead;
use utoipa::{IntoParams, ToSchema};

/// Suffix marking a file as an in-progress part.
pub const PART_SUFFIX: &str = ".part";

/// How the chunks of one upload arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UploadMethod {
    /// Chunks arrive strictly in order and are appended to one slot.
    Sequential,
    /// Chunks arrive in any order, one slot per index, merged on the last chunk.
    Parallel,
}

impl FromStr for UploadMethod {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "sequential" => Ok(UploadMethod::Sequential),
            "p" | "parallel" => Ok(UploadMethod::Parallel),
            _ => Err(UploadError::validation("uploadMethod not set or empty")),
        }
    }
}

impl fmt::Display for UploadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadMethod::Sequential => f.write_str("sequential"),
            UploadMethod::Parallel => f.write_str("parallel"),
        }
    }
}

/// Raw, unvalidated fields of one chunk request, named as clients send them.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct UploadParams {
    /// `S`/`P` or `sequential`/`parallel`
    pub upload_method: Option<String>,
    /// Directory relative to the upload root
    pub target_dir: Option<String>,
    /// Server-side working id, stable across all chunks of one upload
    pub file_name: Option<String>,
    /// Client-visible final name
    pub original_name: Option<String>,
    /// Zero-based chunk index
    pub chunk: Option<String>,
    /// Total chunk count, 0 for a single unchunked upload
    pub chunks: Option<String>,
    /// Declared size of the complete file in bytes
    pub file_size: Option<String>,
    /// Declared MIME type of the complete file
    pub file_type: Option<String>,
}

impl UploadParams {
    /// Applies a form field by its wire name. Returns false for unknown names.
    pub fn set_field(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "uploadMethod" => &mut self.upload_method,
            "targetDir" => &mut self.target_dir,
            "fileName" => &mut self.file_name,
            "originalName" => &mut self.original_name,
            "chunk" => &mut self.chunk,
            "chunks" => &mut self.chunks,
            "fileSize" => &mut self.file_size,
            "fileType" => &mut self.file_type,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

/// Identity of one upload, rebuilt from every chunk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub working_dir: PathBuf,
    pub working_id: String,
    pub display_name: String,
    pub method: UploadMethod,
    pub declared_size: u64,
    pub declared_type: String,
}

impl UploadTarget {
    /// Slot for `index`: shared `{id}.part` in sequential mode, `{id}.part{index}` in parallel mode.
    pub fn slot_path(&self, index: u64) -> PathBuf {
        match self.method {
            UploadMethod::Sequential => self.accumulating_path(),
            UploadMethod::Parallel => self.parallel_slot_path(index),
        }
    }

    pub fn parallel_slot_path(&self, index: u64) -> PathBuf {
        self.working_dir
            .join(format!("{}{}{}", self.working_id, PART_SUFFIX, index))
    }

    /// `{id}.part`: the sequential slot, and the merge target in parallel mode.
    pub fn accumulating_path(&self) -> PathBuf {
        self.working_dir
            .join(format!("{}{}", self.working_id, PART_SUFFIX))
    }

    /// `{id}` in the working directory. Names the upload; no file is written here.
    pub fn canonical_path(&self) -> PathBuf {
        self.working_dir.join(&self.working_id)
    }

    pub fn display_path(&self) -> PathBuf {
        self.working_dir.join(&self.display_name)
    }

    /// Key used to serialize terminal work on this upload.
    pub fn lock_key(&self) -> String {
        self.canonical_path().to_string_lossy().into_owned()
    }
}

/// Position of the current chunk within its upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: u64,
    /// 0 means a single unchunked upload.
    pub total_count: u64,
}

impl ChunkDescriptor {
    pub fn new(index: u64, total_count: u64) -> UploadResult<Self> {
        if total_count > 0 && index >= total_count {
            return Err(UploadError::validation(format!(
                "Chunk number {index} is out of range for {total_count} chunks"
            )));
        }
        Ok(Self { index, total_count })
    }

    pub fn is_chunked(&self) -> bool {
        self.total_count > 0
    }

    /// Whether this chunk triggers assembly.
    pub fn is_terminal(&self) -> bool {
        self.total_count == 0 || self.index == self.total_count - 1
    }
}

/// Where the bytes of the current chunk come from.
pub enum PayloadSource {
    /// A named temporary artifact, such as a spooled multipart field.
    File(PathBuf),
    /// A raw request body.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl PayloadSource {
    pub fn file(path: impl AsRef<Path>) -> Self {
        PayloadSource::File(path.as_ref().to_path_buf())
    }

    pub fn stream(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        PayloadSource::Stream(Box::new(reader))
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::stream(std::io::Cursor::new(data.into()))
    }
}

impl fmt::Debug for PayloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadSource::File(path) => f.debug_tuple("File").field(path).finish(),
            PayloadSource::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationResult {
    Verified,
    Failed,
    /// Non-terminal chunk; nothing to verify yet.
    NotApplicable,
}

/// Successful handling of one chunk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub chunk_number: u64,
    /// Set once the terminal chunk produced a finalized file.
    pub final_path: Option<PathBuf>,
    pub verification: VerificationResult,
}

/// The single structured result handed to the response sink per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success {
        message: String,
        chunk_number: u64,
        final_path: Option<String>,
    },
    Failure {
        error: String,
        kind: FailureKind,
    },
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success { .. })
    }
}

impl From<UploadResult<ChunkReceipt>> for UploadOutcome {
    fn from(result: UploadResult<ChunkReceipt>) -> Self {
        match result {
            Ok(receipt) => match receipt.final_path {
                Some(path) => UploadOutcome::Success {
                    message: "All chunks uploaded successfully".to_string(),
                    chunk_number: receipt.chunk_number,
                    final_path: Some(path.to_string_lossy().into_owned()),
                },
                None => UploadOutcome::Success {
                    message: format!("Chunk {} uploaded successfully", receipt.chunk_number),
                    chunk_number: receipt.chunk_number,
                    final_path: None,
                },
            },
            Err(e) => UploadOutcome::Failure {
                error: e.to_string(),
                kind: e.kind(),
            },
        }
    }
}
