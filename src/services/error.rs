use thiserror::Error;

/// Coarse classification of a failed chunk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    Io,
    Assembly,
    Integrity,
}

#[derive(Error, Debug)]
pub enum UploadError {
    /// Malformed or missing caller fields. Raised before any I/O.
    #[error("{0}")]
    Validation(String),

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A parallel merge found slot `missing` absent. The whole upload must be resent.
    #[error("Last chunk was uploaded before all previous chunks were uploaded")]
    Assembly { missing: u64 },

    /// The finalized artifact did not match the declared size or type and was removed.
    #[error("File integrity failed, please re-upload the file again")]
    Integrity {
        expected_size: u64,
        actual_size: u64,
        expected_type: String,
        actual_type: String,
    },
}

impl UploadError {
    pub fn validation(message: impl Into<String>) -> Self {
        UploadError::Validation(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        UploadError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            UploadError::Validation(_) => FailureKind::Validation,
            UploadError::Io { .. } => FailureKind::Io,
            UploadError::Assembly { .. } => FailureKind::Assembly,
            UploadError::Integrity { .. } => FailureKind::Integrity,
        }
    }
}

pub type UploadResult<T> = Result<T, UploadError>;
