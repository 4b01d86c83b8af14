use crate::config::UploadConfig;
use crate::models::{
    ChunkDescriptor, ChunkReceipt, PayloadSource, UploadMethod, UploadOutcome, UploadParams,
    UploadTarget, VerificationResult,
};
use crate::services::assembler::ChunkAssembler;
use crate::services::chunk_writer::ChunkWriter;
use crate::services::error::UploadResult;
use crate::services::finalizer::FinalizationResolver;
use crate::services::integrity::IntegrityVerifier;
use crate::services::reaper::{ReapReport, StaleUploadReaper};
use crate::utils::keyed_mutex::KeyedMutex;
use crate::utils::validation::{
    parse_chunk_number, parse_declared_size, require_field, resolve_target_dir,
    validate_display_name, validate_file_component,
};

/// Receives the single outcome of each chunk request.
///
/// The sink owns status mapping and serialization; the pipeline never touches
/// the transport.
pub trait ResponseSink: Send {
    fn deliver(&mut self, outcome: UploadOutcome);
}

impl ResponseSink for Vec<UploadOutcome> {
    fn deliver(&mut self, outcome: UploadOutcome) {
        self.push(outcome);
    }
}

impl ResponseSink for Option<UploadOutcome> {
    fn deliver(&mut self, outcome: UploadOutcome) {
        *self = Some(outcome);
    }
}

/// Runs one chunk request through write, reclaim, assemble, finalize and verify.
pub struct UploadService {
    config: UploadConfig,
    writer: ChunkWriter,
    reaper: StaleUploadReaper,
    assembler: ChunkAssembler,
    resolver: FinalizationResolver,
    verifier: IntegrityVerifier,
    locks: KeyedMutex,
}

impl UploadService {
    pub fn new(config: UploadConfig) -> Self {
        let locks = KeyedMutex::new();
        Self {
            writer: ChunkWriter::new(config.read_buffer_size),
            reaper: StaleUploadReaper::new(config.cleanup_max_age).with_locks(locks.clone()),
            assembler: ChunkAssembler::new(config.read_buffer_size),
            resolver: FinalizationResolver::new(),
            verifier: IntegrityVerifier::new(),
            locks,
            config,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn locks(&self) -> &KeyedMutex {
        &self.locks
    }

    /// Validates caller fields into a target and chunk position. Performs no I/O.
    pub fn prepare(&self, params: &UploadParams) -> UploadResult<(UploadTarget, ChunkDescriptor)> {
        let working_id = require_field(
            params.file_name.as_deref(),
            "uniqueFilename not set or empty",
        )?;
        let declared_size = require_field(params.file_size.as_deref(), "fileSize not set or empty")?;
        let declared_type = require_field(params.file_type.as_deref(), "fileType not set or empty")?;
        let display_name = require_field(
            params.original_name.as_deref(),
            "originalFilename not set or empty",
        )?;
        let method: UploadMethod = require_field(
            params.upload_method.as_deref(),
            "uploadMethod not set or empty",
        )?
        .parse()?;

        validate_file_component(&working_id, "fileName")?;
        validate_display_name(&display_name)?;
        let declared_size = parse_declared_size(&declared_size)?;

        let index = parse_chunk_number(
            params.chunk.as_deref(),
            "Chunk number should have a numeric value",
        )?;
        let total_count = parse_chunk_number(
            params.chunks.as_deref(),
            "Total number of chunks should have a numeric value",
        )?;
        let chunk = ChunkDescriptor::new(index, total_count)?;

        let working_dir = resolve_target_dir(
            &self.config.document_root,
            params.target_dir.as_deref(),
            &self.config.default_target_dir,
        )?;

        let target = UploadTarget {
            working_dir,
            working_id,
            display_name,
            method,
            declared_size,
            declared_type: declared_type.trim().to_string(),
        };
        Ok((target, chunk))
    }

    /// Handles one chunk request and returns its receipt.
    pub async fn process(
        &self,
        params: &UploadParams,
        payload: PayloadSource,
    ) -> UploadResult<ChunkReceipt> {
        let (target, chunk) = self.prepare(params)?;

        ChunkWriter::ensure_working_dir(&target.working_dir).await;
        let report = self
            .reaper
            .sweep(&target.working_dir, Some(&target.working_id))
            .await?;
        if report.deleted > 0 || report.failed > 0 {
            tracing::info!(
                "Reclaimed {} stale part files in {} ({} failed)",
                report.deleted,
                target.working_dir.display(),
                report.failed
            );
        }

        self.writer.write(&target, &chunk, payload).await?;

        if !chunk.is_terminal() {
            tracing::debug!(
                "Stored chunk {}/{} of {} upload {}",
                chunk.index,
                chunk.total_count,
                target.method,
                target.working_id
            );
            return Ok(ChunkReceipt {
                chunk_number: chunk.index,
                final_path: None,
                verification: VerificationResult::NotApplicable,
            });
        }

        let result = self.complete(&target, &chunk).await;
        self.locks.cleanup();
        let (final_path, verification) = result?;

        tracing::info!(
            "Upload {} complete: {} ({} bytes, {})",
            target.working_id,
            final_path.display(),
            target.declared_size,
            target.declared_type
        );
        Ok(ChunkReceipt {
            chunk_number: chunk.index,
            final_path: Some(final_path),
            verification,
        })
    }

    /// Assembles, finalizes and verifies while holding the upload's lock.
    async fn complete(
        &self,
        target: &UploadTarget,
        chunk: &ChunkDescriptor,
    ) -> UploadResult<(std::path::PathBuf, VerificationResult)> {
        let _guard = self.locks.lock(&target.lock_key()).await;

        let working = self.assembler.assemble(target, chunk).await?;
        let finalized = self.resolver.finalize(target, &working).await?;
        let verification = self.verifier.verify_or_rollback(target, &finalized).await?;
        Ok((finalized, verification))
    }

    /// Handles one chunk request and hands the outcome to `sink`.
    pub async fn handle(
        &self,
        params: &UploadParams,
        payload: PayloadSource,
        sink: &mut dyn ResponseSink,
    ) {
        let result = self.process(params, payload).await;
        if let Err(e) = &result {
            tracing::warn!("Chunk request failed: {}", e);
        }
        sink.deliver(UploadOutcome::from(result));
    }

    /// Sweeps the default working directory without exempting any upload.
    pub async fn sweep_default_dir(&self) -> UploadResult<ReapReport> {
        let dir = resolve_target_dir(
            &self.config.document_root,
            None,
            &self.config.default_target_dir,
        )?;
        ChunkWriter::ensure_working_dir(&dir).await;
        self.reaper.sweep(&dir, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::error::FailureKind;
    use tempfile::TempDir;

    fn params(method: &str, chunk: u64, chunks: u64, size: usize) -> UploadParams {
        UploadParams {
            upload_method: Some(method.to_string()),
            target_dir: Some("inbox".to_string()),
            file_name: Some("w-42".to_string()),
            original_name: Some("notes.txt".to_string()),
            chunk: Some(chunk.to_string()),
            chunks: Some(chunks.to_string()),
            file_size: Some(size.to_string()),
            file_type: Some("text/plain".to_string()),
        }
    }

    #[test]
    fn test_prepare_reports_first_missing_field() {
        let dir = TempDir::new().unwrap();
        let service = UploadService::new(UploadConfig::development(dir.path()));

        let mut p = params("P", 0, 1, 3);
        p.file_name = None;
        p.file_type = None;
        let err = service.prepare(&p).unwrap_err();
        assert_eq!(err.to_string(), "uniqueFilename not set or empty");

        let mut p = params("P", 0, 1, 3);
        p.upload_method = Some("Z".to_string());
        assert_eq!(
            service.prepare(&p).unwrap_err().to_string(),
            "uploadMethod not set or empty"
        );

        let mut p = params("P", 0, 1, 3);
        p.chunk = Some("first".to_string());
        assert_eq!(
            service.prepare(&p).unwrap_err().to_string(),
            "Chunk number should have a numeric value"
        );

        let mut p = params("P", 0, 1, 3);
        p.chunks = Some("many".to_string());
        assert_eq!(
            service.prepare(&p).unwrap_err().to_string(),
            "Total number of chunks should have a numeric value"
        );
    }

    #[tokio::test]
    async fn test_blank_chunk_fields_are_rejected() {
        let dir = TempDir::new().unwrap();
        let service = UploadService::new(UploadConfig::development(dir.path()));

        let mut p = params("S", 0, 0, 3);
        p.chunk = Some(String::new());
        p.chunks = Some(String::new());
        let err = service
            .process(&p, PayloadSource::bytes("abc"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
        assert_eq!(err.to_string(), "Chunk number should have a numeric value");

        let mut p = params("S", 0, 0, 3);
        p.chunks = Some(" ".to_string());
        assert_eq!(
            service.prepare(&p).unwrap_err().to_string(),
            "Total number of chunks should have a numeric value"
        );
        assert!(!dir.path().join("inbox").exists());

        // Absent fields still mean a single unchunked upload.
        let mut p = params("S", 0, 0, 3);
        p.chunk = None;
        p.chunks = None;
        let (_, chunk) = service.prepare(&p).unwrap();
        assert_eq!(chunk, ChunkDescriptor { index: 0, total_count: 0 });
    }

    #[test]
    fn test_part_shaped_display_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let service = UploadService::new(UploadConfig::development(dir.path()));

        let mut p = params("P", 0, 1, 3);
        p.original_name = Some("notes.part2".to_string());
        assert_eq!(service.prepare(&p).unwrap_err().kind(), FailureKind::Validation);
    }

    #[test]
    fn test_prepare_resolves_target() {
        let dir = TempDir::new().unwrap();
        let service = UploadService::new(UploadConfig::development(dir.path()));
        let (target, chunk) = service.prepare(&params("s", 1, 3, 12)).unwrap();

        assert_eq!(target.working_dir, dir.path().join("inbox"));
        assert_eq!(target.method, UploadMethod::Sequential);
        assert_eq!(target.declared_size, 12);
        assert_eq!(chunk, ChunkDescriptor { index: 1, total_count: 3 });
    }

    #[tokio::test]
    async fn test_validation_happens_before_io() {
        let dir = TempDir::new().unwrap();
        let service = UploadService::new(UploadConfig::development(dir.path()));
        let mut p = params("P", 0, 2, 3);
        p.original_name = Some("../escape.txt".to_string());

        let err = service
            .process(&p, PayloadSource::bytes("abc"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
        assert!(!dir.path().join("inbox").exists());
    }

    #[tokio::test]
    async fn test_handle_delivers_to_sink() {
        let dir = TempDir::new().unwrap();
        let service = UploadService::new(UploadConfig::development(dir.path()));
        let mut sink: Vec<UploadOutcome> = Vec::new();

        service
            .handle(&params("P", 1, 2, 6), PayloadSource::bytes("def"), &mut sink)
            .await;
        service
            .handle(&params("P", 0, 2, 6), PayloadSource::bytes("abc"), &mut sink)
            .await;

        assert_eq!(sink.len(), 2);
        assert_eq!(
            sink[0],
            UploadOutcome::Failure {
                error: "Last chunk was uploaded before all previous chunks were uploaded"
                    .to_string(),
                kind: FailureKind::Assembly,
            }
        );
        assert_eq!(
            sink[1],
            UploadOutcome::Success {
                message: "Chunk 0 uploaded successfully".to_string(),
                chunk_number: 0,
                final_path: None,
            }
        );
    }

    #[tokio::test]
    async fn test_lock_entries_pruned_after_completion() {
        let dir = TempDir::new().unwrap();
        let service = UploadService::new(UploadConfig::development(dir.path()));

        let receipt = service
            .process(&params("S", 0, 0, 5), PayloadSource::bytes("hello"))
            .await
            .unwrap();
        assert_eq!(receipt.verification, VerificationResult::Verified);
        assert!(service.locks().is_empty());
    }
}
