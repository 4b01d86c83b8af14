use crate::services::error::{UploadError, UploadResult};
use crate::services::reaper::part_owner;
use std::path::{Component, Path, PathBuf};

/// Returns the field value, or a validation error carrying `message` when it is absent or blank.
pub fn require_field(value: Option<&str>, message: &str) -> UploadResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
        _ => Err(UploadError::validation(message)),
    }
}

/// Parses a chunk index or chunk count. An absent field means 0; a field that is
/// present but blank is not a number.
pub fn parse_chunk_number(value: Option<&str>, message: &str) -> UploadResult<u64> {
    let Some(raw) = value else {
        return Ok(0);
    };
    raw.trim()
        .parse::<u64>()
        .map_err(|_| UploadError::validation(message))
}

/// Parses the client-declared size in bytes.
pub fn parse_declared_size(value: &str) -> UploadResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| UploadError::validation("fileSize should have a numeric value"))
}

/// Ensures `name` is a single plain file name that cannot escape its directory.
pub fn validate_file_component(name: &str, field: &str) -> UploadResult<()> {
    if name.chars().any(|c| c.is_control()) {
        return Err(UploadError::validation(format!(
            "{field} contains control characters"
        )));
    }

    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        tracing::warn!("Path traversal attempt detected in {}: {}", field, name);
        return Err(UploadError::validation(format!(
            "{field} must be a plain file name"
        )));
    }

    if name.len() > 255 {
        return Err(UploadError::validation(format!(
            "{field} exceeds 255 bytes"
        )));
    }

    Ok(())
}

/// Validates the client-visible name of a finished upload.
///
/// Names shaped like part slots (`x.part`, `x.part3`) are refused because the
/// stale-upload sweep would later reclaim the finished file.
pub fn validate_display_name(name: &str) -> UploadResult<()> {
    validate_file_component(name, "originalName")?;
    if part_owner(name).is_some() {
        return Err(UploadError::validation(
            "originalName must not end in .part or .part<number>",
        ));
    }
    Ok(())
}

/// Resolves the working directory for a request under `root`.
///
/// The requested directory is treated as relative to `root` even when it starts
/// with `/`. Parent-directory components are rejected.
pub fn resolve_target_dir(
    root: &Path,
    requested: Option<&str>,
    default_dir: &str,
) -> UploadResult<PathBuf> {
    let relative = match requested {
        Some(dir) if !dir.trim().is_empty() => dir.trim(),
        _ => default_dir,
    };
    let relative = relative.trim_start_matches(['/', '\\']);

    let mut resolved = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                tracing::warn!("Rejected target directory outside root: {}", relative);
                return Err(UploadError::validation(
                    "targetDir must stay inside the upload root",
                ));
            }
        }
    }

    Ok(resolved)
}
