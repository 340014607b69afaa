use crate::error::ImportError;
use std::path::{Path, PathBuf};

/// Extensions the import endpoints accept
pub const ALLOWED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls"];

/// Validate an import file before anything is sent to the server
///
/// Checks that the path:
/// - Exists and is a regular file
/// - Has one of the allowed spreadsheet extensions
/// - Is not empty and not larger than `max_bytes`
///
/// Returns the canonical path and the file size in bytes.
pub fn validate_import_file(path: &Path, max_bytes: u64) -> Result<(PathBuf, u64), ImportError> {
    let canonical = path.canonicalize().map_err(|e| {
        ImportError::Validation(format!(
            "Failed to resolve path '{}': {}",
            path.display(),
            e
        ))
    })?;

    let metadata = std::fs::metadata(&canonical)?;
    if !metadata.is_file() {
        return Err(ImportError::Validation(format!(
            "Not a regular file: {}",
            canonical.display()
        )));
    }

    let extension = file_extension(&canonical).ok_or_else(|| {
        ImportError::Validation(format!(
            "File has no extension (expected one of {}): {}",
            ALLOWED_EXTENSIONS.join(", "),
            canonical.display()
        ))
    })?;

    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ImportError::Validation(format!(
            "Unsupported file type '.{}' (expected one of {})",
            extension,
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    let size = metadata.len();
    if size == 0 {
        return Err(ImportError::Validation(format!(
            "File is empty: {}",
            canonical.display()
        )));
    }

    if size > max_bytes {
        return Err(ImportError::Validation(format!(
            "File too large: {} bytes (max {} bytes)",
            size, max_bytes
        )));
    }

    Ok((canonical, size))
}

/// Lowercased file extension, if any
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
