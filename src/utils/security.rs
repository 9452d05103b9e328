use std::path::{Component, Path};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Path contains parent directory (..)")]
    ContainsParentDir,

    #[error("File path is absolute")]
    AbsolutePath,

    #[error("File path contains invalid component")]
    InvalidComponent,

    #[error("File path contains null byte")]
    NullByte,

    #[error("File path is empty")]
    Empty,

    #[error("Filename contains directory separator")]
    ContainsDirectorySeparator,

    #[error("Filename is a reserved name")]
    Reserved,
}

//===============
// Path Handling
//===============

// Checks for: empty strings, null bytes, parent directory traversal, absolute paths
fn validate_path_components(path_str: &str) -> Result<(), ValidationError> {
    if path_str.is_empty() {
        return Err(ValidationError::Empty);
    }

    // rust uses C-style APIs so \0 can end str early
    if path_str.contains('\0') {
        return Err(ValidationError::NullByte);
    }

    for component in Path::new(path_str).components() {
        match component {
            Component::Normal(_) => continue,
            Component::ParentDir => return Err(ValidationError::ContainsParentDir),
            Component::RootDir => return Err(ValidationError::AbsolutePath),
            Component::CurDir => return Err(ValidationError::Reserved),
            Component::Prefix(_) => return Err(ValidationError::InvalidComponent), // Windows
        }
    }

    Ok(())
}

/// Validate a bare filename: a single normal component, no separators.
pub fn validate_filename(filename: &str) -> Result<(), ValidationError> {
    if filename == "." {
        return Err(ValidationError::Reserved);
    }

    validate_path_components(filename)?;

    if filename.contains('/') || filename.contains('\\') {
        return Err(ValidationError::ContainsDirectorySeparator);
    }

    Ok(())
}

/// Reduce a client-supplied name to its last path segment and validate it.
///
/// Browsers and CLI senders may pass relative paths ("photos/a.jpg") or
/// Windows paths; only the base name is kept so the result always lands
/// directly inside the shared directory.
pub fn sanitize_filename(raw: &str) -> Result<String, ValidationError> {
    let base = raw
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    validate_filename(base)?;
    Ok(base.to_string())
}
