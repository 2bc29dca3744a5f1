//! Precondition checks for user-supplied paths.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("Path does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Expected a directory, but got a file: {}", .0.display())]
    NotADirectory(PathBuf),
}

/// Check that `path` exists and, when `require_dir` is set, that it is a directory.
///
/// Existence is checked first, so a missing path always reports `NotFound`
/// regardless of `require_dir`.
pub fn validate_path(path: &Path, require_dir: bool) -> Result<&Path, PathError> {
    if !path.exists() {
        return Err(PathError::NotFound(path.to_path_buf()));
    }
    if require_dir && !path.is_dir() {
        return Err(PathError::NotADirectory(path.to_path_buf()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_missing_path_is_not_found() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("nope");

        assert_eq!(
            validate_path(&missing, false),
            Err(PathError::NotFound(missing.clone()))
        );
        assert_eq!(
            validate_path(&missing, true),
            Err(PathError::NotFound(missing.clone()))
        );
    }

    #[test]
    fn test_file_when_directory_required() {
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("model.onnx");
        fs::write(&file, b"bytes").unwrap();

        assert_eq!(
            validate_path(&file, true),
            Err(PathError::NotADirectory(file.clone()))
        );
        assert_eq!(validate_path(&file, false), Ok(file.as_path()));
    }

    #[test]
    fn test_existing_directory_passes() {
        let temp_dir = tempdir().unwrap();
        assert_eq!(validate_path(temp_dir.path(), true), Ok(temp_dir.path()));
        assert_eq!(validate_path(temp_dir.path(), false), Ok(temp_dir.path()));
    }

    #[test]
    fn test_error_messages_name_the_path() {
        let err = PathError::NotFound(PathBuf::from("/data/set"));
        assert_eq!(err.to_string(), "Path does not exist: /data/set");

        let err = PathError::NotADirectory(PathBuf::from("/data/set.txt"));
        assert!(err.to_string().contains("/data/set.txt"));
    }
}
