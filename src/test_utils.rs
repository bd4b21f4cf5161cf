//! Test utilities for CortexDx
//!
//! This module provides common test utilities including temporary directory
//! management, test file creation, and assertion helpers.

use std::path::PathBuf;
use tempfile::TempDir;

use crate::config::Config;
use crate::error::CortexDxError;

/// Create a temporary directory for testing. Cleaned up when dropped.
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("failed to create temporary directory")
}

/// Create a test file with the given content, returning its path.
pub fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("failed to write test file");
    path
}

/// Assert that a result is an error whose message contains `expected`.
pub fn assert_error_contains<T>(result: Result<T, CortexDxError>, expected: &str) {
    match result {
        Ok(_) => panic!("expected error containing '{expected}' but got Ok"),
        Err(e) => {
            let error_msg = e.to_string();
            assert!(
                error_msg.contains(expected),
                "error message '{error_msg}' does not contain '{expected}'"
            );
        }
    }
}

/// A default configuration suitable for tests.
pub fn test_config() -> Config {
    Config::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_dir_creation() {
        let dir = temp_dir();
        assert!(dir.path().exists());
    }

    #[test]
    fn test_create_test_file() {
        let dir = temp_dir();
        let path = create_test_file(&dir, "test.txt", "content");
        assert!(path.exists());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "content");
    }

    #[test]
    fn test_assert_error_contains_success() {
        let result: Result<(), CortexDxError> = Err(CortexDxError::Config("test error message".to_string()));
        assert_error_contains(result, "test error");
    }

    #[test]
    #[should_panic(expected = "expected error containing")]
    fn test_assert_error_contains_ok() {
        let result: Result<(), CortexDxError> = Ok(());
        assert_error_contains(result, "error");
    }

    #[test]
    #[should_panic(expected = "does not contain")]
    fn test_assert_error_contains_wrong_message() {
        let result: Result<(), CortexDxError> = Err(CortexDxError::Config("different error".to_string()));
        assert_error_contains(result, "not present");
    }

    #[test]
    fn test_test_config() {
        let config = test_config();
        assert!(config.validate().is_ok());
    }
}
