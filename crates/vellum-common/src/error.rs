//! Error types for VellumDB.

use thiserror::Error;

/// Result type alias using VellumError.
pub type Result<T> = std::result::Result<T, VellumError>;

/// Errors that can occur in VellumDB operations.
#[derive(Debug, Error)]
pub enum VellumError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Disk manager errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: i32 },

    #[error("Page size mismatch: expected {expected}, got {actual}")]
    PageSizeMismatch { expected: usize, actual: usize },

    // Buffer pool errors
    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // Index registry errors
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("Index name too long: {0}")]
    IndexNameTooLong(String),

    #[error("Header page full, cannot register index {0}")]
    HeaderPageFull(String),

    // B+ tree errors
    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let vellum_err: VellumError = io_err.into();
        assert!(matches!(vellum_err, VellumError::Io(_)));
        assert!(vellum_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = VellumError::PageNotFound { page_id: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");
    }

    #[test]
    fn test_page_size_mismatch_display() {
        let err = VellumError::PageSizeMismatch {
            expected: 4096,
            actual: 8192,
        };
        assert_eq!(err.to_string(), "Page size mismatch: expected 4096, got 8192");
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = VellumError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_registry_errors_display() {
        let err = VellumError::IndexNotFound("orders_pk".to_string());
        assert_eq!(err.to_string(), "Index not found: orders_pk");

        let err = VellumError::IndexAlreadyExists("orders_pk".to_string());
        assert_eq!(err.to_string(), "Index already exists: orders_pk");

        let err = VellumError::HeaderPageFull("orders_pk".to_string());
        assert_eq!(err.to_string(), "Header page full, cannot register index orders_pk");
    }

    #[test]
    fn test_tree_corrupted_display() {
        let err = VellumError::TreeCorrupted("separator out of order".to_string());
        assert_eq!(err.to_string(), "B+ tree corrupted: separator out of order");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(VellumError::BufferPoolFull)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VellumError>();
    }
}
