use std::path::PathBuf;

use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notifier error: {0}")]
    Notifier(#[from] NotifierError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Version store errors.
///
/// Variants are grouped by kind so callers can branch on cause:
/// validation (`InvalidInput`, `InvalidValue`, `InvalidId`), not-found
/// (`VersionNotFound`, `ExperimentNotFound`), storage-level constraint
/// rejection (`DuplicateParameter`, `Constraint`), and I/O or transport
/// failures (the rest).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Invalid value '{value}' for type '{value_type}'")]
    InvalidValue { value: String, value_type: String },

    #[error("Invalid identifier: {id}")]
    InvalidId { id: String },

    #[error("Version not found: {version_id}")]
    VersionNotFound { version_id: String },

    #[error("Experiment not found: {experiment_id}")]
    ExperimentNotFound { experiment_id: String },

    #[error("Duplicate parameter: {message}")]
    DuplicateParameter { message: String },

    #[error("Constraint violation: {message}")]
    Constraint { message: String },

    #[error("File not found: {path}")]
    FileMissing { path: PathBuf },

    #[error("File too large ({size_bytes} bytes, max {max_bytes}): {path}")]
    FileTooLarge {
        path: PathBuf,
        size_bytes: u64,
        max_bytes: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Alert sink errors
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Sink unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl StoreError {
    /// Whether this error is one of the not-found kinds.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::VersionNotFound { .. } | StoreError::ExperimentNotFound { .. }
        )
    }

    /// Whether this error is a storage-level constraint rejection.
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateParameter { .. } | StoreError::Constraint { .. }
        )
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for alert sink operations
pub type NotifierResult<T> = Result<T, NotifierError>;
