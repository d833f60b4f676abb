//! Error types for the store, optimizer and engine.
//!
//! Storage-engine faults are classified so callers can tell a lock they may
//! retry from corruption they must surface.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Classification of a SQLite failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFault {
    /// Busy or locked database; retrying later may succeed
    Transient,
    /// Corrupt file or not a database; dependent operations must stop
    Corruption,
    /// Disk or quota exhausted
    DiskFull,
    /// A constraint (unique, foreign key, check) rejected the write
    Constraint,
    Other,
}

impl std::fmt::Display for StorageFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StorageFault::Transient => "transient",
            StorageFault::Corruption => "corruption",
            StorageFault::DiskFull => "disk full",
            StorageFault::Constraint => "constraint",
            StorageFault::Other => "other",
        };
        f.write_str(s)
    }
}

/// A failure reported by the storage engine.
#[derive(Debug, Error)]
#[error("storage error ({fault}): {source}")]
pub struct StorageError {
    pub fault: StorageFault,
    pub source: rusqlite::Error,
}

impl StorageError {
    /// Lock contention that a caller may retry
    pub fn is_transient(&self) -> bool {
        self.fault == StorageFault::Transient
    }

    /// Corruption or exhausted disk; must not be swallowed
    pub fn is_fatal(&self) -> bool {
        matches!(self.fault, StorageFault::Corruption | StorageFault::DiskFull)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(source: rusqlite::Error) -> Self {
        let fault = match &source {
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StorageFault::Transient,
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => StorageFault::Corruption,
                ErrorCode::DiskFull => StorageFault::DiskFull,
                ErrorCode::ConstraintViolation => StorageFault::Constraint,
                _ => StorageFault::Other,
            },
            _ => StorageFault::Other,
        };
        Self { fault, source }
    }
}

/// Errors that can occur during graph store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: String, found: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Storage(StorageError::from(err))
    }
}

impl StoreError {
    /// The storage fault behind this error, if it came from the engine
    pub fn storage_fault(&self) -> Option<StorageFault> {
        match self {
            StoreError::Storage(err) => Some(err.fault),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.storage_fault() == Some(StorageFault::Transient)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Storage(err) if err.is_fatal())
    }
}

/// Errors raised by the equilibrium optimizer
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Only produced when a caller asks for a converged result
    #[error("Optimizer did not converge after {iterations} iterations (last change {delta:.6})")]
    NonConvergence { iterations: usize, delta: f64 },

    #[error("Invalid optimizer configuration: {0}")]
    Validation(String),
}

/// Errors surfaced by [`crate::engine::KnowledgeEngine`]
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("Configuration error: {0}")]
    Config(#[from] weave_config::ConfigError),
}
