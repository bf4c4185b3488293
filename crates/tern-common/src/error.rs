//! Error types for TernDB.

use thiserror::Error;

/// Result type alias using TernError.
pub type Result<T> = std::result::Result<T, TernError>;

/// Errors that can occur in TernDB operations.
#[derive(Debug, Error)]
pub enum TernError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // File errors
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    // Buffer errors
    #[error("Page {page_no} not found in {file}")]
    PageNotFound { file: String, page_no: u32 },

    #[error("No file registered under id {0}")]
    UnknownFileId(u32),

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // Index metadata errors
    #[error("Index metadata mismatch: {0}")]
    BadIndexInfo(String),

    // Scan errors
    #[error("Bad scan opcodes: lower bound must be GT/GTE, upper bound LT/LTE")]
    BadOpcodes,

    #[error("Bad scan range: low value exceeds high value")]
    BadScanrange,

    #[error("No key satisfying the scan bounds was found")]
    NoSuchKeyFound,

    #[error("Scan not initialized")]
    ScanNotInitialized,

    #[error("Index scan completed")]
    IndexScanCompleted,

    // Relation scan errors
    #[error("End of file reached")]
    EndOfFile,

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    // Key errors
    #[error("Key type mismatch: index holds {expected}, got {found}")]
    KeyTypeMismatch { expected: String, found: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}
