//! Error types for chainkv
//!
//! Provides a unified error type for all operations. No operation performs
//! automatic retry; corruption and misuse errors are surfaced to the caller
//! as-is.

use thiserror::Error;

/// Result type alias using ChainError
pub type Result<T> = std::result::Result<T, ChainError>;

/// Unified error type for chainkv operations
#[derive(Debug, Error)]
pub enum ChainError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Corruption Errors
    // -------------------------------------------------------------------------
    /// A block chain references a position that cannot be read, revisits a
    /// position, or carries a header that fails validation.
    #[error("corrupted block chain: {0}")]
    CorruptedChain(String),

    /// An index record points at a chain whose head block cannot be read.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// A block header failed to decode.
    #[error("malformed block header: {0}")]
    MalformedHeader(String),

    /// An index record failed to decode or the index file is inconsistent.
    #[error("malformed index record: {0}")]
    MalformedRecord(String),

    // -------------------------------------------------------------------------
    // Usage Errors
    // -------------------------------------------------------------------------
    /// Structural misuse: duplicate-key creation, operating on a closed or
    /// uninitialized store, double-releasing a block.
    #[error("illegal state: {0}")]
    IllegalState(String),

    // -------------------------------------------------------------------------
    // Startup Errors
    // -------------------------------------------------------------------------
    /// Any other error raised while the engine was starting up. Fatal: the
    /// engine refuses to come up.
    #[error("engine initialization failed: {0}")]
    Initialization(#[source] Box<ChainError>),
}

impl ChainError {
    /// Wrap an error that occurred during engine startup.
    pub(crate) fn during_init(err: ChainError) -> ChainError {
        match err {
            // Don't double-wrap
            ChainError::Initialization(_) => err,
            other => ChainError::Initialization(Box::new(other)),
        }
    }
}
