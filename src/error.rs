//! Error types for the ShardVault data plane

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the data plane
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected at the API boundary
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Object, chunk, location or vnode does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local disk I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote node unreachable or returned a transport failure
    #[error("Network error talking to {endpoint}: {reason}")]
    Network { endpoint: String, reason: String },

    /// Remote call exceeded its deadline
    #[error("Timeout after {timeout_ms}ms calling {method} on {endpoint}")]
    Timeout {
        endpoint: String,
        method: String,
        timeout_ms: u64,
    },

    /// Checksum or parse mismatch
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Not enough usable chunks or copies
    #[error("Quorum not met: have {available}, need {required}")]
    Quorum { available: usize, required: usize },

    /// Allocation failure, fatal to the call
    #[error("Out of memory: {0}")]
    NoMemory(String),

    /// Placement engine used before `init`
    #[error("Placement engine is not initialized")]
    Uninitialized,

    // =========================================================================
    // Erasure Coding Errors
    // =========================================================================
    /// Reed-Solomon encode or decode failed
    #[error("Erasure codec error: {0}")]
    Codec(String),

    /// Invalid K+M layout
    #[error("Invalid EC configuration: {0}")]
    InvalidEcConfig(String),

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// NotFound is an expected outcome, not a failure worth logging as error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether a caller-side retry has a chance of succeeding
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network { .. } | Error::Timeout { .. } | Error::Io(_) | Error::Quorum { .. }
        )
    }

    /// Short stable label used for metrics and RPC status mapping
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::NotFound(_) => "not_found",
            Error::Io(_) => "io",
            Error::Network { .. } => "network",
            Error::Timeout { .. } => "timeout",
            Error::Corrupt(_) => "corrupt",
            Error::Quorum { .. } => "quorum",
            Error::NoMemory(_) => "no_memory",
            Error::Uninitialized => "uninitialized",
            Error::Codec(_) | Error::InvalidEcConfig(_) => "codec",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }

    /// Map an `std::io::Error` from a disk path, turning missing files into NotFound
    pub fn from_io(err: std::io::Error, what: impl std::fmt::Display) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(what.to_string()),
            std::io::ErrorKind::OutOfMemory => Error::NoMemory(what.to_string()),
            _ => Error::Io(err),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
