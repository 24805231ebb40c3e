//! Error types for fieldgate

use crate::types::SensitivityClass;
use thiserror::Error;

/// Errors that can occur while classifying, protecting, or unprotecting records
#[derive(Debug, Error)]
pub enum ProtectError {
    /// Bad policy source. Fatal at initial load, recoverable at reload
    /// (the previous snapshot stays active).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A field or lookup references a sensitivity class with no protection
    /// rule in the active snapshot
    #[error("No protection rule for class '{0}'")]
    UnknownClass(SensitivityClass),

    /// The tagged key version is no longer retrievable (destroyed or expired)
    #[error("Unknown key version {version} for key '{key_ref}'")]
    UnknownKeyVersion {
        key_ref: String,
        version: u32,
    },

    /// Caller's roles don't intersect the rule's authorized role set.
    /// The whole record is rejected, no field is decrypted.
    #[error("Caller '{caller}' not authorized to unprotect field '{field}'")]
    Authorization {
        field: String,
        caller: String,
    },

    /// An external dependency (key store, policy source) exceeded its timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Malformed wire bytes on receive. The transport should route the
    /// message to its dead-letter path.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Cipher-level failure (authentication tag mismatch, bad key length)
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for protection operations
pub type Result<T> = std::result::Result<T, ProtectError>;
