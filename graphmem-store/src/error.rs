//! Error types for graphmem-store

use thiserror::Error;

/// Errors that can occur in the embedded store
#[derive(Debug, Error)]
pub enum StoreError {
    /// A capability-gated recall operation was called while the capability is off
    #[error("Capability unsupported: {operation}")]
    CapabilityUnsupported { operation: &'static str },

    /// The recall port speaks a different capability version than the caller expects
    #[error("Capability version mismatch: expected {expected}, backend reports {actual}")]
    CapabilityVersionMismatch { expected: u32, actual: u32 },

    /// Strict mode: compaction could not bring the snapshot under budget
    #[error("Snapshot over budget: {bytes} bytes exceeds limit of {max_bytes} bytes")]
    SnapshotOverBudget { bytes: u64, max_bytes: u64 },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unparseable configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Record not found (single-record mutators only)
    #[error("Not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Create a capability-unsupported error
    pub fn capability(operation: &'static str) -> Self {
        Self::CapabilityUnsupported { operation }
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// True for errors callers may treat as a soft-degrade signal
    pub fn is_capability_unsupported(&self) -> bool {
        matches!(self, Self::CapabilityUnsupported { .. })
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
