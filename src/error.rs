//! Error types for the ticket cache
//!
//! Provides structured error types for the caching engine: backend tiers,
//! serialization, invalidation patterns, producers and configuration.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the cache
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Serialization Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Compression error ({algorithm}): {reason}")]
    Compression { algorithm: String, reason: String },

    // =========================================================================
    // Invalidation Errors
    // =========================================================================
    #[error("Invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // =========================================================================
    // Producer Errors
    // =========================================================================
    #[error("Producer failed for key {key}: {source}")]
    Producer {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Producer for key {key} timed out after {timeout:?}")]
    ProducerTimeout { key: String, timeout: Duration },

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the caching layer reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Log and fall through to the next tier or the producer
    Degrade,
    /// Log, evict the offending entry and recompute
    TreatAsMiss,
    /// Surface to the caller unchanged
    Propagate,
    /// Refuse the request; the input or configuration is wrong
    Reject,
}

impl Error {
    /// Determine how the cache handles this error
    pub fn action(&self) -> FailureAction {
        match self {
            // Tier failures never fail a request on their own
            Error::BackendUnavailable { .. }
            | Error::BackendOperationFailed { .. }
            | Error::Io(_) => FailureAction::Degrade,

            // Unreadable payloads are recomputed
            Error::Serialization(_) | Error::JsonParse(_) | Error::Compression { .. } => {
                FailureAction::TreatAsMiss
            }

            // The data source itself failed
            Error::Producer { .. } | Error::ProducerTimeout { .. } => FailureAction::Propagate,

            Error::Configuration(_)
            | Error::ConfigParse(_)
            | Error::InvalidPattern { .. }
            | Error::Internal(_) => FailureAction::Reject,
        }
    }

    /// Check if this error originates inside the caching mechanism
    ///
    /// Cache-internal errors are swallowed and logged by the store; only
    /// producer errors are visible to callers of `get_or_compute`.
    pub fn is_cache_internal(&self) -> bool {
        matches!(
            self.action(),
            FailureAction::Degrade | FailureAction::TreatAsMiss
        )
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable { .. } | Error::ProducerTimeout { .. } | Error::Io(_)
        )
    }

    /// Build a producer error for a key
    pub fn producer(key: impl Into<String>, source: anyhow::Error) -> Self {
        Error::Producer {
            key: key.into(),
            source,
        }
    }

    /// Build a backend-unavailable error
    pub fn unavailable(backend: impl Into<String>) -> Self {
        Error::BackendUnavailable {
            backend: backend.into(),
        }
    }
}

/// Result type alias for the cache
pub type Result<T> = std::result::Result<T, Error>;
