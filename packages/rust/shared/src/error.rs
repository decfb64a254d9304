//! Error types for kbchat.
//!
//! Library crates use [`KbChatError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all kbchat operations.
#[derive(Debug, thiserror::Error)]
pub enum KbChatError {
    /// Lookup of a document id that is not present.
    #[error("not found: {id}")]
    NotFound { id: String },

    /// No registered provider advertises the requested capability.
    #[error("unknown capability: {name}")]
    UnknownCapability { name: String },

    /// Embedding, index, generator, or live-search transport failure.
    #[error("{service} unavailable: {message}")]
    UpstreamUnavailable { service: String, message: String },

    /// Missing or invalid configuration (credentials included).
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A graph insertion for an id that already exists.
    #[error("document already present: {id}")]
    DuplicateDocument { id: String },

    /// An embedding whose length differs from the deployment's dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KbChatError>;

impl KbChatError {
    /// Create a not-found error for a document id.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an unknown-capability error.
    pub fn unknown_capability(name: impl Into<String>) -> Self {
        Self::UnknownCapability { name: name.into() }
    }

    /// Create an upstream error for a named external service.
    pub fn upstream(service: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            service: service.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for missing credentials or invalid settings.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = KbChatError::config("missing API key");
        assert_eq!(err.to_string(), "configuration error: missing API key");

        let err = KbChatError::upstream("generator", "HTTP 502");
        assert_eq!(err.to_string(), "generator unavailable: HTTP 502");

        let err = KbChatError::unknown_capability("teleport");
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn configuration_is_distinguished() {
        assert!(KbChatError::config("x").is_configuration());
        assert!(!KbChatError::not_found("doc-1").is_configuration());
        assert!(!KbChatError::upstream("index", "down").is_configuration());
    }
}
