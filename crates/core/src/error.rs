//! Error types for the derpcache crates

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(derpcache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(derpcache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// No stored object exists for a digest
    #[error("No cached object for digest: {digest}")]
    #[diagnostic(
        code(derpcache::not_found),
        help("The entry may have expired or the cache may have been cleared")
    )]
    NotFound {
        /// The digest that was looked up
        digest: String,
    },

    /// Index file exists but cannot be parsed
    #[error("Corrupt cache index: {}", path.display())]
    #[diagnostic(
        code(derpcache::corrupt_index),
        help("Clear the cache directory to recover; cached history will be lost")
    )]
    CorruptIndex {
        /// The underlying JSON parse error
        #[source]
        source: serde_json::Error,
        /// Path of the unparseable index file
        path: Box<Path>,
    },

    /// Value cannot be serialized or deserialized
    #[error("Serialization error: {message}")]
    #[diagnostic(code(derpcache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a not found error
    #[must_use]
    pub fn not_found(digest: impl Into<String>) -> Self {
        Self::NotFound {
            digest: digest.into(),
        }
    }

    /// Create a corrupt index error
    #[must_use]
    pub fn corrupt_index(source: serde_json::Error, path: impl AsRef<Path>) -> Self {
        Self::CorruptIndex {
            source,
            path: path.as_ref().into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
