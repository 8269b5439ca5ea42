//! Unified error types for the amisync workspace.
//!
//! Only configuration-level faults travel through these variants. Recoverable
//! conditions (a failed lookup, a missing artifact, an absent template node,
//! an unreadable cache) are logged where they happen and never become errors.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum AmisyncError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A version string cannot be coerced to semantic-version form.
    #[error("{version} isn't a valid semver")]
    InvalidVersion {
        /// The offending input.
        version: String,
    },

    /// A name-matching pattern from a task definition does not compile.
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The pattern source.
        pattern: String,
        /// Compiler diagnostic.
        message: String,
    },

    /// A task definition is missing a field its type requires.
    #[error("invalid task '{task}': {message}")]
    InvalidTask {
        /// Name of the task.
        task: String,
        /// What is wrong with it.
        message: String,
    },

    /// The image lookup service failed.
    #[error("image lookup failed in region {region}: {message}")]
    Lookup {
        /// Region the query was issued against.
        region: String,
        /// Failure description (exit status, stderr, decode error).
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, AmisyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_version_message_names_input() {
        let err = AmisyncError::InvalidVersion {
            version: "banana".into(),
        };
        assert_eq!(err.to_string(), "banana isn't a valid semver");
    }

    #[test]
    fn serde_errors_convert_into_serialization() {
        let source = serde_json::from_str::<serde_json::Value>("{").expect_err("must fail");
        let err: AmisyncError = source.into();
        assert!(matches!(err, AmisyncError::Serialization { .. }));
    }
}
