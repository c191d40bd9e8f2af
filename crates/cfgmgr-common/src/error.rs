//! Error types for cfgmgr operations.
//!
//! All errors implement `std::error::Error` via `thiserror`. Configuration
//! managers treat most of these as best-effort failures: they are logged and
//! left for the next reconciliation to repair.

use std::io;
use thiserror::Error;

/// Result type alias for cfgmgr operations.
pub type CfgMgrResult<T> = Result<T, CfgMgrError>;

/// Errors that can occur during cfgmgr operations.
#[derive(Debug, Error)]
pub enum CfgMgrError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Reading a configuration file failed.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// The file being read.
        path: String,
        #[source]
        source: io::Error,
    },

    /// A configuration file did not contain the expected JSON.
    #[error("Failed to parse JSON from {path}: {source}")]
    Json {
        /// The file being parsed.
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CfgMgrError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CfgMgrError::ShellCommandFailed { .. })
    }
}
