//! Error types with actionable diagnostics.
//!
//! Every variant carries enough context for the user to fix the problem
//! without reading the source.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for tool operations.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Errors raised by the ocrtrain command line tools.
#[derive(Error, Debug)]
pub enum ToolError {
    /// Input file or directory missing.
    #[error("Input not found: {path}\n  → Check the dataset location or pass a different path")]
    InputNotFound { path: PathBuf },

    /// Argument value is out of range or inconsistent.
    #[error("Invalid value for '{field}': {message}\n  → {suggestion}")]
    InvalidArgument { field: String, message: String, suggestion: String },

    /// IO error with context.
    #[error("IO error: {context}\n  Cause: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl ToolError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// Check if the user can fix this error by changing inputs.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::InputNotFound { .. } | Self::InvalidArgument { .. })
    }

    /// Get the error code for structured output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InputNotFound { .. } => "T001",
            Self::InvalidArgument { .. } => "T002",
            Self::Io { .. } => "T050",
            Self::Serialization { .. } => "T051",
        }
    }
}
