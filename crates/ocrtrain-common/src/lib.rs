//! Shared infrastructure for ocrtrain CLI tools.
//!
//! This crate provides common utilities used across the ocrtrain binaries:
//! - Error handling with actionable diagnostics
//! - Common CLI arguments (verbosity)
//! - Log initialisation on top of `tracing-subscriber`
//! - Terminal styles for status lines

pub mod cli;
pub mod error;
pub mod logging;

pub use cli::{CommonArgs, Verbosity};
pub use error::{Result, ToolError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_has_actionable_message() {
        let err = ToolError::InputNotFound { path: "/data/train_gt.txt".into() };
        let msg = err.to_string();
        assert!(msg.contains("train_gt.txt"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn test_verbosity_from_flags() {
        let args = CommonArgs { verbose: true, quiet: false };
        assert_eq!(args.verbosity(), Verbosity::Verbose);
    }
}
