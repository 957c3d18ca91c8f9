//! Common CLI arguments and terminal styles.

use clap::Args;

/// Output verbosity shared by every ocrtrain binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors only
    Quiet,
    /// Progress information
    Normal,
    /// Debug details
    Verbose,
}

impl Verbosity {
    /// Default `tracing` filter directive for this verbosity.
    pub fn filter_directive(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            Self::Verbose => "debug",
        }
    }
}

/// Arguments flattened into every tool's top-level parser.
#[derive(Args, Clone, Debug, Default)]
pub struct CommonArgs {
    /// Print debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl CommonArgs {
    /// Resolve the flags into a verbosity level.
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    /// Whether normal output should be suppressed.
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

/// Terminal styles for status lines.
pub mod styles {
    /// Section header.
    pub fn header(text: &str) -> String {
        format!("\x1b[1m== {text} ==\x1b[0m")
    }

    /// Success line.
    pub fn success(text: &str) -> String {
        format!("\x1b[32m✓\x1b[0m {text}")
    }

    /// Error line.
    pub fn error(text: &str) -> String {
        format!("\x1b[31m✗\x1b[0m {text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_verbosity_is_normal() {
        assert_eq!(CommonArgs::default().verbosity(), Verbosity::Normal);
    }

    #[test]
    fn test_quiet_wins() {
        let args = CommonArgs { verbose: false, quiet: true };
        assert_eq!(args.verbosity(), Verbosity::Quiet);
        assert!(args.is_quiet());
    }

    #[test]
    fn test_filter_directives() {
        assert_eq!(Verbosity::Quiet.filter_directive(), "warn");
        assert_eq!(Verbosity::Verbose.filter_directive(), "debug");
    }

    #[test]
    fn test_styles_contain_text() {
        assert!(styles::success("done").contains("done"));
        assert!(styles::header("train").contains("train"));
    }
}
