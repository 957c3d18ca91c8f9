//! Error types for the training pipeline.
//!
//! Every failure surfaces to the caller; nothing in the pipeline retries.
//! Build-time failures are wrapped in [`Error::Build`] so the user sees which
//! stage failed, step-time failures in [`Error::Compute`] so the user sees
//! where training stopped.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage that was being built when a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Distributed,
    TrainData,
    EvalData,
    PostProcess,
    Reconcile,
    Model,
    Loss,
    Optimizer,
    Metric,
    Checkpoint,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Distributed => "distributed",
            Self::TrainData => "train dataloader",
            Self::EvalData => "eval dataloader",
            Self::PostProcess => "post-process",
            Self::Reconcile => "architecture reconciliation",
            Self::Model => "model",
            Self::Loss => "loss",
            Self::Optimizer => "optimizer",
            Self::Metric => "metric",
            Self::Checkpoint => "checkpoint",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while building or running a training pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or unrecognised configuration, or a shape that contradicts it.
    #[error("Invalid configuration at '{path}': {message}\n  → Fix the value in the config file or override it with -o {path}=...")]
    Config { path: String, message: String },

    /// A filesystem path named in the configuration is unusable.
    #[error("Resource unavailable: {path}: {message}\n  → Check that the path exists and is readable")]
    Resource { path: PathBuf, message: String },

    /// A training or evaluation step failed.
    #[error("Compute failure at epoch {epoch}, global step {step}: {source}")]
    Compute {
        epoch: usize,
        step: usize,
        #[source]
        source: Box<Error>,
    },

    /// The process group could not be set up.
    #[error("Distributed initialization failed: {0}\n  → Check OCRTRAIN_RANK, OCRTRAIN_WORLD_SIZE and OCRTRAIN_MASTER_ADDR")]
    DistributedInit(String),

    /// A build stage failed before the engine became ready.
    #[error("Failed to build {stage}: {source}")]
    Build {
        stage: BuildStage,
        #[source]
        source: Box<Error>,
    },

    /// Raw failure reported by a compute collaborator.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Engine state machine misuse.
    #[error("Invalid engine transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// IO error with context.
    #[error("IO error: {context}\n  Cause: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Configuration error at a dotted config path.
    pub fn config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config { path: path.into(), message: message.into() }
    }

    /// Resource error for a filesystem path.
    pub fn resource(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self::Resource { path: path.into(), message: message.to_string() }
    }

    /// IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// Wrap this error as the failure of a build stage.
    pub fn in_stage(self, stage: BuildStage) -> Self {
        Self::Build { stage, source: Box::new(self) }
    }

    /// Wrap this error as a step failure at `epoch`/`step`.
    pub fn at_step(self, epoch: usize, step: usize) -> Self {
        match self {
            already @ Self::Compute { .. } => already,
            other => Self::Compute { epoch, step, source: Box::new(other) },
        }
    }

    /// Check if the user can fix this error by editing the configuration.
    pub fn is_user_error(&self) -> bool {
        match self {
            Self::Config { .. } | Self::Resource { .. } | Self::DistributedInit(_) => true,
            Self::Build { source, .. } => source.is_user_error(),
            _ => false,
        }
    }

    /// Get the error code for structured output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "E001",
            Self::Resource { .. } => "E010",
            Self::Compute { .. } => "E020",
            Self::DistributedInit(_) => "E030",
            Self::Build { source, .. } => source.code(),
            Self::Backend(_) => "E040",
            Self::InvalidTransition { .. } => "E041",
            Self::Io { .. } => "E050",
            Self::Serialization(_) => "E051",
        }
    }

    /// The innermost error, looking through build and compute wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Self::Build { source, .. } | Self::Compute { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_names_stage() {
        let err = Error::config("Loss.name", "unknown variant").in_stage(BuildStage::Loss);
        let msg = err.to_string();
        assert!(msg.contains("Failed to build loss"));
        assert!(msg.contains("Loss.name"));
        assert_eq!(err.code(), "E001");
        assert!(err.is_user_error());
    }

    #[test]
    fn test_compute_error_reports_position() {
        let err = Error::Backend("nan loss".into()).at_step(3, 120);
        let msg = err.to_string();
        assert!(msg.contains("epoch 3"));
        assert!(msg.contains("step 120"));
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_at_step_does_not_double_wrap() {
        let err = Error::Backend("x".into()).at_step(1, 2).at_step(5, 6);
        match err {
            Error::Compute { epoch, step, .. } => assert_eq!((epoch, step), (1, 2)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_root_unwraps_wrappers() {
        let err = Error::DistributedInit("no peers".into()).in_stage(BuildStage::Distributed);
        assert!(matches!(err.root(), Error::DistributedInit(_)));
    }

    #[test]
    fn test_config_error_suggests_override() {
        let err = Error::config("Global.epoch_num", "missing");
        assert!(err.to_string().contains("-o Global.epoch_num="));
    }
}
