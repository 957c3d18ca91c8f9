//! Engine lifecycle

use crate::error::{Error, Result};
use std::fmt;

/// Lifecycle of a [`super::Engine`].
///
/// ```text
/// Constructed -> Ready -> Training <-> Evaluating -> Completed | Failed
///                Ready -> Profiling -> Completed | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Constructed,
    Ready,
    Training,
    Evaluating,
    Profiling,
    Completed,
    Failed,
}

impl EngineState {
    pub fn can_transition_to(self, to: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, to),
            (Constructed, Ready)
                | (Ready, Training)
                | (Ready, Profiling)
                | (Training, Evaluating)
                | (Evaluating, Training)
                | (Training, Completed)
                | (Profiling, Completed)
                | (Training, Failed)
                | (Evaluating, Failed)
                | (Profiling, Failed)
        )
    }

    /// Move to `to`, rejecting transitions outside the lifecycle.
    pub fn transition(&mut self, to: EngineState) -> Result<()> {
        if !self.can_transition_to(to) {
            return Err(Error::InvalidTransition { from: self.to_string(), to: to.to_string() });
        }
        tracing::debug!(from = %self, to = %to, "engine state");
        *self = to;
        Ok(())
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
