//! Training engine: the step loop, evaluation, checkpoint cadence and
//! profiling, plus the observers it reports to.

mod callback;
mod profiler;
mod state;
mod stats;
mod trainer;
mod writer;

pub use callback::{CallbackContext, CallbackManager, EngineCallback, ProgressLogger, ScalarLogger};
pub use profiler::{Phase, PhaseSummary, PhaseTimer, ProfileReport, ProfilerOptions};
pub use state::EngineState;
pub use stats::SmoothedStats;
pub use trainer::{Engine, EngineParts, RunSummary};
pub use writer::{JsonlScalarWriter, ScalarWriter};
