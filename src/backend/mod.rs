//! Compute backends
//!
//! A backend turns reconciled descriptors into runnable models and losses.
//! The pipeline only ever talks to the [`Model`] and [`Loss`] traits, so any
//! network library can sit behind this seam.

mod losses;
mod reference;

pub use losses::{AlignedCrossEntropy, ClsCrossEntropy, DistillationLoss};
pub use reference::{PriorModel, ReferenceBackend};

use crate::config::{GlobalConfig, LossSpec};
use crate::device::Device;
use crate::error::Result;
use crate::loss::Loss;
use crate::model::Model;
use crate::postprocess::Vocabulary;
use crate::reconcile::ReconciledArchitecture;
use crate::seed::SeedSource;

/// Inputs to model construction besides the descriptor.
#[derive(Debug, Clone, Copy)]
pub struct ModelBuildContext<'a> {
    pub global: &'a GlobalConfig,
    pub device: Device,
    pub seeds: SeedSource,
    /// Synchronise batch-norm statistics across ranks
    pub sync_batch_norm: bool,
}

/// Inputs to loss construction besides the `Loss` section.
#[derive(Debug, Clone, Copy)]
pub struct LossBuildContext<'a> {
    pub global: &'a GlobalConfig,
    /// Vocabulary of the built post-processor, used to encode labels
    pub vocabulary: Option<&'a Vocabulary>,
}

/// Builds models and losses.
pub trait Backend {
    fn name(&self) -> &str;

    fn build_model(
        &self,
        architecture: &ReconciledArchitecture,
        ctx: &ModelBuildContext<'_>,
    ) -> Result<Box<dyn Model>>;

    fn build_loss(&self, spec: &LossSpec, ctx: &LossBuildContext<'_>) -> Result<Box<dyn Loss>>;
}
