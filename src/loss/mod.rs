//! Loss capability surface

use crate::data::Batch;
use crate::error::Result;
use crate::model::Predictions;
use std::collections::BTreeMap;

/// Result of one loss evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct LossOutput {
    /// Scalar minimised by the optimizer
    pub loss: f32,
    /// Named components, logged alongside the total
    pub terms: BTreeMap<String, f32>,
    /// Gradient of `loss` with respect to the predictions
    pub grad: Predictions,
}

/// A training objective over model predictions and batch labels.
pub trait Loss: Send {
    /// Declared variant name.
    fn name(&self) -> &str;

    fn compute(&self, preds: &Predictions, batch: &Batch) -> Result<LossOutput>;
}
