//! Core Metric trait definition

use crate::data::Batch;
use crate::error::Result;
use crate::postprocess::Decoded;
use std::collections::BTreeMap;

/// Named metric values, e.g. `acc` and `norm_edit_dis`.
pub type MetricValues = BTreeMap<String, f64>;

/// Accumulating evaluation metric
pub trait Metric: Send {
    /// Declared variant name
    fn name(&self) -> &str;

    /// Value compared when deciding whether a checkpoint is the best so far
    fn main_indicator(&self) -> &str;

    /// Whether higher values of the main indicator are better
    fn higher_is_better(&self) -> bool {
        true
    }

    /// Score one decoded batch against its labels, accumulate, and return the
    /// batch's own values.
    fn update(&mut self, decoded: &Decoded, batch: &Batch) -> Result<MetricValues>;

    /// Values over everything accumulated since the last reset
    fn compute(&self) -> MetricValues;

    fn reset(&mut self);

    /// Whether `candidate` beats `best` on the main indicator.
    fn is_improvement(&self, candidate: &MetricValues, best: &MetricValues) -> bool {
        let key = self.main_indicator();
        match (candidate.get(key), best.get(key)) {
            (Some(new), Some(old)) if self.higher_is_better() => new > old,
            (Some(new), Some(old)) => new < old,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}
