//! Evaluation metrics
//!
//! - `RecMetric`: exact-match accuracy and normalised edit distance
//!   (`edit_dis` ranks lower values first)
//! - `ClsMetric`: label accuracy
//! - `DistillationMetric`: either of the above over one sub-model's output

mod cls;
mod rec;
mod trait_def;

pub use cls::ClsMetric;
pub use rec::{edit_distance, normalized_edit_distance, RecMetric};
pub use trait_def::{Metric, MetricValues};

use crate::config::{BaseMetricName, DistillationMetricParams, MetricSpec};
use crate::data::Batch;
use crate::error::{Error, Result};
use crate::postprocess::Decoded;

enum BaseMetric {
    Rec(RecMetric),
    Cls(ClsMetric),
}

/// Scores the decoded output of the sub-model named by `key`
pub struct DistillationMetric {
    key: String,
    base: BaseMetric,
}

impl DistillationMetric {
    pub fn new(params: &DistillationMetricParams) -> Result<Self> {
        let base = match params.base_metric_name {
            BaseMetricName::RecMetric => BaseMetric::Rec(RecMetric::with_options(
                &params.main_indicator,
                params.ignore_space,
                params.is_filter,
            )?),
            BaseMetricName::ClsMetric => BaseMetric::Cls(ClsMetric::with_indicator(&params.main_indicator)?),
        };
        Ok(Self { key: params.key.clone(), base })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn base(&self) -> &dyn Metric {
        match &self.base {
            BaseMetric::Rec(m) => m,
            BaseMetric::Cls(m) => m,
        }
    }
}

impl Metric for DistillationMetric {
    fn name(&self) -> &str {
        "DistillationMetric"
    }

    fn main_indicator(&self) -> &str {
        self.base().main_indicator()
    }

    fn higher_is_better(&self) -> bool {
        self.base().higher_is_better()
    }

    fn update(&mut self, decoded: &Decoded, batch: &Batch) -> Result<MetricValues> {
        let rows = decoded
            .for_model(&self.key)
            .ok_or_else(|| Error::Backend(format!("no decoded output for sub-model {}", self.key)))?;
        match &mut self.base {
            BaseMetric::Rec(m) => m.score(rows, batch),
            BaseMetric::Cls(m) => m.score(rows, batch),
        }
    }

    fn compute(&self) -> MetricValues {
        self.base().compute()
    }

    fn reset(&mut self) {
        match &mut self.base {
            BaseMetric::Rec(m) => m.reset(),
            BaseMetric::Cls(m) => m.reset(),
        }
    }
}

/// Build the metric declared under `Metric`.
pub fn build_metric(spec: &MetricSpec) -> Result<Box<dyn Metric>> {
    Ok(match spec {
        MetricSpec::RecMetric(params) => Box::new(RecMetric::new(params)?),
        MetricSpec::ClsMetric(params) => Box::new(ClsMetric::new(params)?),
        MetricSpec::DistillationMetric(params) => Box::new(DistillationMetric::new(params)?),
    })
}
