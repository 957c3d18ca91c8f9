//! Orientation classification accuracy

use super::{Metric, MetricValues};
use crate::config::ClsMetricParams;
use crate::data::Batch;
use crate::error::{Error, Result};
use crate::postprocess::{Decoded, TextScore};

const EPS: f64 = 1e-7;

/// Fraction of samples whose predicted label equals the ground truth
#[derive(Debug, Clone)]
pub struct ClsMetric {
    main_indicator: String,
    correct: usize,
    total: usize,
}

impl ClsMetric {
    pub fn new(params: &ClsMetricParams) -> Result<Self> {
        Self::with_indicator(&params.main_indicator)
    }

    pub(crate) fn with_indicator(main_indicator: &str) -> Result<Self> {
        if main_indicator != "acc" {
            return Err(Error::config(
                "Metric.main_indicator",
                format!("ClsMetric produces acc, not {main_indicator}"),
            ));
        }
        Ok(Self { main_indicator: main_indicator.to_string(), correct: 0, total: 0 })
    }

    pub(crate) fn score(&mut self, rows: &[TextScore], batch: &Batch) -> Result<MetricValues> {
        if rows.len() != batch.len() {
            return Err(Error::Backend(format!(
                "decoded {} rows for a batch of {} samples",
                rows.len(),
                batch.len()
            )));
        }
        let correct = rows.iter().zip(batch.labels()).filter(|(row, label)| row.text == *label).count();
        self.correct += correct;
        self.total += rows.len();
        Ok(MetricValues::from([("acc".to_string(), correct as f64 / (rows.len() as f64 + EPS))]))
    }
}

impl Metric for ClsMetric {
    fn name(&self) -> &str {
        "ClsMetric"
    }

    fn main_indicator(&self) -> &str {
        &self.main_indicator
    }

    fn update(&mut self, decoded: &Decoded, batch: &Batch) -> Result<MetricValues> {
        self.score(decoded.primary(), batch)
    }

    fn compute(&self) -> MetricValues {
        MetricValues::from([("acc".to_string(), self.correct as f64 / (self.total as f64 + EPS))])
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sample;
    use approx::assert_relative_eq;

    #[test]
    fn test_cls_accuracy() {
        let mut metric = ClsMetric::with_indicator("acc").unwrap();
        let batch = Batch {
            samples: ["0", "180", "180"]
                .iter()
                .map(|l| Sample { image: "x.jpg".into(), label: l.to_string() })
                .collect(),
        };
        let decoded = Decoded::Single(
            ["0", "0", "180"].iter().map(|t| TextScore { text: t.to_string(), score: 0.9 }).collect(),
        );
        let values = metric.update(&decoded, &batch).unwrap();
        assert_relative_eq!(values["acc"], 2.0 / 3.0, epsilon = 1e-5);
        assert_relative_eq!(metric.compute()["acc"], 2.0 / 3.0, epsilon = 1e-5);
    }
}
