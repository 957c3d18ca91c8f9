//! Persisted training progress

use crate::metric::MetricValues;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Best evaluation seen so far: every metric value plus where it happened.
///
/// Serialised flat, e.g. `{"acc": 0.91, "norm_edit_dis": 0.95, "epoch": 5}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BestMetricRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,

    #[serde(flatten)]
    pub values: MetricValues,
}

impl BestMetricRecord {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn record(&mut self, values: MetricValues, epoch: usize, step: usize) {
        self.values = values;
        self.epoch = Some(epoch);
        self.step = Some(step);
    }

    /// One-line summary for logs, e.g. `acc: 0.9100, norm_edit_dis: 0.9500, epoch: 5`.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self.values.iter().map(|(k, v)| format!("{k}: {v:.4}")).collect();
        if let Some(epoch) = self.epoch {
            parts.push(format!("epoch: {epoch}"));
        }
        parts.join(", ")
    }
}

/// Contents of `<prefix>.states.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStates {
    pub best: BestMetricRecord,
    /// Last completed (or in-progress) epoch when saved
    pub epoch: usize,
    pub global_step: usize,
    pub saved_at: DateTime<Utc>,
}

impl TrainingStates {
    pub fn new(best: BestMetricRecord, epoch: usize, global_step: usize) -> Self {
        Self { best, epoch, global_step, saved_at: Utc::now() }
    }
}

/// Where training picks up after a restored checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub start_epoch: usize,
    pub global_step: usize,
}

/// Outcome of checkpoint restoration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Restored {
    pub best: BestMetricRecord,
    pub resume: Option<ResumePoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialises_flat() {
        let mut best = BestMetricRecord::default();
        best.record(MetricValues::from([("acc".to_string(), 0.91)]), 5, 400);
        let json = serde_json::to_value(&best).unwrap();
        assert_eq!(json, serde_json::json!({"acc": 0.91, "epoch": 5, "step": 400}));

        let back: BestMetricRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, best);
    }

    #[test]
    fn test_empty_record() {
        let best = BestMetricRecord::default();
        assert!(best.is_empty());
        assert_eq!(serde_json::to_string(&best).unwrap(), "{}");
        assert_eq!(best.summary(), "");
    }
}
