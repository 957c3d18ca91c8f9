//! Text recognition metrics: exact-match accuracy and normalised edit distance

use super::{Metric, MetricValues};
use crate::config::RecMetricParams;
use crate::data::Batch;
use crate::error::{Error, Result};
use crate::postprocess::{Decoded, TextScore};

const EPS: f64 = 1e-5;

/// Indicators a `RecMetric` can rank checkpoints by.
const INDICATORS: [&str; 3] = ["acc", "norm_edit_dis", "edit_dis"];

/// Mean normalised edit distance; lower is better.
const EDIT_DIS: &str = "edit_dis";

/// Character-level Levenshtein distance.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());

    // single rolling row of the DP table
    let mut row: Vec<usize> = (0..=m).collect();
    for i in 1..=n {
        let mut diagonal = row[0];
        row[0] = i;
        for j in 1..=m {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let next = (row[j] + 1).min(row[j - 1] + 1).min(diagonal + cost);
            diagonal = row[j];
            row[j] = next;
        }
    }
    row[m]
}

/// Edit distance scaled by the longer string, in `[0, 1]`.
pub fn normalized_edit_distance(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count()).max(1);
    edit_distance(a, b) as f64 / longest as f64
}

/// Counts shared by recognition scoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RecCounts {
    correct: usize,
    total: usize,
    norm_edit: f64,
}

impl RecCounts {
    fn values(&self) -> MetricValues {
        let total = self.total as f64 + EPS;
        MetricValues::from([
            ("acc".to_string(), self.correct as f64 / total),
            ("norm_edit_dis".to_string(), 1.0 - self.norm_edit / total),
            (EDIT_DIS.to_string(), self.norm_edit / total),
        ])
    }
}

/// Recognition accuracy over decoded text
#[derive(Debug, Clone)]
pub struct RecMetric {
    main_indicator: String,
    ignore_space: bool,
    is_filter: bool,
    counts: RecCounts,
}

impl RecMetric {
    pub fn new(params: &RecMetricParams) -> Result<Self> {
        Self::with_options(&params.main_indicator, params.ignore_space, params.is_filter)
    }

    pub(crate) fn with_options(main_indicator: &str, ignore_space: bool, is_filter: bool) -> Result<Self> {
        if !INDICATORS.contains(&main_indicator) {
            return Err(Error::config(
                "Metric.main_indicator",
                format!("RecMetric produces {}, not {main_indicator}", INDICATORS.join(", ")),
            ));
        }
        Ok(Self {
            main_indicator: main_indicator.to_string(),
            ignore_space,
            is_filter,
            counts: RecCounts::default(),
        })
    }

    fn normalize(&self, text: &str) -> String {
        text.chars()
            .filter(|c| !(self.ignore_space && *c == ' '))
            .filter(|c| !self.is_filter || c.is_ascii_alphanumeric())
            .map(|c| if self.is_filter { c.to_ascii_lowercase() } else { c })
            .collect()
    }

    pub(crate) fn score(&mut self, rows: &[TextScore], batch: &Batch) -> Result<MetricValues> {
        if rows.len() != batch.len() {
            return Err(Error::Backend(format!(
                "decoded {} rows for a batch of {} samples",
                rows.len(),
                batch.len()
            )));
        }
        let mut counts = RecCounts::default();
        for (row, label) in rows.iter().zip(batch.labels()) {
            let pred = self.normalize(&row.text);
            let target = self.normalize(label);
            counts.norm_edit += normalized_edit_distance(&pred, &target);
            counts.correct += usize::from(pred == target);
            counts.total += 1;
        }
        self.counts.correct += counts.correct;
        self.counts.total += counts.total;
        self.counts.norm_edit += counts.norm_edit;
        Ok(counts.values())
    }
}

impl Metric for RecMetric {
    fn name(&self) -> &str {
        "RecMetric"
    }

    fn main_indicator(&self) -> &str {
        &self.main_indicator
    }

    fn higher_is_better(&self) -> bool {
        self.main_indicator != EDIT_DIS
    }

    fn update(&mut self, decoded: &Decoded, batch: &Batch) -> Result<MetricValues> {
        self.score(decoded.primary(), batch)
    }

    fn compute(&self) -> MetricValues {
        self.counts.values()
    }

    fn reset(&mut self) {
        self.counts = RecCounts::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sample;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn batch(labels: &[&str]) -> Batch {
        Batch {
            samples: labels
                .iter()
                .map(|l| Sample { image: "img.jpg".into(), label: l.to_string() })
                .collect(),
        }
    }

    fn decoded(texts: &[&str]) -> Decoded {
        Decoded::Single(texts.iter().map(|t| TextScore { text: t.to_string(), score: 1.0 }).collect())
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
        assert_eq!(edit_distance("日本", "日木"), 1);
    }

    #[test]
    fn test_accuracy_and_edit_distance() {
        let mut metric = RecMetric::new(&RecMetricParams::default()).unwrap();
        let values = metric.update(&decoded(&["abc", "abd"]), &batch(&["abc", "abc"])).unwrap();
        assert_relative_eq!(values["acc"], 0.5, epsilon = 1e-4);
        // 1 - (0 + 1/3) / 2
        assert_relative_eq!(values["norm_edit_dis"], 1.0 - 1.0 / 6.0, epsilon = 1e-4);
        assert_relative_eq!(values["edit_dis"], 1.0 / 6.0, epsilon = 1e-4);
    }

    #[test]
    fn test_edit_dis_ranks_lower_first() {
        let metric = RecMetric::with_options("edit_dis", true, false).unwrap();
        assert!(!metric.higher_is_better());
        let best = MetricValues::from([("edit_dis".to_string(), 0.4)]);
        let closer = MetricValues::from([("edit_dis".to_string(), 0.1)]);
        assert!(metric.is_improvement(&closer, &best));
        assert!(!metric.is_improvement(&best, &closer));
        assert!(RecMetric::with_options("acc", true, false).unwrap().higher_is_better());
    }

    #[test]
    fn test_accumulates_until_reset() {
        let mut metric = RecMetric::new(&RecMetricParams::default()).unwrap();
        metric.update(&decoded(&["a"]), &batch(&["a"])).unwrap();
        metric.update(&decoded(&["b"]), &batch(&["c"])).unwrap();
        assert_relative_eq!(metric.compute()["acc"], 0.5, epsilon = 1e-4);
        metric.reset();
        assert_relative_eq!(metric.compute()["acc"], 0.0);
    }

    #[test]
    fn test_ignore_space_and_filter() {
        let mut metric = RecMetric::with_options("acc", true, true).unwrap();
        let values = metric.update(&decoded(&["Hello World!"]), &batch(&["helloworld"])).unwrap();
        assert_relative_eq!(values["acc"], 1.0, epsilon = 1e-4);

        let mut strict = RecMetric::with_options("acc", false, false).unwrap();
        let values = strict.update(&decoded(&["a b"]), &batch(&["ab"])).unwrap();
        assert_relative_eq!(values["acc"], 0.0);
    }

    #[test]
    fn test_rejects_unknown_indicator() {
        let err = RecMetric::with_options("f1", true, false).unwrap_err();
        assert!(err.to_string().contains("Metric.main_indicator"));
    }

    #[test]
    fn test_row_count_mismatch() {
        let mut metric = RecMetric::new(&RecMetricParams::default()).unwrap();
        assert!(metric.update(&decoded(&["a"]), &batch(&["a", "b"])).is_err());
    }

    proptest! {
        #[test]
        fn prop_normalized_distance_bounded(a in "[a-c]{0,8}", b in "[a-c]{0,8}") {
            let d = normalized_edit_distance(&a, &b);
            prop_assert!((0.0..=1.0).contains(&d));
            prop_assert_eq!(edit_distance(&a, &b), edit_distance(&b, &a));
        }
    }
}
