//! Reference losses
//!
//! Every recognition objective here is a position-aligned cross-entropy: the
//! label is encoded with the post-processor's vocabulary, truncated to the
//! number of output steps and padded with the vocabulary's end symbol.

use crate::config::{DistillationLossTerm, MultiLossTerm};
use crate::data::Batch;
use crate::error::{Error, Result};
use crate::loss::{Loss, LossOutput};
use crate::model::Predictions;
use crate::postprocess::Vocabulary;
use ndarray::{Array3, Axis, Zip};
use std::collections::BTreeMap;

/// Per-row, per-step class targets; `None` positions do not contribute.
type Targets = Vec<Vec<Option<usize>>>;

fn sequence_targets(vocabulary: &Vocabulary, batch: &Batch, steps: usize) -> Targets {
    batch
        .labels()
        .map(|label| {
            let encoded = vocabulary.encode(label);
            (0..steps)
                .map(|t| Some(encoded.get(t).copied().unwrap_or(vocabulary.end_index())))
                .collect()
        })
        .collect()
}

/// Mean cross-entropy over targeted positions and its gradient.
///
/// With `focal`, each position is weighted by `(1 - p)^2`, the weight being
/// held constant for the gradient.
fn cross_entropy(out: &Array3<f32>, targets: &Targets, focal: bool) -> Result<(f32, Array3<f32>)> {
    let (batch, steps, classes) = out.dim();
    if targets.len() != batch {
        return Err(Error::Backend(format!(
            "predictions cover {batch} samples but the batch has {}",
            targets.len()
        )));
    }

    let mut grad = Array3::<f32>::zeros(out.raw_dim());
    let mut total = 0.0_f32;
    let mut counted = 0usize;
    for (b, row_targets) in targets.iter().enumerate() {
        for (t, target) in row_targets.iter().enumerate().take(steps) {
            let Some(target) = target.filter(|c| *c < classes) else { continue };
            let logits = out.index_axis(Axis(0), b);
            let logits = logits.index_axis(Axis(0), t);
            let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let denom: f32 = logits.iter().map(|v| (v - max).exp()).sum();
            let p_target = (logits[target] - max).exp() / denom;
            let weight = if focal { (1.0 - p_target).powi(2) } else { 1.0 };

            total += -weight * p_target.max(f32::MIN_POSITIVE).ln();
            counted += 1;
            for (c, g) in grad.index_axis_mut(Axis(0), b).index_axis_mut(Axis(0), t).iter_mut().enumerate() {
                let p = (logits[c] - max).exp() / denom;
                *g = weight * (p - if c == target { 1.0 } else { 0.0 });
            }
        }
    }

    if counted == 0 {
        return Ok((0.0, grad));
    }
    let scale = 1.0 / counted as f32;
    grad.mapv_inplace(|g| g * scale);
    let loss = total * scale;
    if !loss.is_finite() {
        return Err(Error::Backend(format!("loss is not finite: {loss}")));
    }
    Ok((loss, grad))
}

fn single<'a>(name: &str, preds: &'a Predictions) -> Result<&'a Array3<f32>> {
    match preds {
        Predictions::Single(out) => Ok(out),
        Predictions::Ensemble(_) => {
            Err(Error::Backend(format!("{name} expects a single model output, got an ensemble")))
        }
    }
}

/// Position-aligned cross-entropy for `CTCLoss` and `MultiLoss`.
#[derive(Debug, Clone)]
pub struct AlignedCrossEntropy {
    name: &'static str,
    vocabulary: Vocabulary,
    focal: bool,
    terms: Vec<&'static str>,
}

impl AlignedCrossEntropy {
    pub fn ctc(vocabulary: Vocabulary, focal: bool) -> Self {
        Self { name: "CTCLoss", vocabulary, focal, terms: vec!["CTCLoss"] }
    }

    /// One term per configured branch loss, all over the same output.
    pub fn multi(vocabulary: Vocabulary, list: &[MultiLossTerm]) -> Self {
        let focal = list
            .iter()
            .any(|term| matches!(term, MultiLossTerm::Ctc(Some(params)) if params.use_focal_loss));
        let terms = list
            .iter()
            .map(|term| match term {
                MultiLossTerm::Ctc(_) => "CTCLoss",
                MultiLossTerm::Sar(_) => "SARLoss",
                MultiLossTerm::Nrtr(_) => "NRTRLoss",
            })
            .collect();
        Self { name: "MultiLoss", vocabulary, focal, terms }
    }
}

impl Loss for AlignedCrossEntropy {
    fn name(&self) -> &str {
        self.name
    }

    fn compute(&self, preds: &Predictions, batch: &Batch) -> Result<LossOutput> {
        let out = single(self.name, preds)?;
        let targets = sequence_targets(&self.vocabulary, batch, out.dim().1);
        let (term, grad) = cross_entropy(out, &targets, self.focal)?;

        let count = self.terms.len() as f32;
        let terms = self.terms.iter().map(|name| (name.to_string(), term)).collect();
        Ok(LossOutput {
            loss: term * count,
            terms,
            grad: Predictions::Single(grad.mapv(|g| g * count)),
        })
    }
}

/// Cross-entropy of the first output step against `label_list`.
#[derive(Debug, Clone)]
pub struct ClsCrossEntropy {
    label_list: Vec<String>,
}

impl ClsCrossEntropy {
    pub fn new(label_list: Vec<String>) -> Self {
        Self { label_list }
    }
}

impl Loss for ClsCrossEntropy {
    fn name(&self) -> &str {
        "ClsLoss"
    }

    fn compute(&self, preds: &Predictions, batch: &Batch) -> Result<LossOutput> {
        let out = single("ClsLoss", preds)?;
        let steps = out.dim().1;
        let targets: Targets = batch
            .labels()
            .map(|label| {
                let class = self.label_list.iter().position(|l| l == label.trim());
                (0..steps).map(|t| if t == 0 { class } else { None }).collect()
            })
            .collect();
        let (loss, grad) = cross_entropy(out, &targets, false)?;
        Ok(LossOutput {
            loss,
            terms: BTreeMap::from([("ClsLoss".to_string(), loss)]),
            grad: Predictions::Single(grad),
        })
    }
}

/// Weighted sum of per-model supervised terms and pairwise output distances.
#[derive(Debug, Clone)]
pub struct DistillationLoss {
    vocabulary: Vocabulary,
    terms: Vec<DistillationLossTerm>,
}

impl DistillationLoss {
    pub fn new(vocabulary: Vocabulary, terms: Vec<DistillationLossTerm>) -> Self {
        Self { vocabulary, terms }
    }
}

fn output<'a>(preds: &'a Predictions, model: &str) -> Result<&'a Array3<f32>> {
    match preds {
        Predictions::Ensemble(_) => preds
            .output(model)
            .ok_or_else(|| Error::Backend(format!("no output for sub-model '{model}'"))),
        Predictions::Single(_) => {
            Err(Error::Backend("CombinedLoss expects per-model outputs from a distillation model".into()))
        }
    }
}

fn accumulate(grad: &mut Predictions, model: &str, delta: &Array3<f32>, weight: f32) -> Result<()> {
    let target = grad
        .output_mut(model)
        .ok_or_else(|| Error::Backend(format!("no gradient slot for sub-model '{model}'")))?;
    Zip::from(target).and(delta).for_each(|g, d| *g += weight * d);
    Ok(())
}

impl Loss for DistillationLoss {
    fn name(&self) -> &str {
        "CombinedLoss"
    }

    fn compute(&self, preds: &Predictions, batch: &Batch) -> Result<LossOutput> {
        let mut grad = preds.zeros_like();
        let mut terms = BTreeMap::new();
        let mut loss = 0.0;

        for term in &self.terms {
            match term {
                DistillationLossTerm::DistillationCTCLoss(params) => {
                    for model in &params.model_name_list {
                        let out = output(preds, model)?;
                        let targets = sequence_targets(&self.vocabulary, batch, out.dim().1);
                        let (value, delta) = cross_entropy(out, &targets, false)?;
                        accumulate(&mut grad, model, &delta, params.weight)?;
                        loss += params.weight * value;
                        terms.insert(format!("loss_ctc_{model}"), value);
                    }
                }
                DistillationLossTerm::DistillationDistanceLoss(params) => {
                    for (left, right) in &params.model_name_pairs {
                        let a = output(preds, left)?;
                        let b = output(preds, right)?;
                        if a.dim() != b.dim() {
                            return Err(Error::Backend(format!(
                                "cannot compare '{left}' {:?} with '{right}' {:?}",
                                a.dim(),
                                b.dim()
                            )));
                        }
                        let n = a.len().max(1) as f32;
                        let diff = a - b;
                        let value = diff.mapv(|d| d * d).sum() / n;
                        let delta = diff.mapv(|d| 2.0 * d / n);
                        accumulate(&mut grad, left, &delta, params.weight)?;
                        accumulate(&mut grad, right, &delta, -params.weight)?;
                        loss += params.weight * value;
                        terms.insert(format!("loss_distance_{left}_{right}"), value);
                    }
                }
            }
        }

        Ok(LossOutput { loss, terms, grad })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DistillationCtcTerm, DistillationDistanceTerm};
    use crate::data::Sample;
    use crate::postprocess::VocabularyKind;
    use approx::assert_relative_eq;
    use std::path::PathBuf;

    fn vocab() -> Vocabulary {
        Vocabulary::new(VocabularyKind::Ctc, "ab".chars().map(String::from).collect())
    }

    fn batch(labels: &[&str]) -> Batch {
        Batch {
            samples: labels
                .iter()
                .map(|l| Sample { image: PathBuf::from("x.jpg"), label: l.to_string() })
                .collect(),
        }
    }

    #[test]
    fn test_uniform_logits_give_log_classes() {
        let loss = AlignedCrossEntropy::ctc(vocab(), false);
        let preds = Predictions::Single(Array3::zeros((2, 3, 3)));
        let out = loss.compute(&preds, &batch(&["ab", "b"])).unwrap();
        assert_relative_eq!(out.loss, 3.0_f32.ln(), epsilon = 1e-5);
        let Predictions::Single(grad) = &out.grad else { panic!("expected single") };
        // each step's gradient sums to zero
        assert_relative_eq!(grad.index_axis(Axis(0), 0).index_axis(Axis(0), 0).sum(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_confident_correct_logits_give_small_loss() {
        let loss = AlignedCrossEntropy::ctc(vocab(), false);
        let mut out = Array3::zeros((1, 2, 3));
        out[[0, 0, 1]] = 20.0;
        out[[0, 1, 2]] = 20.0;
        let result = loss.compute(&Predictions::Single(out), &batch(&["ab"])).unwrap();
        assert!(result.loss < 1e-3);
    }

    #[test]
    fn test_targets_beyond_output_classes_are_skipped() {
        let loss = AlignedCrossEntropy::ctc(vocab(), false);
        let preds = Predictions::Single(Array3::zeros((1, 1, 2)));
        let result = loss.compute(&preds, &batch(&["b"])).unwrap();
        assert_eq!(result.loss, 0.0);
    }

    #[test]
    fn test_multi_loss_reports_each_term() {
        let loss = AlignedCrossEntropy::multi(vocab(), &[MultiLossTerm::Ctc(None), MultiLossTerm::Sar(None)]);
        let preds = Predictions::Single(Array3::zeros((1, 2, 3)));
        let result = loss.compute(&preds, &batch(&["a"])).unwrap();
        assert_eq!(result.terms.len(), 2);
        assert_relative_eq!(result.loss, 2.0 * result.terms["CTCLoss"], epsilon = 1e-6);
    }

    #[test]
    fn test_cls_loss_uses_label_list() {
        let loss = ClsCrossEntropy::new(vec!["0".into(), "180".into()]);
        let mut out = Array3::zeros((1, 1, 2));
        out[[0, 0, 1]] = 20.0;
        let result = loss.compute(&Predictions::Single(out), &batch(&["180"])).unwrap();
        assert!(result.loss < 1e-3);
    }

    #[test]
    fn test_distillation_terms() {
        let loss = DistillationLoss::new(
            vocab(),
            vec![
                DistillationLossTerm::DistillationCTCLoss(DistillationCtcTerm {
                    weight: 1.0,
                    model_name_list: vec!["Student".into()],
                    key: None,
                }),
                DistillationLossTerm::DistillationDistanceLoss(DistillationDistanceTerm {
                    weight: 0.5,
                    model_name_pairs: vec![("Student".into(), "Teacher".into())],
                    key: None,
                }),
            ],
        );
        let preds = Predictions::Ensemble(vec![
            ("Teacher".into(), Array3::ones((1, 2, 3))),
            ("Student".into(), Array3::zeros((1, 2, 3))),
        ]);
        let result = loss.compute(&preds, &batch(&["a"])).unwrap();
        assert_relative_eq!(result.terms["loss_distance_Student_Teacher"], 1.0, epsilon = 1e-6);
        assert_relative_eq!(
            result.loss,
            result.terms["loss_ctc_Student"] + 0.5,
            epsilon = 1e-6
        );
        // the teacher is pulled towards the student
        let teacher_grad = result.grad.output("Teacher").unwrap();
        assert!(teacher_grad.iter().all(|g| *g > 0.0));

        assert!(loss.compute(&Predictions::Single(Array3::zeros((1, 2, 3))), &batch(&["a"])).is_err());
    }
}
