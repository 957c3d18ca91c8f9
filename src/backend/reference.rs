//! Deterministic CPU reference backend
//!
//! [`PriorModel`] learns a per-step class prior: each output step is a bias
//! vector plus a position-specific offset, independent of the image. It is
//! not a recognition network. It exists so the whole pipeline (sizing,
//! optimisation, evaluation, checkpoints, distribution) runs end to end and
//! so checkpoint shapes follow the reconciled head dimensions.

use crate::backend::{
    AlignedCrossEntropy, Backend, ClsCrossEntropy, DistillationLoss, LossBuildContext,
    ModelBuildContext,
};
use crate::config::{ArchitectureSpec, HeadSpec, LossSpec, ModelSpec};
use crate::data::Batch;
use crate::error::{Error, Result};
use crate::loss::Loss;
use crate::model::{Model, Parameter, ParameterStore, Predictions};
use crate::reconcile::ReconciledArchitecture;
use crate::seed::RngStream;
use ndarray::{Array1, Array3, Axis};
use rand::Rng;

const INIT_SCALE: f32 = 0.01;

/// Backend shipping [`PriorModel`] and the reference losses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceBackend;

impl ReferenceBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Output classes of one model's head.
fn class_count(model: &ModelSpec, path: &str) -> Result<usize> {
    let classes = match &model.head {
        HeadSpec::MultiHead(head) => head.ctc_character_num(),
        HeadSpec::Plain(head) => head.out_channels.or_else(|| {
            head.param("class_dim").and_then(|v| v.as_u64()).map(|n| n as usize)
        }),
    };
    match classes {
        Some(0) => Err(Error::config(format!("{path}.Head"), "head has zero output classes")),
        Some(n) => Ok(n),
        None => Err(Error::config(
            format!("{path}.Head.out_channels"),
            "output size is unknown; declare it or use a post-process that exposes a vocabulary",
        )),
    }
}

fn bias_name(prefix: &str) -> String {
    if prefix.is_empty() {
        "head.bias".to_string()
    } else {
        format!("{prefix}.head.bias")
    }
}

fn position_name(prefix: &str) -> String {
    if prefix.is_empty() {
        "head.position".to_string()
    } else {
        format!("{prefix}.head.position")
    }
}

impl Backend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference"
    }

    fn build_model(
        &self,
        architecture: &ReconciledArchitecture,
        ctx: &ModelBuildContext<'_>,
    ) -> Result<Box<dyn Model>> {
        let spec = architecture.spec();
        if ctx.device.is_gpu() {
            tracing::info!(device = %ctx.device, "reference backend computes on the host");
        }
        if ctx.sync_batch_norm {
            tracing::debug!("reference model has no batch-norm layers to synchronise");
        }

        let steps = match spec.model_type() {
            Some("cls") => 1,
            _ => ctx.global.max_text_length,
        };

        let mut rng = ctx.seeds.rng(RngStream::WeightInit);
        let mut params = ParameterStore::new();
        let mut heads = Vec::new();
        for (prefix, model) in spec.models() {
            let path = if prefix.is_empty() {
                "Architecture".to_string()
            } else {
                format!("Architecture.Models.{prefix}")
            };
            let classes = class_count(model, &path)?;
            let mut init = |n: usize| -> Array1<f32> {
                (0..n).map(|_| rng.random_range(-INIT_SCALE..INIT_SCALE)).collect()
            };
            params.insert(bias_name(prefix), Parameter::new(vec![classes], init(classes)));
            params.insert(
                position_name(prefix),
                Parameter::new(vec![steps, classes], init(steps * classes)),
            );
            heads.push(HeadShape { prefix: prefix.to_string(), classes });
        }

        tracing::info!(
            models = heads.len(),
            steps,
            parameters = params.numel(),
            "built reference prior model"
        );
        Ok(Box::new(PriorModel {
            ensemble: spec.is_distillation(),
            steps,
            heads,
            params,
            last_batch: 0,
            training: true,
        }))
    }

    fn build_loss(&self, spec: &LossSpec, ctx: &LossBuildContext<'_>) -> Result<Box<dyn Loss>> {
        let vocabulary = || {
            ctx.vocabulary.cloned().ok_or_else(|| {
                Error::config(
                    "Loss.name",
                    format!("{} needs a post-process that exposes a vocabulary", spec.name()),
                )
            })
        };
        Ok(match spec {
            LossSpec::CTCLoss(params) => {
                Box::new(AlignedCrossEntropy::ctc(vocabulary()?, params.use_focal_loss))
            }
            LossSpec::MultiLoss(params) => {
                if params.loss_config_list.is_empty() {
                    return Err(Error::config("Loss.loss_config_list", "no branch losses listed"));
                }
                Box::new(AlignedCrossEntropy::multi(vocabulary()?, &params.loss_config_list))
            }
            LossSpec::ClsLoss(_) => Box::new(ClsCrossEntropy::new(ctx.global.label_list.clone())),
            LossSpec::CombinedLoss(params) => {
                if params.loss_config_list.is_empty() {
                    return Err(Error::config("Loss.loss_config_list", "no distillation losses listed"));
                }
                Box::new(DistillationLoss::new(vocabulary()?, params.loss_config_list.clone()))
            }
        })
    }
}

#[derive(Debug, Clone)]
struct HeadShape {
    prefix: String,
    classes: usize,
}

/// Position-wise class prior, one head per (sub-)model.
#[derive(Debug, Clone)]
pub struct PriorModel {
    ensemble: bool,
    steps: usize,
    heads: Vec<HeadShape>,
    params: ParameterStore,
    last_batch: usize,
    training: bool,
}

impl PriorModel {
    fn head_output(&self, head: &HeadShape, batch: usize) -> Result<Array3<f32>> {
        let missing = |name: String| Error::Backend(format!("parameter '{name}' is missing"));
        let bias = self.params.get(&bias_name(&head.prefix)).ok_or_else(|| missing(bias_name(&head.prefix)))?;
        let position = self
            .params
            .get(&position_name(&head.prefix))
            .ok_or_else(|| missing(position_name(&head.prefix)))?;

        let mut out = Array3::zeros((batch, self.steps, head.classes));
        for mut row in out.axis_iter_mut(Axis(0)) {
            for t in 0..self.steps {
                for c in 0..head.classes {
                    row[[t, c]] = bias.value[c] + position.value[t * head.classes + c];
                }
            }
        }
        Ok(out)
    }

    fn head_backward(&mut self, head: &HeadShape, grad: &Array3<f32>) -> Result<()> {
        let (_, steps, classes) = grad.dim();
        if steps != self.steps || classes != head.classes {
            return Err(Error::Backend(format!(
                "gradient shape {:?} does not match head '{}'",
                grad.dim(),
                head.prefix
            )));
        }
        let summed = grad.sum_axis(Axis(0));
        if let Some(bias) = self.params.get_mut(&bias_name(&head.prefix)) {
            bias.grad += &summed.sum_axis(Axis(0));
        }
        if let Some(position) = self.params.get_mut(&position_name(&head.prefix)) {
            for ((t, c), g) in summed.indexed_iter() {
                position.grad[t * classes + c] += g;
            }
        }
        Ok(())
    }

    pub fn is_training(&self) -> bool {
        self.training
    }
}

impl Model for PriorModel {
    fn forward(&mut self, batch: &Batch) -> Result<Predictions> {
        self.last_batch = batch.len();
        if self.ensemble {
            let mut outputs = Vec::with_capacity(self.heads.len());
            for head in &self.heads {
                outputs.push((head.prefix.clone(), self.head_output(head, batch.len())?));
            }
            Ok(Predictions::Ensemble(outputs))
        } else {
            let head = self
                .heads
                .first()
                .ok_or_else(|| Error::Backend("model has no heads".into()))?;
            Ok(Predictions::Single(self.head_output(head, batch.len())?))
        }
    }

    fn backward(&mut self, grad: &Predictions) -> Result<()> {
        if grad.batch_size() != self.last_batch {
            return Err(Error::Backend(format!(
                "gradient batch {} does not match forward batch {}",
                grad.batch_size(),
                self.last_batch
            )));
        }
        let heads = self.heads.clone();
        for head in &heads {
            let g = grad
                .output(&head.prefix)
                .ok_or_else(|| Error::Backend(format!("no gradient for sub-model '{}'", head.prefix)))?;
            self.head_backward(head, g)?;
        }
        Ok(())
    }

    fn parameters(&self) -> &ParameterStore {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterStore {
        &mut self.params
    }

    fn train(&mut self) {
        self.training = true;
    }

    fn eval(&mut self) {
        self.training = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;
    use crate::data::Sample;
    use crate::device::Device;
    use crate::reconcile::reconcile_dimensions;
    use crate::seed::SeedSource;
    use serde_yaml::Value;
    use std::path::PathBuf;

    fn reconciled(yaml: &str, vocab: Option<usize>, post: &str) -> ReconciledArchitecture {
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        reconcile_dimensions(ArchitectureSpec::from_value(&value).unwrap(), vocab, post).unwrap()
    }

    fn ctx(global: &GlobalConfig) -> ModelBuildContext<'_> {
        ModelBuildContext { global, device: Device::Cpu, seeds: SeedSource::new(3), sync_batch_norm: false }
    }

    fn batch(n: usize) -> Batch {
        Batch {
            samples: (0..n)
                .map(|i| Sample { image: PathBuf::from(format!("{i}.jpg")), label: "a".into() })
                .collect(),
        }
    }

    #[test]
    fn test_parameter_shapes_follow_reconciled_head() {
        let mut global = GlobalConfig::with_epochs(1);
        global.max_text_length = 4;
        let arch = reconciled("algorithm: CRNN\nHead: {name: CTCHead}", Some(6), "CTCLabelDecode");
        let model = ReferenceBackend.build_model(&arch, &ctx(&global)).unwrap();
        assert_eq!(model.parameters().get("head.bias").unwrap().shape, vec![6]);
        assert_eq!(model.parameters().get("head.position").unwrap().shape, vec![4, 6]);
    }

    #[test]
    fn test_unsized_head_is_config_error() {
        let global = GlobalConfig::with_epochs(1);
        let arch = reconciled("algorithm: CRNN\nHead: {name: CTCHead}", None, "DBPostProcess");
        let err = ReferenceBackend.build_model(&arch, &ctx(&global)).err().unwrap();
        assert!(err.to_string().contains("Architecture.Head.out_channels"));
    }

    #[test]
    fn test_init_is_seeded() {
        let global = GlobalConfig::with_epochs(1);
        let arch = reconciled("Head: {name: CTCHead}", Some(5), "CTCLabelDecode");
        let a = ReferenceBackend.build_model(&arch, &ctx(&global)).unwrap();
        let b = ReferenceBackend.build_model(&arch, &ctx(&global)).unwrap();
        assert_eq!(a.parameters(), b.parameters());
    }

    #[test]
    fn test_forward_backward_ensemble() {
        let mut global = GlobalConfig::with_epochs(1);
        global.max_text_length = 3;
        let arch = reconciled(
            "model_type: rec\nalgorithm: Distillation\nModels:\n  Teacher:\n    Head: {name: CTCHead}\n  Student:\n    Head: {name: CTCHead}",
            Some(4),
            "DistillationCTCLabelDecode",
        );
        let mut model = ReferenceBackend.build_model(&arch, &ctx(&global)).unwrap();
        let preds = model.forward(&batch(2)).unwrap();
        let Predictions::Ensemble(outputs) = &preds else { panic!("expected ensemble") };
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].1.dim(), (2, 3, 4));

        let mut grad = preds.zeros_like();
        if let Some(g) = grad.output_mut("Student") {
            g.fill(1.0);
        }
        model.backward(&grad).unwrap();
        let bias = model.parameters().get("Student.head.bias").unwrap();
        assert!(bias.grad.iter().all(|g| (*g - 6.0).abs() < 1e-6));
        let teacher = model.parameters().get("Teacher.head.bias").unwrap();
        assert!(teacher.grad.iter().all(|g| *g == 0.0));
    }

    #[test]
    fn test_cls_model_has_one_step() {
        let global = GlobalConfig::with_epochs(1);
        let arch = reconciled("model_type: cls\nHead: {name: ClsHead, class_dim: 2}", None, "ClsPostProcess");
        let mut model = ReferenceBackend.build_model(&arch, &ctx(&global)).unwrap();
        let Predictions::Single(out) = model.forward(&batch(1)).unwrap() else { panic!("expected single") };
        assert_eq!(out.dim(), (1, 1, 2));
    }

    #[test]
    fn test_recognition_loss_needs_vocabulary() {
        let global = GlobalConfig::with_epochs(1);
        let spec: LossSpec = serde_yaml::from_str("name: CTCLoss").unwrap();
        let err = ReferenceBackend
            .build_loss(&spec, &LossBuildContext { global: &global, vocabulary: None })
            .err()
            .unwrap();
        assert!(err.to_string().contains("Loss.name"));
    }
}
