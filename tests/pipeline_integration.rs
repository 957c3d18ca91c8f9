//! Pipeline Integration Tests
//!
//! Runs complete configurations through `pipeline::prepare`/`pipeline::run`
//! on the reference backend with small on-disk label files.

use ocrtrain::backend::{Backend, LossBuildContext, ModelBuildContext, ReferenceBackend};
use ocrtrain::checkpoint::{load_states, CheckpointPaths};
use ocrtrain::config::{load_config, ConfigTree, LossSpec, Override};
use ocrtrain::data::Batch;
use ocrtrain::engine::{EngineState, JsonlScalarWriter};
use ocrtrain::error::{BuildStage, Error};
use ocrtrain::loss::{Loss, LossOutput};
use ocrtrain::model::{Model, Predictions};
use ocrtrain::pipeline::{self, RunContext, RESOLVED_CONFIG};
use ocrtrain::reconcile::ReconciledArchitecture;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write `n` recognition samples and return the label file path.
fn write_labels(dir: &Path, name: &str, n: usize) -> PathBuf {
    let path = dir.join(name);
    let words = ["abc", "hello", "ocr", "text", "rust", "word", "train", "step"];
    let content: String = (0..n).map(|i| format!("images/img_{i}.jpg\t{}\n", words[i % words.len()])).collect();
    std::fs::write(&path, content).unwrap();
    path
}

fn rec_config(dir: &Path, extra_global: &str) -> ConfigTree {
    let train = write_labels(dir, "train.txt", 8);
    let eval = write_labels(dir, "val.txt", 4);
    let yaml = format!(
        r#"
Global:
  epoch_num: 2
  save_model_dir: {out}
  print_batch_step: 1
  eval_batch_step: [0, 2]
  max_text_length: 8
  seed: 7
{extra_global}
Architecture:
  model_type: rec
  algorithm: CRNN
  Backbone: {{name: MobileNetV3, scale: 0.5}}
  Head: {{name: CTCHead, fc_decay: 0.0001}}
Loss:
  name: CTCLoss
Optimizer:
  name: Adam
  lr: {{name: Cosine, learning_rate: 0.01}}
PostProcess:
  name: CTCLabelDecode
Metric:
  name: RecMetric
  main_indicator: acc
Train:
  dataset: {{name: SimpleDataSet, data_dir: {data}, label_file_list: [{train}]}}
  loader: {{batch_size_per_card: 4, shuffle: true}}
Eval:
  dataset: {{name: SimpleDataSet, data_dir: {data}, label_file_list: [{eval}]}}
  loader: {{batch_size_per_card: 2, shuffle: false}}
"#,
        out = dir.join("out").display(),
        data = dir.display(),
        train = train.display(),
        eval = eval.display(),
    );
    ConfigTree::from_yaml(&yaml).unwrap()
}

fn reference() -> RunContext {
    RunContext::new(Box::new(ReferenceBackend::new()))
}

fn set(config: ConfigTree, pairs: &[&str]) -> ConfigTree {
    let overrides: Vec<Override> = pairs.iter().map(|p| p.parse().unwrap()).collect();
    config.with_overrides(&overrides).unwrap()
}

// ============================================================================
// Training
// ============================================================================

#[test]
fn train_run_writes_checkpoints_and_resolved_config() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    let writer = JsonlScalarWriter::create(&out.join("vdl")).unwrap();
    let ctx = reference().with_writer(Box::new(writer));

    let summary = pipeline::run(rec_config(tmp.path(), ""), ctx).unwrap();

    assert_eq!(summary.state, EngineState::Completed);
    assert_eq!(summary.global_step, 4);
    assert!(summary.best.values.contains_key("acc"));
    assert!(summary.best.values.contains_key("norm_edit_dis"));

    for name in ["latest", "best_accuracy", "iter_epoch_1", "iter_epoch_2"] {
        let paths = CheckpointPaths::in_dir(&out, name);
        assert!(paths.weights().is_file(), "{name} weights");
        assert!(paths.optimizer().is_file(), "{name} optimizer state");
        assert!(paths.states().is_file(), "{name} training states");
    }
    let latest = load_states(&CheckpointPaths::in_dir(&out, "latest")).unwrap().unwrap();
    assert_eq!((latest.epoch, latest.global_step), (2, 4));

    let resolved = load_config(out.join(RESOLVED_CONFIG)).unwrap();
    let head = resolved.get("Architecture.Head.out_channels").unwrap();
    assert_eq!(head.as_u64(), Some(37));

    let scalars = std::fs::read_to_string(out.join("vdl").join(JsonlScalarWriter::FILE_NAME)).unwrap();
    assert!(scalars.lines().any(|l| l.contains("\"TRAIN/loss\"")));
    assert!(scalars.lines().any(|l| l.contains("\"EVAL/acc\"")));
}

#[test]
fn train_without_eval_section_skips_evaluation() {
    let tmp = TempDir::new().unwrap();
    let mut config = rec_config(tmp.path(), "  cal_metric_during_train: true");
    let yaml = config.to_yaml().unwrap().replace("\nEval:", "\nUnusedEval:");
    config = ConfigTree::from_yaml(&yaml).unwrap();

    let summary = pipeline::run(config, reference()).unwrap();
    assert!(summary.best.is_empty());
    let out = tmp.path().join("out");
    assert!(!CheckpointPaths::in_dir(&out, "best_accuracy").weights().exists());
    assert!(CheckpointPaths::in_dir(&out, "latest").weights().exists());
}

// ============================================================================
// Resume
// ============================================================================

#[test]
fn resume_restores_best_record_and_continues_counting() {
    let tmp = TempDir::new().unwrap();
    let first = pipeline::run(rec_config(tmp.path(), ""), reference()).unwrap();
    let latest = tmp.path().join("out").join("latest");

    let resumed = set(rec_config(tmp.path(), ""), &[&format!("Global.checkpoints={}", latest.display())]);
    let engine = pipeline::prepare(resumed, reference()).unwrap();
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(engine.start_epoch(), 3);
    assert_eq!(engine.global_step(), 4);
    assert_eq!(engine.best(), &first.best);

    let longer = set(
        rec_config(tmp.path(), ""),
        &[&format!("Global.checkpoints={}.safetensors", latest.display()), "Global.epoch_num=3"],
    );
    let summary = pipeline::run(longer, reference()).unwrap();
    assert_eq!(summary.global_step, 6);
    assert_eq!(summary.epoch, 3);
    assert!(CheckpointPaths::in_dir(&tmp.path().join("out"), "iter_epoch_3").weights().is_file());
}

#[test]
fn pretrained_model_loads_weights_only() {
    let tmp = TempDir::new().unwrap();
    pipeline::run(rec_config(tmp.path(), ""), reference()).unwrap();
    let best = tmp.path().join("out").join("best_accuracy");

    let config = set(rec_config(tmp.path(), ""), &[&format!("Global.pretrained_model={}", best.display())]);
    let engine = pipeline::prepare(config, reference()).unwrap();
    assert_eq!(engine.start_epoch(), 1);
    assert_eq!(engine.global_step(), 0);
    assert!(engine.best().is_empty());
}

#[test]
fn missing_checkpoint_fails_in_checkpoint_stage() {
    let tmp = TempDir::new().unwrap();
    let config = set(rec_config(tmp.path(), ""), &["Global.checkpoints=./does/not/exist"]);
    let err = pipeline::prepare(config, reference()).unwrap_err();
    assert!(matches!(err, Error::Build { stage: BuildStage::Checkpoint, .. }));
    assert!(matches!(err.root(), Error::Resource { .. }));
}

// ============================================================================
// Failure
// ============================================================================

/// Reference model paired with a loss that always fails.
struct FailingLossBackend;

struct FailingLoss;

impl Loss for FailingLoss {
    fn name(&self) -> &str {
        "FailingLoss"
    }

    fn compute(&self, _preds: &Predictions, _batch: &Batch) -> ocrtrain::Result<LossOutput> {
        Err(Error::Backend("loss produced NaN".to_string()))
    }
}

impl Backend for FailingLossBackend {
    fn name(&self) -> &str {
        "failing-loss"
    }

    fn build_model(
        &self,
        architecture: &ReconciledArchitecture,
        ctx: &ModelBuildContext<'_>,
    ) -> ocrtrain::Result<Box<dyn Model>> {
        ReferenceBackend::new().build_model(architecture, ctx)
    }

    fn build_loss(&self, _: &LossSpec, _: &LossBuildContext<'_>) -> ocrtrain::Result<Box<dyn Loss>> {
        Ok(Box::new(FailingLoss))
    }
}

#[test]
fn failing_step_moves_engine_to_failed() {
    let tmp = TempDir::new().unwrap();
    let ctx = RunContext::new(Box::new(FailingLossBackend));
    let mut engine = pipeline::prepare(rec_config(tmp.path(), ""), ctx).unwrap();

    let err = engine.run().unwrap_err();
    assert!(matches!(err, Error::Compute { epoch: 1, step: 1, .. }), "{err}");
    assert!(matches!(err.root(), Error::Backend(_)));
    assert_eq!(engine.state(), EngineState::Failed);
    assert_eq!(engine.global_step(), 0);
    assert!(!CheckpointPaths::in_dir(&tmp.path().join("out"), "latest").weights().exists());

    let again = engine.run().unwrap_err();
    assert!(matches!(again, Error::InvalidTransition { .. }));
    assert_eq!(engine.state(), EngineState::Failed);
}

#[test]
fn lower_is_better_indicator_is_accepted_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let config = set(rec_config(tmp.path(), ""), &["Metric.main_indicator=edit_dis"]);
    let summary = pipeline::run(config, reference()).unwrap();
    let best = summary.best.values["edit_dis"];
    assert!((0.0..=1.0).contains(&best));
}

// ============================================================================
// Profiling
// ============================================================================

#[test]
fn profiler_options_select_profiling_run() {
    let tmp = TempDir::new().unwrap();
    let report_path = tmp.path().join("profile.json");
    let options = format!("Global.profiler_options=batch_range=[1,3];profile_path={}", report_path.display());
    let config = set(rec_config(tmp.path(), ""), &[&options]);

    let summary = pipeline::run(config, reference()).unwrap();
    let report = summary.profile.expect("profiling report");
    assert_eq!(report.steps, 2);
    assert!(report_path.is_file());
    assert!(!CheckpointPaths::in_dir(&tmp.path().join("out"), "latest").weights().exists());
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Backend that must never be asked for a model.
struct UnreachableBackend;

impl Backend for UnreachableBackend {
    fn name(&self) -> &str {
        "unreachable"
    }

    fn build_model(&self, _: &ReconciledArchitecture, _: &ModelBuildContext<'_>) -> ocrtrain::Result<Box<dyn Model>> {
        panic!("model built from an invalid architecture")
    }

    fn build_loss(&self, _: &LossSpec, _: &LossBuildContext<'_>) -> ocrtrain::Result<Box<dyn Loss>> {
        panic!("loss built from an invalid architecture")
    }
}

#[test]
fn distillation_member_without_head_name_fails_before_model_build() {
    let tmp = TempDir::new().unwrap();
    let yaml = rec_config(tmp.path(), "").to_yaml().unwrap();
    let config = ConfigTree::from_yaml(&yaml)
        .unwrap()
        .with_section(
            "Architecture",
            serde_yaml::from_str(
                "algorithm: Distillation\nModels:\n  Teacher:\n    Head: {name: CTCHead}\n  Student:\n    Head: {fc_decay: 0.1}",
            )
            .unwrap(),
        )
        .with_section(
            "PostProcess",
            serde_yaml::from_str("name: DistillationCTCLabelDecode\nmodel_name: [Student]").unwrap(),
        );

    let err = pipeline::prepare(config, RunContext::new(Box::new(UnreachableBackend))).unwrap_err();
    assert!(matches!(err, Error::Build { stage: BuildStage::Reconcile, .. }));
    assert!(err.to_string().contains("Architecture.Models.Student.Head.name"));
}

#[test]
fn check_reports_reconciled_sizes() {
    let tmp = TempDir::new().unwrap();
    let dict = tmp.path().join("dict.txt");
    std::fs::write(&dict, "a\nb\nc\nd\n").unwrap();
    let config = rec_config(tmp.path(), "")
        .with_section(
            "Architecture",
            serde_yaml::from_str(
                "model_type: rec\nalgorithm: SVTR\nHead:\n  name: MultiHead\n  head_list:\n    - CTCLabelDecode: {}\n    - SARLabelDecode: {}",
            )
            .unwrap(),
        )
        .with_section(
            "PostProcess",
            serde_yaml::from_str(&format!("name: CTCLoss\ncharacter_dict_path: {}", dict.display())).unwrap(),
        );

    let reconciled = pipeline::check(&config).unwrap();
    // blank + 4 symbols, minus the two reserved by the CTC-loss post-process
    assert_eq!(reconciled.vocabulary_len(), Some(5));
    let value = reconciled.spec().to_value();
    let yaml = serde_yaml::to_string(&value).unwrap();
    assert!(yaml.contains("character_num: 3"), "{yaml}");
}

#[test]
fn unknown_post_process_is_config_error() {
    let tmp = TempDir::new().unwrap();
    let config = rec_config(tmp.path(), "")
        .with_section("PostProcess", serde_yaml::from_str("name: DBPostProcessTypo").unwrap());
    let err = pipeline::check(&config).unwrap_err();
    assert!(matches!(err, Error::Build { stage: BuildStage::PostProcess, .. }));
    assert!(err.is_user_error());
}
