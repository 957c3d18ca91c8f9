//! Typed section schemas for the training configuration
//!
//! Every pipeline stage owns one section. Variant selection is a closed,
//! `name`-tagged enum per section, so an unrecognised name fails to
//! deserialize with the list of accepted names.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;

/// Deserialize a bool from either a YAML boolean or a quoted string.
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Str(String),
    }

    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::Str(s) => match s.to_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected 'true' or 'false', got '{other}'"
            ))),
        },
    }
}

/// Deserialize either a single value or a list of values.
fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(v)) => vec![v],
        Some(OneOrMany::Many(v)) => v,
    })
}

// ============================================================================
// Global
// ============================================================================

/// The `Global` section: run-wide settings shared by every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Run on the accelerator when available
    #[serde(default, deserialize_with = "lenient_bool")]
    pub use_gpu: bool,

    /// Number of training epochs
    pub epoch_num: usize,

    /// Window (in steps) over which logged statistics are smoothed
    #[serde(default = "default_log_smooth_window")]
    pub log_smooth_window: usize,

    /// Log training statistics every N steps
    #[serde(default = "default_print_batch_step")]
    pub print_batch_step: usize,

    /// Output directory for checkpoints and the resolved config
    #[serde(default = "default_save_model_dir")]
    pub save_model_dir: PathBuf,

    /// Save an `iter_epoch_<n>` checkpoint every N epochs
    #[serde(default = "default_save_epoch_step")]
    pub save_epoch_step: usize,

    /// Evaluation schedule
    #[serde(default)]
    pub eval_batch_step: EvalBatchStep,

    /// Decode and score training batches when logging
    #[serde(default, deserialize_with = "lenient_bool")]
    pub cal_metric_during_train: bool,

    /// Weights-only initialisation prefix
    #[serde(default)]
    pub pretrained_model: Option<PathBuf>,

    /// Full resume prefix (weights, optimizer state, training states)
    #[serde(default)]
    pub checkpoints: Option<PathBuf>,

    /// Emit scalars to a visualisation writer
    #[serde(default, deserialize_with = "lenient_bool")]
    pub use_visualdl: bool,

    /// Character dictionary, one symbol per line
    #[serde(default)]
    pub character_dict_path: Option<PathBuf>,

    /// Longest label the recognition heads decode
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,

    /// Append a space symbol to the dictionary
    #[serde(default, deserialize_with = "lenient_bool")]
    pub use_space_char: bool,

    /// Initialise a process group before building components
    #[serde(default, deserialize_with = "lenient_bool")]
    pub distributed: bool,

    /// Seed for every random stream
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Profile instead of training when set
    #[serde(default)]
    pub profiler_options: Option<String>,

    /// Synchronise batch-norm statistics across ranks
    #[serde(default, deserialize_with = "lenient_bool")]
    pub use_sync_bn: bool,

    /// Class labels for direction classification
    #[serde(default = "default_label_list")]
    pub label_list: Vec<String>,
}

fn default_log_smooth_window() -> usize {
    20
}

fn default_print_batch_step() -> usize {
    10
}

fn default_save_model_dir() -> PathBuf {
    PathBuf::from("./output/")
}

fn default_save_epoch_step() -> usize {
    1
}

fn default_max_text_length() -> usize {
    25
}

fn default_seed() -> u64 {
    2022
}

fn default_label_list() -> Vec<String> {
    vec!["0".to_string(), "180".to_string()]
}

impl GlobalConfig {
    /// Minimal valid global section, mostly for tests and tooling.
    pub fn with_epochs(epoch_num: usize) -> Self {
        Self {
            use_gpu: false,
            epoch_num,
            log_smooth_window: default_log_smooth_window(),
            print_batch_step: default_print_batch_step(),
            save_model_dir: default_save_model_dir(),
            save_epoch_step: default_save_epoch_step(),
            eval_batch_step: EvalBatchStep::default(),
            cal_metric_during_train: false,
            pretrained_model: None,
            checkpoints: None,
            use_visualdl: false,
            character_dict_path: None,
            max_text_length: default_max_text_length(),
            use_space_char: false,
            distributed: false,
            seed: default_seed(),
            profiler_options: None,
            use_sync_bn: false,
            label_list: default_label_list(),
        }
    }

    /// Reject values that would stall or divide by zero later.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("Global.epoch_num", self.epoch_num),
            ("Global.log_smooth_window", self.log_smooth_window),
            ("Global.print_batch_step", self.print_batch_step),
            ("Global.save_epoch_step", self.save_epoch_step),
            ("Global.max_text_length", self.max_text_length),
        ];
        for (path, value) in positive {
            if value == 0 {
                return Err(Error::config(path, "must be greater than zero"));
            }
        }
        if self.eval_batch_step.interval == 0 {
            return Err(Error::config("Global.eval_batch_step", "interval must be greater than zero"));
        }
        if self.label_list.is_empty() {
            return Err(Error::config("Global.label_list", "must not be empty"));
        }
        Ok(())
    }
}

/// `[start, interval]` evaluation schedule; a bare integer means `[0, n]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalBatchStep {
    pub start: usize,
    pub interval: usize,
}

impl EvalBatchStep {
    /// Whether evaluation runs after `global_step` training steps.
    pub fn is_due(&self, global_step: usize) -> bool {
        global_step > self.start && (global_step - self.start) % self.interval == 0
    }
}

impl Default for EvalBatchStep {
    fn default() -> Self {
        Self { start: 0, interval: 2000 }
    }
}

impl Serialize for EvalBatchStep {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        [self.start, self.interval].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EvalBatchStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let values: Vec<usize> = one_or_many(deserializer)?;
        match values.as_slice() {
            [interval] => Ok(Self { start: 0, interval: *interval }),
            [start, interval] => Ok(Self { start: *start, interval: *interval }),
            other => Err(serde::de::Error::custom(format!(
                "expected an integer or [start, interval], got {} values",
                other.len()
            ))),
        }
    }
}

// ============================================================================
// Train / Eval
// ============================================================================

/// A `Train` or `Eval` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSection {
    pub dataset: DatasetSpec,
    pub loader: LoaderSpec,
}

/// Dataset variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum DatasetSpec {
    /// Plain-text label files: `<image path><delimiter><label>` per line
    SimpleDataSet(SimpleDataSetParams),
}

/// Parameters of [`DatasetSpec::SimpleDataSet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleDataSetParams {
    /// Root that image paths in label files are relative to
    pub data_dir: PathBuf,

    /// Label files to read
    #[serde(deserialize_with = "one_or_many")]
    pub label_file_list: Vec<PathBuf>,

    /// Fraction of each label file to sample; one value applies to all files
    #[serde(default, deserialize_with = "one_or_many")]
    pub ratio_list: Vec<f32>,

    /// Separator between image path and label
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Image transforms, carried through for the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transforms: Option<serde_yaml::Value>,
}

fn default_delimiter() -> String {
    "\t".to_string()
}

impl SimpleDataSetParams {
    /// One ratio per label file.
    pub fn ratios(&self, path: &str) -> Result<Vec<f32>> {
        let n = self.label_file_list.len();
        let ratios = match self.ratio_list.as_slice() {
            [] => vec![1.0; n],
            [r] => vec![*r; n],
            list if list.len() == n => list.to_vec(),
            list => {
                return Err(Error::config(
                    format!("{path}.ratio_list"),
                    format!("has {} entries for {n} label files", list.len()),
                ))
            }
        };
        if let Some(bad) = ratios.iter().find(|r| !(**r > 0.0 && **r <= 1.0)) {
            return Err(Error::config(
                format!("{path}.ratio_list"),
                format!("ratio {bad} is outside (0, 1]"),
            ));
        }
        Ok(ratios)
    }
}

/// Batching behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderSpec {
    /// Samples per batch on each rank
    pub batch_size_per_card: usize,

    /// Reshuffle every epoch
    #[serde(default, deserialize_with = "lenient_bool")]
    pub shuffle: bool,

    /// Drop the trailing partial batch
    #[serde(default, deserialize_with = "lenient_bool")]
    pub drop_last: bool,

    /// Accepted for compatibility; batches are produced on the calling thread
    #[serde(default)]
    pub num_workers: usize,
}

// ============================================================================
// PostProcess
// ============================================================================

/// Dictionary overrides; unset fields fall back to `Global`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharsetParams {
    pub character_dict_path: Option<PathBuf>,
    pub use_space_char: Option<bool>,
}

/// Parameters of the distillation decoders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistillationDecodeParams {
    #[serde(default)]
    pub character_dict_path: Option<PathBuf>,
    #[serde(default)]
    pub use_space_char: Option<bool>,
    /// Sub-models whose outputs are decoded
    #[serde(default = "default_model_names", deserialize_with = "one_or_many")]
    pub model_name: Vec<String>,
    /// Output key of each sub-model, when it returns several
    #[serde(default)]
    pub key: Option<String>,
}

fn default_model_names() -> Vec<String> {
    vec!["Student".to_string()]
}

impl DistillationDecodeParams {
    /// Dictionary overrides of this decoder.
    pub fn charset(&self) -> CharsetParams {
        CharsetParams {
            character_dict_path: self.character_dict_path.clone(),
            use_space_char: self.use_space_char,
        }
    }
}

/// Parameters of the direction classifier post-processor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClsParams {
    pub label_list: Option<Vec<String>>,
}

/// Post-processor variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum PostProcessSpec {
    #[serde(rename = "CTCLabelDecode")]
    CtcLabelDecode(CharsetParams),
    /// CTC decoding for heads whose alphabet reserves two extra slots
    #[serde(rename = "CTCLoss")]
    CtcLoss(CharsetParams),
    #[serde(rename = "DistillationCTCLabelDecode")]
    DistillationCtcLabelDecode(DistillationDecodeParams),
    /// Distillation CTC decoding for heads that reserve two extra slots
    #[serde(rename = "DistillationCTCLoss")]
    DistillationCtcLoss(DistillationDecodeParams),
    #[serde(rename = "AttnLabelDecode")]
    AttnLabelDecode(CharsetParams),
    #[serde(rename = "SARLabelDecode")]
    SarLabelDecode(CharsetParams),
    #[serde(rename = "ClsPostProcess")]
    ClsPostProcess(ClsParams),
}

impl PostProcessSpec {
    /// The declared variant name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CtcLabelDecode(_) => "CTCLabelDecode",
            Self::CtcLoss(_) => "CTCLoss",
            Self::DistillationCtcLabelDecode(_) => "DistillationCTCLabelDecode",
            Self::DistillationCtcLoss(_) => "DistillationCTCLoss",
            Self::AttnLabelDecode(_) => "AttnLabelDecode",
            Self::SarLabelDecode(_) => "SARLabelDecode",
            Self::ClsPostProcess(_) => "ClsPostProcess",
        }
    }
}

// ============================================================================
// Loss
// ============================================================================

/// Parameters of the CTC loss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CtcLossParams {
    #[serde(deserialize_with = "lenient_bool")]
    pub use_focal_loss: bool,
}

/// One entry of a multi-head loss list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MultiLossTerm {
    #[serde(rename = "CTCLoss")]
    Ctc(Option<CtcLossParams>),
    #[serde(rename = "SARLoss")]
    Sar(Option<serde_yaml::Mapping>),
    #[serde(rename = "NRTRLoss")]
    Nrtr(Option<serde_yaml::Mapping>),
}

/// Parameters of the multi-head loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiLossParams {
    pub loss_config_list: Vec<MultiLossTerm>,
}

/// Supervised CTC term applied to distillation sub-models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistillationCtcTerm {
    #[serde(default = "default_weight")]
    pub weight: f32,
    #[serde(deserialize_with = "one_or_many")]
    pub model_name_list: Vec<String>,
    #[serde(default)]
    pub key: Option<String>,
}

/// L2 distance between the outputs of two sub-models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistillationDistanceTerm {
    #[serde(default = "default_weight")]
    pub weight: f32,
    pub model_name_pairs: Vec<(String, String)>,
    #[serde(default)]
    pub key: Option<String>,
}

fn default_weight() -> f32 {
    1.0
}

/// One entry of a distillation loss list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DistillationLossTerm {
    DistillationCTCLoss(DistillationCtcTerm),
    DistillationDistanceLoss(DistillationDistanceTerm),
}

/// Parameters of the combined distillation loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedLossParams {
    pub loss_config_list: Vec<DistillationLossTerm>,
}

/// Parameters of the direction classifier loss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClsLossParams {}

/// Loss variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum LossSpec {
    CTCLoss(CtcLossParams),
    MultiLoss(MultiLossParams),
    ClsLoss(ClsLossParams),
    CombinedLoss(CombinedLossParams),
}

impl LossSpec {
    /// The declared variant name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CTCLoss(_) => "CTCLoss",
            Self::MultiLoss(_) => "MultiLoss",
            Self::ClsLoss(_) => "ClsLoss",
            Self::CombinedLoss(_) => "CombinedLoss",
        }
    }
}

// ============================================================================
// Optimizer
// ============================================================================

/// The `Optimizer` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSpec {
    #[serde(flatten)]
    pub kind: OptimizerKind,

    #[serde(default)]
    pub lr: LrSpec,

    #[serde(default)]
    pub regularizer: Option<RegularizerSpec>,

    /// Clip gradients to this global L2 norm
    #[serde(default)]
    pub clip_norm: Option<f32>,
}

/// Optimizer variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum OptimizerKind {
    SGD {},
    Momentum {
        #[serde(default = "default_momentum")]
        momentum: f32,
    },
    Adam {
        #[serde(default = "default_beta1")]
        beta1: f32,
        #[serde(default = "default_beta2")]
        beta2: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
    AdamW {
        #[serde(default = "default_beta1")]
        beta1: f32,
        #[serde(default = "default_beta2")]
        beta2: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
        #[serde(default = "default_weight_decay")]
        weight_decay: f32,
    },
}

fn default_momentum() -> f32 {
    0.9
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_epsilon() -> f32 {
    1e-8
}

fn default_weight_decay() -> f32 {
    0.01
}

/// Weight regularisation added to gradients before the update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum RegularizerSpec {
    L1 { factor: f32 },
    L2 { factor: f32 },
}

/// Learning-rate schedules; warm-up is measured in epochs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum LrSpec {
    Const {
        learning_rate: f32,
        #[serde(default)]
        warmup_epoch: f32,
    },
    Cosine {
        learning_rate: f32,
        #[serde(default)]
        warmup_epoch: f32,
    },
    Piecewise {
        decay_epochs: Vec<usize>,
        values: Vec<f32>,
        #[serde(default)]
        warmup_epoch: f32,
    },
    Linear {
        learning_rate: f32,
        #[serde(default)]
        end_lr: f32,
        #[serde(default)]
        warmup_epoch: f32,
    },
}

impl Default for LrSpec {
    fn default() -> Self {
        Self::Const { learning_rate: 0.001, warmup_epoch: 0.0 }
    }
}

// ============================================================================
// Metric
// ============================================================================

/// Parameters of the recognition metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecMetricParams {
    #[serde(default = "default_main_indicator")]
    pub main_indicator: String,
    #[serde(default = "default_true", deserialize_with = "lenient_bool")]
    pub ignore_space: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_filter: bool,
}

impl Default for RecMetricParams {
    fn default() -> Self {
        Self { main_indicator: default_main_indicator(), ignore_space: true, is_filter: false }
    }
}

/// Parameters of the classification metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClsMetricParams {
    #[serde(default = "default_main_indicator")]
    pub main_indicator: String,
}

/// Metric a distillation metric delegates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseMetricName {
    RecMetric,
    ClsMetric,
}

/// Parameters of the distillation metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistillationMetricParams {
    pub base_metric_name: BaseMetricName,
    #[serde(default = "default_main_indicator")]
    pub main_indicator: String,
    /// Sub-model whose decoded output is scored
    pub key: String,
    #[serde(default = "default_true", deserialize_with = "lenient_bool")]
    pub ignore_space: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_filter: bool,
}

fn default_main_indicator() -> String {
    "acc".to_string()
}

fn default_true() -> bool {
    true
}

/// Metric variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum MetricSpec {
    RecMetric(RecMetricParams),
    ClsMetric(ClsMetricParams),
    DistillationMetric(DistillationMetricParams),
}
