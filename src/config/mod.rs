//! Training configuration
//!
//! The document is loaded once into an immutable [`ConfigTree`]. Builders
//! deserialize only their own section, when they run.

mod architecture;
mod schema;
mod tree;

pub use architecture::{
    ArchitectureSpec, DistillationSpec, HeadSpec, ModelSpec, MultiHeadSpec, PlainHeadSpec,
    SubHead, CTC_BRANCH, DISTILLATION, MULTI_HEAD,
};
pub use schema::{
    BaseMetricName, CharsetParams, ClsLossParams, ClsMetricParams, ClsParams, CombinedLossParams,
    CtcLossParams, DataSection, DatasetSpec, DistillationCtcTerm, DistillationDecodeParams,
    DistillationDistanceTerm, DistillationLossTerm, DistillationMetricParams, EvalBatchStep,
    GlobalConfig, LoaderSpec, LossSpec, LrSpec, MetricSpec, MultiLossParams, MultiLossTerm,
    OptimizerKind, OptimizerSpec, PostProcessSpec, RecMetricParams, RegularizerSpec,
    SimpleDataSetParams,
};
pub use tree::{from_value, load_config, ConfigTree, Override, SECTIONS};
