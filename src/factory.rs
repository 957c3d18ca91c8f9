//! Component builders
//!
//! Each builder reads its own typed spec and the components it depends on,
//! and fails with a `Config` error naming the offending key.

use crate::backend::{Backend, LossBuildContext, ModelBuildContext};
use crate::config::{ConfigTree, DataSection, DatasetSpec, GlobalConfig, LossSpec, OptimizerSpec, PostProcessSpec};
use crate::data::{DataLoader, Mode, SimpleDataSet};
use crate::device::Device;
use crate::distributed::{Collective, ProcessGroupInfo};
use crate::error::{Error, Result};
use crate::loss::Loss;
use crate::model::Model;
use crate::optim::{self, DistributedOptimizer, LRScheduler, Optimizer};
use crate::postprocess::{
    load_characters, ClsPostProcess, DistillationDecode, LabelDecode, PostProcessor, Vocabulary,
    VocabularyKind,
};
use crate::reconcile::ReconciledArchitecture;
use crate::seed::{RngStream, SeedSource};
use tracing::info;

pub use crate::metric::build_metric;

/// Shared inputs of every builder.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub global: &'a GlobalConfig,
    pub group: ProcessGroupInfo,
    pub seeds: SeedSource,
    pub device: Device,
}

/// Build the loader for `mode`.
///
/// `Eval` may be absent, giving `None`. Training data is sharded across
/// ranks; evaluation data is read whole on the rank that evaluates.
pub fn build_dataloader(config: &ConfigTree, mode: Mode, ctx: &BuildContext<'_>) -> Result<Option<DataLoader>> {
    let section = mode.section();
    if mode == Mode::Eval && config.section(section).is_none() {
        info!("no Eval section, evaluation disabled");
        return Ok(None);
    }
    let data: DataSection = config.parse_section(section)?;
    let DatasetSpec::SimpleDataSet(params) = &data.dataset;
    let mut rng = ctx.seeds.rng(RngStream::DatasetSampling);
    let dataset = SimpleDataSet::load(params, &format!("{section}.dataset"), &mut rng)?;

    if data.loader.batch_size_per_card == 0 {
        return Err(Error::config(format!("{section}.loader.batch_size_per_card"), "must be greater than zero"));
    }
    let group = match mode {
        Mode::Train => ctx.group,
        Mode::Eval => ProcessGroupInfo::single(),
    };
    let loader = DataLoader::new(dataset, &data.loader, group, ctx.seeds);
    info!(
        mode = section,
        samples = loader.dataset().len(),
        batches = loader.len(),
        rank = group.rank,
        "built dataloader"
    );
    if mode == Mode::Train && loader.is_empty() {
        return Err(Error::config(
            format!("{section}.dataset.label_file_list"),
            "yields no training batches for this rank",
        ));
    }
    Ok(Some(loader))
}

/// Build the post-processor, resolving its character set.
pub fn build_post_process(spec: &PostProcessSpec, global: &GlobalConfig) -> Result<Box<dyn PostProcessor>> {
    let built: Box<dyn PostProcessor> = match spec {
        PostProcessSpec::CtcLabelDecode(charset) | PostProcessSpec::CtcLoss(charset) => {
            let vocab = Vocabulary::new(VocabularyKind::Ctc, load_characters(charset, global)?);
            Box::new(LabelDecode::new(spec.name(), vocab))
        }
        PostProcessSpec::AttnLabelDecode(charset) => {
            let vocab = Vocabulary::new(VocabularyKind::Attention, load_characters(charset, global)?);
            Box::new(LabelDecode::new(spec.name(), vocab))
        }
        PostProcessSpec::SarLabelDecode(charset) => {
            let vocab = Vocabulary::new(VocabularyKind::Sar, load_characters(charset, global)?);
            Box::new(LabelDecode::new(spec.name(), vocab))
        }
        PostProcessSpec::DistillationCtcLabelDecode(params) | PostProcessSpec::DistillationCtcLoss(params) => {
            if params.model_name.is_empty() {
                return Err(Error::config("PostProcess.model_name", "must name at least one sub-model"));
            }
            let vocab = Vocabulary::new(VocabularyKind::Ctc, load_characters(&params.charset(), global)?);
            Box::new(DistillationDecode::new(spec.name(), vocab, params.model_name.clone()))
        }
        PostProcessSpec::ClsPostProcess(params) => {
            let labels = params.label_list.clone().unwrap_or_else(|| global.label_list.clone());
            if labels.is_empty() {
                return Err(Error::config("PostProcess.label_list", "must not be empty"));
            }
            Box::new(ClsPostProcess::new(labels))
        }
    };
    info!(
        name = built.name(),
        vocabulary = built.vocabulary().map(Vocabulary::len),
        "built post-process"
    );
    Ok(built)
}

/// Build the model from a reconciled descriptor only.
pub fn build_model(
    architecture: &ReconciledArchitecture,
    backend: &dyn Backend,
    ctx: &BuildContext<'_>,
) -> Result<Box<dyn Model>> {
    if ctx.global.use_sync_bn {
        info!("synchronised batch norm requested");
    }
    let model_ctx = ModelBuildContext {
        global: ctx.global,
        device: ctx.device,
        seeds: ctx.seeds,
        sync_batch_norm: ctx.global.use_sync_bn && ctx.group.world_size > 1,
    };
    let model = backend.build_model(architecture, &model_ctx)?;
    info!(backend = backend.name(), parameters = model.parameters().numel(), "built model");
    Ok(model)
}

/// Build the loss; recognition losses encode labels with `vocabulary`.
pub fn build_loss(
    spec: &LossSpec,
    vocabulary: Option<&Vocabulary>,
    backend: &dyn Backend,
    ctx: &BuildContext<'_>,
) -> Result<Box<dyn Loss>> {
    let loss = backend.build_loss(spec, &LossBuildContext { global: ctx.global, vocabulary })?;
    info!(name = loss.name(), "built loss");
    Ok(loss)
}

/// Build the optimizer and its per-iteration schedule.
///
/// With more than one rank the optimizer averages gradients through
/// `collective` before every update.
pub fn build_optimizer(
    spec: &OptimizerSpec,
    epochs: usize,
    step_each_epoch: usize,
    collective: Box<dyn Collective>,
) -> Result<(Box<dyn Optimizer>, Box<dyn LRScheduler>)> {
    let scheduler = optim::build_scheduler(&spec.lr, epochs, step_each_epoch)?;
    let mut optimizer = optim::build_optimizer(spec)?;
    optimizer.set_lr(scheduler.get_lr());
    if collective.info().world_size > 1 {
        optimizer = Box::new(DistributedOptimizer::new(optimizer, collective));
    }
    info!(name = optimizer.name(), lr = optimizer.lr(), step_each_epoch, "built optimizer");
    Ok((optimizer, scheduler))
}
