//! Orchestration: build every component in dependency order, restore
//! checkpoints and hand a ready engine back.

use crate::backend::Backend;
use crate::checkpoint;
use crate::config::{ArchitectureSpec, ConfigTree, GlobalConfig, LossSpec, MetricSpec, OptimizerSpec, PostProcessSpec};
use crate::data::Mode;
use crate::device::Device;
use crate::distributed;
use crate::engine::{
    CallbackManager, Engine, EngineParts, ProfilerOptions, ProgressLogger, RunSummary, ScalarLogger, ScalarWriter,
};
use crate::error::{BuildStage, Error, Result};
use crate::factory::{self, BuildContext};
use crate::postprocess::PostProcessor;
use crate::reconcile::{self, ReconciledArchitecture};
use crate::seed::SeedSource;
use std::path::PathBuf;
use tracing::{info, warn};

/// Name of the resolved configuration written next to checkpoints.
pub const RESOLVED_CONFIG: &str = "config.yml";

/// Collaborators supplied by the caller.
pub struct RunContext {
    pub backend: Box<dyn Backend>,
    /// Receives training curves on rank 0
    pub writer: Option<Box<dyn ScalarWriter>>,
}

impl RunContext {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self { backend, writer: None }
    }

    pub fn with_writer(mut self, writer: Box<dyn ScalarWriter>) -> Self {
        self.writer = Some(writer);
        self
    }
}

fn stage<T>(stage: BuildStage, build: impl FnOnce() -> Result<T>) -> Result<T> {
    build().map_err(|e| e.in_stage(stage))
}

fn post_process(config: &ConfigTree, global: &GlobalConfig) -> Result<Box<dyn PostProcessor>> {
    let spec: PostProcessSpec = config.parse_section("PostProcess")?;
    factory::build_post_process(&spec, global)
}

fn reconcile_architecture(config: &ConfigTree, post_process: &dyn PostProcessor) -> Result<ReconciledArchitecture> {
    let spec = ArchitectureSpec::from_value(config.require_section("Architecture")?)?;
    reconcile::reconcile(spec, post_process)
}

/// Build the post-processor and reconcile the architecture, without
/// building a model.
pub fn check(config: &ConfigTree) -> Result<ReconciledArchitecture> {
    let global = config.global()?;
    let post = stage(BuildStage::PostProcess, || post_process(config, &global))?;
    stage(BuildStage::Reconcile, || reconcile_architecture(config, post.as_ref()))
}

/// Build every component and return an engine in the `Ready` state.
pub fn prepare(config: ConfigTree, ctx: RunContext) -> Result<Engine> {
    let global = config.global()?;
    for section in config.unknown_sections() {
        warn!(section = %section, "ignoring unknown configuration section");
    }

    let seeds = SeedSource::new(global.seed);
    let collective = stage(BuildStage::Distributed, || distributed::init(&global))?;
    let group = collective.info();
    let device = Device::resolve(global.use_gpu, group.rank);
    info!(rank = group.rank, world_size = group.world_size, device = %device, "process group ready");

    let build = BuildContext { global: &global, group, seeds, device };

    let train_loader = stage(BuildStage::TrainData, || {
        factory::build_dataloader(&config, Mode::Train, &build)?
            .ok_or_else(|| Error::config("Train", "required section is missing"))
    })?;
    let eval_loader = stage(BuildStage::EvalData, || factory::build_dataloader(&config, Mode::Eval, &build))?;

    let post = stage(BuildStage::PostProcess, || post_process(&config, &global))?;
    let architecture = stage(BuildStage::Reconcile, || reconcile_architecture(&config, post.as_ref()))?;

    let mut model = stage(BuildStage::Model, || factory::build_model(&architecture, ctx.backend.as_ref(), &build))?;
    let loss = stage(BuildStage::Loss, || {
        let spec: LossSpec = config.parse_section("Loss")?;
        factory::build_loss(&spec, post.vocabulary(), ctx.backend.as_ref(), &build)
    })?;
    let (mut optimizer, scheduler) = stage(BuildStage::Optimizer, || {
        let spec: OptimizerSpec = config.parse_section("Optimizer")?;
        factory::build_optimizer(&spec, global.epoch_num, train_loader.len(), collective)
    })?;
    let metric = stage(BuildStage::Metric, || {
        let spec: MetricSpec = config.parse_section("Metric")?;
        factory::build_metric(&spec)
    })?;

    let restored = stage(BuildStage::Checkpoint, || {
        checkpoint::restore(&global, model.as_mut(), optimizer.as_mut())
    })?;

    let profiler = global.profiler_options.as_deref().map(str::parse::<ProfilerOptions>).transpose()?;

    let mut callbacks = CallbackManager::new();
    callbacks.add(ProgressLogger::new(global.print_batch_step));
    if let Some(writer) = ctx.writer {
        if group.is_master() {
            callbacks.add(ScalarLogger::new(writer));
        }
    }

    let resolved = config.with_section("Architecture", architecture.spec().to_value());
    let save_dir = global.save_model_dir.clone();

    let mut engine = Engine::new(EngineParts {
        global,
        group,
        train_loader,
        eval_loader,
        post_process: post,
        model,
        loss,
        optimizer,
        scheduler,
        metric,
        profiler,
        callbacks,
    });
    engine.ready(restored)?;

    if group.is_master() {
        let path = write_resolved_config(&resolved, save_dir)?;
        info!(path = %path.display(), "wrote resolved configuration");
    }
    Ok(engine)
}

fn write_resolved_config(config: &ConfigTree, dir: PathBuf) -> Result<PathBuf> {
    std::fs::create_dir_all(&dir).map_err(|e| Error::io(format!("creating {}", dir.display()), e))?;
    let path = dir.join(RESOLVED_CONFIG);
    std::fs::write(&path, config.to_yaml()?).map_err(|e| Error::io(format!("writing {}", path.display()), e))?;
    Ok(path)
}

/// Prepare and run in the mode selected by the configuration.
pub fn run(config: ConfigTree, ctx: RunContext) -> Result<RunSummary> {
    let mut engine = prepare(config, ctx)?;
    engine.run()
}
