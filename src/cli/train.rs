//! `ocrtrain train`

use super::ConfigArgs;
use crate::backend::ReferenceBackend;
use crate::config::load_config;
use crate::engine::JsonlScalarWriter;
use crate::error::Result;
use crate::pipeline::{self, RunContext};
use ocrtrain_common::cli::styles;

pub fn run_train(args: ConfigArgs, quiet: bool) -> Result<()> {
    let config = load_config(&args.config)?.with_overrides(&args.overrides)?;
    let global = config.global()?;

    let mut ctx = RunContext::new(Box::new(ReferenceBackend::new()));
    if global.use_visualdl {
        ctx = ctx.with_writer(Box::new(JsonlScalarWriter::create(&global.save_model_dir.join("vdl"))?));
    }

    let summary = pipeline::run(config, ctx)?;
    if !quiet {
        let line = match &summary.profile {
            Some(report) => format!("Profiled {} steps", report.steps),
            None if summary.best.is_empty() => format!("Training complete at global step {}", summary.global_step),
            None => format!("Training complete, best metric: {}", summary.best.summary()),
        };
        println!("{}", styles::success(&line));
    }
    Ok(())
}
