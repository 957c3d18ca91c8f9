//! Engine events and the observers that consume them
//!
//! - `EngineCallback` - the trait all observers implement
//! - `CallbackManager` - dispatches events in registration order
//! - `ProgressLogger` - periodic log lines
//! - `ScalarLogger` - forwards statistics to a [`ScalarWriter`]

use super::ScalarWriter;
use crate::metric::MetricValues;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Training position and statistics passed to callbacks
#[derive(Clone, Debug, Default)]
pub struct CallbackContext {
    /// Current epoch (1-indexed)
    pub epoch: usize,
    pub epoch_num: usize,
    /// Step within the epoch (1-indexed)
    pub step: usize,
    pub steps_per_epoch: usize,
    pub global_step: usize,
    pub lr: f32,
    /// Windowed means of loss terms, lr and train-time metrics
    pub stats: BTreeMap<String, f64>,
    /// Mean wall time per step over the current logging interval
    pub avg_batch_cost: f64,
    pub avg_samples_per_sec: f64,
    /// Values of the most recent evaluation
    pub eval: Option<MetricValues>,
    /// Best record so far, formatted for logs
    pub best: Option<String>,
}

/// Trait for engine observers
///
/// All methods default to no-ops.
pub trait EngineCallback: Send {
    fn on_train_begin(&mut self, _ctx: &CallbackContext) {}

    fn on_train_end(&mut self, _ctx: &CallbackContext) {}

    fn on_epoch_begin(&mut self, _ctx: &CallbackContext) {}

    fn on_epoch_end(&mut self, _ctx: &CallbackContext) {}

    fn on_step_end(&mut self, _ctx: &CallbackContext) {}

    fn on_validation(&mut self, _ctx: &CallbackContext) {}

    fn name(&self) -> &'static str {
        "EngineCallback"
    }
}

/// Manages multiple callbacks and dispatches events
#[derive(Default)]
pub struct CallbackManager {
    callbacks: Vec<Box<dyn EngineCallback>>,
}

impl CallbackManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<C: EngineCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn on_train_begin(&mut self, ctx: &CallbackContext) {
        self.callbacks.iter_mut().for_each(|cb| cb.on_train_begin(ctx));
    }

    pub fn on_train_end(&mut self, ctx: &CallbackContext) {
        self.callbacks.iter_mut().for_each(|cb| cb.on_train_end(ctx));
    }

    pub fn on_epoch_begin(&mut self, ctx: &CallbackContext) {
        self.callbacks.iter_mut().for_each(|cb| cb.on_epoch_begin(ctx));
    }

    pub fn on_epoch_end(&mut self, ctx: &CallbackContext) {
        self.callbacks.iter_mut().for_each(|cb| cb.on_epoch_end(ctx));
    }

    pub fn on_step_end(&mut self, ctx: &CallbackContext) {
        self.callbacks.iter_mut().for_each(|cb| cb.on_step_end(ctx));
    }

    pub fn on_validation(&mut self, ctx: &CallbackContext) {
        self.callbacks.iter_mut().for_each(|cb| cb.on_validation(ctx));
    }
}

/// Logs smoothed statistics every `log_interval` steps and at epoch end
#[derive(Clone, Debug)]
pub struct ProgressLogger {
    log_interval: usize,
}

impl ProgressLogger {
    pub fn new(log_interval: usize) -> Self {
        Self { log_interval: log_interval.max(1) }
    }

    fn format_stats(stats: &BTreeMap<String, f64>) -> String {
        stats.iter().map(|(k, v)| format!("{k}: {v:.6}")).collect::<Vec<_>>().join(", ")
    }
}

impl EngineCallback for ProgressLogger {
    fn on_epoch_begin(&mut self, ctx: &CallbackContext) {
        info!(epoch = ctx.epoch, epoch_num = ctx.epoch_num, steps = ctx.steps_per_epoch, "epoch starting");
    }

    fn on_step_end(&mut self, ctx: &CallbackContext) {
        let last_in_epoch = ctx.step == ctx.steps_per_epoch;
        if ctx.global_step % self.log_interval != 0 && !last_in_epoch {
            return;
        }
        info!(
            "epoch: [{}/{}], global_step: {}, {}, avg_batch_cost: {:.5} s, avg_samples/s: {:.2}",
            ctx.epoch,
            ctx.epoch_num,
            ctx.global_step,
            Self::format_stats(&ctx.stats),
            ctx.avg_batch_cost,
            ctx.avg_samples_per_sec,
        );
    }

    fn on_validation(&mut self, ctx: &CallbackContext) {
        if let Some(eval) = &ctx.eval {
            info!("cur metric, {}", Self::format_stats(eval));
        }
        if let Some(best) = &ctx.best {
            info!("best metric, {best}");
        }
    }

    fn on_train_end(&mut self, ctx: &CallbackContext) {
        match &ctx.best {
            Some(best) if !best.is_empty() => info!("training finished, best metric, {best}"),
            _ => info!(global_step = ctx.global_step, "training finished"),
        }
    }

    fn name(&self) -> &'static str {
        "ProgressLogger"
    }
}

/// Forwards `TRAIN/*` statistics every step and `EVAL/*` values after each
/// evaluation.
pub struct ScalarLogger {
    writer: Box<dyn ScalarWriter>,
}

impl ScalarLogger {
    pub fn new(writer: Box<dyn ScalarWriter>) -> Self {
        Self { writer }
    }

    fn write_all(&mut self, prefix: &str, values: &BTreeMap<String, f64>, step: usize) {
        for (name, value) in values {
            if let Err(e) = self.writer.add_scalar(&format!("{prefix}/{name}"), *value, step) {
                warn!(error = %e, "scalar writer failed");
                return;
            }
        }
    }
}

impl EngineCallback for ScalarLogger {
    fn on_step_end(&mut self, ctx: &CallbackContext) {
        self.write_all("TRAIN", &ctx.stats, ctx.global_step);
    }

    fn on_validation(&mut self, ctx: &CallbackContext) {
        if let Some(eval) = &ctx.eval {
            self.write_all("EVAL", eval, ctx.global_step);
        }
    }

    fn on_train_end(&mut self, _ctx: &CallbackContext) {
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "scalar writer flush failed");
        }
    }

    fn name(&self) -> &'static str {
        "ScalarLogger"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorded(Arc<Mutex<Vec<(String, f64, usize)>>>);

    impl ScalarWriter for Recorded {
        fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
            self.0.lock().unwrap().push((tag.to_string(), value, step));
            Ok(())
        }
    }

    #[test]
    fn test_scalar_logger_prefixes() {
        let recorded = Recorded::default();
        let mut manager = CallbackManager::new();
        manager.add(ScalarLogger::new(Box::new(recorded.clone())));
        manager.add(ProgressLogger::new(1));
        assert_eq!(manager.len(), 2);

        let mut ctx = CallbackContext { global_step: 3, ..Default::default() };
        ctx.stats.insert("loss".into(), 0.5);
        manager.on_step_end(&ctx);
        ctx.eval = Some(MetricValues::from([("acc".to_string(), 0.9)]));
        manager.on_validation(&ctx);

        let points = recorded.0.lock().unwrap().clone();
        assert_eq!(
            points,
            vec![("TRAIN/loss".to_string(), 0.5, 3), ("EVAL/acc".to_string(), 0.9, 3)]
        );
    }

    #[test]
    fn test_default_callback_is_noop() {
        struct Minimal;
        impl EngineCallback for Minimal {}

        let mut cb = Minimal;
        let ctx = CallbackContext::default();
        cb.on_train_begin(&ctx);
        cb.on_step_end(&ctx);
        cb.on_train_end(&ctx);
        assert_eq!(cb.name(), "EngineCallback");
    }
}
