//! The training engine

use super::{
    CallbackContext, CallbackManager, EngineState, Phase, PhaseTimer, ProfileReport, ProfilerOptions,
    SmoothedStats,
};
use crate::checkpoint::{self, BestMetricRecord, CheckpointPaths, Restored, TrainingStates};
use crate::config::GlobalConfig;
use crate::data::{Batch, DataLoader};
use crate::distributed::ProcessGroupInfo;
use crate::error::Result;
use crate::loss::Loss;
use crate::metric::{Metric, MetricValues};
use crate::model::Model;
use crate::optim::{LRScheduler, Optimizer};
use crate::postprocess::PostProcessor;
use std::time::Instant;
use tracing::{debug, info};

const LATEST: &str = "latest";
const BEST: &str = "best_accuracy";

/// Everything the engine drives, built by the pipeline in dependency order.
pub struct EngineParts {
    pub global: GlobalConfig,
    pub group: ProcessGroupInfo,
    pub train_loader: DataLoader,
    pub eval_loader: Option<DataLoader>,
    pub post_process: Box<dyn PostProcessor>,
    pub model: Box<dyn Model>,
    pub loss: Box<dyn Loss>,
    pub optimizer: Box<dyn Optimizer>,
    pub scheduler: Box<dyn LRScheduler>,
    pub metric: Box<dyn Metric>,
    pub profiler: Option<ProfilerOptions>,
    pub callbacks: CallbackManager,
}

/// How a finished run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub state: EngineState,
    /// Last epoch entered
    pub epoch: usize,
    pub global_step: usize,
    pub best: BestMetricRecord,
    pub profile: Option<ProfileReport>,
}

/// Drives training, evaluation and profiling over built components.
pub struct Engine {
    state: EngineState,
    parts: EngineParts,
    best: BestMetricRecord,
    start_epoch: usize,
    epoch: usize,
    global_step: usize,
}

impl Engine {
    pub fn new(parts: EngineParts) -> Self {
        Self {
            state: EngineState::Constructed,
            parts,
            best: BestMetricRecord::default(),
            start_epoch: 1,
            epoch: 0,
            global_step: 0,
        }
    }

    /// Apply restored checkpoint state and move to `Ready`.
    pub fn ready(&mut self, restored: Restored) -> Result<()> {
        self.state.transition(EngineState::Ready)?;
        self.best = restored.best;
        if let Some(resume) = restored.resume {
            self.start_epoch = resume.start_epoch;
            self.global_step = resume.global_step;
            self.parts.scheduler.set_step(resume.global_step);
        }
        self.parts.optimizer.set_lr(self.parts.scheduler.get_lr());
        info!(
            start_epoch = self.start_epoch,
            epoch_num = self.parts.global.epoch_num,
            steps_per_epoch = self.parts.train_loader.len(),
            "engine ready"
        );
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn best(&self) -> &BestMetricRecord {
        &self.best
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    pub fn model(&self) -> &dyn Model {
        self.parts.model.as_ref()
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.parts.global
    }

    /// Run to completion in the mode selected by the configuration.
    pub fn run(&mut self) -> Result<RunSummary> {
        let profile = match self.parts.profiler.clone() {
            Some(options) => {
                self.state.transition(EngineState::Profiling)?;
                Some(self.guard(|engine| engine.profile(&options))?)
            }
            None => {
                self.state.transition(EngineState::Training)?;
                self.guard(Self::train)?;
                None
            }
        };
        self.state.transition(EngineState::Completed)?;
        Ok(RunSummary {
            state: self.state,
            epoch: self.epoch,
            global_step: self.global_step,
            best: self.best.clone(),
            profile,
        })
    }

    /// Move to `Failed` when `f` errors; the error is returned unchanged.
    fn guard<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let result = f(self);
        if result.is_err() && self.state.can_transition_to(EngineState::Failed) {
            self.state = EngineState::Failed;
        }
        result
    }

    fn context(&self) -> CallbackContext {
        CallbackContext {
            epoch: self.epoch,
            epoch_num: self.parts.global.epoch_num,
            steps_per_epoch: self.parts.train_loader.len(),
            global_step: self.global_step,
            lr: self.parts.optimizer.lr(),
            best: (!self.best.is_empty()).then(|| self.best.summary()),
            ..Default::default()
        }
    }

    fn train(&mut self) -> Result<()> {
        let epoch_num = self.parts.global.epoch_num;
        let mut stats = SmoothedStats::new(self.parts.global.log_smooth_window);
        let ctx = self.context();
        self.parts.callbacks.on_train_begin(&ctx);

        for epoch in self.start_epoch..=epoch_num {
            self.epoch = epoch;
            self.parts.model.train();
            let ctx = self.context();
            self.parts.callbacks.on_epoch_begin(&ctx);

            let plan = self.parts.train_loader.batch_plan(epoch);
            let mut interval_start = Instant::now();
            let mut interval = (0usize, 0usize); // steps, samples
            for (index, chunk) in plan.iter().enumerate() {
                let batch = self.parts.train_loader.batch(chunk);
                let step = self.global_step + 1;
                let values = self.train_step(&batch).map_err(|e| e.at_step(epoch, step))?;
                self.global_step = step;
                self.parts.scheduler.step();
                stats.update(values.iter().map(|(k, v)| (k.as_str(), *v)));
                interval = (interval.0 + 1, interval.1 + batch.len());

                let mut ctx = self.context();
                ctx.step = index + 1;
                ctx.stats = stats.means();
                let elapsed = interval_start.elapsed().as_secs_f64();
                ctx.avg_batch_cost = elapsed / interval.0 as f64;
                ctx.avg_samples_per_sec = if elapsed > 0.0 { interval.1 as f64 / elapsed } else { 0.0 };
                self.parts.callbacks.on_step_end(&ctx);
                if self.global_step % self.parts.global.print_batch_step.max(1) == 0 {
                    interval_start = Instant::now();
                    interval = (0, 0);
                }

                if self.parts.global.eval_batch_step.is_due(self.global_step) {
                    self.maybe_evaluate()?;
                }
            }

            if self.parts.group.is_master() {
                self.save(LATEST)?;
                let every = self.parts.global.save_epoch_step.max(1);
                if epoch % every == 0 {
                    self.save(&format!("iter_epoch_{epoch}"))?;
                }
            }
            let ctx = self.context();
            self.parts.callbacks.on_epoch_end(&ctx);
        }

        let ctx = self.context();
        self.parts.callbacks.on_train_end(&ctx);
        Ok(())
    }

    /// Forward, loss, backward and update for one batch; returns the values
    /// logged for this step.
    fn train_step(&mut self, batch: &Batch) -> Result<Vec<(String, f64)>> {
        let lr = self.parts.scheduler.get_lr();
        self.parts.optimizer.set_lr(lr);

        let preds = self.parts.model.forward(batch)?;
        let loss = self.parts.loss.compute(&preds, batch)?;
        self.parts.model.backward(&loss.grad)?;
        self.parts.optimizer.step(self.parts.model.parameters_mut())?;
        self.parts.model.parameters_mut().zero_grad();

        let mut values = vec![("loss".to_string(), f64::from(loss.loss)), ("lr".to_string(), f64::from(lr))];
        values.extend(loss.terms.iter().filter(|(k, _)| k.as_str() != "loss").map(|(k, v)| (k.clone(), f64::from(*v))));

        if self.parts.global.cal_metric_during_train {
            let decoded = self.parts.post_process.decode(&preds)?;
            let batch_values = self.parts.metric.update(&decoded, batch)?;
            self.parts.metric.reset();
            values.extend(batch_values);
        }
        Ok(values)
    }

    /// Evaluate on rank 0 when an eval loader exists, then checkpoint.
    fn maybe_evaluate(&mut self) -> Result<()> {
        if self.parts.eval_loader.is_none() || !self.parts.group.is_master() {
            return Ok(());
        }
        self.state.transition(EngineState::Evaluating)?;
        let step = self.global_step;
        let values = self.evaluate().map_err(|e| e.at_step(self.epoch, step))?;
        self.state.transition(EngineState::Training)?;

        if self.parts.metric.is_improvement(&values, &self.best.values) {
            self.best.record(values.clone(), self.epoch, step);
            self.save(BEST)?;
            info!(best = %self.best.summary(), "new best metric");
        }
        self.save(LATEST)?;

        let mut ctx = self.context();
        ctx.eval = Some(values);
        self.parts.callbacks.on_validation(&ctx);
        Ok(())
    }

    /// Metric values over the whole eval loader.
    pub fn evaluate(&mut self) -> Result<MetricValues> {
        let Some(loader) = self.parts.eval_loader.as_ref() else {
            return Ok(MetricValues::new());
        };
        let started = Instant::now();
        self.parts.model.eval();
        self.parts.metric.reset();
        let mut samples = 0;
        for batch in loader.epoch(self.epoch) {
            let preds = self.parts.model.forward(&batch)?;
            let decoded = self.parts.post_process.decode(&preds)?;
            self.parts.metric.update(&decoded, &batch)?;
            samples += batch.len();
        }
        let values = self.parts.metric.compute();
        self.parts.metric.reset();
        self.parts.model.train();
        debug!(samples, secs = started.elapsed().as_secs_f64(), "evaluation pass");
        Ok(values)
    }

    fn save(&self, name: &str) -> Result<()> {
        let paths = CheckpointPaths::in_dir(&self.parts.global.save_model_dir, name);
        let states = TrainingStates::new(self.best.clone(), self.epoch, self.global_step);
        checkpoint::save(&paths, self.parts.model.parameters(), self.parts.optimizer.as_ref(), &states)
    }

    /// Time the phases of steps inside the batch range; no evaluation and no
    /// checkpoints.
    fn profile(&mut self, options: &ProfilerOptions) -> Result<ProfileReport> {
        let mut timer = PhaseTimer::new();
        let mut step = 0;
        self.parts.model.train();
        info!(range = ?options.batch_range, "profiling training steps");

        'epochs: for epoch in self.start_epoch..=self.parts.global.epoch_num {
            self.epoch = epoch;
            for chunk in self.parts.train_loader.batch_plan(epoch) {
                if step >= options.last_step() {
                    break 'epochs;
                }
                let timed = options.contains(step);
                let fetch = Instant::now();
                let batch = self.parts.train_loader.batch(&chunk);
                if timed {
                    timer.record(Phase::Data, fetch.elapsed());
                }

                let global_step = self.global_step + 1;
                let result = if timed {
                    self.timed_step(&batch, &mut timer)
                } else {
                    self.train_step(&batch).map(|_| ())
                };
                result.map_err(|e| e.at_step(epoch, global_step))?;
                self.global_step = global_step;
                self.parts.scheduler.step();
                if timed {
                    timer.finish_step();
                }
                step += 1;
            }
        }

        let report = timer.report();
        info!("{report}");
        if let Some(path) = &options.profile_path {
            report.write(path)?;
            info!(path = %path.display(), "wrote profile summary");
        }
        Ok(report)
    }

    fn timed_step(&mut self, batch: &Batch, timer: &mut PhaseTimer) -> Result<()> {
        let parts = &mut self.parts;
        parts.optimizer.set_lr(parts.scheduler.get_lr());
        let preds = timer.time(Phase::Forward, || parts.model.forward(batch))?;
        let loss = timer.time(Phase::Loss, || parts.loss.compute(&preds, batch))?;
        timer.time(Phase::Backward, || parts.model.backward(&loss.grad))?;
        timer.time(Phase::Optimizer, || -> Result<()> {
            parts.optimizer.step(parts.model.parameters_mut())?;
            parts.model.parameters_mut().zero_grad();
            Ok(())
        })?;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("start_epoch", &self.start_epoch)
            .field("global_step", &self.global_step)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderSpec;
    use crate::data::{Sample, SimpleDataSet};
    use crate::loss::LossOutput;
    use crate::model::{Parameter, ParameterStore, Predictions};
    use crate::optim::{ConstantLR, GradientPolicy, SGD};
    use crate::postprocess::{Decoded, Vocabulary};
    use crate::seed::SeedSource;
    use ndarray::{arr1, Array3};
    use std::cell::Cell;
    use tempfile::TempDir;

    struct ConstantModel {
        params: ParameterStore,
    }

    impl Model for ConstantModel {
        fn forward(&mut self, batch: &Batch) -> Result<Predictions> {
            Ok(Predictions::Single(Array3::zeros((batch.len(), 1, 2))))
        }

        fn backward(&mut self, _grad: &Predictions) -> Result<()> {
            Ok(())
        }

        fn parameters(&self) -> &ParameterStore {
            &self.params
        }

        fn parameters_mut(&mut self) -> &mut ParameterStore {
            &mut self.params
        }
    }

    struct ZeroLoss;

    impl Loss for ZeroLoss {
        fn name(&self) -> &str {
            "ZeroLoss"
        }

        fn compute(&self, preds: &Predictions, _batch: &Batch) -> Result<LossOutput> {
            Ok(LossOutput { loss: 0.0, terms: Default::default(), grad: preds.zeros_like() })
        }
    }

    struct EmptyDecode;

    impl PostProcessor for EmptyDecode {
        fn name(&self) -> &'static str {
            "EmptyDecode"
        }

        fn vocabulary(&self) -> Option<&Vocabulary> {
            None
        }

        fn decode(&self, _preds: &Predictions) -> Result<Decoded> {
            Ok(Decoded::Single(Vec::new()))
        }
    }

    /// Reports the next scripted edit distance on every evaluation.
    struct ScriptedEditDistance {
        values: Vec<f64>,
        evaluations: Cell<usize>,
    }

    impl Metric for ScriptedEditDistance {
        fn name(&self) -> &str {
            "ScriptedEditDistance"
        }

        fn main_indicator(&self) -> &str {
            "edit_dis"
        }

        fn higher_is_better(&self) -> bool {
            false
        }

        fn update(&mut self, _decoded: &Decoded, _batch: &Batch) -> Result<MetricValues> {
            Ok(MetricValues::new())
        }

        fn compute(&self) -> MetricValues {
            let n = self.evaluations.get();
            self.evaluations.set(n + 1);
            MetricValues::from([("edit_dis".to_string(), self.values[n])])
        }

        fn reset(&mut self) {}
    }

    fn loader(n: usize) -> DataLoader {
        let samples = (0..n).map(|i| Sample { image: format!("{i}.jpg").into(), label: "a".into() }).collect();
        let spec = LoaderSpec { batch_size_per_card: 1, shuffle: false, drop_last: false, num_workers: 0 };
        DataLoader::new(SimpleDataSet::from_samples(samples), &spec, ProcessGroupInfo::single(), SeedSource::new(1))
    }

    fn engine(dir: &TempDir, metric: Box<dyn Metric>) -> Engine {
        let mut global = GlobalConfig::with_epochs(1);
        global.save_model_dir = dir.path().to_path_buf();
        global.eval_batch_step = crate::config::EvalBatchStep { start: 0, interval: 1 };
        global.print_batch_step = 1;

        let mut params = ParameterStore::new();
        params.insert("w", Parameter::new(vec![1], arr1(&[0.0])));
        let mut engine = Engine::new(EngineParts {
            global,
            group: ProcessGroupInfo::single(),
            train_loader: loader(3),
            eval_loader: Some(loader(2)),
            post_process: Box::new(EmptyDecode),
            model: Box::new(ConstantModel { params }),
            loss: Box::new(ZeroLoss),
            optimizer: Box::new(SGD::new(0.1, GradientPolicy::default())),
            scheduler: Box::new(ConstantLR::new(0.1)),
            metric,
            profiler: None,
            callbacks: CallbackManager::new(),
        });
        engine.ready(Restored::default()).unwrap();
        engine
    }

    #[test]
    fn test_lower_is_better_metric_keeps_smallest_value() {
        let dir = TempDir::new().unwrap();
        let metric = ScriptedEditDistance { values: vec![0.5, 0.2, 0.3], evaluations: Cell::new(0) };
        let summary = engine(&dir, Box::new(metric)).run().unwrap();

        assert_eq!(summary.state, EngineState::Completed);
        assert_eq!(summary.best.values["edit_dis"], 0.2);
        assert_eq!((summary.best.epoch, summary.best.step), (Some(1), Some(2)));

        let saved = checkpoint::load_states(&CheckpointPaths::in_dir(dir.path(), BEST)).unwrap().unwrap();
        assert_eq!(saved.best, summary.best);
    }

    #[test]
    fn test_run_twice_is_rejected() {
        let dir = TempDir::new().unwrap();
        let metric = ScriptedEditDistance { values: vec![0.5, 0.4, 0.3], evaluations: Cell::new(0) };
        let mut engine = engine(&dir, Box::new(metric));
        engine.run().unwrap();
        let err = engine.run().unwrap_err();
        assert!(matches!(err, crate::Error::InvalidTransition { .. }));
        assert_eq!(engine.state(), EngineState::Completed);
    }
}
