//! Build optimizers and learning-rate schedules from the `Optimizer` section

use super::{
    Adam, ConstantLR, CosineAnnealingLR, GradientPolicy, LRScheduler, LinearWarmupLR, Optimizer,
    OptimizerState, PiecewiseLR, PolynomialLR, SGD,
};
use crate::config::{LrSpec, OptimizerKind, OptimizerSpec};
use crate::distributed::Collective;
use crate::error::{Error, Result};
use crate::model::ParameterStore;

/// Build the optimizer declared by `spec`.
pub fn build_optimizer(spec: &OptimizerSpec) -> Result<Box<dyn Optimizer>> {
    if let Some(clip) = spec.clip_norm {
        if !(clip > 0.0) {
            return Err(Error::config("Optimizer.clip_norm", "must be positive"));
        }
    }
    let policy = GradientPolicy { regularizer: spec.regularizer, clip_norm: spec.clip_norm };
    let lr = initial_lr(&spec.lr);

    Ok(match spec.kind {
        OptimizerKind::SGD {} => Box::new(SGD::new(lr, policy)),
        OptimizerKind::Momentum { momentum } => Box::new(SGD::with_momentum(lr, momentum, policy)),
        OptimizerKind::Adam { beta1, beta2, epsilon } => {
            Box::new(Adam::new(lr, beta1, beta2, epsilon, policy))
        }
        OptimizerKind::AdamW { beta1, beta2, epsilon, weight_decay } => {
            Box::new(Adam::adamw(lr, beta1, beta2, epsilon, weight_decay, policy))
        }
    })
}

fn initial_lr(spec: &LrSpec) -> f32 {
    match spec {
        LrSpec::Const { learning_rate, .. }
        | LrSpec::Cosine { learning_rate, .. }
        | LrSpec::Linear { learning_rate, .. } => *learning_rate,
        LrSpec::Piecewise { values, .. } => values.first().copied().unwrap_or(0.0),
    }
}

/// Build the per-iteration schedule for `epochs` of `step_each_epoch` steps.
pub fn build_scheduler(spec: &LrSpec, epochs: usize, step_each_epoch: usize) -> Result<Box<dyn LRScheduler>> {
    let total_steps = epochs * step_each_epoch;
    let (schedule, warmup_epoch): (Box<dyn LRScheduler>, f32) = match spec {
        LrSpec::Const { learning_rate, warmup_epoch } => {
            (Box::new(ConstantLR::new(*learning_rate)), *warmup_epoch)
        }
        LrSpec::Cosine { learning_rate, warmup_epoch } => {
            (Box::new(CosineAnnealingLR::new(*learning_rate, total_steps, 0.0)), *warmup_epoch)
        }
        LrSpec::Piecewise { decay_epochs, values, warmup_epoch } => {
            if values.len() != decay_epochs.len() + 1 {
                return Err(Error::config(
                    "Optimizer.lr.values",
                    format!(
                        "needs {} values for {} decay epochs",
                        decay_epochs.len() + 1,
                        decay_epochs.len()
                    ),
                ));
            }
            let boundaries = decay_epochs.iter().map(|e| e * step_each_epoch).collect();
            (Box::new(PiecewiseLR::new(boundaries, values.clone())), *warmup_epoch)
        }
        LrSpec::Linear { learning_rate, end_lr, warmup_epoch } => {
            (Box::new(PolynomialLR::new(*learning_rate, *end_lr, total_steps)), *warmup_epoch)
        }
    };

    if warmup_epoch < 0.0 {
        return Err(Error::config("Optimizer.lr.warmup_epoch", "must not be negative"));
    }
    let warmup_steps = (warmup_epoch * step_each_epoch as f32).round() as usize;
    if warmup_steps == 0 {
        return Ok(schedule);
    }
    Ok(Box::new(LinearWarmupLR::new(schedule, warmup_steps)))
}

/// Optimizer that averages gradients across ranks before each update.
pub struct DistributedOptimizer {
    inner: Box<dyn Optimizer>,
    collective: Box<dyn Collective>,
    buffer: Vec<f32>,
}

impl DistributedOptimizer {
    pub fn new(inner: Box<dyn Optimizer>, collective: Box<dyn Collective>) -> Self {
        Self { inner, collective, buffer: Vec::new() }
    }
}

impl Optimizer for DistributedOptimizer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn step(&mut self, params: &mut ParameterStore) -> Result<()> {
        self.buffer.clear();
        for (_, param) in params.iter() {
            self.buffer.extend(param.grad.iter());
        }
        self.collective.all_reduce_mean(&mut self.buffer)?;

        let mut offset = 0;
        for (_, param) in params.iter_mut() {
            let n = param.numel();
            for (g, reduced) in param.grad.iter_mut().zip(&self.buffer[offset..offset + n]) {
                *g = *reduced;
            }
            offset += n;
        }
        self.inner.step(params)
    }

    fn lr(&self) -> f32 {
        self.inner.lr()
    }

    fn set_lr(&mut self, lr: f32) {
        self.inner.set_lr(lr);
    }

    fn state(&self) -> OptimizerState {
        self.inner.state()
    }

    fn load_state(&mut self, state: OptimizerState, params: &ParameterStore) -> Result<()> {
        self.inner.load_state(state, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{LocalGroup, ProcessGroupInfo};
    use crate::model::Parameter;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    fn spec(yaml: &str) -> OptimizerSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_build_each_optimizer() {
        for (yaml, name) in [
            ("name: SGD", "SGD"),
            ("name: Momentum\nmomentum: 0.9", "Momentum"),
            ("name: Adam", "Adam"),
            ("name: AdamW\nweight_decay: 0.05", "AdamW"),
        ] {
            assert_eq!(build_optimizer(&spec(yaml)).unwrap().name(), name);
        }
    }

    #[test]
    fn test_optimizer_starts_at_schedule_lr() {
        let opt = build_optimizer(&spec("name: Adam\nlr: {name: Cosine, learning_rate: 0.0005}")).unwrap();
        assert_relative_eq!(opt.lr(), 0.0005);
    }

    #[test]
    fn test_invalid_clip_norm() {
        assert!(build_optimizer(&spec("name: SGD\nclip_norm: 0")).is_err());
    }

    #[test]
    fn test_warmup_measured_in_epochs() {
        let lr = LrSpec::Cosine { learning_rate: 1.0, warmup_epoch: 1.0 };
        let mut schedule = build_scheduler(&lr, 3, 10).unwrap();
        assert_relative_eq!(schedule.get_lr(), 0.0);
        schedule.set_step(5);
        assert_relative_eq!(schedule.get_lr(), 0.5);
        schedule.set_step(10);
        assert_relative_eq!(schedule.get_lr(), 1.0);
    }

    #[test]
    fn test_piecewise_boundaries_in_steps() {
        let lr = LrSpec::Piecewise { decay_epochs: vec![2], values: vec![0.1, 0.01], warmup_epoch: 0.0 };
        let mut schedule = build_scheduler(&lr, 4, 5).unwrap();
        schedule.set_step(9);
        assert_relative_eq!(schedule.get_lr(), 0.1);
        schedule.set_step(10);
        assert_relative_eq!(schedule.get_lr(), 0.01);
    }

    #[test]
    fn test_piecewise_value_count_checked() {
        let lr = LrSpec::Piecewise { decay_epochs: vec![2, 4], values: vec![0.1], warmup_epoch: 0.0 };
        let err = build_scheduler(&lr, 4, 5).err().unwrap();
        assert!(err.to_string().contains("Optimizer.lr.values"));
    }

    /// Collective that pretends a second rank contributed zero gradients.
    struct HalvingGroup;

    impl Collective for HalvingGroup {
        fn info(&self) -> ProcessGroupInfo {
            ProcessGroupInfo { rank: 0, world_size: 2 }
        }

        fn all_reduce_mean(&mut self, values: &mut [f32]) -> Result<()> {
            values.iter_mut().for_each(|v| *v *= 0.5);
            Ok(())
        }

        fn barrier(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_distributed_optimizer_reduces_before_step() {
        let mut store = ParameterStore::new();
        let mut param = Parameter::new(vec![2], arr1(&[1.0, 1.0]));
        param.grad = arr1(&[1.0, -2.0]);
        store.insert("w", param);

        let inner = build_optimizer(&spec("name: SGD\nlr: {name: Const, learning_rate: 1.0}")).unwrap();
        let mut opt = DistributedOptimizer::new(inner, Box::new(HalvingGroup));
        opt.step(&mut store).unwrap();
        assert_eq!(store.get("w").unwrap().value.to_vec(), vec![0.5, 2.0]);

        let inner = build_optimizer(&spec("name: SGD")).unwrap();
        let local = DistributedOptimizer::new(inner, Box::new(LocalGroup));
        assert_eq!(local.name(), "SGD");
    }
}
