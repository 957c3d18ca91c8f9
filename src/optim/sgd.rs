//! Stochastic Gradient Descent optimizer

use super::{GradientPolicy, Optimizer, OptimizerState};
use crate::error::Result;
use crate::model::ParameterStore;
use ndarray::Array1;
use std::collections::BTreeMap;

/// SGD optimizer with optional momentum
///
/// `v = momentum * v - lr * grad; param += v`
pub struct SGD {
    name: &'static str,
    lr: f32,
    momentum: f32,
    policy: GradientPolicy,
    step: u64,
    velocities: BTreeMap<String, Array1<f32>>,
}

impl SGD {
    /// Plain SGD
    pub fn new(lr: f32, policy: GradientPolicy) -> Self {
        Self { name: "SGD", lr, momentum: 0.0, policy, step: 0, velocities: BTreeMap::new() }
    }

    /// SGD with heavy-ball momentum
    pub fn with_momentum(lr: f32, momentum: f32, policy: GradientPolicy) -> Self {
        Self { name: "Momentum", momentum, ..Self::new(lr, policy) }
    }
}

impl Optimizer for SGD {
    fn name(&self) -> &str {
        self.name
    }

    fn step(&mut self, params: &mut ParameterStore) -> Result<()> {
        self.policy.apply(params);
        self.step += 1;

        let (lr, momentum) = (self.lr, self.momentum);
        for (name, param) in params.iter_mut() {
            if momentum > 0.0 {
                let velocity = self
                    .velocities
                    .entry(name.clone())
                    .or_insert_with(|| Array1::zeros(param.numel()));
                velocity.mapv_inplace(|v| v * momentum);
                velocity.scaled_add(-lr, &param.grad);
                param.value += &*velocity;
            } else {
                param.value.scaled_add(-lr, &param.grad);
            }
        }
        Ok(())
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::new(self.name, self.step).with_slot("velocity", &self.velocities)
    }

    fn load_state(&mut self, mut state: OptimizerState, params: &ParameterStore) -> Result<()> {
        state.expect_name(self.name)?;
        self.velocities = state.take_slot("velocity", params)?;
        self.step = state.step;
        Ok(())
    }
}
