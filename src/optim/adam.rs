//! Adam and AdamW optimizers
//!
//! AdamW decouples weight decay from the gradient-based update:
//!
//! Adam:  θ_t = θ_{t-1} - lr_t * m_t / (√v_t + ε)
//! AdamW: θ_t = (1 - lr * λ) * θ_{t-1} - lr_t * m_t / (√v_t + ε)

use super::{GradientPolicy, Optimizer, OptimizerState};
use crate::error::Result;
use crate::model::ParameterStore;
use ndarray::{Array1, Zip};
use std::collections::BTreeMap;

/// Adam optimizer, optionally with decoupled weight decay
pub struct Adam {
    name: &'static str,
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    policy: GradientPolicy,
    t: u64,
    m: BTreeMap<String, Array1<f32>>, // First moment
    v: BTreeMap<String, Array1<f32>>, // Second moment
}

impl Adam {
    /// Create a new Adam optimizer
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32, policy: GradientPolicy) -> Self {
        Self {
            name: "Adam",
            lr,
            beta1,
            beta2,
            epsilon,
            weight_decay: 0.0,
            policy,
            t: 0,
            m: BTreeMap::new(),
            v: BTreeMap::new(),
        }
    }

    /// Create an AdamW optimizer
    pub fn adamw(
        lr: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        weight_decay: f32,
        policy: GradientPolicy,
    ) -> Self {
        Self { name: "AdamW", weight_decay, ..Self::new(lr, beta1, beta2, epsilon, policy) }
    }

    /// Get optimizer step counter.
    pub fn step_count(&self) -> u64 {
        self.t
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &str {
        self.name
    }

    fn step(&mut self, params: &mut ParameterStore) -> Result<()> {
        self.policy.apply(params);
        self.t += 1;

        let (beta1, beta2, epsilon, lr) = (self.beta1, self.beta2, self.epsilon, self.lr);
        // Bias correction folded into the step size
        let lr_t = lr * ((1.0 - beta2.powi(self.t as i32)).sqrt() / (1.0 - beta1.powi(self.t as i32)));
        let decay = 1.0 - lr * self.weight_decay;

        for (name, param) in params.iter_mut() {
            let n = param.numel();
            let m = self.m.entry(name.clone()).or_insert_with(|| Array1::zeros(n));
            let v = self.v.entry(name.clone()).or_insert_with(|| Array1::zeros(n));

            Zip::from(&mut *m).and(&param.grad).for_each(|m, g| *m = beta1 * *m + (1.0 - beta1) * g);
            Zip::from(&mut *v).and(&param.grad).for_each(|v, g| *v = beta2 * *v + (1.0 - beta2) * g * g);

            Zip::from(&mut param.value).and(&*m).and(&*v).for_each(|p, m, v| {
                *p = decay * *p - lr_t * m / (v.sqrt() + epsilon);
            });
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
        OptimizerState::new(self.name, self.t).with_slot("m", &self.m).with_slot("v", &self.v)
    }

    fn load_state(&mut self, mut state: OptimizerState, params: &ParameterStore) -> Result<()> {
        state.expect_name(self.name)?;
        self.m = state.take_slot("m", params)?;
        self.v = state.take_slot("v", params)?;
        self.t = state.step;
        Ok(())
    }
}
