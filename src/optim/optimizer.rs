//! Optimizer trait and persisted optimizer state

use crate::config::RegularizerSpec;
use crate::error::{Error, Result};
use crate::model::ParameterStore;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trait for optimization algorithms
pub trait Optimizer: Send {
    /// Declared variant name
    fn name(&self) -> &str;

    /// Update every parameter from its accumulated gradient
    fn step(&mut self, params: &mut ParameterStore) -> Result<()>;

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);

    /// Snapshot of the per-parameter buffers for checkpointing
    fn state(&self) -> OptimizerState;

    /// Restore buffers saved by [`Optimizer::state`]
    fn load_state(&mut self, state: OptimizerState, params: &ParameterStore) -> Result<()>;
}

/// Serializable optimizer buffers, keyed by slot then parameter name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub name: String,
    pub step: u64,
    pub slots: BTreeMap<String, BTreeMap<String, Vec<f32>>>,
}

impl OptimizerState {
    pub fn new(name: impl Into<String>, step: u64) -> Self {
        Self { name: name.into(), step, slots: BTreeMap::new() }
    }

    /// Record one slot's buffers.
    pub fn with_slot(mut self, slot: &str, buffers: &BTreeMap<String, Array1<f32>>) -> Self {
        self.slots.insert(
            slot.to_string(),
            buffers.iter().map(|(name, buf)| (name.clone(), buf.to_vec())).collect(),
        );
        self
    }

    /// Check the state was written by `name`.
    pub fn expect_name(&self, name: &str) -> Result<()> {
        if self.name != name {
            return Err(Error::config(
                "Optimizer.name",
                format!("checkpoint holds {} state, the configured optimizer is {name}", self.name),
            ));
        }
        Ok(())
    }

    /// Buffers of `slot`, checked against the model's parameter sizes.
    pub fn take_slot(&mut self, slot: &str, params: &ParameterStore) -> Result<BTreeMap<String, Array1<f32>>> {
        let buffers = self.slots.remove(slot).unwrap_or_default();
        let mut restored = BTreeMap::new();
        for (name, values) in buffers {
            let param = params.get(&name).ok_or_else(|| {
                Error::config(format!("optimizer.{slot}.{name}"), "no such parameter in the model")
            })?;
            if param.numel() != values.len() {
                return Err(Error::config(
                    format!("optimizer.{slot}.{name}"),
                    format!("holds {} values, parameter has {}", values.len(), param.numel()),
                ));
            }
            restored.insert(name, Array1::from(values));
        }
        Ok(restored)
    }
}

/// Gradient adjustments applied before every update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GradientPolicy {
    pub regularizer: Option<RegularizerSpec>,
    pub clip_norm: Option<f32>,
}

impl GradientPolicy {
    /// Add the regularisation gradient, then clip to the global norm.
    pub fn apply(&self, params: &mut ParameterStore) {
        match self.regularizer {
            Some(RegularizerSpec::L2 { factor }) => {
                for (_, param) in params.iter_mut() {
                    param.grad.scaled_add(factor, &param.value);
                }
            }
            Some(RegularizerSpec::L1 { factor }) => {
                for (_, param) in params.iter_mut() {
                    let sign = param.value.mapv(f32::signum);
                    param.grad.scaled_add(factor, &sign);
                }
            }
            None => {}
        }
        if let Some(max_norm) = self.clip_norm {
            super::clip_grad_norm(params, max_norm);
        }
    }
}
