//! Model capability surface
//!
//! The pipeline never looks inside a model. It drives the [`Model`] trait and
//! reads or writes the flat [`ParameterStore`] for optimizer steps and
//! checkpoints.

use crate::data::Batch;
use crate::error::{Error, Result};
use ndarray::{Array1, Array3};
use std::collections::BTreeMap;

/// Per-step class scores, `[batch, steps, classes]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    Single(Array3<f32>),
    /// One output per distillation sub-model, in declaration order
    Ensemble(Vec<(String, Array3<f32>)>),
}

impl Predictions {
    /// Output of one sub-model; a single model answers to any name.
    pub fn output(&self, model_name: &str) -> Option<&Array3<f32>> {
        match self {
            Self::Single(out) => Some(out),
            Self::Ensemble(outputs) => {
                outputs.iter().find(|(name, _)| name == model_name).map(|(_, out)| out)
            }
        }
    }

    /// Mutable output of one sub-model.
    pub fn output_mut(&mut self, model_name: &str) -> Option<&mut Array3<f32>> {
        match self {
            Self::Single(out) => Some(out),
            Self::Ensemble(outputs) => {
                outputs.iter_mut().find(|(name, _)| name == model_name).map(|(_, out)| out)
            }
        }
    }

    /// Same structure with every value zeroed, used to accumulate gradients.
    pub fn zeros_like(&self) -> Self {
        match self {
            Self::Single(out) => Self::Single(Array3::zeros(out.raw_dim())),
            Self::Ensemble(outputs) => Self::Ensemble(
                outputs
                    .iter()
                    .map(|(name, out)| (name.clone(), Array3::zeros(out.raw_dim())))
                    .collect(),
            ),
        }
    }

    /// Batch size of the first output.
    pub fn batch_size(&self) -> usize {
        match self {
            Self::Single(out) => out.shape()[0],
            Self::Ensemble(outputs) => outputs.first().map_or(0, |(_, out)| out.shape()[0]),
        }
    }
}

/// One trainable tensor, stored flat with its logical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub shape: Vec<usize>,
    pub value: Array1<f32>,
    pub grad: Array1<f32>,
}

impl Parameter {
    /// Parameter initialised from values.
    pub fn new(shape: Vec<usize>, value: Array1<f32>) -> Self {
        let grad = Array1::zeros(value.len());
        Self { shape, value, grad }
    }

    /// Number of scalar elements.
    pub fn numel(&self) -> usize {
        self.value.len()
    }
}

/// Named parameters, ordered by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterStore {
    params: BTreeMap<String, Parameter>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, param: Parameter) {
        self.params.insert(name.into(), param);
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Parameter)> {
        self.params.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Parameter)> {
        self.params.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total scalar parameter count.
    pub fn numel(&self) -> usize {
        self.params.values().map(Parameter::numel).sum()
    }

    pub fn zero_grad(&mut self) {
        for param in self.params.values_mut() {
            param.grad.fill(0.0);
        }
    }

    /// Replace a parameter's values, checking the shape first.
    pub fn assign(&mut self, name: &str, shape: &[usize], values: Vec<f32>) -> Result<()> {
        let param = self
            .params
            .get_mut(name)
            .ok_or_else(|| Error::config(name, "parameter does not exist in the model"))?;
        if param.shape != shape {
            return Err(Error::config(
                name,
                format!("checkpoint shape {shape:?} does not match model shape {:?}", param.shape),
            ));
        }
        param.value = Array1::from(values);
        Ok(())
    }
}

/// A trainable network.
pub trait Model: Send {
    /// Run a forward pass, keeping what backward needs.
    fn forward(&mut self, batch: &Batch) -> Result<Predictions>;

    /// Accumulate parameter gradients from the gradient of the loss with
    /// respect to the last forward's predictions.
    fn backward(&mut self, grad: &Predictions) -> Result<()>;

    fn parameters(&self) -> &ParameterStore;

    fn parameters_mut(&mut self) -> &mut ParameterStore;

    /// Switch to training behaviour.
    fn train(&mut self) {}

    /// Switch to inference behaviour.
    fn eval(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_checks_shape() {
        let mut store = ParameterStore::new();
        store.insert("head.bias", Parameter::new(vec![3], Array1::zeros(3)));

        store.assign("head.bias", &[3], vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(store.get("head.bias").unwrap().value.to_vec(), vec![1.0, 2.0, 3.0]);

        let err = store.assign("head.bias", &[4], vec![0.0; 4]).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("head.bias"));
    }

    #[test]
    fn test_zero_grad() {
        let mut store = ParameterStore::new();
        let mut param = Parameter::new(vec![2], Array1::ones(2));
        param.grad.fill(5.0);
        store.insert("w", param);
        store.zero_grad();
        assert!(store.get("w").unwrap().grad.iter().all(|g| *g == 0.0));
        assert_eq!(store.numel(), 2);
    }

    #[test]
    fn test_predictions_lookup() {
        let preds = Predictions::Ensemble(vec![
            ("Teacher".into(), Array3::zeros((1, 2, 3))),
            ("Student".into(), Array3::ones((1, 2, 3))),
        ]);
        assert_eq!(preds.output("Student").unwrap()[[0, 0, 0]], 1.0);
        assert!(preds.output("Missing").is_none());
        assert_eq!(preds.batch_size(), 1);

        let zeros = preds.zeros_like();
        assert_eq!(zeros.output("Student").unwrap()[[0, 1, 2]], 0.0);
    }
}
