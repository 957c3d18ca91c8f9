//! Checkpoint persistence
//!
//! A checkpoint with prefix `P` is three files:
//! - `P.safetensors` - model parameters
//! - `P.opt.json` - optimizer state
//! - `P.states.json` - best metric record, epoch, global step, timestamp

mod record;

pub use record::{BestMetricRecord, ResumePoint, Restored, TrainingStates};

use crate::config::GlobalConfig;
use crate::error::{Error, Result};
use crate::model::{Model, ParameterStore};
use crate::optim::{Optimizer, OptimizerState};
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const WEIGHTS_EXT: &str = "safetensors";
const OPTIMIZER_EXT: &str = "opt.json";
const STATES_EXT: &str = "states.json";

/// Checkpoint file paths for one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    prefix: PathBuf,
}

impl CheckpointPaths {
    /// Accepts either the bare prefix or the weights file path.
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        let prefix = match prefix.extension() {
            Some(ext) if ext == WEIGHTS_EXT => prefix.with_extension(""),
            _ => prefix,
        };
        Self { prefix }
    }

    /// `<save_model_dir>/<name>`
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self::new(dir.join(name))
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn weights(&self) -> PathBuf {
        self.with_suffix(WEIGHTS_EXT)
    }

    pub fn optimizer(&self) -> PathBuf {
        self.with_suffix(OPTIMIZER_EXT)
    }

    pub fn states(&self) -> PathBuf {
        self.with_suffix(STATES_EXT)
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = self.prefix.as_os_str().to_owned();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }
}

/// Write all three checkpoint files.
pub fn save(
    paths: &CheckpointPaths,
    params: &ParameterStore,
    optimizer: &dyn Optimizer,
    states: &TrainingStates,
) -> Result<()> {
    if let Some(dir) = paths.prefix().parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::io(format!("creating {}", dir.display()), e))?;
    }

    let tensors: Vec<(String, Vec<u8>, Vec<usize>)> = params
        .iter()
        .map(|(name, param)| {
            let bytes: Vec<u8> = param.value.iter().flat_map(|v| v.to_le_bytes()).collect();
            (name.clone(), bytes, param.shape.clone())
        })
        .collect();
    let views = tensors
        .iter()
        .map(|(name, bytes, shape)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (name.as_str(), view))
                .map_err(|e| Error::Serialization(format!("tensor {name}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let metadata = HashMap::from([
        ("epoch".to_string(), states.epoch.to_string()),
        ("global_step".to_string(), states.global_step.to_string()),
    ]);
    let bytes = safetensors::serialize(views, &Some(metadata))
        .map_err(|e| Error::Serialization(e.to_string()))?;
    write(&paths.weights(), &bytes)?;

    let opt_json = serde_json::to_vec_pretty(&optimizer.state())?;
    write(&paths.optimizer(), &opt_json)?;

    let states_json = serde_json::to_vec_pretty(states)?;
    write(&paths.states(), &states_json)?;

    info!(prefix = %paths.prefix().display(), epoch = states.epoch, "saved checkpoint");
    Ok(())
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).map_err(|e| Error::io(format!("writing {}", path.display()), e))
}

/// Load `P.safetensors` into `params`.
///
/// Every tensor must match the model's parameter shape. Model parameters the
/// file does not contain keep their initial values and are reported.
pub fn load_weights(paths: &CheckpointPaths, params: &mut ParameterStore) -> Result<()> {
    let path = paths.weights();
    let bytes = std::fs::read(&path).map_err(|e| Error::resource(&path, e))?;
    let tensors = SafeTensors::deserialize(&bytes)
        .map_err(|e| Error::resource(&path, format!("not a safetensors file: {e}")))?;

    let mut loaded = BTreeSet::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(Error::config(&name, format!("checkpoint tensor has dtype {:?}, expected F32", view.dtype())));
        }
        if params.get(&name).is_none() {
            warn!(tensor = %name, "checkpoint tensor has no matching model parameter, ignored");
            continue;
        }
        let values: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        params.assign(&name, view.shape(), values)?;
        loaded.insert(name);
    }

    let missing: Vec<&String> = params.iter().map(|(name, _)| name).filter(|n| !loaded.contains(*n)).collect();
    if !missing.is_empty() {
        warn!(?missing, "model parameters not found in checkpoint, keeping initial values");
    }
    info!(path = %path.display(), tensors = loaded.len(), "loaded model weights");
    Ok(())
}

/// Load `P.opt.json` into `optimizer`; a missing or incompatible state is
/// skipped with a warning.
pub fn load_optimizer(paths: &CheckpointPaths, optimizer: &mut dyn Optimizer, params: &ParameterStore) {
    let path = paths.optimizer();
    let state = match std::fs::read(&path) {
        Ok(bytes) => match serde_json::from_slice::<OptimizerState>(&bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable optimizer state, starting fresh");
                return;
            }
        },
        Err(_) => {
            warn!(path = %path.display(), "no optimizer state found, starting fresh");
            return;
        }
    };
    match optimizer.load_state(state, params) {
        Ok(()) => info!(path = %path.display(), "loaded optimizer state"),
        Err(e) => warn!(error = %e, "incompatible optimizer state, starting fresh"),
    }
}

/// Read `P.states.json` if present.
pub fn load_states(paths: &CheckpointPaths) -> Result<Option<TrainingStates>> {
    let path = paths.states();
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path).map_err(|e| Error::resource(&path, e))?;
    let states = serde_json::from_slice(&bytes)
        .map_err(|e| Error::resource(&path, format!("invalid training states: {e}")))?;
    Ok(Some(states))
}

/// Restore from `Global.checkpoints` (full resume) or
/// `Global.pretrained_model` (weights only).
pub fn restore(global: &GlobalConfig, model: &mut dyn Model, optimizer: &mut dyn Optimizer) -> Result<Restored> {
    if let Some(prefix) = &global.checkpoints {
        let paths = CheckpointPaths::new(prefix);
        load_weights(&paths, model.parameters_mut())?;
        load_optimizer(&paths, optimizer, model.parameters());

        let Some(states) = load_states(&paths)? else {
            warn!(prefix = %paths.prefix().display(), "no training states found, starting from epoch 1");
            return Ok(Restored::default());
        };
        info!(
            epoch = states.epoch,
            global_step = states.global_step,
            best = %states.best.summary(),
            "resuming from checkpoint"
        );
        return Ok(Restored {
            best: states.best,
            resume: Some(ResumePoint { start_epoch: states.epoch + 1, global_step: states.global_step }),
        });
    }

    if let Some(prefix) = &global.pretrained_model {
        load_weights(&CheckpointPaths::new(prefix), model.parameters_mut())?;
        info!(prefix = %prefix.display(), "initialised from pretrained model");
    } else {
        info!("training from scratch");
    }
    Ok(Restored::default())
}
