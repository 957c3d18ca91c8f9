//! Optimizers and learning-rate schedules

mod adam;
mod builder;
mod clip;
mod optimizer;
mod scheduler;
mod sgd;

pub use adam::Adam;
pub use builder::{build_optimizer, build_scheduler, DistributedOptimizer};
pub use clip::clip_grad_norm;
pub use optimizer::{GradientPolicy, Optimizer, OptimizerState};
pub use scheduler::{
    ConstantLR, CosineAnnealingLR, LRScheduler, LinearWarmupLR, PiecewiseLR, PolynomialLR,
};
pub use sgd::SGD;
