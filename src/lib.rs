//! # ocrtrain
//!
//! Configuration-driven training pipeline for text recognition models.
//!
//! A YAML configuration is loaded into an immutable [`config::ConfigTree`].
//! [`pipeline::prepare`] then builds, in dependency order, the process
//! group, the data loaders, the post-processor, the reconciled architecture,
//! the model and loss (through a [`backend::Backend`]), the optimizer and
//! schedule, and the metric, restores any checkpoint, and returns a ready
//! [`engine::Engine`].
//!
//! ```no_run
//! use ocrtrain::backend::ReferenceBackend;
//! use ocrtrain::config::load_config;
//! use ocrtrain::pipeline::{self, RunContext};
//!
//! let config = load_config("configs/rec.yml")?;
//! let summary = pipeline::run(config, RunContext::new(Box::new(ReferenceBackend::new())))?;
//! println!("best: {}", summary.best.summary());
//! # Ok::<(), ocrtrain::Error>(())
//! ```

pub mod backend;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod data;
pub mod device;
pub mod distributed;
pub mod engine;
pub mod error;
pub mod factory;
pub mod loss;
pub mod metric;
pub mod model;
pub mod optim;
pub mod pipeline;
pub mod postprocess;
pub mod reconcile;
pub mod seed;

pub use error::{Error, Result};
