//! Training and evaluation data

mod dataset;
mod loader;

pub use dataset::SimpleDataSet;
pub use loader::DataLoader;

use std::path::PathBuf;

/// Which data section a loader is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

impl Mode {
    /// Top-level config section for this mode.
    pub fn section(self) -> &'static str {
        match self {
            Self::Train => "Train",
            Self::Eval => "Eval",
        }
    }
}

/// One labelled image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub image: PathBuf,
    pub label: String,
}

/// A batch of samples; images are decoded by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub samples: Vec<Sample>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.samples.iter().map(|s| s.label.as_str())
    }
}
