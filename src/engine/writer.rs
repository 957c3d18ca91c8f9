//! Scalar sinks for visualising training curves

use crate::error::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Receives `(tag, value, step)` points, e.g. `TRAIN/loss` or `EVAL/acc`.
pub trait ScalarWriter: Send {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct ScalarRecord<'a> {
    tag: &'a str,
    value: f64,
    step: usize,
    wall_time: f64,
}

/// Appends one JSON object per scalar to `<dir>/scalars.jsonl`.
pub struct JsonlScalarWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl JsonlScalarWriter {
    pub const FILE_NAME: &'static str = "scalars.jsonl";

    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(format!("creating {}", dir.display()), e))?;
        let path = dir.join(Self::FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::io(format!("opening {}", path.display()), e))?;
        tracing::info!(path = %path.display(), "writing training scalars");
        Ok(Self { path, out: BufWriter::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScalarWriter for JsonlScalarWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        let wall_time = Utc::now().timestamp_millis() as f64 / 1000.0;
        serde_json::to_writer(&mut self.out, &ScalarRecord { tag, value, step, wall_time })?;
        self.out.write_all(b"\n").map_err(|e| Error::io(format!("writing {}", self.path.display()), e))
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(|e| Error::io(format!("flushing {}", self.path.display()), e))
    }
}
