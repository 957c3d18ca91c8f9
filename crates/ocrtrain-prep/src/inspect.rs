//! Raw dataset layout report

use ocrtrain_common::{Result, ToolError};
use std::path::{Path, PathBuf};

/// Directories expected under the raw dataset root.
pub const EXPECTED_DIRS: [&str; 2] = ["TrainImages", "TrainGT"];

/// Entries shown per directory.
pub const PREVIEW_LEN: usize = 5;

/// One expected directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    pub path: PathBuf,
    pub exists: bool,
    /// First entries, sorted by name
    pub preview: Vec<String>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    pub root: PathBuf,
    pub dirs: Vec<DirListing>,
}

impl DatasetLayout {
    pub fn is_complete(&self) -> bool {
        self.dirs.iter().all(|d| d.exists)
    }
}

fn list(path: PathBuf) -> Result<DirListing> {
    if !path.is_dir() {
        return Ok(DirListing { path, exists: false, preview: Vec::new(), total: 0 });
    }
    let mut names = std::fs::read_dir(&path)
        .map_err(|e| ToolError::io(format!("listing {}", path.display()), e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    let total = names.len();
    names.truncate(PREVIEW_LEN);
    Ok(DirListing { path, exists: true, preview: names, total })
}

/// Report the expected directories under `root`.
pub fn inspect(root: &Path) -> Result<DatasetLayout> {
    if !root.exists() {
        return Err(ToolError::InputNotFound { path: root.to_path_buf() });
    }
    let dirs = EXPECTED_DIRS.iter().map(|name| list(root.join(name))).collect::<Result<_>>()?;
    Ok(DatasetLayout { root: root.to_path_buf(), dirs })
}
