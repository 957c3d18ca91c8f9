//! ICDAR 2019 MLT ground truth conversion
//!
//! `train_gt.txt` holds one text region per line:
//! `id,x1,y1,x2,y2,x3,y3,x4,y4,transcription`. The transcription may itself
//! contain commas, so only the first nine are separators.

use ocrtrain_common::{Result, ToolError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Ground truth file name inside the dataset directory.
pub const GROUND_TRUTH: &str = "train_gt.txt";

/// Prefix of image paths written to label files.
pub const IMAGE_PREFIX: &str = "icdar2019_mlt/train";

/// Transcription marking an illegible region.
const ILLEGIBLE: &str = "###";

/// One labelled text region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    pub transcription: String,
    pub points: [[i64; 2]; 4],
}

/// Regions of every image, in the order images first appear.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImageAnnotations {
    order: Vec<String>,
    regions: HashMap<String, Vec<Annotation>>,
}

impl ImageAnnotations {
    fn push(&mut self, image: String, annotation: Annotation) {
        match self.regions.get_mut(&image) {
            Some(regions) => regions.push(annotation),
            None => {
                self.order.push(image.clone());
                self.regions.insert(image, vec![annotation]);
            }
        }
    }

    pub fn images(&self) -> &[String] {
        &self.order
    }

    pub fn regions(&self, image: &str) -> &[Annotation] {
        self.regions.get(image).map_or(&[][..], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn parse_line(line: &str) -> std::result::Result<(String, Annotation), String> {
    let parts: Vec<&str> = line.splitn(10, ',').collect();
    if parts.len() != 10 {
        return Err(format!("expected 10 comma-separated fields, found {}", parts.len()));
    }
    let mut coords = [0i64; 8];
    for (slot, raw) in coords.iter_mut().zip(&parts[1..9]) {
        *slot = raw.trim().parse().map_err(|_| format!("invalid coordinate '{raw}'"))?;
    }
    let points = [
        [coords[0], coords[1]],
        [coords[2], coords[3]],
        [coords[4], coords[5]],
        [coords[6], coords[7]],
    ];
    let image = format!("train_{}.jpg", parts[0].trim());
    Ok((image, Annotation { transcription: parts[9].to_string(), points }))
}

/// Parse ground truth text, skipping illegible regions and malformed lines.
pub fn parse_ground_truth(content: &str) -> ImageAnnotations {
    let mut annotations = ImageAnnotations::default();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok((_, annotation)) if annotation.transcription == ILLEGIBLE => {}
            Ok((image, annotation)) => annotations.push(image, annotation),
            Err(reason) => warn!(line = index + 1, %reason, "skipping malformed ground truth line"),
        }
    }
    annotations
}

/// Read `<dataset>/train_gt.txt`.
pub fn read_ground_truth(dataset: &Path) -> Result<ImageAnnotations> {
    let path = dataset.join(GROUND_TRUTH);
    if !path.is_file() {
        return Err(ToolError::InputNotFound { path });
    }
    let content =
        std::fs::read_to_string(&path).map_err(|e| ToolError::io(format!("reading {}", path.display()), e))?;
    Ok(parse_ground_truth(&content))
}

/// Settings for [`convert`].
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub dataset: PathBuf,
    pub output: PathBuf,
    /// Fraction of images held out for validation
    pub val_split: f64,
    pub seed: u64,
}

/// Outcome of [`convert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertReport {
    pub images: usize,
    pub train_path: PathBuf,
    pub train_images: usize,
    pub val_path: PathBuf,
    pub val_images: usize,
}

/// Split images `1 - val_split` / `val_split` after a seeded shuffle.
pub fn split(images: &[String], val_split: f64, seed: u64) -> (Vec<String>, Vec<String>) {
    let mut shuffled = images.to_vec();
    shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
    let cut = ((shuffled.len() as f64) * (1.0 - val_split)) as usize;
    let val = shuffled.split_off(cut.min(shuffled.len()));
    (shuffled, val)
}

fn render(annotations: &ImageAnnotations, images: &[String]) -> Result<String> {
    let mut out = String::new();
    for image in images {
        let json = serde_json::to_string(annotations.regions(image))
            .map_err(|e| ToolError::Serialization { message: e.to_string() })?;
        let _ = writeln!(out, "{IMAGE_PREFIX}/{image}\t{json}");
    }
    Ok(out)
}

/// Convert the dataset into `<output>/train.txt` and `<output>/val.txt`.
pub fn convert(options: &ConvertOptions) -> Result<ConvertReport> {
    if !(0.0..1.0).contains(&options.val_split) {
        return Err(ToolError::InvalidArgument {
            field: "val_split".into(),
            message: format!("{} is outside [0, 1)", options.val_split),
            suggestion: "Use a fraction such as 0.1".into(),
        });
    }

    let annotations = read_ground_truth(&options.dataset)?;
    info!(images = annotations.len(), "read ground truth");

    let (train, val) = split(annotations.images(), options.val_split, options.seed);
    std::fs::create_dir_all(&options.output)
        .map_err(|e| ToolError::io(format!("creating {}", options.output.display()), e))?;

    let train_path = options.output.join("train.txt");
    let val_path = options.output.join("val.txt");
    for (path, images) in [(&train_path, &train), (&val_path, &val)] {
        std::fs::write(path, render(&annotations, images)?)
            .map_err(|e| ToolError::io(format!("writing {}", path.display()), e))?;
        info!(path = %path.display(), entries = images.len(), "wrote label file");
    }

    Ok(ConvertReport {
        images: annotations.len(),
        train_path,
        train_images: train.len(),
        val_path,
        val_images: val.len(),
    })
}
