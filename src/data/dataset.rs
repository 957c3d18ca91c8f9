//! Label-file datasets

use crate::config::SimpleDataSetParams;
use crate::data::Sample;
use crate::error::{Error, Result};
use rand::rngs::StdRng;
use std::fs;
use std::path::Path;

/// Samples read from plain-text label files.
#[derive(Debug, Clone, Default)]
pub struct SimpleDataSet {
    samples: Vec<Sample>,
}

impl SimpleDataSet {
    /// Read every label file, keeping `ratio_list[i]` of file `i`.
    ///
    /// `path` is the dotted config path of the dataset, used in errors.
    pub fn load(params: &SimpleDataSetParams, path: &str, rng: &mut StdRng) -> Result<Self> {
        if params.label_file_list.is_empty() {
            return Err(Error::config(format!("{path}.label_file_list"), "no label files listed"));
        }
        if params.delimiter.is_empty() {
            return Err(Error::config(format!("{path}.delimiter"), "delimiter must not be empty"));
        }
        let ratios = params.ratios(path)?;

        let mut samples = Vec::new();
        for (file, ratio) in params.label_file_list.iter().zip(ratios) {
            let lines = read_lines(file)?;
            let keep = select(lines.len(), ratio, rng);
            let before = samples.len();
            for index in keep {
                let (number, line) = &lines[index];
                match parse_line(line, &params.delimiter, &params.data_dir) {
                    Some(sample) => samples.push(sample),
                    None => tracing::warn!(
                        file = %file.display(),
                        line = number,
                        "skipping malformed label line without delimiter"
                    ),
                }
            }
            tracing::debug!(file = %file.display(), kept = samples.len() - before, ratio, "read label file");
        }
        Ok(Self { samples })
    }

    /// Dataset over already-parsed samples.
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }
}

/// Non-empty lines with their 1-based line numbers.
fn read_lines(file: &Path) -> Result<Vec<(usize, String)>> {
    let content = fs::read_to_string(file).map_err(|e| Error::resource(file, e))?;
    Ok(content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| (i + 1, line.to_string()))
        .collect())
}

/// Indices to keep, in file order.
fn select(len: usize, ratio: f32, rng: &mut StdRng) -> Vec<usize> {
    if ratio >= 1.0 {
        return (0..len).collect();
    }
    let amount = ((len as f32) * ratio).round() as usize;
    let mut picked = rand::seq::index::sample(rng, len, amount.min(len)).into_vec();
    picked.sort_unstable();
    picked
}

fn parse_line(line: &str, delimiter: &str, data_dir: &Path) -> Option<Sample> {
    let (image, label) = line.split_once(delimiter)?;
    let image = image.trim();
    if image.is_empty() {
        return None;
    }
    Some(Sample { image: data_dir.join(image), label: label.trim_end_matches('\r').to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{RngStream, SeedSource};
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn label_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    fn params(files: Vec<PathBuf>, ratios: Vec<f32>) -> SimpleDataSetParams {
        SimpleDataSetParams {
            data_dir: PathBuf::from("/data"),
            label_file_list: files,
            ratio_list: ratios,
            delimiter: "\t".to_string(),
            transforms: None,
        }
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let file = label_file(&["img_1.jpg\thello", "no delimiter here", "", "img_2.jpg\tworld"]);
        let mut rng = SeedSource::new(1).rng(RngStream::DatasetSampling);
        let dataset =
            SimpleDataSet::load(&params(vec![file.path().into()], vec![]), "Train.dataset", &mut rng)
                .unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.get(0).unwrap().image, PathBuf::from("/data/img_1.jpg"));
        assert_eq!(dataset.get(1).unwrap().label, "world");
    }

    #[test]
    fn test_label_keeps_later_delimiters() {
        let sample = parse_line("a.jpg\tx\ty", "\t", Path::new("d")).unwrap();
        assert_eq!(sample.label, "x\ty");
    }

    #[test]
    fn test_ratio_sampling_is_seeded() {
        let lines: Vec<String> = (0..100).map(|i| format!("img_{i}.jpg\t{i}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let file = label_file(&refs);
        let spec = params(vec![file.path().into()], vec![0.25]);

        let load = |seed| {
            let mut rng = SeedSource::new(seed).rng(RngStream::DatasetSampling);
            let dataset = SimpleDataSet::load(&spec, "Train.dataset", &mut rng).unwrap();
            (0..dataset.len()).map(|i| dataset.get(i).unwrap().label.clone()).collect::<Vec<_>>()
        };
        let first = load(7);
        assert_eq!(first.len(), 25);
        assert_eq!(first, load(7));
    }

    #[test]
    fn test_missing_label_file_is_resource_error() {
        let mut rng = SeedSource::new(1).rng(RngStream::DatasetSampling);
        let err = SimpleDataSet::load(
            &params(vec![PathBuf::from("/nonexistent/train.txt")], vec![]),
            "Train.dataset",
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Resource { .. }));
    }
}
