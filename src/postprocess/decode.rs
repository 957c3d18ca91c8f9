//! Greedy decoders

use crate::error::{Error, Result};
use crate::model::Predictions;
use crate::postprocess::{Decoded, PostProcessor, TextScore, Vocabulary, VocabularyKind};
use ndarray::{Array3, ArrayView1, ArrayView2, Axis};

/// Index and probability of the most likely class at one step.
fn best(logits: ArrayView1<'_, f32>) -> (usize, f32) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let denom: f32 = logits.iter().map(|v| (v - max).exp()).sum();
    let (index, value) = logits
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |acc, (i, v)| if v > acc.1 { (i, v) } else { acc });
    (index, (value - max).exp() / denom)
}

fn mean(scores: &[f32]) -> f32 {
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f32>() / scores.len() as f32
    }
}

fn decode_rows(out: &Array3<f32>, row: impl Fn(ArrayView2<'_, f32>) -> TextScore) -> Vec<TextScore> {
    out.axis_iter(Axis(0)).map(row).collect()
}

/// Collapse repeats, drop blanks.
fn ctc_row(vocab: &Vocabulary, steps: ArrayView2<'_, f32>) -> TextScore {
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut previous = None;
    for step in steps.axis_iter(Axis(0)) {
        let (index, prob) = best(step);
        if Some(index) != previous && !vocab.is_control(index) {
            if let Some(symbol) = vocab.symbol(index) {
                text.push_str(symbol);
                scores.push(prob);
            }
        }
        previous = Some(index);
    }
    TextScore { text, score: mean(&scores) }
}

/// Read until the end symbol, skipping other control symbols.
fn sequence_row(vocab: &Vocabulary, steps: ArrayView2<'_, f32>) -> TextScore {
    let end = vocab.end_index();
    let mut text = String::new();
    let mut scores = Vec::new();
    for step in steps.axis_iter(Axis(0)) {
        let (index, prob) = best(step);
        if index == end {
            break;
        }
        if vocab.is_control(index) {
            continue;
        }
        if let Some(symbol) = vocab.symbol(index) {
            text.push_str(symbol);
            scores.push(prob);
        }
    }
    TextScore { text, score: mean(&scores) }
}

fn decode_with(vocab: &Vocabulary, out: &Array3<f32>) -> Vec<TextScore> {
    match vocab.kind() {
        VocabularyKind::Ctc => decode_rows(out, |steps| ctc_row(vocab, steps)),
        VocabularyKind::Attention | VocabularyKind::Sar => {
            decode_rows(out, |steps| sequence_row(vocab, steps))
        }
    }
}

fn single_output<'a>(name: &str, preds: &'a Predictions) -> Result<&'a Array3<f32>> {
    match preds {
        Predictions::Single(out) => Ok(out),
        Predictions::Ensemble(_) => {
            Err(Error::Backend(format!("{name} expects a single model output, got an ensemble")))
        }
    }
}

/// Greedy decoder over a single model's output.
#[derive(Debug, Clone)]
pub struct LabelDecode {
    name: &'static str,
    vocabulary: Vocabulary,
}

impl LabelDecode {
    pub fn new(name: &'static str, vocabulary: Vocabulary) -> Self {
        Self { name, vocabulary }
    }
}

impl PostProcessor for LabelDecode {
    fn name(&self) -> &'static str {
        self.name
    }

    fn vocabulary(&self) -> Option<&Vocabulary> {
        Some(&self.vocabulary)
    }

    fn decode(&self, preds: &Predictions) -> Result<Decoded> {
        let out = single_output(self.name, preds)?;
        Ok(Decoded::Single(decode_with(&self.vocabulary, out)))
    }
}

/// CTC decoder applied to each named sub-model of an ensemble.
#[derive(Debug, Clone)]
pub struct DistillationDecode {
    name: &'static str,
    vocabulary: Vocabulary,
    model_names: Vec<String>,
}

impl DistillationDecode {
    pub fn new(name: &'static str, vocabulary: Vocabulary, model_names: Vec<String>) -> Self {
        Self { name, vocabulary, model_names }
    }

    pub fn model_names(&self) -> &[String] {
        &self.model_names
    }
}

impl PostProcessor for DistillationDecode {
    fn name(&self) -> &'static str {
        self.name
    }

    fn vocabulary(&self) -> Option<&Vocabulary> {
        Some(&self.vocabulary)
    }

    fn decode(&self, preds: &Predictions) -> Result<Decoded> {
        if !matches!(preds, Predictions::Ensemble(_)) {
            return Err(Error::Backend(format!(
                "{} expects per-model outputs from a distillation model",
                self.name
            )));
        }
        let mut decoded = Vec::with_capacity(self.model_names.len());
        for model in &self.model_names {
            let out = preds.output(model).ok_or_else(|| {
                Error::Backend(format!("{} found no output for sub-model '{model}'", self.name))
            })?;
            decoded.push((model.clone(), decode_with(&self.vocabulary, out)));
        }
        Ok(Decoded::Ensemble(decoded))
    }
}

/// Text direction classifier; exposes no vocabulary.
#[derive(Debug, Clone)]
pub struct ClsPostProcess {
    label_list: Vec<String>,
}

impl ClsPostProcess {
    pub fn new(label_list: Vec<String>) -> Self {
        Self { label_list }
    }

    pub fn label_list(&self) -> &[String] {
        &self.label_list
    }
}

impl PostProcessor for ClsPostProcess {
    fn name(&self) -> &'static str {
        "ClsPostProcess"
    }

    fn vocabulary(&self) -> Option<&Vocabulary> {
        None
    }

    fn decode(&self, preds: &Predictions) -> Result<Decoded> {
        let out = single_output(self.name(), preds)?;
        Ok(Decoded::Single(decode_rows(out, |steps| {
            let (index, score) = best(steps.row(0));
            let text = self.label_list.get(index).cloned().unwrap_or_else(|| index.to_string());
            TextScore { text, score }
        })))
    }
}
