//! Post-processors: vocabularies and decoding of model outputs

mod decode;
mod vocabulary;

pub use decode::{ClsPostProcess, DistillationDecode, LabelDecode};
pub use vocabulary::{
    load_characters, read_dictionary, Vocabulary, VocabularyKind, ATTN_END, ATTN_START, CTC_BLANK,
    DEFAULT_CHARACTERS, SAR_END, SAR_PADDING, SAR_UNKNOWN,
};

use crate::error::Result;
use crate::model::Predictions;

/// Decoded text with its mean per-character confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct TextScore {
    pub text: String,
    pub score: f32,
}

/// Decoded batch, per sub-model for distillation decoders.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Single(Vec<TextScore>),
    Ensemble(Vec<(String, Vec<TextScore>)>),
}

impl Decoded {
    /// Decoded rows of one sub-model; single outputs answer to any name.
    pub fn for_model(&self, model_name: &str) -> Option<&[TextScore]> {
        match self {
            Self::Single(rows) => Some(rows),
            Self::Ensemble(models) => {
                models.iter().find(|(name, _)| name == model_name).map(|(_, rows)| rows.as_slice())
            }
        }
    }

    /// Rows of the only or first sub-model.
    pub fn primary(&self) -> &[TextScore] {
        match self {
            Self::Single(rows) => rows,
            Self::Ensemble(models) => models.first().map_or(&[][..], |(_, rows)| rows.as_slice()),
        }
    }
}

/// Turns raw predictions into text and exposes the symbols it decodes.
pub trait PostProcessor: Send + Sync {
    /// Declared variant name, as written under `PostProcess.name`.
    fn name(&self) -> &'static str;

    /// Decodable symbols; `None` for post-processors that do not size a head.
    fn vocabulary(&self) -> Option<&Vocabulary>;

    fn decode(&self, preds: &Predictions) -> Result<Decoded>;
}
