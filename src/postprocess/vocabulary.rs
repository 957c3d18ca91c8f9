//! Character dictionaries and decodable symbol lists

use crate::config::{CharsetParams, GlobalConfig};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Characters used when no dictionary file is configured.
pub const DEFAULT_CHARACTERS: &str = "0123456789abcdefghijklmnopqrstuvwxyz";

pub const CTC_BLANK: &str = "blank";
pub const ATTN_START: &str = "sos";
pub const ATTN_END: &str = "eos";
pub const SAR_UNKNOWN: &str = "<UKN>";
pub const SAR_END: &str = "<BOS/EOS>";
pub const SAR_PADDING: &str = "<PAD>";

/// How a vocabulary frames the raw characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabularyKind {
    /// `blank` first, then characters
    Ctc,
    /// `sos`, characters, `eos`
    Attention,
    /// characters, then `<UKN>`, `<BOS/EOS>`, `<PAD>`
    Sar,
}

/// Ordered decodable symbols.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    kind: VocabularyKind,
    symbols: Vec<String>,
    index: HashMap<String, usize>,
}

impl Vocabulary {
    /// Frame `characters` for `kind`.
    pub fn new(kind: VocabularyKind, characters: Vec<String>) -> Self {
        let symbols: Vec<String> = match kind {
            VocabularyKind::Ctc => std::iter::once(CTC_BLANK.to_string()).chain(characters).collect(),
            VocabularyKind::Attention => std::iter::once(ATTN_START.to_string())
                .chain(characters)
                .chain(std::iter::once(ATTN_END.to_string()))
                .collect(),
            VocabularyKind::Sar => characters
                .into_iter()
                .chain([SAR_UNKNOWN, SAR_END, SAR_PADDING].map(str::to_string))
                .collect(),
        };
        let mut index = HashMap::with_capacity(symbols.len());
        for (i, symbol) in symbols.iter().enumerate() {
            index.entry(symbol.clone()).or_insert(i);
        }
        Self { kind, symbols, index }
    }

    pub fn kind(&self) -> VocabularyKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn symbol(&self, index: usize) -> Option<&str> {
        self.symbols.get(index).map(String::as_str)
    }

    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.index.get(symbol).copied()
    }

    /// Index that terminates a sequence or fills positions after it.
    pub fn end_index(&self) -> usize {
        match self.kind {
            VocabularyKind::Ctc => 0,
            VocabularyKind::Attention => self.symbols.len() - 1,
            VocabularyKind::Sar => self.symbols.len() - 2,
        }
    }

    /// Whether `index` is a control symbol rather than a character.
    pub fn is_control(&self, index: usize) -> bool {
        let n = self.symbols.len();
        match self.kind {
            VocabularyKind::Ctc => index == 0,
            VocabularyKind::Attention => index == 0 || index + 1 == n,
            VocabularyKind::Sar => index + 3 >= n,
        }
    }

    /// Character indices of `text`; characters outside the dictionary are
    /// dropped, or mapped to `<UKN>` for SAR vocabularies.
    pub fn encode(&self, text: &str) -> Vec<usize> {
        let unknown = match self.kind {
            VocabularyKind::Sar => self.index_of(SAR_UNKNOWN),
            _ => None,
        };
        let mut buf = [0u8; 4];
        text.chars()
            .filter_map(|c| self.index_of(c.encode_utf8(&mut buf)).or(unknown))
            .collect()
    }
}

/// Raw characters from the dictionary named by `params` or `Global`.
pub fn load_characters(params: &CharsetParams, global: &GlobalConfig) -> Result<Vec<String>> {
    let dict_path = params.character_dict_path.as_ref().or(global.character_dict_path.as_ref());
    let use_space = params.use_space_char.unwrap_or(global.use_space_char);

    let mut characters = match dict_path {
        Some(path) => read_dictionary(path)?,
        None => DEFAULT_CHARACTERS.chars().map(String::from).collect(),
    };
    if use_space {
        characters.push(" ".to_string());
    }
    Ok(characters)
}

/// One symbol per line, line endings stripped.
pub fn read_dictionary(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| Error::resource(path, e))?;
    let characters: Vec<String> = content
        .split('\n')
        .map(|line| line.trim_end_matches(['\r', '\n']).to_string())
        .collect();
    let characters = match characters.split_last() {
        Some((last, rest)) if last.is_empty() => rest.to_vec(),
        _ => characters,
    };
    if characters.is_empty() {
        return Err(Error::resource(path, "character dictionary is empty"));
    }
    Ok(characters)
}
