//! Typed view of the `Architecture` section
//!
//! Only the parts the pipeline reasons about are typed: the algorithm, the
//! sub-models of a distillation ensemble and each model's head. Everything
//! else (`Transform`, `Backbone`, `Neck`, head hyper-parameters) is carried as
//! an opaque mapping and written back unchanged by [`ArchitectureSpec::to_value`].

use crate::error::{Error, Result};
use serde_yaml::{Mapping, Value};

/// Algorithm name that marks an ensemble of named sub-models.
pub const DISTILLATION: &str = "Distillation";

/// Head name of the multi-branch head.
pub const MULTI_HEAD: &str = "MultiHead";

/// `head_list` branch whose alphabet size follows the vocabulary.
pub const CTC_BRANCH: &str = "CTCLabelDecode";

/// Architecture descriptor, either one model or a distillation ensemble.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchitectureSpec {
    Single(ModelSpec),
    Distillation(DistillationSpec),
}

/// Ensemble of named sub-models, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct DistillationSpec {
    raw: Mapping,
    pub models: Vec<(String, ModelSpec)>,
}

/// One model: a head plus opaque transform/backbone/neck subtrees.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    raw: Mapping,
    pub head: HeadSpec,
}

/// Head descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum HeadSpec {
    MultiHead(MultiHeadSpec),
    Plain(PlainHeadSpec),
}

/// Multi-branch head.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiHeadSpec {
    raw: Mapping,
    pub head_list: Vec<SubHead>,
    list_form: bool,
}

/// One named branch of a multi-branch head.
#[derive(Debug, Clone, PartialEq)]
pub struct SubHead {
    pub name: String,
    pub params: Mapping,
}

/// Single-output head.
#[derive(Debug, Clone, PartialEq)]
pub struct PlainHeadSpec {
    raw: Mapping,
    pub name: String,
    pub out_channels: Option<usize>,
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

fn as_mapping<'a>(value: &'a Value, path: &str) -> Result<&'a Mapping> {
    value.as_mapping().ok_or_else(|| Error::config(path, "expected a mapping"))
}

fn str_field<'a>(map: &'a Mapping, name: &str) -> Option<&'a str> {
    map.get(name).and_then(Value::as_str)
}

impl ArchitectureSpec {
    /// Parse the `Architecture` subtree.
    pub fn from_value(value: &Value) -> Result<Self> {
        let raw = as_mapping(value, "Architecture")?;
        if str_field(raw, "algorithm") == Some(DISTILLATION) {
            DistillationSpec::parse(raw).map(Self::Distillation)
        } else {
            ModelSpec::parse(raw, "Architecture").map(Self::Single)
        }
    }

    /// Write the descriptor back as a YAML subtree.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Single(model) => model.to_value(),
            Self::Distillation(spec) => spec.to_value(),
        }
    }

    /// Top-level `model_type` (`rec`, `det`, `cls`), when declared.
    pub fn model_type(&self) -> Option<&str> {
        match self {
            Self::Single(model) => model.model_type(),
            Self::Distillation(spec) => str_field(&spec.raw, "model_type"),
        }
    }

    /// Whether this is a distillation ensemble.
    pub fn is_distillation(&self) -> bool {
        matches!(self, Self::Distillation(_))
    }

    /// Models with their parameter-name prefixes (`""` for a single model).
    pub fn models(&self) -> Vec<(&str, &ModelSpec)> {
        match self {
            Self::Single(model) => vec![("", model)],
            Self::Distillation(spec) => {
                spec.models.iter().map(|(name, model)| (name.as_str(), model)).collect()
            }
        }
    }
}

impl DistillationSpec {
    fn parse(raw: &Mapping) -> Result<Self> {
        let models_value = raw
            .get("Models")
            .ok_or_else(|| Error::config("Architecture.Models", "distillation requires named sub-models"))?;
        let models_map = as_mapping(models_value, "Architecture.Models")?;

        let mut models = Vec::with_capacity(models_map.len());
        for (name, sub) in models_map {
            let name = name
                .as_str()
                .ok_or_else(|| Error::config("Architecture.Models", "sub-model keys must be strings"))?;
            let path = format!("Architecture.Models.{name}");
            let sub = as_mapping(sub, &path)?;
            models.push((name.to_string(), ModelSpec::parse(sub, &path)?));
        }
        if models.is_empty() {
            return Err(Error::config("Architecture.Models", "no sub-models declared"));
        }
        Ok(Self { raw: raw.clone(), models })
    }

    fn to_value(&self) -> Value {
        let mut models = Mapping::new();
        for (name, model) in &self.models {
            models.insert(key(name), model.to_value());
        }
        let mut raw = self.raw.clone();
        raw.insert(key("Models"), Value::Mapping(models));
        Value::Mapping(raw)
    }
}

impl ModelSpec {
    fn parse(raw: &Mapping, path: &str) -> Result<Self> {
        let head_path = format!("{path}.Head");
        let head = match raw.get("Head") {
            Some(Value::Mapping(head)) => HeadSpec::parse(head, &head_path)?,
            Some(Value::Null) | None => {
                return Err(Error::config(format!("{head_path}.name"), "head name is required"))
            }
            Some(_) => return Err(Error::config(head_path, "expected a mapping")),
        };
        Ok(Self { raw: raw.clone(), head })
    }

    fn to_value(&self) -> Value {
        let mut raw = self.raw.clone();
        raw.insert(key("Head"), self.head.to_value());
        Value::Mapping(raw)
    }

    /// `model_type` (`rec`, `det`, `cls`), when declared.
    pub fn model_type(&self) -> Option<&str> {
        str_field(&self.raw, "model_type")
    }

    /// `algorithm`, when declared.
    pub fn algorithm(&self) -> Option<&str> {
        str_field(&self.raw, "algorithm")
    }

    /// An opaque subtree such as `Backbone`.
    pub fn subtree(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }
}

impl HeadSpec {
    fn parse(raw: &Mapping, path: &str) -> Result<Self> {
        let name = str_field(raw, "name")
            .ok_or_else(|| Error::config(format!("{path}.name"), "head name is required"))?;
        if name == MULTI_HEAD {
            MultiHeadSpec::parse(raw, path).map(Self::MultiHead)
        } else {
            let out_channels = match raw.get("out_channels") {
                None | Some(Value::Null) => None,
                Some(v) => Some(
                    v.as_u64()
                        .map(|n| n as usize)
                        .ok_or_else(|| {
                            Error::config(format!("{path}.out_channels"), "expected a positive integer")
                        })?,
                ),
            };
            Ok(Self::Plain(PlainHeadSpec { raw: raw.clone(), name: name.to_string(), out_channels }))
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::MultiHead(head) => head.to_value(),
            Self::Plain(head) => head.to_value(),
        }
    }

    /// Declared head name.
    pub fn name(&self) -> &str {
        match self {
            Self::MultiHead(_) => MULTI_HEAD,
            Self::Plain(head) => &head.name,
        }
    }
}

impl MultiHeadSpec {
    fn parse(raw: &Mapping, path: &str) -> Result<Self> {
        let list_path = format!("{path}.head_list");
        let (head_list, list_form) = match raw.get("head_list") {
            Some(Value::Mapping(entries)) => {
                let mut heads = Vec::with_capacity(entries.len());
                for (name, params) in entries {
                    heads.push(SubHead::parse(name, params, &list_path)?);
                }
                (heads, false)
            }
            Some(Value::Sequence(items)) => {
                let mut heads = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let entry = item
                        .as_mapping()
                        .filter(|m| m.len() == 1)
                        .ok_or_else(|| {
                            Error::config(format!("{list_path}[{i}]"), "expected a single-key mapping")
                        })?;
                    for (name, params) in entry {
                        heads.push(SubHead::parse(name, params, &list_path)?);
                    }
                }
                (heads, true)
            }
            _ => return Err(Error::config(list_path, "MultiHead requires a head_list")),
        };
        Ok(Self { raw: raw.clone(), head_list, list_form })
    }

    fn to_value(&self) -> Value {
        let list = if self.list_form {
            Value::Sequence(
                self.head_list
                    .iter()
                    .map(|sub| {
                        let mut entry = Mapping::new();
                        entry.insert(key(&sub.name), Value::Mapping(sub.params.clone()));
                        Value::Mapping(entry)
                    })
                    .collect(),
            )
        } else {
            Value::Mapping(
                self.head_list
                    .iter()
                    .map(|sub| (key(&sub.name), Value::Mapping(sub.params.clone())))
                    .collect(),
            )
        };
        let mut raw = self.raw.clone();
        raw.insert(key("head_list"), list);
        Value::Mapping(raw)
    }

    /// A branch by name.
    pub fn branch(&self, name: &str) -> Option<&SubHead> {
        self.head_list.iter().find(|sub| sub.name == name)
    }

    /// `character_num` of the CTC branch, once set.
    pub fn ctc_character_num(&self) -> Option<usize> {
        self.branch(CTC_BRANCH)?
            .params
            .get("character_num")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    }

    /// Set `character_num` of the CTC branch.
    pub fn set_ctc_character_num(&mut self, n: usize, path: &str) -> Result<()> {
        let branch = self
            .head_list
            .iter_mut()
            .find(|sub| sub.name == CTC_BRANCH)
            .ok_or_else(|| {
                Error::config(
                    format!("{path}.head_list.{CTC_BRANCH}"),
                    "MultiHead has no CTC branch to size",
                )
            })?;
        branch.params.insert(key("character_num"), Value::Number((n as u64).into()));
        Ok(())
    }
}

impl SubHead {
    fn parse(name: &Value, params: &Value, path: &str) -> Result<Self> {
        let name = name
            .as_str()
            .ok_or_else(|| Error::config(path, "branch names must be strings"))?
            .to_string();
        let params = match params {
            Value::Null => Mapping::new(),
            Value::Mapping(m) => m.clone(),
            _ => return Err(Error::config(format!("{path}.{name}"), "expected a mapping")),
        };
        Ok(Self { name, params })
    }
}

impl PlainHeadSpec {
    fn to_value(&self) -> Value {
        let mut raw = self.raw.clone();
        if let Some(n) = self.out_channels {
            raw.insert(key("out_channels"), Value::Number((n as u64).into()));
        }
        Value::Mapping(raw)
    }

    /// A head hyper-parameter.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }
}
