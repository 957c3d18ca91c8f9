//! Configuration tree loading and command-line overrides

use crate::config::schema::GlobalConfig;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Top-level sections of a training configuration.
pub const SECTIONS: [&str; 8] =
    ["Global", "Architecture", "Loss", "Optimizer", "PostProcess", "Metric", "Train", "Eval"];

/// Resolved, immutable training configuration.
///
/// Each builder deserializes only its own section at the moment it runs, so
/// a missing key is reported by the stage that needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTree {
    root: Mapping,
}

impl ConfigTree {
    /// Parse a YAML document whose root is a mapping.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(content)
            .map_err(|e| Error::config("<root>", format!("failed to parse YAML: {e}")))?;
        match value {
            Value::Mapping(root) => Ok(Self { root }),
            Value::Null => Ok(Self { root: Mapping::new() }),
            _ => Err(Error::config("<root>", "the configuration root must be a mapping")),
        }
    }

    /// A top-level section; `None` when absent or explicitly null.
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.root.get(name).filter(|v| !v.is_null())
    }

    /// A top-level section that must be present.
    pub fn require_section(&self, name: &str) -> Result<&Value> {
        self.section(name).ok_or_else(|| Error::config(name, "required section is missing"))
    }

    /// Look up a dotted path such as `Global.epoch_num`.
    pub fn get(&self, dotted: &str) -> Option<&Value> {
        let mut parts = dotted.split('.');
        let mut current = self.root.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Deserialize a required section into its typed spec.
    pub fn parse_section<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        from_value(self.require_section(name)?, name)
    }

    /// The typed `Global` section, validated.
    pub fn global(&self) -> Result<GlobalConfig> {
        let global: GlobalConfig = self.parse_section("Global")?;
        global.validate()?;
        Ok(global)
    }

    /// Apply `-o Section.key=value` overrides, returning the new tree.
    pub fn with_overrides(mut self, overrides: &[Override]) -> Result<Self> {
        for ov in overrides {
            set_path(&mut self.root, &ov.path, ov.value.clone())?;
        }
        Ok(self)
    }

    /// Copy of the tree with one top-level section replaced.
    pub fn with_section(&self, name: &str, value: Value) -> Self {
        let mut root = self.root.clone();
        root.insert(Value::String(name.to_string()), value);
        Self { root }
    }

    /// Serialize the whole tree back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.root).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Sections present in the document that no stage consumes.
    pub fn unknown_sections(&self) -> Vec<String> {
        self.root
            .keys()
            .filter_map(Value::as_str)
            .filter(|k| !SECTIONS.contains(k))
            .map(str::to_string)
            .collect()
    }
}

/// Load a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ConfigTree> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| Error::resource(path, e))?;
    ConfigTree::from_yaml(&content)
}

/// Deserialize a subtree, reporting failures against its dotted path.
pub fn from_value<T: DeserializeOwned>(value: &Value, path: &str) -> Result<T> {
    serde_yaml::from_value(value.clone()).map_err(|e| Error::config(path, e.to_string()))
}

/// One `dotted.path=value` override.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub path: Vec<String>,
    pub value: Value,
}

impl FromStr for Override {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (key, raw) = s
            .split_once('=')
            .ok_or_else(|| Error::config(s, "override must look like Section.key=value"))?;
        let key = key.trim();
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(Error::config(s, "override key must be a dotted path"));
        }
        let value = serde_yaml::from_str::<Value>(raw.trim())
            .unwrap_or_else(|_| Value::String(raw.trim().to_string()));
        Ok(Self { path: key.split('.').map(str::to_string).collect(), value })
    }
}

fn set_path(root: &mut Mapping, path: &[String], value: Value) -> Result<()> {
    let (last, parents) =
        path.split_last().ok_or_else(|| Error::config("<override>", "empty override path"))?;

    let mut current = root;
    for (depth, key) in parents.iter().enumerate() {
        let entry = current
            .entry(Value::String(key.clone()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if entry.is_null() {
            *entry = Value::Mapping(Mapping::new());
        }
        current = match entry {
            Value::Mapping(m) => m,
            _ => {
                return Err(Error::config(path[..=depth].join("."), "cannot override inside a scalar"))
            }
        };
    }
    current.insert(Value::String(last.clone()), value);
    Ok(())
}
