//! Raw on-disk shape of a single declaration document.
//!
//! A document is either TOML (`*.pad.toml`) or JSON (`*.pad.json`); both
//! deserialize into [`DeclarationFile`]. Nothing here checks cross-block
//! invariants: that happens once all documents of a directory are merged
//! (see [`crate::config`]).

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Free-form parameters of a resource, module or provider block.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// `type -> name -> attributes`, as written in `[resource.<type>.<name>]`.
pub type ResourceBlocks = BTreeMap<String, BTreeMap<String, Parameters>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationFormat {
    Toml,
    Json,
}

impl DeclarationFormat {
    /// Format of a declaration file, or `None` when the name is not a declaration.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".pad.toml") {
            Some(Self::Toml)
        } else if name.ends_with(".pad.json") {
            Some(Self::Json)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    List,
    Map,
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VariableType::String => write!(f, "string"),
            VariableType::List => write!(f, "list"),
            VariableType::Map => write!(f, "map"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VariableBlock {
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub declared_type: Option<VariableType>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProviderBlock {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(flatten)]
    pub parameters: Parameters,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModuleBlock {
    pub source: String,
    #[serde(flatten)]
    pub parameters: Parameters,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputBlock {
    pub value: serde_json::Value,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sensitive: bool,
}

/// Body of a `[target.<name>]` block: a scoped copy of the flat blocks.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TargetBlock {
    #[serde(default)]
    pub provider: Vec<ProviderBlock>,
    #[serde(default)]
    pub output: BTreeMap<String, OutputBlock>,
    #[serde(default)]
    pub resource: ResourceBlocks,
    #[serde(default)]
    pub module: BTreeMap<String, ModuleBlock>,
    #[serde(default)]
    pub temporary_resource: ResourceBlocks,
    #[serde(default)]
    pub temporary_module: BTreeMap<String, ModuleBlock>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeclarationFile {
    #[serde(default)]
    pub variable: BTreeMap<String, VariableBlock>,
    #[serde(default)]
    pub provider: Vec<ProviderBlock>,
    #[serde(default)]
    pub output: BTreeMap<String, OutputBlock>,
    #[serde(default)]
    pub resource: ResourceBlocks,
    #[serde(default)]
    pub module: BTreeMap<String, ModuleBlock>,
    #[serde(default)]
    pub temporary_resource: ResourceBlocks,
    #[serde(default)]
    pub temporary_module: BTreeMap<String, ModuleBlock>,
    #[serde(default)]
    pub target: BTreeMap<String, TargetBlock>,
}

impl DeclarationFile {
    /// True when the document declares any flat (non-target) resource or module.
    pub fn has_flat_blocks(&self) -> bool {
        !self.resource.is_empty()
            || !self.module.is_empty()
            || !self.temporary_resource.is_empty()
            || !self.temporary_module.is_empty()
    }
}

pub fn parse_declaration_str(
    input: &str,
    format: DeclarationFormat,
) -> Result<DeclarationFile, ConfigError> {
    match format {
        DeclarationFormat::Toml => Ok(toml::from_str(input)?),
        DeclarationFormat::Json => Ok(serde_json::from_str(input)?),
    }
}

pub fn parse_declaration_file(path: &Path) -> Result<DeclarationFile, ConfigError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = DeclarationFormat::from_file_name(&name)
        .ok_or_else(|| ConfigError::UnsupportedFile(path.to_path_buf()))?;
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_declaration_str(&content, format).map_err(|e| ConfigError::InFile {
        path: path.to_path_buf(),
        source: Box::new(e),
    })
}
