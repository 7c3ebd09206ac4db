//! Declaration parsing and the lifecycle group model for Padstone.
//!
//! This crate defines the configuration layer: TOML/JSON declaration documents
//! (`DeclarationFile`), the merged and validated `Config`, lifecycle groups
//! splitting configured objects into temporary and result halves, and the
//! scope-qualified `Partition` used to split provisioning state.

pub mod config;
pub mod declaration;
pub mod group;
pub mod types;

pub use config::{
    config_files_in_dir, load_config, parse_config_str, Config, ConfigShape, Variable,
};
pub use declaration::{
    parse_declaration_file, parse_declaration_str, DeclarationFile, DeclarationFormat,
    Parameters, VariableType,
};
pub use group::{
    LifecycleGroup, Membership, Module, Output, Partition, ProviderConfig, Resource,
    ResourceSet, Role, ScopeMembers, DEFAULT_GROUP,
};
pub use types::{GroupName, ModulePath, ResourceKey, ROOT_MODULE};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse TOML: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to parse JSON: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("{}: {source}", path.display())]
    InFile {
        path: PathBuf,
        source: Box<ConfigError>,
    },
    #[error("not a declaration file (expected *.pad.toml or *.pad.json): {}", .0.display())]
    UnsupportedFile(PathBuf),
    #[error("configuration path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("flat resource/module blocks cannot be mixed with target blocks")]
    MixedShapes,
    #[error("invalid resource '{key}': {reason}")]
    InvalidResource { key: String, reason: String },
    #[error("variable '{0}' declared more than once")]
    DuplicateVariable(String),
    #[error("variable '{name}' has a default that is not a {declared}")]
    VariableTypeMismatch { name: String, declared: String },
    #[error("provider '{name}' declared more than once in scope {scope}")]
    DuplicateProvider { scope: String, name: String },
    #[error("output '{name}' declared more than once in scope {scope}")]
    DuplicateOutput { scope: String, name: String },
    #[error("resource '{key}' declared more than once in scope {scope}")]
    DuplicateResource { scope: String, key: String },
    #[error("module '{name}' declared more than once in scope {scope}")]
    DuplicateModule { scope: String, name: String },
    #[error("'{key}' in scope {scope} is declared both temporary and result")]
    AmbiguousMembership { scope: String, key: String },
}
