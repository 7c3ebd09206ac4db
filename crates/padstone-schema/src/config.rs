use crate::declaration::{
    parse_declaration_file, parse_declaration_str, DeclarationFile, DeclarationFormat,
    ModuleBlock, OutputBlock, ProviderBlock, ResourceBlocks, VariableType,
};
use crate::group::{
    LifecycleGroup, Module, Output, Partition, ProviderConfig, Resource, ResourceSet, Role,
    DEFAULT_GROUP,
};
use crate::types::{ModulePath, ResourceKey};
use crate::ConfigError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub name: String,
    pub default: Option<serde_json::Value>,
    pub description: String,
    pub declared_type: Option<VariableType>,
}

impl Variable {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// The layout a configuration's groups were declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigShape {
    /// Top-level `temporary_*` / `resource` / `module` blocks: one `default` group at the root.
    Flat,
    /// `target` blocks: one group per target, each in its own nested scope.
    Targets,
}

/// Merged, validated configuration for an entire declaration directory.
///
/// Loaded once and immutable afterward.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub source_path: PathBuf,
    pub variables: Vec<Variable>,
    /// Root-scope providers.
    pub providers: Vec<ProviderConfig>,
    /// Root-scope outputs.
    pub outputs: Vec<Output>,
    pub groups: Vec<LifecycleGroup>,
}

/// Accumulates declaration documents in load order before validation.
#[derive(Debug, Default)]
struct ConfigBuilder {
    variables: Vec<Variable>,
    providers: Vec<ProviderConfig>,
    outputs: Vec<Output>,
    flat: Option<LifecycleGroup>,
    targets: Vec<LifecycleGroup>,
}

impl ConfigBuilder {
    fn add(&mut self, file: DeclarationFile) -> Result<(), ConfigError> {
        let has_flat = file.has_flat_blocks();
        let has_targets = !file.target.is_empty();
        if (has_flat || self.flat.is_some()) && (has_targets || !self.targets.is_empty()) {
            return Err(ConfigError::MixedShapes);
        }

        for (name, block) in file.variable {
            if let (Some(declared), Some(default)) = (block.declared_type, &block.default) {
                if !type_matches(declared, default) {
                    return Err(ConfigError::VariableTypeMismatch {
                        name,
                        declared: declared.to_string(),
                    });
                }
            }
            self.variables.push(Variable {
                name,
                default: block.default,
                description: block.description,
                declared_type: block.declared_type,
            });
        }
        self.providers.extend(file.provider.into_iter().map(provider));
        self.outputs.extend(outputs(file.output));

        if has_flat {
            let group = self
                .flat
                .get_or_insert_with(|| LifecycleGroup::new(DEFAULT_GROUP, ModulePath::root()));
            group
                .intermediate
                .append(resource_set(file.temporary_resource, file.temporary_module)?);
            group
                .result
                .append(resource_set(file.resource, file.module)?);
        }

        for (name, block) in file.target {
            let mut group = LifecycleGroup::new(name.as_str(), ModulePath::root().child(&name));
            group.intermediate =
                resource_set(block.temporary_resource, block.temporary_module)?;
            group.result = resource_set(block.resource, block.module)?;
            group.providers = block.provider.into_iter().map(provider).collect();
            group.outputs = outputs(block.output);

            // A target declared across several documents merges by append.
            if let Some(existing) = self.targets.iter_mut().find(|g| g.name == name.as_str()) {
                existing.append(group);
            } else {
                self.targets.push(group);
            }
        }
        Ok(())
    }

    fn finish(self, source_path: PathBuf) -> Result<Config, ConfigError> {
        let groups = match self.flat {
            Some(group) => vec![group],
            None => self.targets,
        };
        let config = Config {
            source_path,
            variables: self.variables,
            providers: self.providers,
            outputs: self.outputs,
            groups,
        };
        config.validate()?;
        Ok(config)
    }
}

fn type_matches(declared: VariableType, value: &serde_json::Value) -> bool {
    match declared {
        VariableType::String => !value.is_array() && !value.is_object(),
        VariableType::List => value.is_array(),
        VariableType::Map => value.is_object(),
    }
}

fn provider(block: ProviderBlock) -> ProviderConfig {
    ProviderConfig {
        name: block.name,
        alias: block.alias,
        parameters: block.parameters,
    }
}

fn outputs(blocks: BTreeMap<String, OutputBlock>) -> Vec<Output> {
    blocks
        .into_iter()
        .map(|(name, block)| Output {
            name,
            value: block.value,
            description: block.description,
            sensitive: block.sensitive,
        })
        .collect()
}

fn resource_set(
    resources: ResourceBlocks,
    modules: BTreeMap<String, ModuleBlock>,
) -> Result<ResourceSet, ConfigError> {
    let mut set = ResourceSet::default();
    for (resource_type, named) in resources {
        for (name, parameters) in named {
            set.resources
                .push(Resource::from_block(&resource_type, &name, parameters)?);
        }
    }
    set.modules = modules
        .into_iter()
        .map(|(name, block)| Module {
            name,
            source: block.source,
            parameters: block.parameters,
        })
        .collect();
    Ok(set)
}

impl Config {
    /// An empty configuration (no groups, nothing to build).
    pub fn empty(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            variables: Vec::new(),
            providers: Vec::new(),
            outputs: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn shape(&self) -> ConfigShape {
        if self.groups.iter().any(|g| !g.scope.is_root()) {
            ConfigShape::Targets
        } else {
            ConfigShape::Flat
        }
    }

    pub fn group(&self, name: &str) -> Option<&LifecycleGroup> {
        self.groups.iter().find(|g| g.name == *name)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Temporary and result membership of every group, for partitioning state.
    pub fn partition(&self) -> Partition {
        Partition::from_groups(&self.groups)
    }

    /// Every configured provider with the scope it was declared in.
    pub fn all_providers(&self) -> impl Iterator<Item = (ModulePath, &ProviderConfig)> {
        self.providers
            .iter()
            .map(|p| (ModulePath::root(), p))
            .chain(
                self.groups
                    .iter()
                    .flat_map(|g| g.providers.iter().map(|p| (g.scope.clone(), p))),
            )
    }

    pub fn resource_count(&self, role: Role) -> usize {
        self.groups.iter().map(|g| g.set(role).resources.len()).sum()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for variable in &self.variables {
            if !seen.insert(variable.name.as_str()) {
                return Err(ConfigError::DuplicateVariable(variable.name.clone()));
            }
        }

        let mut providers: HashSet<(ModulePath, &str, &str)> = HashSet::new();
        for (scope, p) in self.all_providers() {
            if !providers.insert((scope.clone(), p.name.as_str(), p.alias.as_str())) {
                return Err(ConfigError::DuplicateProvider {
                    scope: scope.to_string(),
                    name: p.full_name(),
                });
            }
        }

        let mut outputs: HashSet<(&ModulePath, &str)> = HashSet::new();
        let root = ModulePath::root();
        let scoped_outputs = self
            .outputs
            .iter()
            .map(|o| (&root, o))
            .chain(
                self.groups
                    .iter()
                    .flat_map(|g| g.outputs.iter().map(move |o| (&g.scope, o))),
            );
        for (scope, output) in scoped_outputs {
            if !outputs.insert((scope, output.name.as_str())) {
                return Err(ConfigError::DuplicateOutput {
                    scope: scope.to_string(),
                    name: output.name.clone(),
                });
            }
        }

        for group in &self.groups {
            validate_group(group)?;
        }
        Ok(())
    }
}

fn validate_group(group: &LifecycleGroup) -> Result<(), ConfigError> {
    let scope = group.scope.to_string();
    let mut resources: BTreeMap<&ResourceKey, Role> = BTreeMap::new();
    let mut modules: BTreeMap<&str, Role> = BTreeMap::new();

    for role in [Role::Intermediate, Role::Result] {
        let set = group.set(role);
        for resource in &set.resources {
            match resources.insert(&resource.key, role) {
                None => {}
                Some(previous) if previous == role => {
                    return Err(ConfigError::DuplicateResource {
                        scope,
                        key: resource.key.to_string(),
                    })
                }
                Some(_) => {
                    return Err(ConfigError::AmbiguousMembership {
                        scope,
                        key: resource.key.to_string(),
                    })
                }
            }
        }
        for module in &set.modules {
            match modules.insert(module.name.as_str(), role) {
                None => {}
                Some(previous) if previous == role => {
                    return Err(ConfigError::DuplicateModule {
                        scope,
                        name: module.name.clone(),
                    })
                }
                Some(_) => {
                    return Err(ConfigError::AmbiguousMembership {
                        scope,
                        key: format!("module.{}", module.name),
                    })
                }
            }
        }
    }
    Ok(())
}

/// Parse a single document into a validated configuration.
pub fn parse_config_str(
    input: &str,
    format: DeclarationFormat,
    source_path: impl Into<PathBuf>,
) -> Result<Config, ConfigError> {
    let mut builder = ConfigBuilder::default();
    builder.add(parse_declaration_str(input, format)?)?;
    builder.finish(source_path.into())
}

/// Load and merge every declaration document in `dir`.
///
/// Documents are merged by list-append in lexical filename order; an error in
/// any document aborts the whole load.
pub fn load_config(dir: &Path) -> Result<Config, ConfigError> {
    let files = config_files_in_dir(dir)?;
    debug!(
        "loading {} declaration file(s) from {}",
        files.len(),
        dir.display()
    );

    let mut builder = ConfigBuilder::default();
    for file in &files {
        builder.add(parse_declaration_file(file)?)?;
    }
    builder.finish(dir.to_path_buf())
}

/// Declaration files directly inside `dir`, sorted by name.
pub fn config_files_in_dir(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let meta = fs::metadata(dir).map_err(|e| ConfigError::Read {
        path: dir.to_path_buf(),
        source: e,
    })?;
    if !meta.is_dir() {
        return Err(ConfigError::NotADirectory(dir.to_path_buf()));
    }

    let mut files = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if is_ignored_file(&name) || DeclarationFormat::from_file_name(&name).is_none() {
            continue;
        }
        files.insert(entry.path());
    }
    Ok(files.into_iter().collect())
}

fn is_ignored_file(name: &str) -> bool {
    name.starts_with('.') // hidden
        || name.ends_with('~') // vim
        || (name.starts_with('#') && name.ends_with('#')) // emacs
}
