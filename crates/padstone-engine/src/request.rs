use crate::registry::ProviderRegistry;
use padstone_schema::{Config, Module, ModulePath, Output, ProviderConfig, Resource, ResourceKey};
use padstone_state::StateDocument;
use serde::Serialize;
use std::collections::BTreeMap;

/// Resolved variable values handed to the engine.
pub type Variables = BTreeMap<String, serde_json::Value>;

/// Modules, resources and outputs declared in one scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphScope {
    pub path: ModulePath,
    pub resources: Vec<Resource>,
    pub modules: Vec<Module>,
    pub outputs: Vec<Output>,
}

impl GraphScope {
    fn new(path: ModulePath) -> Self {
        Self {
            path,
            resources: Vec::new(),
            modules: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn resource(&self, key: &ResourceKey) -> Option<&Resource> {
        self.resources.iter().find(|r| r.key == *key)
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }
}

/// The configured objects an engine plans against, grouped by scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceGraph {
    pub scopes: Vec<GraphScope>,
}

impl ResourceGraph {
    /// The full graph: every group, both roles.
    pub fn from_config(config: &Config) -> Self {
        let mut scopes: BTreeMap<ModulePath, GraphScope> = BTreeMap::new();
        scopes
            .entry(ModulePath::root())
            .or_insert_with(|| GraphScope::new(ModulePath::root()))
            .outputs
            .extend(config.outputs.iter().cloned());

        for group in &config.groups {
            let scope = scopes
                .entry(group.scope.clone())
                .or_insert_with(|| GraphScope::new(group.scope.clone()));
            for set in [&group.intermediate, &group.result] {
                scope.resources.extend(set.resources.iter().cloned());
                scope.modules.extend(set.modules.iter().cloned());
            }
            scope.outputs.extend(group.outputs.iter().cloned());
        }
        Self {
            scopes: scopes.into_values().collect(),
        }
    }

    pub fn scope(&self, path: &ModulePath) -> Option<&GraphScope> {
        self.scopes.iter().find(|s| s.path == *path)
    }

    pub fn resource_count(&self) -> usize {
        self.scopes.iter().map(|s| s.resources.len()).sum()
    }
}

/// A provider block together with the scope it was declared in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopedProvider {
    pub scope: ModulePath,
    #[serde(flatten)]
    pub provider: ProviderConfig,
}

/// Everything one engine invocation needs. Built fresh per call.
#[derive(Debug, Clone, Serialize)]
pub struct EngineRequest {
    pub graph: ResourceGraph,
    pub variables: Variables,
    pub providers: Vec<ScopedProvider>,
    pub registry: ProviderRegistry,
    pub state: StateDocument,
    pub destroy: bool,
}

impl EngineRequest {
    pub fn new(config: &Config, variables: Variables, registry: ProviderRegistry) -> Self {
        let providers = config
            .all_providers()
            .map(|(scope, provider)| ScopedProvider {
                scope,
                provider: provider.clone(),
            })
            .collect();
        Self {
            graph: ResourceGraph::from_config(config),
            variables,
            providers,
            registry,
            state: StateDocument::new(),
            destroy: false,
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: StateDocument) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn destroying(mut self, destroy: bool) -> Self {
        self.destroy = destroy;
        self
    }
}
