use crate::StateError;
use padstone_schema::{ModulePath, Parameters, ResourceKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// On-disk format version written into every state document.
pub const STATE_FORMAT_VERSION: u32 = 1;

static LINEAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A provisioned object as recorded by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
    #[serde(default)]
    pub attributes: Parameters,
    #[serde(default)]
    pub provider: Option<String>,
}

impl ResourceState {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            attributes: Parameters::new(),
            provider: None,
        }
    }
}

/// One module scope of the state tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    pub path: ModulePath,
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub resources: BTreeMap<ResourceKey, ResourceState>,
}

impl ModuleState {
    pub fn new(path: ModulePath) -> Self {
        Self {
            path,
            outputs: BTreeMap::new(),
            resources: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.outputs.is_empty()
    }
}

/// Snapshot of real infrastructure, organized as a flat list of module scopes.
///
/// The root scope is always present. Scopes are kept sorted by path so that
/// serialization is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    pub format_version: u32,
    /// Bumped by the engine on every mutation.
    pub serial: u64,
    /// Identity of the build this document belongs to.
    pub lineage: String,
    pub modules: Vec<ModuleState>,
    /// blake3 checksum for integrity verification. `None` for hand-edited files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl StateDocument {
    /// An empty document with a fresh lineage.
    pub fn new() -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION,
            serial: 0,
            lineage: new_lineage(),
            modules: vec![ModuleState::new(ModulePath::root())],
            checksum: None,
        }
    }

    pub fn module(&self, path: &ModulePath) -> Option<&ModuleState> {
        self.modules.iter().find(|m| m.path == *path)
    }

    /// The scope at `path`, created (in sorted position) when missing.
    pub fn module_mut(&mut self, path: &ModulePath) -> &mut ModuleState {
        let idx = match self.modules.iter().position(|m| m.path == *path) {
            Some(idx) => idx,
            None => {
                let idx = self.modules.partition_point(|m| m.path < *path);
                self.modules.insert(idx, ModuleState::new(path.clone()));
                idx
            }
        };
        &mut self.modules[idx]
    }

    /// Sort scopes by path, fold repeated scopes into one, and ensure the root.
    ///
    /// Documents read from disk or reported by an engine may list scopes in
    /// any order. Later entries win on key collisions.
    pub fn normalize(&mut self) {
        self.modules.sort_by(|a, b| a.path.cmp(&b.path));
        let mut folded: Vec<ModuleState> = Vec::with_capacity(self.modules.len());
        for module in self.modules.drain(..) {
            match folded.last_mut() {
                Some(last) if last.path == module.path => {
                    last.resources.extend(module.resources);
                    last.outputs.extend(module.outputs);
                }
                _ => folded.push(module),
            }
        }
        self.modules = folded;
        if self.root().is_none() {
            self.root_mut();
        }
    }

    pub fn root(&self) -> Option<&ModuleState> {
        self.module(&ModulePath::root())
    }

    pub fn root_mut(&mut self) -> &mut ModuleState {
        self.module_mut(&ModulePath::root())
    }

    /// Root-scope outputs, or an empty map when the root scope is missing.
    pub fn outputs(&self) -> BTreeMap<String, serde_json::Value> {
        self.root().map(|m| m.outputs.clone()).unwrap_or_default()
    }

    pub fn insert_resource(&mut self, scope: &ModulePath, key: ResourceKey, resource: ResourceState) {
        self.module_mut(scope).resources.insert(key, resource);
    }

    pub fn remove_resource(&mut self, scope: &ModulePath, key: &ResourceKey) -> Option<ResourceState> {
        self.modules
            .iter_mut()
            .find(|m| m.path == *scope)
            .and_then(|m| m.resources.remove(key))
    }

    pub fn contains(&self, scope: &ModulePath, key: &ResourceKey) -> bool {
        self.module(scope)
            .is_some_and(|m| m.resources.contains_key(key))
    }

    /// Every resource in the document, qualified by its scope.
    pub fn resource_addresses(&self) -> BTreeSet<(ModulePath, ResourceKey)> {
        self.modules
            .iter()
            .flat_map(|m| m.resources.keys().map(|k| (m.path.clone(), k.clone())))
            .collect()
    }

    pub fn resource_count(&self) -> usize {
        self.modules.iter().map(|m| m.resources.len()).sum()
    }

    /// True when no scope holds any resource.
    pub fn is_empty(&self) -> bool {
        self.modules.iter().all(|m| m.resources.is_empty())
    }

    /// Drop non-root scopes holding neither resources nor outputs; ensure the root exists.
    pub fn prune_empty_scopes(&mut self) {
        self.modules.retain(|m| m.path.is_root() || !m.is_empty());
        if self.root().is_none() {
            self.modules.insert(0, ModuleState::new(ModulePath::root()));
        }
    }

    /// Checksum over the document content, excluding the checksum field itself.
    pub fn compute_checksum(&self) -> Result<String, StateError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

/// A lineage that is unique per process invocation and per call.
fn new_lineage() -> String {
    let seed = format!(
        "{}:{}:{}",
        chrono::Utc::now().to_rfc3339(),
        std::process::id(),
        LINEAGE_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    blake3::hash(seed.as_bytes()).to_hex()[..32].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ResourceKey {
        ResourceKey::new(s)
    }

    #[test]
    fn new_document_has_root_scope() {
        let doc = StateDocument::new();
        assert_eq!(doc.modules.len(), 1);
        assert!(doc.root().is_some());
        assert!(doc.is_empty());
        assert_eq!(doc.format_version, STATE_FORMAT_VERSION);
    }

    #[test]
    fn lineages_differ() {
        assert_ne!(StateDocument::new().lineage, StateDocument::new().lineage);
    }

    #[test]
    fn module_mut_keeps_scopes_sorted() {
        let mut doc = StateDocument::new();
        let root = ModulePath::root();
        doc.module_mut(&root.child("zeta"));
        doc.module_mut(&root.child("alpha"));
        doc.module_mut(&root.child("alpha"));
        let paths: Vec<String> = doc.modules.iter().map(|m| m.path.to_string()).collect();
        assert_eq!(paths, vec!["root", "root.alpha", "root.zeta"]);
    }

    #[test]
    fn normalize_sorts_and_folds_scopes() {
        let root = ModulePath::root();
        let mut a1 = ModuleState::new(root.child("a"));
        a1.resources
            .insert(key("null_resource.kept"), ResourceState::new("null_resource", "n-1"));
        let mut a2 = ModuleState::new(root.child("a"));
        a2.resources
            .insert(key("null_resource.temp"), ResourceState::new("null_resource", "n-2"));
        let mut doc = StateDocument::new();
        doc.modules = vec![ModuleState::new(root.child("z")), a1, a2];

        doc.normalize();
        let paths: Vec<String> = doc.modules.iter().map(|m| m.path.to_string()).collect();
        assert_eq!(paths, vec!["root", "root.a", "root.z"]);
        assert!(doc.contains(&root.child("a"), &key("null_resource.kept")));
        assert!(doc.contains(&root.child("a"), &key("null_resource.temp")));
    }

    #[test]
    fn module_mut_finds_scopes_out_of_order() {
        let root = ModulePath::root();
        let mut doc = StateDocument::new();
        doc.modules = vec![
            ModuleState::new(root.clone()),
            ModuleState::new(root.child("z")),
            ModuleState::new(root.child("a")),
        ];
        doc.insert_resource(
            &root.child("a"),
            key("null_resource.a"),
            ResourceState::new("null_resource", "n-1"),
        );
        assert_eq!(doc.modules.len(), 3);
        assert!(doc.contains(&root.child("a"), &key("null_resource.a")));
    }

    #[test]
    fn insert_remove_and_count() {
        let mut doc = StateDocument::new();
        let nested = ModulePath::root().child("support");
        doc.insert_resource(&ModulePath::root(), key("aws_instance.a"), ResourceState::new("aws_instance", "i-1"));
        doc.insert_resource(&nested, key("aws_vpc.main"), ResourceState::new("aws_vpc", "vpc-1"));
        assert_eq!(doc.resource_count(), 2);
        assert!(doc.contains(&nested, &key("aws_vpc.main")));
        assert!(!doc.contains(&ModulePath::root(), &key("aws_vpc.main")));

        let removed = doc.remove_resource(&nested, &key("aws_vpc.main")).unwrap();
        assert_eq!(removed.id, "vpc-1");
        assert!(doc.remove_resource(&nested, &key("aws_vpc.main")).is_none());
        assert_eq!(doc.resource_count(), 1);
    }

    #[test]
    fn prune_keeps_root_and_non_empty_scopes() {
        let mut doc = StateDocument::new();
        let root = ModulePath::root();
        doc.module_mut(&root.child("empty"));
        doc.module_mut(&root.child("with_output"))
            .outputs
            .insert("id".to_owned(), serde_json::json!("x"));
        doc.prune_empty_scopes();
        let paths: Vec<String> = doc.modules.iter().map(|m| m.path.to_string()).collect();
        assert_eq!(paths, vec!["root", "root.with_output"]);

        doc.modules.clear();
        doc.prune_empty_scopes();
        assert!(doc.root().is_some());
    }

    #[test]
    fn checksum_ignores_checksum_field() {
        let mut doc = StateDocument::new();
        let before = doc.compute_checksum().unwrap();
        doc.checksum = Some("anything".to_owned());
        assert_eq!(doc.compute_checksum().unwrap(), before);
        doc.serial += 1;
        assert_ne!(doc.compute_checksum().unwrap(), before);
    }

    #[test]
    fn resource_state_json_shape() {
        let mut r = ResourceState::new("aws_instance", "i-1");
        r.attributes.insert("ami".to_owned(), serde_json::json!("ami-123"));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "aws_instance");
        assert_eq!(json["id"], "i-1");
        assert_eq!(json["attributes"]["ami"], "ami-123");
        assert!(json["provider"].is_null());
    }
}
