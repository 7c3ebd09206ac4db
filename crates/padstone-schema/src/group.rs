//! Lifecycle groups and the membership queries the state partitioner runs on.

use crate::declaration::Parameters;
use crate::types::{GroupName, ModulePath, ResourceKey};
use crate::ConfigError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Name of the single group a flat (temporary/result) configuration produces.
pub const DEFAULT_GROUP: &str = "default";

/// Which half of a lifecycle group a declaration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Build-time scaffolding, destroyed by cleanup.
    Intermediate,
    /// Durable artifacts, kept after cleanup.
    Result,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Intermediate => write!(f, "temporary"),
            Role::Result => write!(f, "result"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub key: ResourceKey,
    pub resource_type: String,
    pub name: String,
    /// Explicit provider reference (`name` or `name.alias`).
    pub provider: Option<String>,
    pub depends_on: Vec<ResourceKey>,
    pub parameters: Parameters,
}

impl Resource {
    /// Build a resource from its block, lifting the `provider` and `depends_on` keys.
    pub fn from_block(
        resource_type: &str,
        name: &str,
        mut parameters: Parameters,
    ) -> Result<Self, ConfigError> {
        let key = ResourceKey::from_parts(resource_type, name);

        let provider = match parameters.remove("provider") {
            None => None,
            Some(serde_json::Value::String(p)) => Some(p),
            Some(other) => {
                return Err(ConfigError::InvalidResource {
                    key: key.to_string(),
                    reason: format!("provider must be a string, got {other}"),
                })
            }
        };

        let depends_on = match parameters.remove("depends_on") {
            None => Vec::new(),
            Some(serde_json::Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => Ok(ResourceKey::new(s)),
                    other => Err(ConfigError::InvalidResource {
                        key: key.to_string(),
                        reason: format!("depends_on entries must be strings, got {other}"),
                    }),
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(ConfigError::InvalidResource {
                    key: key.to_string(),
                    reason: format!("depends_on must be a list, got {other}"),
                })
            }
        };

        Ok(Self {
            key,
            resource_type: resource_type.to_owned(),
            name: name.to_owned(),
            provider,
            depends_on,
            parameters,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Module {
    pub name: String,
    pub source: String,
    pub parameters: Parameters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Empty for the default instance of the provider.
    pub alias: String,
    pub parameters: Parameters,
}

impl ProviderConfig {
    /// `name` for the default instance, `name.alias` otherwise.
    pub fn full_name(&self) -> String {
        if self.alias.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.alias)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    pub name: String,
    pub value: serde_json::Value,
    pub description: String,
    pub sensitive: bool,
}

/// Modules and resources sharing one role within one group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceSet {
    pub modules: Vec<Module>,
    pub resources: Vec<Resource>,
}

impl ResourceSet {
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.resources.is_empty()
    }

    pub fn append(&mut self, other: ResourceSet) {
        self.modules.extend(other.modules);
        self.resources.extend(other.resources);
    }
}

/// A named partition of configured objects sharing a scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleGroup {
    pub name: GroupName,
    /// Module scope the group's resources live in.
    pub scope: ModulePath,
    pub intermediate: ResourceSet,
    pub result: ResourceSet,
    pub providers: Vec<ProviderConfig>,
    pub outputs: Vec<Output>,
}

impl LifecycleGroup {
    pub fn new(name: impl Into<GroupName>, scope: ModulePath) -> Self {
        Self {
            name: name.into(),
            scope,
            intermediate: ResourceSet::default(),
            result: ResourceSet::default(),
            providers: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn set(&self, role: Role) -> &ResourceSet {
        match role {
            Role::Intermediate => &self.intermediate,
            Role::Result => &self.result,
        }
    }

    /// Role a resource key of this group's scope belongs to.
    pub fn role_of(&self, key: &ResourceKey) -> Option<Role> {
        [Role::Intermediate, Role::Result]
            .into_iter()
            .find(|role| self.set(*role).resources.iter().any(|r| r.key == *key))
    }

    pub fn append(&mut self, other: LifecycleGroup) {
        self.intermediate.append(other.intermediate);
        self.result.append(other.result);
        self.providers.extend(other.providers);
        self.outputs.extend(other.outputs);
    }
}

/// Members of one role inside one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeMembers {
    pub resources: BTreeSet<ResourceKey>,
    /// Modules declared in the scope; each owns the nested scope `scope + [module]`.
    pub modules: BTreeSet<String>,
}

/// Scope-qualified membership of one role across all groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    scopes: BTreeMap<ModulePath, ScopeMembers>,
}

impl Membership {
    pub fn for_role(groups: &[LifecycleGroup], role: Role) -> Self {
        let mut scopes: BTreeMap<ModulePath, ScopeMembers> = BTreeMap::new();
        for group in groups {
            let set = group.set(role);
            let members = scopes.entry(group.scope.clone()).or_default();
            members
                .resources
                .extend(set.resources.iter().map(|r| r.key.clone()));
            members
                .modules
                .extend(set.modules.iter().map(|m| m.name.clone()));
        }
        Self { scopes }
    }

    pub fn scopes(&self) -> impl Iterator<Item = (&ModulePath, &ScopeMembers)> {
        self.scopes.iter()
    }

    pub fn contains(&self, scope: &ModulePath, key: &ResourceKey) -> bool {
        self.scopes
            .get(scope)
            .is_some_and(|m| m.resources.contains(key))
    }

    /// True when `path` is the scope of a member module, or nested below one.
    pub fn owns_scope(&self, path: &ModulePath) -> bool {
        self.scopes.iter().any(|(scope, members)| {
            members
                .modules
                .iter()
                .any(|module| path.starts_with(&scope.child(module)))
        })
    }

    pub fn resource_count(&self) -> usize {
        self.scopes.values().map(|m| m.resources.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes
            .values()
            .all(|m| m.resources.is_empty() && m.modules.is_empty())
    }
}

/// The temporary/result membership pair a state document is split along.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub temporary: Membership,
    pub result: Membership,
}

impl Partition {
    pub fn from_groups(groups: &[LifecycleGroup]) -> Self {
        Self {
            temporary: Membership::for_role(groups, Role::Intermediate),
            result: Membership::for_role(groups, Role::Result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(t: &str, n: &str) -> Resource {
        Resource::from_block(t, n, Parameters::new()).unwrap()
    }

    fn module(name: &str) -> Module {
        Module {
            name: name.to_owned(),
            source: format!("./{name}"),
            parameters: Parameters::new(),
        }
    }

    fn sample_group() -> LifecycleGroup {
        let mut group = LifecycleGroup::new(DEFAULT_GROUP, ModulePath::root());
        group.intermediate.resources.push(resource("aws_instance", "builder"));
        group.intermediate.modules.push(module("build_support"));
        group.result.resources.push(resource("aws_ami", "image"));
        group
    }

    #[test]
    fn resource_lifts_provider_and_depends_on() {
        let mut params = Parameters::new();
        params.insert("provider".to_owned(), serde_json::json!("aws.use1"));
        params.insert(
            "depends_on".to_owned(),
            serde_json::json!(["aws_instance.builder"]),
        );
        params.insert("ami".to_owned(), serde_json::json!("ami-1"));
        let r = Resource::from_block("aws_ami_copy", "result", params).unwrap();
        assert_eq!(r.key, "aws_ami_copy.result");
        assert_eq!(r.provider.as_deref(), Some("aws.use1"));
        assert_eq!(r.depends_on, vec![ResourceKey::new("aws_instance.builder")]);
        assert!(r.parameters.contains_key("ami"));
        assert!(!r.parameters.contains_key("provider"));
    }

    #[test]
    fn resource_rejects_non_string_provider() {
        let mut params = Parameters::new();
        params.insert("provider".to_owned(), serde_json::json!(3));
        assert!(Resource::from_block("aws_ami", "x", params).is_err());
    }

    #[test]
    fn provider_full_name() {
        let mut p = ProviderConfig {
            name: "aws".to_owned(),
            alias: String::new(),
            parameters: Parameters::new(),
        };
        assert_eq!(p.full_name(), "aws");
        p.alias = "use1".to_owned();
        assert_eq!(p.full_name(), "aws.use1");
    }

    #[test]
    fn role_of_finds_membership() {
        let group = sample_group();
        assert_eq!(
            group.role_of(&ResourceKey::new("aws_instance.builder")),
            Some(Role::Intermediate)
        );
        assert_eq!(
            group.role_of(&ResourceKey::new("aws_ami.image")),
            Some(Role::Result)
        );
        assert_eq!(group.role_of(&ResourceKey::new("aws_vpc.main")), None);
    }

    #[test]
    fn membership_is_scope_qualified() {
        let mut target = LifecycleGroup::new("ami", ModulePath::root().child("ami"));
        target.result.resources.push(resource("aws_ami", "image"));
        let groups = vec![sample_group(), target];

        let partition = Partition::from_groups(&groups);
        let root = ModulePath::root();
        let ami = root.child("ami");

        assert!(partition
            .temporary
            .contains(&root, &ResourceKey::new("aws_instance.builder")));
        assert!(partition
            .result
            .contains(&ami, &ResourceKey::new("aws_ami.image")));
        assert!(partition
            .result
            .contains(&root, &ResourceKey::new("aws_ami.image")));
        assert!(!partition
            .temporary
            .contains(&ami, &ResourceKey::new("aws_ami.image")));
        assert_eq!(partition.result.resource_count(), 2);
    }

    #[test]
    fn membership_owns_module_scopes() {
        let partition = Partition::from_groups(&[sample_group()]);
        let support = ModulePath::root().child("build_support");
        assert!(partition.temporary.owns_scope(&support));
        assert!(partition.temporary.owns_scope(&support.child("network")));
        assert!(!partition.result.owns_scope(&support));
        assert!(!partition.temporary.owns_scope(&ModulePath::root()));
    }
}
