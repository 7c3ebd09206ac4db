//! Deterministic in-process engine used by tests and `--engine mock`.
//!
//! Resources are "provisioned" by recording them in the state with an id
//! derived from the document lineage, so repeated runs are reproducible.
//! `${...}` references in attributes and outputs are resolved against the
//! state being built.

use crate::backend::{Diagnostics, ProvisioningEngine, StateCallback};
use crate::request::{EngineRequest, GraphScope};
use crate::EngineError;
use padstone_schema::{ModulePath, ResourceKey};
use padstone_state::{ResourceState, StateDocument};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// Resource type of the placeholder recorded in every module scope.
pub const MODULE_RESOURCE_TYPE: &str = "mock_module";

#[derive(Debug, Default)]
struct Faults {
    fail_after: Option<usize>,
    survivors: BTreeSet<ResourceKey>,
    validation_errors: Vec<String>,
}

#[derive(Debug)]
enum Change {
    Create {
        scope: ModulePath,
        key: ResourceKey,
        resource: ResourceState,
    },
    Remove {
        scope: ModulePath,
        key: ResourceKey,
    },
}

struct Progress {
    state: StateDocument,
    applied: usize,
    error: Option<EngineError>,
}

pub struct MockEngine {
    workers: usize,
    faults: Mutex<Faults>,
    validate_calls: AtomicUsize,
    apply_calls: AtomicUsize,
    changes: AtomicUsize,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            workers: 1,
            faults: Mutex::new(Faults::default()),
            validate_calls: AtomicUsize::new(0),
            apply_calls: AtomicUsize::new(0),
            changes: AtomicUsize::new(0),
        }
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply changes from `workers` threads at once.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Make the next apply fail after `changes` successful state changes.
    pub fn fail_next_apply_after(&self, changes: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_after = Some(changes);
        }
    }

    /// Resources with this key are never removed by a destroy.
    pub fn survive_destroy(&self, key: impl Into<ResourceKey>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.survivors.insert(key.into());
        }
    }

    /// Report `message` as an error from every validation.
    pub fn inject_validation_error(&self, message: impl Into<String>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.validation_errors.push(message.into());
        }
    }

    pub fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Total engine invocations of any kind.
    pub fn calls(&self) -> usize {
        self.validate_calls() + self.apply_calls()
    }

    /// State changes applied across all calls.
    pub fn changes_applied(&self) -> usize {
        self.changes.load(Ordering::SeqCst)
    }

    fn lock_faults(&self) -> Result<std::sync::MutexGuard<'_, Faults>, EngineError> {
        self.faults
            .lock()
            .map_err(|e| EngineError::Apply(format!("mutex poisoned: {e}")))
    }

    fn apply_changes(request: &EngineRequest) -> Vec<Change> {
        let desired = desired_resources(request);
        let mut changes = Vec::new();
        for ((scope, key), resource) in &desired {
            if !request.state.contains(scope, key) {
                changes.push(Change::Create {
                    scope: scope.clone(),
                    key: key.clone(),
                    resource: resource.clone(),
                });
            }
        }
        for (scope, key) in request.state.resource_addresses() {
            if !desired.contains_key(&(scope.clone(), key.clone())) {
                changes.push(Change::Remove { scope, key });
            }
        }
        changes
    }

    fn destroy_changes(request: &EngineRequest, survivors: &BTreeSet<ResourceKey>) -> Vec<Change> {
        // Nested scopes first.
        let mut addresses: Vec<_> = request.state.resource_addresses().into_iter().collect();
        addresses.sort_by(|a, b| b.0.segments().len().cmp(&a.0.segments().len()));
        addresses
            .into_iter()
            .filter(|(_, key)| !survivors.contains(key))
            .map(|(scope, key)| Change::Remove { scope, key })
            .collect()
    }

    /// Apply every change, serially or from `self.workers` threads.
    fn execute(
        &self,
        state: StateDocument,
        changes: Vec<Change>,
        fail_after: Option<usize>,
        on_state: StateCallback<'_>,
    ) -> Result<StateDocument, EngineError> {
        let progress = Mutex::new(Progress {
            state,
            applied: 0,
            error: None,
        });

        if self.workers <= 1 {
            for change in changes {
                if !self.apply_one(&progress, change, fail_after, on_state) {
                    break;
                }
            }
        } else {
            let queue = Mutex::new(changes.into_iter());
            std::thread::scope(|s| {
                for _ in 0..self.workers {
                    s.spawn(|| loop {
                        let next = match queue.lock() {
                            Ok(mut q) => q.next(),
                            Err(_) => None,
                        };
                        let Some(change) = next else { break };
                        if !self.apply_one(&progress, change, fail_after, on_state) {
                            break;
                        }
                    });
                }
            });
        }

        let progress = progress
            .into_inner()
            .map_err(|e| EngineError::Apply(format!("mutex poisoned: {e}")))?;
        match progress.error {
            Some(e) => Err(e),
            None => Ok(progress.state),
        }
    }

    /// Apply one change and report the new state; `false` stops the run.
    ///
    /// The progress lock is held across the callback so callbacks never overlap.
    fn apply_one(
        &self,
        progress: &Mutex<Progress>,
        change: Change,
        fail_after: Option<usize>,
        on_state: StateCallback<'_>,
    ) -> bool {
        let Ok(mut p) = progress.lock() else {
            return false;
        };
        if p.error.is_some() {
            return false;
        }
        if fail_after == Some(p.applied) {
            p.error = Some(EngineError::Apply(format!(
                "injected failure after {} change(s)",
                p.applied
            )));
            return false;
        }

        match change {
            Change::Create {
                scope,
                key,
                resource,
            } => {
                debug!("creating {key} in {scope}");
                p.state.insert_resource(&scope, key, resource);
            }
            Change::Remove { scope, key } => {
                debug!("destroying {key} in {scope}");
                p.state.remove_resource(&scope, &key);
            }
        }
        p.state.serial += 1;
        p.applied += 1;
        self.changes.fetch_add(1, Ordering::SeqCst);

        if let Err(hook) = on_state(&p.state) {
            p.error = Some(EngineError::Halted(hook));
            return false;
        }
        true
    }
}

impl ProvisioningEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn validate(&self, request: &EngineRequest) -> Result<Diagnostics, EngineError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        let mut diagnostics = Diagnostics::default();

        for scope in &request.graph.scopes {
            let mut strings = Vec::new();
            for r in &scope.resources {
                collect_strings(&serde_json::Value::Object(r.parameters.clone()), &mut strings);
                for dep in &r.depends_on {
                    if scope.resource(dep).is_none() {
                        diagnostics.errors.push(format!(
                            "{}: {} depends on unknown resource '{dep}'",
                            scope.path, r.key
                        ));
                    }
                }
            }
            for m in &scope.modules {
                collect_strings(&serde_json::Value::Object(m.parameters.clone()), &mut strings);
            }
            for o in &scope.outputs {
                collect_strings(&o.value, &mut strings);
            }
            for s in strings {
                for reference in references(&s) {
                    if let Err(reason) = check_reference(request, scope, reference) {
                        diagnostics
                            .errors
                            .push(format!("{}: ${{{reference}}}: {reason}", scope.path));
                    }
                }
            }
        }

        for scoped in &request.providers {
            if !request.registry.contains_provider(&scoped.provider.name) {
                diagnostics.warnings.push(format!(
                    "provider '{}' is not installed",
                    scoped.provider.name
                ));
            }
        }

        diagnostics
            .errors
            .extend(self.lock_faults()?.validation_errors.iter().cloned());
        Ok(diagnostics)
    }

    fn plan_and_apply(
        &self,
        request: &EngineRequest,
        on_state: StateCallback<'_>,
    ) -> Result<StateDocument, EngineError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        let (fail_after, survivors) = {
            let mut faults = self.lock_faults()?;
            (faults.fail_after.take(), faults.survivors.clone())
        };

        let changes = if request.destroy {
            Self::destroy_changes(request, &survivors)
        } else {
            Self::apply_changes(request)
        };
        info!(
            "mock engine: {} change(s) to apply{}",
            changes.len(),
            if request.destroy { " (destroy)" } else { "" }
        );

        let mut state = self.execute(request.state.clone(), changes, fail_after, on_state)?;

        // Outputs are recomputed after resources settle.
        let before = state.clone();
        if request.destroy {
            for module in &mut state.modules {
                module.outputs.clear();
            }
        } else {
            refresh_outputs(request, &mut state);
        }
        state.prune_empty_scopes();
        if state != before {
            state.serial += 1;
            on_state(&state).map_err(EngineError::Halted)?;
        }
        Ok(state)
    }
}

/// Resource id the mock assigns to `key` in `scope` for a given lineage.
fn mock_id(lineage: &str, scope: &ModulePath, key: &ResourceKey) -> String {
    let hash = blake3::hash(format!("{lineage}|{scope}|{key}").as_bytes());
    format!("{}-{}", key.resource_type(), &hash.to_hex()[..12])
}

/// Every resource the graph asks for, with references resolved.
fn desired_resources(request: &EngineRequest) -> BTreeMap<(ModulePath, ResourceKey), ResourceState> {
    let lineage = &request.state.lineage;
    let mut ids: BTreeMap<(ModulePath, ResourceKey), String> = BTreeMap::new();
    for scope in &request.graph.scopes {
        for r in &scope.resources {
            let id = existing_id(&request.state, &scope.path, &r.key)
                .unwrap_or_else(|| mock_id(lineage, &scope.path, &r.key));
            ids.insert((scope.path.clone(), r.key.clone()), id);
        }
        for m in &scope.modules {
            let (path, key) = module_address(&scope.path, &m.name);
            let id = existing_id(&request.state, &path, &key)
                .unwrap_or_else(|| mock_id(lineage, &path, &key));
            ids.insert((path, key), id);
        }
    }

    let mut desired = BTreeMap::new();
    for scope in &request.graph.scopes {
        let lookup = |expr: &str| lookup_id(request, &ids, &scope.path, expr);
        for r in &scope.resources {
            let address = (scope.path.clone(), r.key.clone());
            let mut resource = ResourceState::new(&r.resource_type, ids[&address].clone());
            if let serde_json::Value::Object(attrs) =
                interpolate(&serde_json::Value::Object(r.parameters.clone()), &lookup)
            {
                resource.attributes = attrs;
            }
            resource.provider.clone_from(&r.provider);
            desired.insert(address, resource);
        }
        for m in &scope.modules {
            let address = module_address(&scope.path, &m.name);
            let mut resource = ResourceState::new(MODULE_RESOURCE_TYPE, ids[&address].clone());
            resource
                .attributes
                .insert("source".to_owned(), serde_json::Value::String(m.source.clone()));
            if let serde_json::Value::Object(attrs) =
                interpolate(&serde_json::Value::Object(m.parameters.clone()), &lookup)
            {
                resource.attributes.extend(attrs);
            }
            desired.insert(address, resource);
        }
    }
    desired
}

fn module_address(scope: &ModulePath, module: &str) -> (ModulePath, ResourceKey) {
    (
        scope.child(module),
        ResourceKey::from_parts(MODULE_RESOURCE_TYPE, "instance"),
    )
}

fn existing_id(state: &StateDocument, scope: &ModulePath, key: &ResourceKey) -> Option<String> {
    state
        .module(scope)
        .and_then(|m| m.resources.get(key))
        .map(|r| r.id.clone())
}

fn lookup_id(
    request: &EngineRequest,
    ids: &BTreeMap<(ModulePath, ResourceKey), String>,
    scope: &ModulePath,
    expr: &str,
) -> Option<serde_json::Value> {
    let parts: Vec<&str> = expr.split('.').collect();
    match parts.as_slice() {
        ["var", name] => request.variables.get(*name).cloned(),
        [t, n, "id"] => ids
            .get(&(scope.clone(), ResourceKey::from_parts(t, n)))
            .map(|id| serde_json::Value::String(id.clone())),
        _ => None,
    }
}

fn refresh_outputs(request: &EngineRequest, state: &mut StateDocument) {
    for scope in &request.graph.scopes {
        let snapshot = state.clone();
        let lookup = |expr: &str| lookup_state(request, &snapshot, &scope.path, expr);
        let mut outputs = BTreeMap::new();
        for output in &scope.outputs {
            outputs.insert(output.name.clone(), interpolate(&output.value, &lookup));
        }
        if outputs.is_empty() && state.module(&scope.path).is_none() {
            continue;
        }
        state.module_mut(&scope.path).outputs = outputs;
    }
}

fn lookup_state(
    request: &EngineRequest,
    state: &StateDocument,
    scope: &ModulePath,
    expr: &str,
) -> Option<serde_json::Value> {
    let parts: Vec<&str> = expr.split('.').collect();
    match parts.as_slice() {
        ["var", name] => request.variables.get(*name).cloned(),
        [t, n, attr] => {
            let resource = state
                .module(scope)?
                .resources
                .get(&ResourceKey::from_parts(t, n))?;
            if *attr == "id" {
                Some(serde_json::Value::String(resource.id.clone()))
            } else {
                resource.attributes.get(*attr).cloned()
            }
        }
        _ => None,
    }
}

/// Contents of every `${...}` in `s`.
fn references(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        out.push(&after[..end]);
        rest = &after[end + 1..];
    }
    out
}

fn check_reference(request: &EngineRequest, scope: &GraphScope, reference: &str) -> Result<(), String> {
    let parts: Vec<&str> = reference.split('.').collect();
    match parts.as_slice() {
        ["var", name] => {
            if request.variables.contains_key(*name) {
                Ok(())
            } else {
                Err(format!("unknown variable '{name}'"))
            }
        }
        ["module", name, _] => {
            if scope.module(name).is_some() {
                Ok(())
            } else {
                Err(format!("unknown module '{name}'"))
            }
        }
        ["target", name, _] => {
            if request.graph.scope(&ModulePath::root().child(name)).is_some() {
                Ok(())
            } else {
                Err(format!("unknown target '{name}'"))
            }
        }
        [t, n, _] if !t.is_empty() && !n.is_empty() => {
            if scope.resource(&ResourceKey::from_parts(t, n)).is_some() {
                Ok(())
            } else {
                Err(format!("unknown resource '{t}.{n}'"))
            }
        }
        _ => Err("malformed reference".to_owned()),
    }
}

fn collect_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

/// Replace resolvable references in every string of `value`.
///
/// A string that is exactly one reference takes the referenced value as-is;
/// unresolvable references are left untouched.
fn interpolate(
    value: &serde_json::Value,
    lookup: &dyn Fn(&str) -> Option<serde_json::Value>,
) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => {
            let refs = references(s);
            if refs.len() == 1 && *s == format!("${{{}}}", refs[0]) {
                return lookup(refs[0]).unwrap_or_else(|| value.clone());
            }
            let mut out = s.clone();
            for r in refs {
                if let Some(v) = lookup(r) {
                    let text = match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    out = out.replace(&format!("${{{r}}}"), &text);
                }
            }
            serde_json::Value::String(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| interpolate(v, lookup)).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, lookup)))
                .collect(),
        ),
        other => other.clone(),
    }
}
