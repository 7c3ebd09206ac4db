use crate::hooks::{StateObservers, StatePersister};
use crate::lifecycle::{validate_transition, Phase};
use crate::CoreError;
use padstone_engine::{
    Diagnostics, EngineRequest, HookError, ProviderRegistry, ProvisioningEngine, Variables,
};
use padstone_schema::{Config, ModulePath, Partition, ResourceKey, VariableType};
use padstone_state::{difference, merge, split_state, StateDocument};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// What a destroy left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// No resource remains in any scope.
    Complete,
    /// The engine reported success but these resources are still recorded.
    Partial {
        remaining: Vec<(ModulePath, ResourceKey)>,
    },
}

/// Drives validate, build, cleanup and destroy for one configuration.
///
/// Owns the configuration, the authoritative state document, and the
/// temporary and result views derived from it. Phases run one at a time.
pub struct Orchestrator {
    config: Config,
    partition: Partition,
    engine: Arc<dyn ProvisioningEngine>,
    registry: ProviderRegistry,
    variables: BTreeMap<String, String>,
    state: StateDocument,
    temporary_state: StateDocument,
    result_state: StateDocument,
    phase: Phase,
    persister: Option<StatePersister>,
    observers: StateObservers,
}

impl Orchestrator {
    /// Start from an empty state.
    pub fn new(
        config: Config,
        engine: Arc<dyn ProvisioningEngine>,
        registry: ProviderRegistry,
    ) -> Self {
        let partition = config.partition();
        let state = StateDocument::new();
        let (temporary_state, result_state) = split_state(&state, &partition);
        Self {
            config,
            partition,
            engine,
            registry,
            variables: BTreeMap::new(),
            state,
            temporary_state,
            result_state,
            phase: Phase::Fresh,
            persister: None,
            observers: StateObservers::new(),
        }
    }

    /// Continue from a previously persisted state.
    #[must_use]
    pub fn with_state(mut self, mut state: StateDocument) -> Self {
        state.normalize();
        self.state = state;
        self.phase = Phase::Loaded;
        self.refresh_views();
        self
    }

    /// Variable values supplied by the caller, as `name -> raw value`.
    #[must_use]
    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    #[must_use]
    pub fn with_persister(mut self, persister: StatePersister) -> Self {
        self.persister = Some(persister);
        self
    }

    /// Add an observer called after the persister on every state change.
    #[must_use]
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&StateDocument) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The authoritative state document.
    pub fn state(&self) -> &StateDocument {
        &self.state
    }

    pub fn temporary_state(&self) -> &StateDocument {
        &self.temporary_state
    }

    pub fn result_state(&self) -> &StateDocument {
        &self.result_state
    }

    /// Outputs of the result view.
    ///
    /// Root-scope outputs keep their name; outputs of a group in its own scope
    /// are qualified as `<group>.<name>`.
    pub fn outputs(&self) -> BTreeMap<String, serde_json::Value> {
        let mut outputs = self.result_state.outputs();
        for group in &self.config.groups {
            if group.scope.is_root() {
                continue;
            }
            if let Some(module) = self.result_state.module(&group.scope) {
                for (name, value) in &module.outputs {
                    outputs.insert(format!("{}.{name}", group.name), value.clone());
                }
            }
        }
        outputs
    }

    fn refresh_views(&mut self) {
        let (temporary, result) = split_state(&self.state, &self.partition);
        self.temporary_state = temporary;
        self.result_state = result;
    }

    /// Declared defaults overlaid with supplied values.
    ///
    /// A supplied value for a `list` or `map` variable is read as JSON.
    fn resolved_variables(&self) -> Variables {
        let mut resolved = Variables::new();
        for variable in &self.config.variables {
            if let Some(default) = &variable.default {
                resolved.insert(variable.name.clone(), default.clone());
            }
        }
        for (name, raw) in &self.variables {
            let structured = matches!(
                self.config.variable(name).and_then(|v| v.declared_type),
                Some(VariableType::List | VariableType::Map)
            );
            let value = if structured {
                serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.clone()))
            } else {
                serde_json::Value::String(raw.clone())
            };
            resolved.insert(name.clone(), value);
        }
        resolved
    }

    fn request(&self, state: StateDocument, destroy: bool) -> EngineRequest {
        EngineRequest::new(&self.config, self.resolved_variables(), self.registry.clone())
            .with_state(state)
            .destroying(destroy)
    }

    /// Checks padstone makes before asking the engine.
    fn preflight(&self) -> Diagnostics {
        let mut diagnostics = Diagnostics::default();
        for variable in &self.config.variables {
            if variable.is_required() && !self.variables.contains_key(&variable.name) {
                diagnostics
                    .errors
                    .push(format!("required variable '{}' is not set", variable.name));
            }
        }
        for name in self.variables.keys() {
            if self.config.variable(name).is_none() {
                diagnostics
                    .warnings
                    .push(format!("variable '{name}' is not declared"));
            }
        }
        for (_, provider) in self.config.all_providers() {
            if !self.registry.contains_provider(&provider.name) {
                diagnostics
                    .warnings
                    .push(format!("provider '{}' is not installed", provider.name));
            }
        }
        diagnostics
    }

    /// Validate against the full graph and current state; never mutates.
    ///
    /// Errors are returned in the diagnostics, not as `Err`.
    pub fn validate(&self) -> Result<Diagnostics, CoreError> {
        let mut diagnostics = self.preflight();
        let request = self.request(self.state.clone(), false);
        let engine_diagnostics = self
            .engine
            .validate(&request)
            .map_err(|e| CoreError::from_engine("validate", e))?;
        diagnostics.extend(engine_diagnostics);
        for w in &diagnostics.warnings {
            debug!("validation warning: {w}");
        }
        Ok(diagnostics)
    }

    /// Like [`Orchestrator::validate`], but any error becomes `CoreError::Validation`.
    pub fn ensure_valid(&self) -> Result<Diagnostics, CoreError> {
        let diagnostics = self.validate()?;
        if diagnostics.has_errors() {
            return Err(CoreError::Validation(diagnostics.errors));
        }
        Ok(diagnostics)
    }

    /// Apply the full graph against the current state.
    pub fn build(&mut self) -> Result<(), CoreError> {
        validate_transition(self.phase, Phase::Built)?;
        info!(
            "building {} resource(s) in {} group(s)",
            self.configured_resource_count(),
            self.config.groups.len()
        );

        let (built, checkpoint) = self.run_engine("build", self.state.clone(), false, None)?;
        self.commit(built, checkpoint)?;
        self.phase = Phase::Built;
        info!(
            "build complete: {} temporary, {} result resource(s)",
            self.temporary_state.resource_count(),
            self.result_state.resource_count()
        );
        Ok(())
    }

    /// Destroy the temporary view of the last build.
    ///
    /// While it runs, every persisted document is the result view united with
    /// the temporary resources that still exist.
    pub fn cleanup(&mut self) -> Result<(), CoreError> {
        validate_transition(self.phase, Phase::CleanedUp)?;
        info!(
            "cleaning up {} temporary resource(s)",
            self.temporary_state.resource_count()
        );

        let kept = difference(&self.result_state, &self.temporary_state);
        let (remaining, checkpoint) = self.run_engine(
            "cleanup",
            self.temporary_state.clone(),
            true,
            Some(&kept),
        )?;
        if !remaining.is_empty() {
            warn!(
                "{} temporary resource(s) still recorded after cleanup",
                remaining.resource_count()
            );
        }
        self.commit(merge(&kept, &remaining), checkpoint)?;
        self.phase = Phase::CleanedUp;
        info!(
            "cleanup complete: {} result resource(s) kept",
            self.state.resource_count()
        );
        Ok(())
    }

    /// Destroy everything the authoritative state records.
    pub fn destroy(&mut self) -> Result<DestroyOutcome, CoreError> {
        validate_transition(self.phase, Phase::Destroyed)?;
        info!("destroying {} resource(s)", self.state.resource_count());

        let (destroyed, checkpoint) = self.run_engine("destroy", self.state.clone(), true, None)?;
        self.commit(destroyed, checkpoint)?;
        self.phase = Phase::Destroyed;

        if self.state.is_empty() {
            info!("destroy complete");
            Ok(DestroyOutcome::Complete)
        } else {
            let remaining: Vec<_> = self.state.resource_addresses().into_iter().collect();
            warn!("destroy left {} resource(s) behind", remaining.len());
            Ok(DestroyOutcome::Partial { remaining })
        }
    }

    fn configured_resource_count(&self) -> usize {
        self.partition.temporary.resource_count() + self.partition.result.resource_count()
    }

    /// Run one engine invocation with the hooks attached.
    ///
    /// Every reported document is projected onto `base` (when given), written by
    /// the persister, then passed to the observers. Returns the engine's final
    /// state with the last document written. On failure the authoritative state
    /// becomes that last document, or stays as it was when nothing was written.
    fn run_engine(
        &mut self,
        phase: &'static str,
        input: StateDocument,
        destroy: bool,
        base: Option<&StateDocument>,
    ) -> Result<(StateDocument, Option<StateDocument>), CoreError> {
        let request = self.request(input, destroy);
        let checkpoint: Mutex<Option<StateDocument>> = Mutex::new(None);

        let result = {
            let persister = self.persister.as_ref();
            let observers = &self.observers;
            let on_state = |reported: &StateDocument| -> Result<(), HookError> {
                let authoritative = match base {
                    Some(base) => merge(base, reported),
                    None => reported.clone(),
                };
                let mut last = checkpoint
                    .lock()
                    .map_err(|e| HookError(format!("mutex poisoned: {e}")))?;
                if let Some(persister) = persister {
                    persister.persist(&authoritative)?;
                }
                debug!(
                    "{phase}: state serial {} ({} resources)",
                    authoritative.serial,
                    authoritative.resource_count()
                );
                observers.notify(last.insert(authoritative))
            };
            self.engine.plan_and_apply(&request, &on_state)
        };

        let checkpoint = checkpoint.into_inner().ok().flatten();
        match result {
            Ok(state) => Ok((state, checkpoint)),
            Err(e) => {
                self.fall_back_to(phase, checkpoint);
                Err(CoreError::from_engine(phase, e))
            }
        }
    }

    fn fall_back_to(&mut self, phase: &str, checkpoint: Option<StateDocument>) {
        if let Some(last) = checkpoint {
            warn!("{phase} failed; keeping last persisted state (serial {})", last.serial);
            self.state = last;
            self.refresh_views();
        }
    }

    /// Write `state` out, then make it authoritative.
    ///
    /// When the write fails, `checkpoint` (the last document written during the
    /// phase) becomes authoritative instead.
    fn commit(
        &mut self,
        state: StateDocument,
        checkpoint: Option<StateDocument>,
    ) -> Result<(), CoreError> {
        if let Some(persister) = &self.persister {
            if let Err(e) = persister.persist(&state) {
                self.fall_back_to("commit", checkpoint);
                return Err(CoreError::StatePersistence(e.0));
            }
        }
        self.state = state;
        self.refresh_views();
        Ok(())
    }
}
