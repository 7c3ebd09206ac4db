use crate::request::EngineRequest;
use crate::{EngineError, HookError};
use padstone_state::StateDocument;
use serde::{Deserialize, Serialize};

/// Callback the engine invokes after every state mutation.
///
/// An `Err` halts the apply in progress.
pub type StateCallback<'a> = &'a (dyn Fn(&StateDocument) -> Result<(), HookError> + Sync);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Diagnostics {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }

    /// Append `other`, skipping messages already present.
    pub fn extend(&mut self, other: Diagnostics) {
        for w in other.warnings {
            if !self.warnings.contains(&w) {
                self.warnings.push(w);
            }
        }
        for e in other.errors {
            if !self.errors.contains(&e) {
                self.errors.push(e);
            }
        }
    }
}

/// The plan/apply machinery padstone drives as a black box.
pub trait ProvisioningEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Check the request without mutating anything.
    fn validate(&self, request: &EngineRequest) -> Result<Diagnostics, EngineError>;

    /// Plan and apply `request`, calling `on_state` after each state change.
    ///
    /// On success returns the final state. On failure the last document passed
    /// to `on_state` reflects what was actually applied.
    fn plan_and_apply(
        &self,
        request: &EngineRequest,
        on_state: StateCallback<'_>,
    ) -> Result<StateDocument, EngineError>;
}

/// Resolve an engine spec: `mock` or `exec:<program>`.
pub fn select_engine(spec: &str) -> Result<Box<dyn ProvisioningEngine>, EngineError> {
    match spec.split_once(':') {
        None if spec == "mock" => Ok(Box::new(crate::mock::MockEngine::new())),
        Some(("exec", program)) if !program.is_empty() => {
            Ok(Box::new(crate::exec::ExecEngine::new(program)))
        }
        _ => Err(EngineError::Unavailable(spec.to_owned())),
    }
}
