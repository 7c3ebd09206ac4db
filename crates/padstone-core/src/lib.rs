//! Lifecycle orchestration for Padstone builds.
//!
//! This crate ties the configuration model, state partitioning, and a
//! provisioning engine together into the `Orchestrator`: the state machine
//! that validates, builds, cleans up, and destroys a configuration while
//! persisting every state change through the `StatePersister` and any
//! registered `StateObservers`. It also provides phase transition validation
//! and deferred Ctrl-C handling.

pub mod hooks;
pub mod interrupt;
pub mod lifecycle;
pub mod orchestrator;

pub use hooks::{StateObservers, StatePersister};
pub use interrupt::{install_signal_handler, shutdown_requested};
pub use lifecycle::{validate_transition, Phase};
pub use orchestrator::{DestroyOutcome, Orchestrator};

use padstone_engine::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] padstone_schema::ConfigError),
    #[error("state error: {0}")]
    State(#[from] padstone_state::StateError),
    #[error("{phase} failed: {source}")]
    Engine {
        phase: &'static str,
        source: EngineError,
    },
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("state persistence failed: {0}")]
    StatePersistence(String),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Wrap an engine failure of `phase`; a halted apply is a persistence failure.
    pub fn from_engine(phase: &'static str, error: EngineError) -> Self {
        match error {
            EngineError::Halted(hook) => CoreError::StatePersistence(hook.0),
            source => CoreError::Engine { phase, source },
        }
    }
}
