//! The Provisioning Engine boundary for Padstone.
//!
//! This crate defines what padstone hands to an engine (`EngineRequest`, built
//! from the whole `ResourceGraph`) and what it expects back, the
//! `ProvisioningEngine` trait, the explicit `ProviderRegistry` discovered from
//! plugin directories, and two engines: a deterministic in-process
//! `MockEngine` and `ExecEngine`, which drives an external program over a
//! JSON-lines protocol.

pub mod backend;
pub mod exec;
pub mod mock;
pub mod registry;
pub mod request;

pub use backend::{select_engine, Diagnostics, ProvisioningEngine, StateCallback};
pub use exec::ExecEngine;
pub use mock::MockEngine;
pub use registry::{plugin_search_dirs, ProviderRegistry};
pub use request::{EngineRequest, GraphScope, ResourceGraph, ScopedProvider, Variables};

use thiserror::Error;

/// Failure reported by a state hook; halts the apply in progress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("plan failed: {0}")]
    Plan(String),
    #[error("apply failed: {0}")]
    Apply(String),
    #[error("apply halted by state hook: {0}")]
    Halted(HookError),
    #[error("engine '{0}' is not available")]
    Unavailable(String),
    #[error("engine protocol violation: {0}")]
    Protocol(String),
}
