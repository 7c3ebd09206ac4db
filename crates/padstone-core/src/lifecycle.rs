use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// Where an orchestrator stands in the build/cleanup/destroy lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing applied yet.
    Fresh,
    /// Constructed from a previously persisted state document.
    Loaded,
    Built,
    CleanedUp,
    Destroyed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Fresh => write!(f, "fresh"),
            Phase::Loaded => write!(f, "loaded"),
            Phase::Built => write!(f, "built"),
            Phase::CleanedUp => write!(f, "cleaned_up"),
            Phase::Destroyed => write!(f, "destroyed"),
        }
    }
}

pub fn validate_transition(from: Phase, to: Phase) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            Phase::Fresh | Phase::Loaded | Phase::Built | Phase::Destroyed,
            Phase::Built
        ) | (Phase::Built, Phase::CleanedUp)
            | (_, Phase::Destroyed)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
