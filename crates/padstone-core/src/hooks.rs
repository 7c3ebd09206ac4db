//! Side effects run after every engine state change.

use padstone_engine::HookError;
use padstone_state::{StateDocument, StateFile};
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Durably writes each reported state document to one file.
///
/// Calls are serialized, so concurrent engine workers never interleave writes.
#[derive(Debug)]
pub struct StatePersister {
    file: StateFile,
    lock: Mutex<()>,
}

impl StatePersister {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            file: StateFile::new(path.as_ref()),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn persist(&self, doc: &StateDocument) -> Result<(), HookError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| HookError(format!("mutex poisoned: {e}")))?;
        self.file.write(doc).map_err(|e| {
            HookError(format!(
                "failed to write state to {}: {e}",
                self.file.path().display()
            ))
        })
    }
}

type Observer = Box<dyn Fn(&StateDocument) -> Result<(), HookError> + Send + Sync>;

/// Ordered observers notified after every persisted state change.
#[derive(Default)]
pub struct StateObservers {
    observers: Vec<Observer>,
}

impl fmt::Debug for StateObservers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateObservers")
            .field("len", &self.observers.len())
            .finish()
    }
}

impl StateObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, observer: F)
    where
        F: Fn(&StateDocument) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Run every observer in order; the first failure stops the chain.
    pub fn notify(&self, doc: &StateDocument) -> Result<(), HookError> {
        for (i, observer) in self.observers.iter().enumerate() {
            observer(doc).inspect_err(|e| debug!("state observer {i} failed: {e}"))?;
        }
        Ok(())
    }
}
