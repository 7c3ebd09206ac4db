//! State documents, state partitioning, and the durable state file for Padstone.
//!
//! This crate provides the state layer: the `StateDocument` tree of module
//! scopes, the partitioner (`remove_members`, `split_state`, `merge`) that
//! splits a document along lifecycle-group membership, and `StateFile`, an
//! atomically written, blake3-checksummed JSON file.

pub mod document;
pub mod file;
pub mod partition;

pub use document::{ModuleState, ResourceState, StateDocument, STATE_FORMAT_VERSION};
pub use file::StateFile;
pub use partition::{difference, merge, remove_members, split_state};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename is durable until its parent directory
/// has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("state format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("integrity check failed for '{}': expected {expected}, got {actual}", path.display())]
    IntegrityFailure {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("state file not found: {}", .0.display())]
    NotFound(PathBuf),
}
