use crate::{fsync_dir, StateDocument, StateError, STATE_FORMAT_VERSION};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// The single on-disk state document of one build.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Atomically replace the file with `doc`, embedding a fresh checksum.
    pub fn write(&self, doc: &StateDocument) -> Result<(), StateError> {
        let mut with_checksum = doc.clone();
        with_checksum.checksum = Some(with_checksum.compute_checksum()?);
        let content = serde_json::to_string_pretty(&with_checksum)?;

        let dir = self.dir();
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StateError::Io(e.error))?;
        fsync_dir(&dir)?;

        debug!(
            "wrote state serial {} ({} resources) to {}",
            doc.serial,
            doc.resource_count(),
            self.path.display()
        );
        Ok(())
    }

    pub fn read(&self) -> Result<StateDocument, StateError> {
        if !self.path.exists() {
            return Err(StateError::NotFound(self.path.clone()));
        }
        let content = fs::read_to_string(&self.path)?;
        let mut doc: StateDocument = serde_json::from_str(&content)?;

        if doc.format_version != STATE_FORMAT_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_FORMAT_VERSION,
                found: doc.format_version,
            });
        }

        // Hand-edited documents carry no checksum.
        if let Some(ref expected) = doc.checksum {
            let actual = doc.compute_checksum()?;
            if actual != *expected {
                return Err(StateError::IntegrityFailure {
                    path: self.path.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        doc.normalize();
        Ok(doc)
    }

    /// Delete the file; a missing file is not an error.
    pub fn remove(&self) -> Result<(), StateError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            fsync_dir(&self.dir())?;
            debug!("removed state file {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceState;
    use padstone_schema::{ModulePath, ResourceKey};

    fn sample() -> StateDocument {
        let mut doc = StateDocument::new();
        doc.serial = 3;
        doc.insert_resource(
            &ModulePath::root(),
            ResourceKey::new("aws_ami.image"),
            ResourceState::new("aws_ami", "ami-1"),
        );
        doc
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        assert!(!file.exists());

        file.write(&sample()).unwrap();
        assert!(file.exists());
        let back = file.read().unwrap();
        assert!(back.checksum.is_some());
        assert_eq!(back.modules, sample().modules);
        assert_eq!(back.serial, 3);
    }

    #[test]
    fn write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        file.write(&sample()).unwrap();
        file.write(&sample()).unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("absent.json"));
        assert!(matches!(file.read().unwrap_err(), StateError::NotFound(_)));
    }

    #[test]
    fn tampered_file_fails_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        file.write(&sample()).unwrap();
        let content = fs::read_to_string(file.path()).unwrap();
        fs::write(file.path(), content.replace("ami-1", "ami-2")).unwrap();
        assert!(matches!(
            file.read().unwrap_err(),
            StateError::IntegrityFailure { .. }
        ));
    }

    #[test]
    fn document_without_checksum_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        fs::write(
            file.path(),
            serde_json::to_string_pretty(&sample()).unwrap(),
        )
        .unwrap();
        assert_eq!(file.read().unwrap().resource_count(), 1);
    }

    #[test]
    fn unsorted_scopes_merge_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        fs::write(
            file.path(),
            r#"{"format_version":1,"serial":4,"lineage":"l","modules":[
                {"path":["root"]},
                {"path":["root","z"]},
                {"path":["root","a"],"resources":{"a.kept":{"type":"a","id":"k-1"}}}
            ]}"#,
        )
        .unwrap();
        let base = file.read().unwrap();

        let scope = ModulePath::root().child("a");
        let mut overlay = StateDocument::new();
        overlay.insert_resource(&scope, ResourceKey::new("a.temp"), ResourceState::new("a", "t-1"));

        let merged = crate::merge(&base, &overlay);
        let scopes = merged.modules.iter().filter(|m| m.path == scope).count();
        assert_eq!(scopes, 1);
        assert!(merged.contains(&scope, &ResourceKey::new("a.kept")));
        assert!(merged.contains(&scope, &ResourceKey::new("a.temp")));
    }

    #[test]
    fn unknown_format_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        let mut doc = sample();
        doc.format_version = 99;
        fs::write(file.path(), serde_json::to_string(&doc).unwrap()).unwrap();
        assert!(matches!(
            file.read().unwrap_err(),
            StateError::VersionMismatch { found: 99, .. }
        ));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        file.write(&sample()).unwrap();
        file.remove().unwrap();
        assert!(!file.exists());
        file.remove().unwrap();
    }
}
