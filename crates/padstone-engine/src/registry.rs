//! Discovery of provider and provisioner plugin executables.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub const PROVIDER_PREFIX: &str = "padstone-provider-";
pub const PROVISIONER_PREFIX: &str = "padstone-provisioner-";

/// Installed plugins, keyed by name.
///
/// Built once by the caller and passed into every engine request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, PathBuf>,
    provisioners: BTreeMap<String, PathBuf>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_provider(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.providers.insert(name.into(), path.into());
        self
    }

    #[must_use]
    pub fn with_provisioner(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.provisioners.insert(name.into(), path.into());
        self
    }

    /// Scan `dirs` in order; the first executable found for a name wins.
    ///
    /// Unreadable or missing directories are skipped.
    pub fn discover(dirs: &[PathBuf]) -> Self {
        let mut registry = Self::new();
        for dir in dirs {
            let Ok(entries) = fs::read_dir(dir) else {
                trace!("skipping plugin directory {}", dir.display());
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !is_executable(&path) {
                    continue;
                }
                let file_name = entry.file_name();
                let file_name = file_name.to_string_lossy();
                if let Some(name) = file_name.strip_prefix(PROVIDER_PREFIX) {
                    registry.providers.entry(name.to_owned()).or_insert(path);
                } else if let Some(name) = file_name.strip_prefix(PROVISIONER_PREFIX) {
                    registry.provisioners.entry(name.to_owned()).or_insert(path);
                }
            }
        }
        debug!(
            "discovered {} provider(s), {} provisioner(s)",
            registry.providers.len(),
            registry.provisioners.len()
        );
        registry
    }

    pub fn contains_provider(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn contains_provisioner(&self, name: &str) -> bool {
        self.provisioners.contains_key(name)
    }

    pub fn provider_path(&self, name: &str) -> Option<&Path> {
        self.providers.get(name).map(PathBuf::as_path)
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn provisioner_names(&self) -> impl Iterator<Item = &str> {
        self.provisioners.keys().map(String::as_str)
    }
}

/// Plugin search order: `extra` dirs, the running executable's dir, then `PATH`.
pub fn plugin_search_dirs(extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs = extra.to_vec();
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir);
    }
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }
    dirs
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
