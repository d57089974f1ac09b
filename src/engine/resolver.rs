//! Per-session module resolver.

use super::Module;
use crate::error::ToolError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Binds loaded modules to their canonical path for one session.
///
/// A path can be bound to at most one module at a time; callers must
/// [`release`](Self::release) a module before loading the same path again.
#[derive(Debug, Default)]
pub struct ModuleResolver {
    modules: HashMap<PathBuf, Arc<Module>>,
}

impl ModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonicalize a user-supplied path into a resolver key.
    pub async fn canonical_key(path: &Path) -> Result<PathBuf, ToolError> {
        tokio::fs::canonicalize(path)
            .await
            .map_err(|e| ToolError::LoadFailed(format!("{}: {}", path.display(), e)))
    }

    /// Bind a freshly read module.
    pub fn bind(&mut self, module: Module) -> Result<Arc<Module>, ToolError> {
        let key = module.path().to_path_buf();
        if self.modules.contains_key(&key) {
            return Err(ToolError::LoadFailed(format!(
                "{} is already loaded in this session",
                key.display()
            )));
        }
        let module = Arc::new(module);
        self.modules.insert(key, module.clone());
        debug!(path = %module.path().display(), "Module bound");
        Ok(module)
    }

    /// Replace the module bound at the module's path (after a committed pass).
    pub fn rebind(&mut self, module: Arc<Module>) {
        self.modules.insert(module.path().to_path_buf(), module);
    }

    /// Forget the module bound at `path`, returning it.
    pub fn release(&mut self, path: &Path) -> Option<Arc<Module>> {
        let released = self.modules.remove(path);
        if released.is_some() {
            debug!(path = %path.display(), "Module released");
        }
        released
    }

    pub fn get(&self, path: &Path) -> Option<&Arc<Module>> {
        self.modules.get(path)
    }

    pub fn is_loaded(&self, path: &Path) -> bool {
        self.modules.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Paths currently bound, sorted for stable output.
    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.modules.keys().cloned().collect();
        paths.sort();
        paths
    }
}
