use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use tracing::info;

use crate::builtins;
use crate::manifest::load_custom_dir;
use crate::tool::Plugin;

/// Owns the live plugin collections.
///
/// Built-ins are loaded once at construction; a failure there is fatal to
/// startup (author error).  The custom set lives behind an `Arc` that
/// `reload` replaces in one step, so no caller ever observes a half-updated
/// collection: snapshots taken before a reload keep the old set, snapshots
/// taken after see the new one.
pub struct PluginHost {
    builtins: Vec<Plugin>,
    custom: RwLock<Arc<Vec<Plugin>>>,
    custom_dir: PathBuf,
}

impl PluginHost {
    /// Load built-ins (running each optional `init` exactly once) and do the
    /// initial scan of the custom plugin directory.
    pub fn new(custom_dir: impl Into<PathBuf>) -> Result<Self> {
        let custom_dir = custom_dir.into();

        let builtins = builtins::all(&custom_dir);
        for plugin in &builtins {
            if let Some(init) = &plugin.init {
                init().with_context(|| format!("initialize built-in plugin \"{}\"", plugin.name))?;
            }
        }
        info!(count = builtins.len(), "built-in plugins loaded");

        let custom = load_custom_dir(&custom_dir);
        info!(count = custom.len(), dir = %custom_dir.display(), "custom plugins loaded");

        Ok(Self {
            builtins,
            custom: RwLock::new(Arc::new(custom)),
            custom_dir,
        })
    }

    pub fn custom_dir(&self) -> &Path {
        &self.custom_dir
    }

    /// Current full plugin set: built-ins followed by the active custom set.
    /// Custom plugins are later in load order, so on a tool-id collision they
    /// shadow built-ins in the registry.
    pub fn snapshot(&self) -> Vec<Plugin> {
        let custom = self.custom.read().expect("plugin set poisoned").clone();
        let mut plugins = self.builtins.clone();
        plugins.extend(custom.iter().cloned());
        plugins
    }

    /// Recompute the custom set from disk and atomically swap it in.
    /// Returns the freshly loaded plugins for reporting.
    pub fn reload(&self) -> Vec<Plugin> {
        let fresh = load_custom_dir(&self.custom_dir);
        info!(count = fresh.len(), "custom plugins reloaded");
        *self.custom.write().expect("plugin set poisoned") = Arc::new(fresh.clone());
        fresh
    }

    pub fn custom_count(&self) -> usize {
        self.custom.read().expect("plugin set poisoned").len()
    }

    /// Empty host for unit tests that only need a context value.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            builtins: Vec::new(),
            custom: RwLock::new(Arc::new(Vec::new())),
            custom_dir: std::env::temp_dir(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
