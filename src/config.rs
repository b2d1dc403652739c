use camino::{Utf8Path, Utf8PathBuf};

/// On-disk layout and policy of an [`ExecutionEngine`](crate::ExecutionEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub history_dir: Utf8PathBuf,
    pub cache_dir: Utf8PathBuf,
    pub workspace_dir: Utf8PathBuf,
    /// Record a failed execution in the history, so the next attempt knows
    /// which outputs it left behind.
    pub record_failures: bool,
    pub cache_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(".cache/kura")
    }
}

impl EngineConfig {
    /// Everything below a single root: `history/`, `cache/` and
    /// `workspaces/`.
    pub fn new(root: impl AsRef<Utf8Path>) -> Self {
        let root = root.as_ref();
        Self {
            history_dir: root.join("history"),
            cache_dir: root.join("cache"),
            workspace_dir: root.join("workspaces"),
            record_failures: true,
            cache_enabled: true,
        }
    }

    pub fn with_history_dir(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.history_dir = path.into();
        self
    }

    /// Points at a shared cache directory, e.g. one synced between machines.
    pub fn with_cache_dir(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.cache_dir = path.into();
        self
    }

    pub fn with_workspace_dir(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.workspace_dir = path.into();
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    pub fn without_failure_records(mut self) -> Self {
        self.record_failures = false;
        self
    }
}
