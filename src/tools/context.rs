use crate::runtime::ProcessTable;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Mutable per-session state that tools read and write.
///
/// Owned by the agent session and lent to the executor for one call at a
/// time, so no locking is needed.
pub struct ToolContext {
    /// Files the model has read, created or edited, keyed by
    /// [`ToolContext::file_key`]. Rendered into every system prompt.
    pub files: BTreeMap<String, String>,
    /// Background runs started by `execute_code`.
    pub processes: ProcessTable,
    /// Raw proposals from the editing model, fed back into its prompt.
    pub editor_memory: Vec<String>,
    /// Paths the editing model has already been shown.
    pub editor_files: Vec<String>,
    pub workspace_dir: PathBuf,
}

impl ToolContext {
    pub fn new(workspace_dir: impl Into<PathBuf>, stop_grace: Duration) -> Self {
        Self {
            files: BTreeMap::new(),
            processes: ProcessTable::new(stop_grace),
            editor_memory: Vec::new(),
            editor_files: Vec::new(),
            workspace_dir: workspace_dir.into(),
        }
    }

    /// Resolve a model-supplied path against the workspace directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let expanded = crate::util::expand_path(path);
        if expanded.is_absolute() {
            expanded
        } else {
            self.workspace_dir.join(expanded)
        }
    }

    /// Canonical cache key for a model-supplied path: lexically normalized,
    /// relative to the workspace when inside it, absolute otherwise. So
    /// `a.txt`, `./a.txt` and `sub/../a.txt` share one entry.
    pub fn file_key(&self, path: &str) -> String {
        let resolved = normalize(&self.resolve(path));
        let workspace = normalize(&self.workspace_dir);
        match resolved.strip_prefix(&workspace) {
            Ok(relative) if !relative.as_os_str().is_empty() => {
                relative.to_string_lossy().into_owned()
            }
            _ => resolved.to_string_lossy().into_owned(),
        }
    }

    pub fn remember_file(&mut self, path: &str, content: impl Into<String>) {
        let key = self.file_key(path);
        self.files.insert(key, content.into());
    }

    pub fn cached_file(&self, path: &str) -> Option<&str> {
        self.files.get(&self.file_key(path)).map(String::as_str)
    }

    /// Forget files and editor memory. Background processes are left alone.
    pub fn clear(&mut self) {
        self.files.clear();
        self.editor_memory.clear();
        self.editor_files.clear();
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace_dir
    }
}

/// Drop `.` components and fold `..` into its parent without touching the
/// filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_relative_and_absolute() {
        let ctx = ToolContext::new("/work", Duration::from_secs(1));
        assert_eq!(ctx.resolve("a/b.txt"), PathBuf::from("/work/a/b.txt"));
        assert_eq!(ctx.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn equivalent_paths_share_one_cache_entry() {
        let mut ctx = ToolContext::new("/work", Duration::from_secs(1));
        ctx.remember_file("a.txt", "old");
        ctx.remember_file("./a.txt", "new");
        ctx.remember_file("sub/../a.txt", "newest");
        assert_eq!(ctx.files.len(), 1);
        assert_eq!(ctx.cached_file("a.txt"), Some("newest"));
        assert_eq!(ctx.cached_file("/work/a.txt"), Some("newest"));
        assert!(ctx.files.contains_key("a.txt"));
    }

    #[test]
    fn paths_outside_workspace_stay_absolute() {
        let ctx = ToolContext::new("/work", Duration::from_secs(1));
        assert_eq!(ctx.file_key("../elsewhere/b.txt"), "/elsewhere/b.txt");
        assert_eq!(ctx.file_key("/etc/hosts"), "/etc/hosts");
        assert_eq!(ctx.file_key("nested/./c.txt"), "nested/c.txt");
    }

    #[test]
    fn clear_drops_files_and_memory() {
        let mut ctx = ToolContext::new("/work", Duration::from_secs(1));
        ctx.remember_file("a.txt", "hi");
        ctx.editor_memory.push("proposal".into());
        ctx.editor_files.push("a.txt".into());
        ctx.clear();
        assert!(ctx.files.is_empty());
        assert!(ctx.editor_memory.is_empty());
        assert!(ctx.editor_files.is_empty());
        assert!(ctx.cached_file("a.txt").is_none());
    }
}
