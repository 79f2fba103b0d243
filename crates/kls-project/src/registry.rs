use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use kls_core::normalize_path;
use parking_lot::RwLock;

/// One build-tool module: a unit of compilation isolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub root_path: PathBuf,
    pub source_dirs: BTreeSet<PathBuf>,
    pub class_path: BTreeSet<PathBuf>,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>, root_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root_path: normalize_path(&root_path.into()),
            source_dirs: BTreeSet::new(),
            class_path: BTreeSet::new(),
        }
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dirs.insert(normalize_path(&dir.into()));
        self
    }

    pub fn with_class_path(mut self, jar: impl Into<PathBuf>) -> Self {
        self.class_path.insert(jar.into());
        self
    }

    /// Path containment over normalised absolute paths. Source dirs win over
    /// the module root so nested-module layouts attribute correctly.
    pub fn contains(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        self.source_dirs.iter().any(|dir| path.starts_with(dir))
            || path.starts_with(&self.root_path)
    }
}

/// Maps file paths to their owning module.
///
/// Readers take the read lock and copy; `replace_all` swaps the whole table
/// when the classpath layer recomputes module assignments.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, ModuleInfo>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn module(&self, name: &str) -> Option<ModuleInfo> {
        self.modules.read().get(name).cloned()
    }

    pub fn all_modules(&self) -> Vec<ModuleInfo> {
        let mut out: Vec<_> = self.modules.read().values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Finds the owning module for `path`.
    ///
    /// When several modules contain the path (nested roots), the one with the
    /// longest root wins.
    pub fn find_module_for_file(&self, path: &Path) -> Option<ModuleInfo> {
        let modules = self.modules.read();
        modules
            .values()
            .filter(|m| m.contains(path))
            .max_by_key(|m| m.root_path.as_os_str().len())
            .cloned()
    }

    pub fn insert(&self, module: ModuleInfo) {
        self.modules.write().insert(module.name.clone(), module);
    }

    pub fn replace_all(&self, modules: impl IntoIterator<Item = ModuleInfo>) {
        let mut table = self.modules.write();
        table.clear();
        for module in modules {
            table.insert(module.name.clone(), module);
        }
    }

    pub fn clear(&self) {
        self.modules.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn finds_module_by_containment() {
        let registry = ModuleRegistry::new();
        registry.insert(ModuleInfo::new("app", "/work/app").with_source_dir("/work/app/src"));
        registry.insert(ModuleInfo::new("lib", "/work/lib"));

        let hit = registry
            .find_module_for_file(Path::new("/work/app/src/Main.kt"))
            .unwrap();
        assert_eq!(hit.name, "app");
        assert!(registry
            .find_module_for_file(Path::new("/elsewhere/Main.kt"))
            .is_none());
    }

    #[test]
    fn nested_roots_prefer_the_deepest_module() {
        let registry = ModuleRegistry::new();
        registry.insert(ModuleInfo::new("root", "/work"));
        registry.insert(ModuleInfo::new("app", "/work/app"));

        let hit = registry
            .find_module_for_file(Path::new("/work/app/src/Main.kt"))
            .unwrap();
        assert_eq!(hit.name, "app");
    }

    #[test]
    fn containment_normalises_paths() {
        let module = ModuleInfo::new("app", "/work/app");
        assert!(module.contains(Path::new("/work/./app/../app/src/Main.kt")));
    }

    #[test]
    fn replace_all_swaps_the_table() {
        let registry = ModuleRegistry::new();
        registry.insert(ModuleInfo::new("old", "/old"));
        registry.replace_all([ModuleInfo::new("new", "/new")]);

        assert!(registry.module("old").is_none());
        assert!(registry.module("new").is_some());
        assert_eq!(registry.len(), 1);
    }
}
