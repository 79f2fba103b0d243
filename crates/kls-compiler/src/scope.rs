use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::tree::Declaration;

/// Read access to the declarations reachable from one module's root,
/// organized by package.
///
/// The symbol index walks this depth-first during a rebuild; the incremental
/// JAR pass asks for individual packages.
pub trait ModuleScope: Send + Sync {
    fn top_level_packages(&self) -> Vec<String>;

    /// Direct sub-packages of `package` (not transitive).
    fn sub_packages(&self, package: &str) -> Vec<String>;

    fn declarations_in_package(&self, package: &str) -> Vec<Declaration>;
}

/// Probe access to an archive's classfile table.
pub trait JarClassScanner: Send + Sync {
    fn contains_class(&self, jar: &Path, fq_name: &str) -> bool;
}

/// Unions several module scopes into one.
///
/// Used when an operation spans the whole workspace (a full index rebuild
/// covers every module, not just the first one that compiled).
pub struct CompositeModuleScope {
    scopes: Vec<Arc<dyn ModuleScope>>,
}

impl CompositeModuleScope {
    pub fn new(scopes: Vec<Arc<dyn ModuleScope>>) -> Self {
        Self { scopes }
    }
}

impl ModuleScope for CompositeModuleScope {
    fn top_level_packages(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .scopes
            .iter()
            .flat_map(|scope| scope.top_level_packages())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    fn sub_packages(&self, package: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .scopes
            .iter()
            .flat_map(|scope| scope.sub_packages(package))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    fn declarations_in_package(&self, package: &str) -> Vec<Declaration> {
        self.scopes
            .iter()
            .flat_map(|scope| scope.declarations_in_package(package))
            .collect()
    }
}

/// The module descriptor produced by a compilation: a stable id plus the
/// scope its declarations are reachable through.
#[derive(Clone)]
pub struct ModuleHandle {
    name: Option<String>,
    scope: Arc<dyn ModuleScope>,
}

impl ModuleHandle {
    pub fn new(name: Option<String>, scope: Arc<dyn ModuleScope>) -> Self {
        Self { name, scope }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn scope(&self) -> &Arc<dyn ModuleScope> {
        &self.scope
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
