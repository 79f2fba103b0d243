use std::path::{Path, PathBuf};

use crate::path::normalize_path;

/// Classifies resolved source locations as workspace-internal or external.
///
/// External locations live inside an archive (JAR/zip), under the JDK home,
/// or inside a dependency cache (Gradle/Maven); definitions pointing there
/// cannot be returned as plain `file:` URIs and go through the fallback
/// chain instead.
#[derive(Debug, Clone, Default)]
pub struct ArchiveDetector {
    workspace_roots: Vec<PathBuf>,
    jdk_home: Option<PathBuf>,
    cache_roots: Vec<PathBuf>,
}

impl ArchiveDetector {
    pub fn new(workspace_roots: Vec<PathBuf>, jdk_home: Option<PathBuf>) -> Self {
        let jdk_home = jdk_home
            .or_else(|| std::env::var_os("JAVA_HOME").map(PathBuf::from))
            .map(|p| normalize_path(&p));

        let mut cache_roots = Vec::new();
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            cache_roots.push(home.join(".gradle"));
            cache_roots.push(home.join(".m2"));
        }

        Self {
            workspace_roots: workspace_roots.iter().map(|p| normalize_path(p)).collect(),
            jdk_home,
            cache_roots,
        }
    }

    pub fn set_workspace_roots(&mut self, roots: Vec<PathBuf>) {
        self.workspace_roots = roots.iter().map(|p| normalize_path(p)).collect();
    }

    /// Returns `true` when `path` is not plain workspace source: an archive
    /// member, a JDK-shipped file, a dependency-cache file, or anything
    /// outside every workspace root.
    pub fn is_external(&self, path: &Path) -> bool {
        let path = normalize_path(path);

        if is_archive_path(&path) {
            return true;
        }
        if let Some(jdk) = &self.jdk_home {
            if path.starts_with(jdk) {
                return true;
            }
        }
        if self.cache_roots.iter().any(|root| path.starts_with(root)) {
            return true;
        }

        !self
            .workspace_roots
            .iter()
            .any(|root| path.starts_with(root))
    }
}

fn is_archive_path(path: &Path) -> bool {
    // A `.class`/`.java`/`.kt` entry inside an archive keeps the archive
    // extension somewhere in its ancestry (`.../dep.jar/com/Foo.class`).
    path.ancestors().any(|ancestor| {
        matches!(
            ancestor
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase)
                .as_deref(),
            Some("jar" | "zip" | "jmod")
        )
    })
}
