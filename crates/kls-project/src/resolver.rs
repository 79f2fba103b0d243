use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::classpath::ClassPathEntry;
use crate::registry::ModuleInfo;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("build tool invocation failed: {0}")]
    BuildTool(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One resolver run over the workspace's build configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassPathResolution {
    pub compiled_jars: BTreeSet<ClassPathEntry>,
    pub source_jars: BTreeSet<ClassPathEntry>,
    pub build_script_classpath: BTreeSet<std::path::PathBuf>,
    pub module_class_paths: Vec<ModuleInfo>,
    pub build_file_version: i64,
}

/// Build-tool classpath extraction, specified only by this interface.
///
/// Implementations shell out to Gradle/Maven and may take minutes; callers
/// always run them on a background pool.
pub trait ClassPathResolver: Send + Sync {
    /// Fast resolution: compiled JARs only.
    fn resolve(&self) -> Result<ClassPathResolution, ResolverError>;

    /// Slow resolution including paired source archives. Called off the
    /// critical path and merged over the fast result.
    fn resolve_with_sources(&self) -> Result<ClassPathResolution, ResolverError> {
        self.resolve()
    }

    /// The staleness epoch of the current build configuration.
    fn current_build_file_version(&self) -> i64;
}

/// Memoises resolver output keyed by build-file version.
///
/// A hit requires the cached version to be at least the probe version;
/// `invalidate` drops the memo so the next resolve reruns the build tool.
pub struct CachingClassPathResolver {
    inner: Arc<dyn ClassPathResolver>,
    cached: Mutex<Option<(i64, ClassPathResolution)>>,
}

impl CachingClassPathResolver {
    pub fn new(inner: Arc<dyn ClassPathResolver>) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }

    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    pub fn resolve(&self) -> Result<ClassPathResolution, ResolverError> {
        let version = self.inner.current_build_file_version();
        if let Some((cached_version, resolution)) = self.cached.lock().as_ref() {
            if *cached_version >= version {
                tracing::debug!(
                    target = "kls.classpath",
                    version,
                    "classpath resolver cache hit"
                );
                return Ok(resolution.clone());
            }
        }

        let resolution = self.inner.resolve()?;
        *self.cached.lock() = Some((resolution.build_file_version, resolution.clone()));
        Ok(resolution)
    }

    pub fn resolve_with_sources(&self) -> Result<ClassPathResolution, ResolverError> {
        // Source archives are merged over the cached result rather than
        // cached independently; a with-sources run also refreshes the memo.
        let resolution = self.inner.resolve_with_sources()?;
        *self.cached.lock() = Some((resolution.build_file_version, resolution.clone()));
        Ok(resolution)
    }

    pub fn current_build_file_version(&self) -> i64 {
        self.inner.current_build_file_version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingResolver {
        version: AtomicI64,
        calls: AtomicUsize,
    }

    impl ClassPathResolver for CountingResolver {
        fn resolve(&self) -> Result<ClassPathResolution, ResolverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ClassPathResolution {
                compiled_jars: [ClassPathEntry::new("/deps/a.jar")].into_iter().collect(),
                build_file_version: self.version.load(Ordering::SeqCst),
                ..ClassPathResolution::default()
            })
        }

        fn current_build_file_version(&self) -> i64 {
            self.version.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn memoises_until_build_file_changes() {
        let inner = Arc::new(CountingResolver::default());
        inner.version.store(10, Ordering::SeqCst);
        let cache = CachingClassPathResolver::new(inner.clone());

        cache.resolve().unwrap();
        cache.resolve().unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        inner.version.store(20, Ordering::SeqCst);
        cache.resolve().unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_forces_a_rerun() {
        let inner = Arc::new(CountingResolver::default());
        let cache = CachingClassPathResolver::new(inner.clone());

        cache.resolve().unwrap();
        cache.invalidate();
        cache.resolve().unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
