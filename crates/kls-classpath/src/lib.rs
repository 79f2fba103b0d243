//! Workspace classpath ownership: path snapshots, background resolution and
//! compiler lifecycles.
//!
//! Build-tool resolution can take minutes, so it always runs on the
//! scheduler's background pool while the server keeps answering from the
//! previous snapshot (degraded mode before the first READY). A new workspace
//! root or build-file change supersedes any in-flight resolution.

mod lru;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tempfile::TempDir;

use kls_compiler::{Compiler, CompilerProvider, CompilerSnapshot};
use kls_project::{
    build_file_version, is_build_file, CachingClassPathResolver, ClassPathDiff, ClassPathEntry,
    ClassPathResolver, ModuleRegistry,
};
use kls_scheduler::{CancellationToken, Scheduler};

/// Cap on live per-module compiler instances.
pub const MAX_MODULE_COMPILERS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassPathResolutionState {
    Pending,
    Resolving,
    Ready,
    Failed,
}

#[derive(Debug, Default)]
struct PathState {
    workspace_roots: BTreeSet<PathBuf>,
    java_source_path: BTreeSet<PathBuf>,
    build_script_classpath: BTreeSet<PathBuf>,
    classpath: BTreeSet<ClassPathEntry>,
}

impl PathState {
    fn snapshot(&self, output_directory: Option<PathBuf>) -> CompilerSnapshot {
        CompilerSnapshot {
            classpath: self
                .classpath
                .iter()
                .map(|entry| entry.compiled_jar.clone())
                .collect(),
            build_script_classpath: self.build_script_classpath.clone(),
            java_source_path: self.java_source_path.clone(),
            output_directory,
            jvm_target: "default".to_string(),
        }
    }
}

struct ResolutionFlow {
    state: ClassPathResolutionState,
    /// Token of the in-flight resolution; cancelling it supersedes the task.
    token: Option<CancellationToken>,
    generation: u64,
}

type ReadyCallback = Box<dyn Fn(&ClassPathDiff) + Send + Sync>;

/// Owns `{workspace roots, classpath, per-module compilers}` behind a single
/// reader-writer lock. Mutators take the write lock; readers copy snapshots.
pub struct CompilerClassPath {
    provider: Arc<dyn CompilerProvider>,
    resolver: CachingClassPathResolver,
    module_registry: Arc<ModuleRegistry>,
    scheduler: Scheduler,

    paths: RwLock<PathState>,
    output_directory: Mutex<Option<TempDir>>,
    shared_compiler: RwLock<Arc<dyn Compiler>>,
    module_compilers: Mutex<lru::ModuleCompilerLru>,

    flow: Mutex<ResolutionFlow>,
    flow_changed: Condvar,
    generation: AtomicU64,
    on_ready: Mutex<Vec<ReadyCallback>>,
}

impl CompilerClassPath {
    pub fn new(
        provider: Arc<dyn CompilerProvider>,
        resolver: Arc<dyn ClassPathResolver>,
        module_registry: Arc<ModuleRegistry>,
        scheduler: Scheduler,
    ) -> std::io::Result<Self> {
        let output_directory = TempDir::new()?;
        let paths = PathState::default();
        let shared =
            provider.create_compiler(None, &paths.snapshot(Some(output_directory.path().to_path_buf())));

        Ok(Self {
            provider,
            resolver: CachingClassPathResolver::new(resolver),
            module_registry,
            scheduler,
            paths: RwLock::new(paths),
            output_directory: Mutex::new(Some(output_directory)),
            shared_compiler: RwLock::new(shared),
            module_compilers: Mutex::new(lru::ModuleCompilerLru::new(MAX_MODULE_COMPILERS)),
            flow: Mutex::new(ResolutionFlow {
                state: ClassPathResolutionState::Pending,
                token: None,
                generation: 0,
            }),
            flow_changed: Condvar::new(),
            generation: AtomicU64::new(0),
            on_ready: Mutex::new(Vec::new()),
        })
    }

    pub fn module_registry(&self) -> &Arc<ModuleRegistry> {
        &self.module_registry
    }

    pub fn resolution_state(&self) -> ClassPathResolutionState {
        self.flow.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.resolution_state() == ClassPathResolutionState::Ready
    }

    pub fn workspace_roots(&self) -> Vec<PathBuf> {
        self.paths.read().workspace_roots.iter().cloned().collect()
    }

    pub fn classpath(&self) -> BTreeSet<ClassPathEntry> {
        self.paths.read().classpath.clone()
    }

    pub fn output_directory(&self) -> Option<PathBuf> {
        self.output_directory
            .lock()
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
    }

    /// The staleness epoch of the current build configuration across all
    /// workspace roots.
    pub fn current_build_file_version(&self) -> i64 {
        build_file_version(self.workspace_roots())
    }

    /// Registers a callback fired exactly once per READY transition.
    pub fn on_class_path_ready(&self, callback: impl Fn(&ClassPathDiff) + Send + Sync + 'static) {
        self.on_ready.lock().push(Box::new(callback));
    }

    fn note_workspace_root_added(&self, root: &Path) {
        self.paths.write().workspace_roots.insert(root.to_path_buf());
        tracing::info!(target = "kls.classpath", root = %root.display(), "workspace root added");
    }

    fn note_workspace_root_removed(&self, root: &Path) {
        self.paths.write().workspace_roots.remove(root);
    }

    /// Blocks up to `timeout` for the in-flight resolution to settle.
    pub fn wait_for_resolution(&self, timeout: Duration) -> ClassPathResolutionState {
        let deadline = std::time::Instant::now() + timeout;
        let mut flow = self.flow.lock();
        while flow.state == ClassPathResolutionState::Resolving {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            if self.flow_changed.wait_for(&mut flow, remaining).timed_out() {
                break;
            }
        }
        flow.state
    }

    /// Shared compiler for build scripts, unknown modules and single-module
    /// projects.
    pub fn shared_compiler(&self) -> Arc<dyn Compiler> {
        self.shared_compiler.read().clone()
    }

    /// Per-module compiler, created on demand and cached in an LRU of
    /// [`MAX_MODULE_COMPILERS`]. Compiling each module against its own
    /// classpath keeps identically named declarations in sibling modules
    /// from resolving ambiguously.
    pub fn get_compiler_for_module(&self, module_id: Option<&str>) -> Arc<dyn Compiler> {
        let Some(module_id) = module_id else {
            return self.shared_compiler();
        };
        let Some(module) = self.module_registry.module(module_id) else {
            return self.shared_compiler();
        };

        let mut compilers = self.module_compilers.lock();
        if let Some(compiler) = compilers.get(module_id) {
            return compiler;
        }

        let mut snapshot = self.paths.read().snapshot(self.output_directory());
        if !module.class_path.is_empty() {
            snapshot.classpath = module.class_path.clone();
        }
        let compiler = self.provider.create_compiler(Some(module_id), &snapshot);
        compilers.insert(module_id.to_string(), compiler.clone());
        compiler
    }

    pub fn cached_module_compiler_count(&self) -> usize {
        self.module_compilers.lock().len()
    }

    /// Closes every cached per-module compiler. Their compiled trees stay
    /// valid; the next access re-creates the instance.
    pub fn evict_all_module_compilers(&self) {
        self.module_compilers.lock().evict_all();
    }

    /// Transitions to RESOLVING, superseding any in-flight task, and returns
    /// the new task's token and generation. Cancellation is cooperative (no
    /// interrupt): the superseded task simply discards its result.
    fn start_background_resolution(&self) -> (CancellationToken, u64) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();

        {
            let mut flow = self.flow.lock();
            if let Some(previous) = flow.token.take() {
                previous.cancel();
            }
            flow.state = ClassPathResolutionState::Resolving;
            flow.token = Some(token.clone());
            flow.generation = generation;
            self.flow_changed.notify_all();
        }

        self.resolver.invalidate();
        (token, generation)
    }

    /// Runs one resolution to completion on the calling thread. Only the
    /// task owning the current generation publishes its outcome.
    fn resolve_now(&self, token: &CancellationToken, generation: u64) {
        let progress = self.scheduler.progress().start("Resolving classpath");

        let result = self.refresh(token);

        let mut flow = self.flow.lock();
        if flow.generation != generation || token.is_cancelled() {
            // Superseded; the newer task owns the state.
            return;
        }
        flow.token = None;
        match result {
            Ok(diff) => {
                flow.state = ClassPathResolutionState::Ready;
                self.flow_changed.notify_all();
                drop(flow);
                progress.finish(Some("classpath resolved".to_string()));
                let callbacks = self.on_ready.lock();
                for callback in callbacks.iter() {
                    callback(&diff);
                }
            }
            Err(err) => {
                flow.state = ClassPathResolutionState::Failed;
                self.flow_changed.notify_all();
                drop(flow);
                tracing::warn!(target = "kls.classpath", error = %err, "classpath resolution failed");
                progress.finish(Some(format!("classpath resolution failed: {err}")));
            }
        }
    }

    /// The refresh algorithm: resolve, diff, apply, rebuild registries and
    /// compilers, then merge source archives off the critical path.
    fn refresh(
        &self,
        token: &CancellationToken,
    ) -> Result<ClassPathDiff, kls_project::ResolverError> {
        let resolution = self.resolver.resolve()?;
        if token.is_cancelled() {
            return Ok(ClassPathDiff::default());
        }

        let diff = {
            let paths = self.paths.read();
            ClassPathDiff::compute(&paths.classpath, &resolution.compiled_jars)
        };

        let build_scripts_changed = {
            let mut paths = self.paths.write();
            let build_scripts_changed =
                paths.build_script_classpath != resolution.build_script_classpath;
            paths.classpath = resolution.compiled_jars.clone();
            paths.build_script_classpath = resolution.build_script_classpath.clone();
            build_scripts_changed
        };

        self.module_registry
            .replace_all(resolution.module_class_paths.clone());
        self.evict_all_module_compilers();

        if diff.has_changes() || build_scripts_changed {
            self.reinstantiate_shared_compiler();
        }

        // Source archives are best-effort and merged without touching the
        // compilers.
        if !token.is_cancelled() {
            match self.resolver.resolve_with_sources() {
                Ok(with_sources) => {
                    let mut paths = self.paths.write();
                    paths.classpath = with_sources.compiled_jars;
                }
                Err(err) => {
                    tracing::debug!(
                        target = "kls.classpath",
                        error = %err,
                        "source-jar resolution failed; continuing without sources"
                    );
                }
            }
        }

        Ok(diff)
    }

    fn reinstantiate_shared_compiler(&self) {
        let snapshot = self.paths.read().snapshot(self.output_directory());
        let next = self.provider.create_compiler(None, &snapshot);
        let previous = {
            let mut shared = self.shared_compiler.write();
            std::mem::replace(&mut *shared, next)
        };
        previous.close();
    }

    /// Cancels in-flight resolution, closes every compiler and deletes the
    /// output directory.
    pub fn close(&self) {
        {
            let mut flow = self.flow.lock();
            if let Some(token) = flow.token.take() {
                token.cancel();
            }
            self.flow_changed.notify_all();
        }
        self.evict_all_module_compilers();
        self.shared_compiler.read().close();
        if let Some(dir) = self.output_directory.lock().take() {
            if let Err(err) = dir.close() {
                tracing::warn!(target = "kls.classpath", error = %err, "failed to delete output directory");
            }
        }
    }
}

/// Arc wrapper that ties resolution tasks to the scheduler.
///
/// `CompilerClassPath` methods that schedule background work need a clone of
/// the owner to move into the task, so construction goes through this handle.
#[derive(Clone)]
pub struct CompilerClassPathHandle {
    inner: Arc<CompilerClassPath>,
}

impl CompilerClassPathHandle {
    pub fn new(
        provider: Arc<dyn CompilerProvider>,
        resolver: Arc<dyn ClassPathResolver>,
        module_registry: Arc<ModuleRegistry>,
        scheduler: Scheduler,
    ) -> std::io::Result<Self> {
        Ok(Self {
            inner: Arc::new(CompilerClassPath::new(
                provider,
                resolver,
                module_registry,
                scheduler,
            )?),
        })
    }

    /// Adds a workspace root and schedules background resolution. Returns
    /// immediately; the state is RESOLVING until the task completes.
    pub fn add_workspace_root(&self, root: &Path) {
        self.inner.note_workspace_root_added(root);
        self.spawn_resolution();
    }

    pub fn remove_workspace_root(&self, root: &Path) {
        self.inner.note_workspace_root_removed(root);
        self.spawn_resolution();
    }

    /// Reacts to an on-disk change. Returns `true` when the file is a
    /// recognised build file and a re-resolution was scheduled.
    pub fn changed_on_disk(&self, file: &Path) -> bool {
        if !is_build_file(file) {
            return false;
        }
        tracing::info!(target = "kls.classpath", file = %file.display(), "build file changed");
        self.spawn_resolution();
        true
    }

    fn spawn_resolution(&self) {
        let (token, generation) = self.inner.start_background_resolution();

        let classpath = Arc::clone(&self.inner);
        let task = self
            .inner
            .scheduler
            .spawn_background_with_token(token, move |token| {
                classpath.resolve_now(&token, generation);
                Ok(())
            });
        drop(task);
    }
}

impl std::ops::Deref for CompilerClassPathHandle {
    type Target = CompilerClassPath;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
