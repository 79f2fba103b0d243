use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kls_classpath::{ClassPathResolutionState, CompilerClassPathHandle, MAX_MODULE_COMPILERS};
use kls_compiler::test_support::FakeCompilerProvider;
use kls_project::{
    ClassPathEntry, ClassPathResolution, ClassPathResolver, ModuleInfo, ModuleRegistry,
    ResolverError,
};
use kls_scheduler::Scheduler;

struct StubResolver {
    delay: Duration,
    fail: AtomicBool,
    calls: AtomicUsize,
    modules: Vec<ModuleInfo>,
    jars: BTreeSet<ClassPathEntry>,
}

impl StubResolver {
    fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            modules: Vec::new(),
            jars: BTreeSet::new(),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_modules(mut self, modules: Vec<ModuleInfo>) -> Self {
        self.modules = modules;
        self
    }

    fn with_jars(mut self, jars: &[&str]) -> Self {
        self.jars = jars.iter().map(ClassPathEntry::new).collect();
        self
    }
}

impl ClassPathResolver for StubResolver {
    fn resolve(&self) -> Result<ClassPathResolution, ResolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ResolverError::BuildTool("gradle exploded".to_string()));
        }
        Ok(ClassPathResolution {
            compiled_jars: self.jars.clone(),
            module_class_paths: self.modules.clone(),
            ..ClassPathResolution::default()
        })
    }

    fn current_build_file_version(&self) -> i64 {
        1
    }
}

fn handle_with(resolver: StubResolver) -> (CompilerClassPathHandle, Arc<FakeCompilerProvider>) {
    let provider = Arc::new(FakeCompilerProvider::new());
    let handle = CompilerClassPathHandle::new(
        provider.clone(),
        Arc::new(resolver),
        Arc::new(ModuleRegistry::new()),
        Scheduler::default(),
    )
    .unwrap();
    (handle, provider)
}

fn modules(names: &[&str]) -> Vec<ModuleInfo> {
    names
        .iter()
        .map(|name| ModuleInfo::new(*name, format!("/work/{name}")))
        .collect()
}

#[test]
fn add_workspace_root_returns_quickly_and_transitions_to_resolving() {
    let (handle, _) = handle_with(StubResolver::new().with_delay(Duration::from_millis(300)));

    let start = Instant::now();
    handle.add_workspace_root(Path::new("/work/project"));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(
        handle.resolution_state(),
        ClassPathResolutionState::Resolving
    );

    let state = handle.wait_for_resolution(Duration::from_secs(5));
    assert_eq!(state, ClassPathResolutionState::Ready);
}

#[test]
fn ready_callback_fires_once_per_transition() {
    let (handle, _) = handle_with(StubResolver::new().with_jars(&["/deps/a.jar"]));
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = Arc::clone(&fired);
    handle.on_class_path_ready(move |diff| {
        assert!(diff.has_changes());
        fired_clone.fetch_add(1, Ordering::SeqCst);
    });

    handle.add_workspace_root(Path::new("/work/project"));
    handle.wait_for_resolution(Duration::from_secs(5));
    // Give the callback a beat; it fires on the background thread.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_resolution_reaches_failed_state() {
    let resolver = StubResolver::new();
    resolver.fail.store(true, Ordering::SeqCst);
    let (handle, _) = handle_with(resolver);

    handle.add_workspace_root(Path::new("/work/project"));
    let state = handle.wait_for_resolution(Duration::from_secs(5));
    assert_eq!(state, ClassPathResolutionState::Failed);
}

#[test]
fn superseding_resolution_wins() {
    let (handle, _) = handle_with(
        StubResolver::new()
            .with_delay(Duration::from_millis(100))
            .with_jars(&["/deps/a.jar"]),
    );

    handle.add_workspace_root(Path::new("/work/a"));
    handle.add_workspace_root(Path::new("/work/b"));

    let state = handle.wait_for_resolution(Duration::from_secs(5));
    assert_eq!(state, ClassPathResolutionState::Ready);
    assert_eq!(handle.workspace_roots().len(), 2);
}

#[test]
fn close_after_add_does_not_deadlock() {
    let (handle, _) = handle_with(StubResolver::new().with_delay(Duration::from_millis(200)));
    handle.add_workspace_root(Path::new("/work/project"));
    handle.close();
    assert!(handle.output_directory().is_none());
}

#[test]
fn unknown_or_missing_module_uses_the_shared_compiler() {
    let (handle, _) = handle_with(StubResolver::new());
    let shared = handle.shared_compiler();
    assert!(Arc::ptr_eq(
        &shared,
        &handle.get_compiler_for_module(None)
    ));
    assert!(Arc::ptr_eq(
        &shared,
        &handle.get_compiler_for_module(Some("nope"))
    ));
    assert_eq!(handle.cached_module_compiler_count(), 0);
}

#[test]
fn distinct_modules_get_distinct_compilers() {
    let (handle, _) =
        handle_with(StubResolver::new().with_modules(modules(&["a", "b"])));
    handle.add_workspace_root(Path::new("/work"));
    handle.wait_for_resolution(Duration::from_secs(5));

    let a = handle.get_compiler_for_module(Some("a"));
    let b = handle.get_compiler_for_module(Some("b"));
    assert!(!Arc::ptr_eq(&a, &b));

    // A second lookup returns the cached instance.
    assert!(Arc::ptr_eq(&a, &handle.get_compiler_for_module(Some("a"))));
}

#[test]
fn lru_evicts_the_least_recently_used_module() {
    let names: Vec<String> = (1..=6).map(|i| format!("m{i}")).collect();
    let (handle, provider) = handle_with(StubResolver::new().with_modules(
        names.iter().map(|n| ModuleInfo::new(n, format!("/work/{n}"))).collect(),
    ));
    handle.add_workspace_root(Path::new("/work"));
    handle.wait_for_resolution(Duration::from_secs(5));

    // Access 1..5, touch 1 again, then access 6: module 2 is the LRU victim.
    let mut compilers = Vec::new();
    for name in names.iter().take(5) {
        compilers.push(handle.get_compiler_for_module(Some(name)));
    }
    let m1 = handle.get_compiler_for_module(Some("m1"));
    assert!(Arc::ptr_eq(&m1, &compilers[0]));

    let _m6 = handle.get_compiler_for_module(Some("m6"));
    assert_eq!(handle.cached_module_compiler_count(), MAX_MODULE_COMPILERS);

    let closed: Vec<_> = provider
        .created()
        .into_iter()
        .filter(|(id, compiler)| id.is_some() && compiler.is_closed())
        .collect();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].0.as_deref(), Some("m2"));

    // m1 was retained; m2 is re-created as a fresh instance.
    assert!(Arc::ptr_eq(&m1, &handle.get_compiler_for_module(Some("m1"))));
    let m2_again = handle.get_compiler_for_module(Some("m2"));
    assert!(!Arc::ptr_eq(&compilers[1], &m2_again));
}

#[test]
fn non_build_files_do_not_trigger_resolution() {
    let (handle, _) = handle_with(StubResolver::new());
    assert!(!handle.changed_on_disk(Path::new("/work/src/Main.kt")));
    assert_eq!(handle.resolution_state(), ClassPathResolutionState::Pending);
    assert!(handle.changed_on_disk(Path::new("/work/build.gradle.kts")));
    assert_eq!(
        handle.wait_for_resolution(Duration::from_secs(5)),
        ClassPathResolutionState::Ready
    );
}
