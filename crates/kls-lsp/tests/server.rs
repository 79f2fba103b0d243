use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use url::Url;

use kls_classpath::ClassPathResolutionState;
use kls_compiler::test_support::FakeCompilerProvider;
use kls_compiler::Diagnostic;
use kls_core::Position;
use kls_lsp::diagnostics::DiagnosticsClient;
use kls_lsp::{Configuration, KlsState};
use kls_project::{ClassPathResolution, ClassPathResolver, ModuleInfo, ResolverError};
use kls_source::ContentChange;

#[derive(Default)]
struct RecordingClient {
    published: Mutex<Vec<(Url, Vec<Diagnostic>)>>,
}

impl RecordingClient {
    fn publications_for(&self, uri: &Url) -> Vec<Vec<Diagnostic>> {
        self.published
            .lock()
            .iter()
            .filter(|(u, _)| u == uri)
            .map(|(_, d)| d.clone())
            .collect()
    }
}

impl DiagnosticsClient for RecordingClient {
    fn publish_diagnostics(&self, uri: &Url, diagnostics: Vec<Diagnostic>) {
        self.published.lock().push((uri.clone(), diagnostics));
    }
}

struct StubResolver {
    delay: Duration,
    modules: Vec<ModuleInfo>,
}

impl ClassPathResolver for StubResolver {
    fn resolve(&self) -> Result<ClassPathResolution, ResolverError> {
        std::thread::sleep(self.delay);
        Ok(ClassPathResolution {
            module_class_paths: self.modules.clone(),
            ..ClassPathResolution::default()
        })
    }

    fn current_build_file_version(&self) -> i64 {
        1
    }
}

struct Fixture {
    state: Arc<KlsState>,
    client: Arc<RecordingClient>,
}

fn fixture(delay: Duration, modules: Vec<ModuleInfo>) -> Fixture {
    let client = Arc::new(RecordingClient::default());
    let state = KlsState::new(
        Arc::new(FakeCompilerProvider::new()),
        Arc::new(StubResolver { delay, modules }),
        None,
        None,
        Some(client.clone()),
    )
    .unwrap();
    // Keep tests snappy.
    state.diagnostics().update_debounce_time(20);
    Fixture { state, client }
}

fn uri(path: &str) -> Url {
    Url::parse(&format!("file://{path}")).unwrap()
}

fn wait_until(deadline: Duration, predicate: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

#[test]
fn diagnostics_are_suppressed_until_classpath_ready_then_published() {
    let f = fixture(Duration::from_millis(200), Vec::new());
    let u = uri("/work/src/Broken.kt");

    // Open with an error before the classpath settles.
    f.state
        .did_open(&u, "package p\nclass Broken\n// error: bad thing\n", 1);

    // Degraded mode: positional queries answer structurally, nothing is
    // published.
    let _ = f.state.hover(&u, Position::new(1, 7));
    std::thread::sleep(Duration::from_millis(100));
    assert!(
        f.client.published.lock().is_empty(),
        "no diagnostics before READY"
    );

    f.state.add_workspace_root(std::path::Path::new("/work"));
    assert_eq!(
        f.state
            .classpath()
            .wait_for_resolution(Duration::from_secs(5)),
        ClassPathResolutionState::Ready
    );

    assert!(wait_until(Duration::from_secs(5), || {
        f.client
            .publications_for(&u)
            .iter()
            .any(|batch| batch.iter().any(|d| d.message == "bad thing"))
    }));
}

#[test]
fn hover_and_definition_resolve_within_the_workspace() {
    let f = fixture(Duration::ZERO, Vec::new());
    // The archive detector needs workspace roots to classify locations as
    // internal.
    f.state.add_workspace_root(std::path::Path::new("/work"));
    f.state
        .classpath()
        .wait_for_resolution(Duration::from_secs(5));

    let decl_file = uri("/work/src/Lib.kt");
    let use_file = uri("/work/src/Use.kt");

    f.state.did_open(&decl_file, "package p\nfun helper()\n", 1);
    f.state.did_open(&use_file, "package p\nval x = helper()\n", 1);
    f.state.source_path().compile_files(&[decl_file.clone(), use_file.clone()]);

    let hover = f.state.hover(&use_file, Position::new(1, 10)).unwrap();
    assert!(hover.contents.contains("fun helper()"));

    let locations = f.state.definition(&use_file, Position::new(1, 10));
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].uri, decl_file);
    assert_eq!(locations[0].range.start.line, 1);
}

#[test]
fn references_span_the_whole_workspace() {
    let f = fixture(Duration::ZERO, Vec::new());
    let decl_file = uri("/work/src/Lib.kt");
    let a = uri("/work/src/A.kt");
    let b = uri("/work/src/B.kt");

    f.state.did_open(&decl_file, "package p\nfun helper()\n", 1);
    f.state.did_open(&a, "package p\nval ua = helper()\n", 1);
    f.state.did_open(&b, "package p\nval ub = helper()\n", 1);

    let refs = f.state.references(&a, Position::new(1, 10), false);
    let files: BTreeSet<&str> = refs.iter().map(|l| l.uri.as_str()).collect();
    assert!(files.contains(a.as_str()));
    assert!(files.contains(b.as_str()));
    assert_eq!(refs.len(), 2);

    let with_decl = f.state.references(&a, Position::new(1, 10), true);
    assert_eq!(with_decl.len(), 3, "include_declaration adds the definition site");
}

#[test]
fn edit_invalidates_position_caches_and_clears_references() {
    let f = fixture(Duration::ZERO, Vec::new());
    let u = uri("/work/src/A.kt");
    let other = uri("/work/src/B.kt");

    f.state.did_open(&u, "package p\nfun helper()\nval x = helper()\n", 1);
    f.state.did_open(&other, "package p\nval y = helper()\n", 1);

    // Fill all four caches.
    let _ = f.state.hover(&u, Position::new(2, 9));
    let _ = f.state.definition(&u, Position::new(2, 9));
    let _ = f.state.completion(&u, Position::new(2, 12));
    let _ = f.state.references(&other, Position::new(1, 9), false);
    assert!(!f.state.caches().hover.is_empty());
    assert!(!f.state.caches().references.is_empty());

    f.state.did_change(
        &u,
        2,
        &[ContentChange::full("package p\nfun helper()\nval z = helper()\n")],
    );

    assert!(f.state.caches().hover.is_empty(), "hover entries for the edited file are gone");
    assert!(f.state.caches().definition.is_empty());
    assert!(f.state.caches().completion.is_empty());
    assert!(
        f.state.caches().references.is_empty(),
        "references span files; the entire cache clears on any edit"
    );

    // A fresh hover recomputes against the new version and refills.
    let hover = f.state.hover(&u, Position::new(2, 9)).unwrap();
    assert!(hover.contents.contains("fun helper()"));
    assert_eq!(f.state.caches().hover.len(), 1);
}

#[test]
fn repeated_hover_hits_the_cache() {
    let f = fixture(Duration::ZERO, Vec::new());
    let u = uri("/work/src/A.kt");
    f.state.did_open(&u, "package p\nfun helper()\nval x = helper()\n", 1);

    let first = f.state.hover(&u, Position::new(2, 9));
    assert_eq!(f.state.caches().hover.len(), 1);
    let second = f.state.hover(&u, Position::new(2, 9));
    assert_eq!(first, second);
    assert_eq!(f.state.caches().hover.len(), 1);
}

#[test]
fn index_refresh_covers_every_module() {
    let modules = vec![
        ModuleInfo::new("a", "/work/a").with_source_dir("/work/a/src"),
        ModuleInfo::new("b", "/work/b").with_source_dir("/work/b/src"),
    ];
    let f = fixture(Duration::ZERO, modules);
    let a = uri("/work/a/src/A.kt");
    let b = uri("/work/b/src/B.kt");
    f.state.did_open(&a, "package pa\nclass AlphaThing\n", 1);
    f.state.did_open(&b, "package pb\nclass BetaThing\n", 1);

    // READY re-attributes modules and triggers the full index refresh.
    f.state.add_workspace_root(std::path::Path::new("/work"));
    assert_eq!(
        f.state
            .classpath()
            .wait_for_resolution(Duration::from_secs(5)),
        ClassPathResolutionState::Ready
    );

    // The rebuild clears the table once, so both modules' symbols must come
    // back, not just the first module's.
    assert!(wait_until(Duration::from_secs(5), || {
        !f.state.workspace_symbols("AlphaThing").is_empty()
            && !f.state.workspace_symbols("BetaThing").is_empty()
    }));
}

#[test]
fn workspace_symbols_appear_after_indexing() {
    let f = fixture(Duration::ZERO, Vec::new());
    let u = uri("/work/src/A.kt");
    f.state.did_open(&u, "package p\nclass Searchable\n", 1);
    f.state.source_path().compile_files(&[u.clone()]);

    assert!(wait_until(Duration::from_secs(2), || {
        !f.state.workspace_symbols("Search").is_empty()
    }));
    let symbols = f.state.workspace_symbols("Searchable");
    assert_eq!(symbols[0].fq_name, "p.Searchable");
}

#[test]
fn document_symbols_come_from_the_parse() {
    let f = fixture(Duration::ZERO, Vec::new());
    let u = uri("/work/src/A.kt");
    f.state
        .did_open(&u, "package p\nclass Foo\nfun bar()\nval baz = 1\n", 1);

    let symbols = f.state.document_symbols(&u);
    let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Foo", "bar", "baz"]);
}

#[test]
fn signature_help_reports_the_active_call() {
    let f = fixture(Duration::ZERO, Vec::new());
    let u = uri("/work/src/A.kt");
    f.state
        .did_open(&u, "package p\nfun greet(name: Int)\nval x = greet(1)\n", 1);
    f.state.source_path().compile_files(&[u.clone()]);

    let help = f.state.signature_help(&u, Position::new(2, 14)).unwrap();
    assert!(help.label.contains("greet"));
}

#[test]
fn completion_mixes_local_declarations_and_snippets() {
    let f = fixture(Duration::ZERO, Vec::new());
    let u = uri("/work/src/A.kt");
    f.state
        .did_open(&u, "package p\nfun fetchAll()\nval x = fet\n", 1);

    let items = f.state.completion(&u, Position::new(2, 11));
    assert!(items.iter().any(|i| i.label == "fetchAll"));

    // Snippets appear for keyword-ish prefixes when enabled (the default).
    let items = f.state.completion(&u, Position::new(2, 8));
    assert!(items.iter().any(|i| i.is_snippet));
}

#[test]
fn did_change_configuration_rewires_gates() {
    let f = fixture(Duration::ZERO, Vec::new());

    let config: Configuration = serde_json::from_str(
        r#"{
            "diagnostics": {"enabled": false, "debounceTime": 10},
            "indexing": {"enabled": false}
        }"#,
    )
    .unwrap();
    f.state.did_change_configuration(config);

    let u = uri("/work/src/A.kt");
    f.state.did_open(&u, "package p\n// error: nope\n", 1);
    f.state.add_workspace_root(std::path::Path::new("/work"));
    f.state
        .classpath()
        .wait_for_resolution(Duration::from_secs(5));
    std::thread::sleep(Duration::from_millis(150));

    assert!(
        f.client.published.lock().is_empty(),
        "disabled diagnostics publish nothing"
    );
    assert_eq!(
        f.state.symbol_index().symbol_count(),
        0,
        "disabled indexing indexes nothing"
    );
}

#[test]
fn main_class_and_build_output_extensions() {
    let f = fixture(Duration::ZERO, Vec::new());
    let u = uri("/work/src/App.kt");
    f.state.did_open(&u, "package com.example\nfun main()\n", 1);

    let info = f.state.main_class(&u).unwrap();
    assert_eq!(info.name, "com.example.AppKt");
    assert_eq!(info.range.start.line, 1);

    let output = f.state.build_output_location().unwrap();
    assert_eq!(output.scheme(), "file");
}

#[test]
fn jar_class_contents_reads_source_archive_entries() {
    let dir = tempfile::TempDir::new().unwrap();
    let jar_path = dir.path().join("dep-sources.jar");
    {
        let file = std::fs::File::create(&jar_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("com/example/Dep.kt", zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(b"package com.example\nclass Dep\n").unwrap();
        writer.finish().unwrap();
    }

    let f = fixture(Duration::ZERO, Vec::new());
    let kls_uri = kls_core::KlsUri::new(&jar_path, "com/example/Dep.kt");
    let url = Url::parse(&kls_uri.to_string()).unwrap();

    let contents = f.state.jar_class_contents(&url).unwrap();
    assert!(contents.contains("class Dep"));

    // `.class` entries require the decompiler façade; without one, none.
    let class_uri = kls_core::KlsUri::new(&jar_path, "com/example/Dep.class");
    assert!(f
        .state
        .jar_class_contents(&Url::parse(&class_uri.to_string()).unwrap())
        .is_none());
}

#[test]
fn override_members_lists_supertype_members_from_the_index() {
    let f = fixture(Duration::ZERO, Vec::new());
    let u = uri("/work/src/Impl.kt");
    f.state.did_open(&u, "package p\nclass Impl : Base\n", 1);

    // Seed the index with the supertype and its members, as a dependency
    // indexing pass would.
    let base = kls_compiler::Declaration {
        fq_name: "lib.Base".to_string(),
        short_name: "Base".to_string(),
        kind: kls_compiler::SymbolKind::Class,
        visibility: kls_compiler::Visibility::Public,
        extension_receiver: None,
        supertypes: Vec::new(),
        location: None,
        signature: None,
    };
    let mut member = base.clone();
    member.fq_name = "lib.Base.run".to_string();
    member.short_name = "run".to_string();
    member.kind = kls_compiler::SymbolKind::Function;
    f.state
        .symbol_index()
        .apply_file_delta(None, &u, &[], &[base, member])
        .unwrap();

    let members = f.state.override_members(&u, Position::new(1, 7));
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].fq_name, "lib.Base.run");
}

#[test]
fn close_shuts_down_cleanly() {
    let f = fixture(Duration::from_millis(100), Vec::new());
    f.state.add_workspace_root(std::path::Path::new("/work"));
    f.state.close();
    assert!(f.state.build_output_location().is_none());
}
