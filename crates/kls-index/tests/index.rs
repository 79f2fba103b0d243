use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use url::Url;

use kls_compiler::test_support::{StaticJarScanner, StaticModuleScope};
use kls_compiler::{Declaration, ModuleScope, SymbolKind, Visibility};
use kls_core::{Location, Position, Range};
use kls_db::Database;
use kls_index::{IndexingService, RefreshParams, SymbolIndex};
use kls_scheduler::{CancellationToken, Scheduler};

fn decl(fq_name: &str, kind: SymbolKind) -> Declaration {
    let short_name = fq_name.rsplit('.').next().unwrap_or(fq_name).to_string();
    Declaration {
        fq_name: fq_name.to_string(),
        short_name,
        kind,
        visibility: Visibility::Public,
        extension_receiver: None,
        supertypes: Vec::new(),
        location: Some(Location::new(
            Url::parse("file:///work/src/Gen.kt").unwrap(),
            Range::new(Position::new(0, 0), Position::new(0, 4)),
        )),
        signature: None,
    }
}

fn new_index() -> Arc<SymbolIndex> {
    new_index_with_db().0
}

fn new_index_with_db() -> (Arc<SymbolIndex>, Arc<Database>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    (SymbolIndex::new(db.clone(), Scheduler::default()), db)
}

fn table_count(db: &Database, table: &str) -> i64 {
    db.connection()
        .unwrap()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
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
fn batched_rebuild_indexes_every_package() {
    let mut scope = StaticModuleScope::new();
    for i in 0..1000 {
        scope.insert(
            format!("com.generated.p{i:04}"),
            vec![decl(&format!("com.generated.p{i:04}.Cls{i:04}"), SymbolKind::Class)],
        );
    }

    let index = new_index();
    let task = index
        .refresh(
            Arc::new(scope),
            RefreshParams {
                build_file_version: 7,
                batch_size: 50,
                ..RefreshParams::default()
            },
        )
        .unwrap();
    task.join().unwrap();

    assert_eq!(index.symbol_count(), 1000);
    assert_eq!(index.indexed_symbol_count(), 1000);
    assert!(index.is_index_valid(7));
    assert!(index.is_index_valid(3), "older probe versions stay valid");
    assert!(!index.is_index_valid(8));
    assert!(!index.is_indexing());

    let hits = index.query("Cls", None, 20, "%", None);
    assert_eq!(hits.len(), 20, "limit caps the result set");
    let hits = index.query("Cls0042", None, 20, "%", None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].fq_name, "com.generated.p0042.Cls0042");
    assert_eq!(
        hits[0].location.as_ref().unwrap().uri.as_str(),
        "file:///work/src/Gen.kt"
    );
}

#[test]
fn meta_inf_packages_are_skipped() {
    let scope = StaticModuleScope::new()
        .with_package("com.app", vec![decl("com.app.Real", SymbolKind::Class)])
        .with_package(
            "com.app.META-INF",
            vec![decl("com.app.META-INF.Bogus", SymbolKind::Class)],
        );

    let index = new_index();
    index
        .refresh(Arc::new(scope), RefreshParams::default())
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(index.symbol_count(), 1);
    assert!(index.query("Bogus", None, 10, "%", None).is_empty());
}

#[test]
fn skip_if_valid_short_circuits() {
    let scope = StaticModuleScope::new()
        .with_package("com.app", vec![decl("com.app.A", SymbolKind::Class)]);

    let index = new_index();
    index
        .refresh(
            Arc::new(scope.clone()),
            RefreshParams {
                build_file_version: 5,
                ..RefreshParams::default()
            },
        )
        .unwrap()
        .join()
        .unwrap();

    // Valid for an older probe version: nothing to do.
    assert!(index
        .refresh(
            Arc::new(scope.clone()),
            RefreshParams {
                build_file_version: 5,
                skip_if_valid: true,
                ..RefreshParams::default()
            },
        )
        .is_none());

    // A newer build file forces the rebuild.
    assert!(index
        .refresh(
            Arc::new(scope),
            RefreshParams {
                build_file_version: 6,
                skip_if_valid: true,
                ..RefreshParams::default()
            },
        )
        .is_some());
}

/// A scope that takes its time per package so cancellation can land mid-run.
#[derive(Clone)]
struct SlowScope {
    inner: StaticModuleScope,
    delay: Duration,
}

impl ModuleScope for SlowScope {
    fn top_level_packages(&self) -> Vec<String> {
        self.inner.top_level_packages()
    }

    fn sub_packages(&self, package: &str) -> Vec<String> {
        self.inner.sub_packages(package)
    }

    fn declarations_in_package(&self, package: &str) -> Vec<Declaration> {
        std::thread::sleep(self.delay);
        self.inner.declarations_in_package(package)
    }
}

#[test]
fn cancellation_mid_rebuild_settles_quickly_and_degrades() {
    let mut inner = StaticModuleScope::new();
    for i in 0..200 {
        inner.insert(
            format!("com.slow.p{i:03}"),
            vec![decl(&format!("com.slow.p{i:03}.S{i:03}"), SymbolKind::Class)],
        );
    }
    let scope = SlowScope {
        inner,
        delay: Duration::from_millis(2),
    };

    let index = new_index();
    let _task = index
        .refresh(
            Arc::new(scope),
            RefreshParams {
                build_file_version: 1,
                batch_size: 5,
                ..RefreshParams::default()
            },
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || index.is_indexing()));
    // Let at least one batch land.
    std::thread::sleep(Duration::from_millis(50));
    index.cancel_current_refresh();
    // Idempotent and safe to repeat.
    index.cancel_current_refresh();

    assert!(
        wait_until(Duration::from_millis(200), || !index.is_indexing()),
        "is_indexing must settle within 200ms of cancellation"
    );
    // Metadata was never written for the aborted rebuild.
    assert!(!index.is_index_valid(1));

    // Queries still answer (partial or empty) promptly.
    let start = Instant::now();
    let _ = index.query("S", None, 20, "%", None);
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn cancel_without_a_running_refresh_is_a_no_op() {
    let index = new_index();
    index.cancel_current_refresh();
    index.cancel_current_refresh();
    assert!(!index.is_indexing());
}

#[test]
fn same_short_name_in_distinct_modules_coexists() {
    let index = new_index();
    let uri = Url::parse("file:///work/a/src/H.kt").unwrap();
    let helper_a = decl("a.helper", SymbolKind::Function);
    let helper_b = decl("b.helper", SymbolKind::Function);
    let helper_dep = decl("dep.helper", SymbolKind::Function);

    index.apply_file_delta(Some("a"), &uri, &[], &[helper_a]).unwrap();
    index.apply_file_delta(Some("b"), &uri, &[], &[helper_b]).unwrap();
    index.apply_file_delta(None, &uri, &[], &[helper_dep]).unwrap();
    assert_eq!(index.symbol_count(), 3);

    let hits = index.query("helper", None, 20, "%", Some("a"));
    let fq_names: Vec<&str> = hits.iter().map(|s| s.fq_name.as_str()).collect();
    assert!(fq_names.contains(&"a.helper"));
    assert!(fq_names.contains(&"dep.helper"), "dependency symbols are shared");
    assert!(!fq_names.contains(&"b.helper"), "other modules stay invisible");
}

#[test]
fn file_delta_replaces_old_declarations() {
    let index = new_index();
    let uri = Url::parse("file:///work/src/F.kt").unwrap();
    let old = decl("app.Old", SymbolKind::Class);
    let new = decl("app.New", SymbolKind::Class);

    index.apply_file_delta(None, &uri, &[], &[old.clone()]).unwrap();
    index.apply_file_delta(None, &uri, &[old], &[new]).unwrap();

    assert!(index.query("Old", None, 10, "%", None).is_empty());
    assert_eq!(index.query("New", None, 10, "%", None).len(), 1);
}

#[test]
fn file_deltas_reclaim_location_rows() {
    let (index, db) = new_index_with_db();
    let uri = Url::parse("file:///work/src/F.kt").unwrap();
    let old = decl("app.Old", SymbolKind::Class);

    index
        .apply_file_delta(Some("app"), &uri, &[], &[old.clone()])
        .unwrap();
    index
        .apply_file_delta(Some("app"), &uri, &[old], &[decl("app.New", SymbolKind::Class)])
        .unwrap();

    // One symbol left means exactly one location chain left; an editing
    // session must not accumulate orphaned rows.
    assert_eq!(table_count(&db, "Symbols"), 1);
    assert_eq!(table_count(&db, "Locations"), 1);
    assert_eq!(table_count(&db, "Ranges"), 1);
    assert_eq!(table_count(&db, "Positions"), 2);
}

#[test]
fn extension_receiver_filter_matches_exactly() {
    let index = new_index();
    let uri = Url::parse("file:///work/src/E.kt").unwrap();
    let mut ext = decl("app.pad", SymbolKind::Function);
    ext.extension_receiver = Some("String".to_string());
    let plain = decl("app.pad2", SymbolKind::Function);

    index.apply_file_delta(None, &uri, &[], &[ext, plain]).unwrap();

    let hits = index.query("pad", Some("String"), 10, "%", None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].fq_name, "app.pad");

    let hits = index.query("pad", None, 10, "%", None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].fq_name, "app.pad2");
}

#[test]
fn jar_indexing_attributes_symbols_to_their_jar() {
    let (index, db) = new_index_with_db();
    let jar_a = PathBuf::from("/deps/a.jar");
    let jar_b = PathBuf::from("/deps/b.jar");

    let scope = StaticModuleScope::new()
        .with_package("com.solo", vec![decl("com.solo.OnlyA", SymbolKind::Class)])
        .with_package(
            "com.shared",
            vec![
                decl("com.shared.FromA", SymbolKind::Class),
                decl("com.shared.FromB", SymbolKind::Class),
            ],
        );

    let mut package_to_jars = HashMap::new();
    package_to_jars.insert("com.solo".to_string(), vec![jar_a.clone()]);
    package_to_jars.insert("com.shared".to_string(), vec![jar_a.clone(), jar_b.clone()]);

    let scanner = StaticJarScanner::new()
        .with_jar(&jar_a, &["com.shared.FromA"])
        .with_jar(&jar_b, &["com.shared.FromB"]);

    index
        .index_jars(
            &[jar_a.clone(), jar_b.clone()],
            &scope,
            &package_to_jars,
            &scanner,
            &CancellationToken::new(),
        )
        .unwrap();

    let only_a = &index.query("OnlyA", None, 10, "%", None)[0];
    assert_eq!(only_a.source_jar.as_deref(), Some(jar_a.as_path()));
    let from_b = &index.query("FromB", None, 10, "%", None)[0];
    assert_eq!(from_b.source_jar.as_deref(), Some(jar_b.as_path()));

    index.remove_symbols_from_jars(&[jar_b.clone()]).unwrap();
    assert!(index.query("FromB", None, 10, "%", None).is_empty());
    assert_eq!(index.query("FromA", None, 10, "%", None).len(), 1);

    // The removed jar's location chains go with its symbols.
    assert_eq!(table_count(&db, "Symbols"), 2);
    assert_eq!(table_count(&db, "Locations"), 2);
    assert_eq!(table_count(&db, "Ranges"), 2);
    assert_eq!(table_count(&db, "Positions"), 4);
}

#[test]
fn disabled_indexing_never_calls_providers() {
    let index = new_index();
    let service = IndexingService::new(index);
    service.set_enabled(false);

    let uri = Url::parse("file:///work/src/X.kt").unwrap();
    service.update_indexes(
        None,
        vec![kls_index::DeclarationDelta {
            uri,
            old: Box::new(|| panic!("old provider must not run while disabled")),
            new: Box::new(|| panic!("new provider must not run while disabled")),
        }],
    );

    // Give a would-be background task time to blow up.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(service.index().symbol_count(), 0);
}

#[test]
fn enabled_indexing_applies_deltas_in_background() {
    let index = new_index();
    let service = IndexingService::new(index.clone());

    let uri = Url::parse("file:///work/src/X.kt").unwrap();
    service.update_indexes(
        Some("app".to_string()),
        vec![kls_index::DeclarationDelta {
            uri,
            old: Box::new(Vec::new),
            new: Box::new(|| vec![decl("app.Thing", SymbolKind::Class)]),
        }],
    );

    assert!(wait_until(Duration::from_secs(2), || {
        index.symbol_count() == 1
    }));
    let hits = index.query("Thing", None, 10, "%", Some("app"));
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].module_id.as_deref(), Some("app"));
}
