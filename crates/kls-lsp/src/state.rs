use std::path::Path;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use thiserror::Error;
use url::Url;

use kls_classpath::CompilerClassPathHandle;
use kls_compiler::{CompilerProvider, CompositeModuleScope, ModuleScope};
use kls_core::{ArchiveDetector, Location, Position, Range};
use kls_db::Database;
use kls_index::{IndexingService, RefreshParams, Symbol, SymbolIndex};
use kls_project::{ClassPathResolver, ModuleRegistry};
use kls_scheduler::{CancellationToken, Scheduler};
use kls_source::{
    CompiledFile, ContentChange, FileSystemContentProvider, SourceFiles, SourcePath,
};

use crate::cache::{CacheKey, LspCacheManager};
use crate::config::Configuration;
use crate::diagnostics::{DiagnosticsClient, DiagnosticsManager};
use crate::executor::{LspExecutorPool, OperationKind};
use crate::extensions::{self, MainClassInfo};
use crate::queries::definition::{Decompiler, DefinitionContext};
use crate::queries::{
    completion, decorations, definition, hover, references, symbols, CompletionItem,
    DocumentSymbol, Hover, InlayHint, Recompile, SemanticToken, SignatureHelp,
};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("database error: {0}")]
    Db(#[from] kls_db::DbError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The language server core: every service wired together.
///
/// Construction order mirrors startup: storage, classpath, source path,
/// index, then the reactive hooks (classpath READY, lint action).
pub struct KlsState {
    scheduler: Scheduler,
    config: RwLock<Configuration>,
    cp: CompilerClassPathHandle,
    source_path: Arc<SourcePath>,
    source_files: SourceFiles,
    index: Arc<SymbolIndex>,
    indexing: Arc<IndexingService>,
    diagnostics: Arc<DiagnosticsManager>,
    caches: Arc<LspCacheManager>,
    executors: LspExecutorPool,
    detector: RwLock<ArchiveDetector>,
    decompiler: Option<Arc<dyn Decompiler>>,
}

impl KlsState {
    pub fn new(
        provider: Arc<dyn CompilerProvider>,
        resolver: Arc<dyn ClassPathResolver>,
        storage_path: Option<&Path>,
        decompiler: Option<Arc<dyn Decompiler>>,
        client: Option<Arc<dyn DiagnosticsClient>>,
    ) -> Result<Arc<Self>, StateError> {
        let scheduler = Scheduler::default();
        let registry = Arc::new(ModuleRegistry::new());
        let cp = CompilerClassPathHandle::new(
            provider,
            resolver,
            registry,
            scheduler.clone(),
        )?;

        let db = Arc::new(Database::open(storage_path)?);
        let index = SymbolIndex::new(db, scheduler.clone());
        let indexing = IndexingService::new(index.clone());

        let source_path = Arc::new(SourcePath::new(
            cp.clone(),
            indexing.clone(),
            Arc::new(FileSystemContentProvider),
        ));
        let source_files = SourceFiles::new(source_path.clone());

        let ready_probe = cp.clone();
        let diagnostics =
            DiagnosticsManager::new(scheduler.clone(), move || ready_probe.is_ready());
        if let Some(client) = client {
            diagnostics.connect(client);
        }

        let state = Arc::new(Self {
            scheduler,
            config: RwLock::new(Configuration::default()),
            cp,
            source_path,
            source_files,
            index,
            indexing,
            diagnostics,
            caches: Arc::new(LspCacheManager::new()),
            executors: LspExecutorPool::new(),
            detector: RwLock::new(ArchiveDetector::new(Vec::new(), None)),
            decompiler,
        });

        // Reactive hooks hold weak references; the state owns the services.
        let weak: Weak<KlsState> = Arc::downgrade(&state);
        state.cp.on_class_path_ready(move |_diff| {
            if let Some(state) = weak.upgrade() {
                state.on_classpath_ready();
            }
        });

        let weak: Weak<KlsState> = Arc::downgrade(&state);
        state.diagnostics.set_lint_action(move |files, token| {
            if let Some(state) = weak.upgrade() {
                state.lint(files, token);
            }
        });

        Ok(state)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn classpath(&self) -> &CompilerClassPathHandle {
        &self.cp
    }

    pub fn source_path(&self) -> &Arc<SourcePath> {
        &self.source_path
    }

    pub fn source_files(&self) -> &SourceFiles {
        &self.source_files
    }

    pub fn symbol_index(&self) -> &Arc<SymbolIndex> {
        &self.index
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticsManager> {
        &self.diagnostics
    }

    pub fn caches(&self) -> &Arc<LspCacheManager> {
        &self.caches
    }

    pub fn configuration(&self) -> Configuration {
        self.config.read().clone()
    }

    // ------------------------------------------------------------------
    // Editor notifications
    // ------------------------------------------------------------------

    pub fn add_workspace_root(&self, root: &Path) {
        self.cp.add_workspace_root(root);
        self.detector
            .write()
            .set_workspace_roots(self.cp.workspace_roots());
    }

    pub fn did_open(self: &Arc<Self>, uri: &Url, text: &str, version: i32) {
        self.source_files.open(uri, text, version);
        self.caches.invalidate_file(uri);
        self.diagnostics.schedule_lint(uri);
    }

    pub fn did_change(self: &Arc<Self>, uri: &Url, version: i32, changes: &[ContentChange]) {
        self.source_files.edit(uri, version, changes);
        self.caches.invalidate_file(uri);
        self.diagnostics.schedule_lint(uri);
    }

    pub fn did_save(self: &Arc<Self>, uri: &Url) {
        self.source_path.save(uri);
        self.diagnostics.schedule_lint(uri);
    }

    pub fn did_close(&self, uri: &Url) {
        self.source_files.close(uri);
        self.caches.invalidate_file(uri);
    }

    pub fn did_change_watched_file(&self, path: &Path) {
        self.cp.changed_on_disk(path);
    }

    pub fn did_change_configuration(&self, config: Configuration) {
        self.diagnostics.set_config(config.diagnostics.clone());
        self.indexing.set_enabled(config.indexing.enabled);
        *self.config.write() = config;
    }

    /// READY transition: drop stale compile state and caches, re-attribute
    /// modules, re-lint what the editor shows, and refresh the index.
    fn on_classpath_ready(self: &Arc<Self>) {
        tracing::info!(target = "kls.state", "classpath ready");
        self.source_path.clean_all_files();
        self.caches.clear_all();
        self.source_path.refresh_module_assignments();
        self.detector
            .write()
            .set_workspace_roots(self.cp.workspace_roots());

        for uri in self.source_files.open_uris() {
            self.diagnostics.lint_immediately(&uri);
        }

        self.refresh_index();
    }

    /// Full index refresh against the current build-file version.
    ///
    /// The rebuild clears the whole symbol table, so it must run over every
    /// module's scope at once; one file per module is brought up to date to
    /// obtain the scopes, and their union feeds a single refresh.
    pub fn refresh_index(self: &Arc<Self>) {
        let config = self.config.read().clone();
        if !config.indexing.enabled {
            return;
        }

        let mut seen_modules: Vec<Option<String>> = Vec::new();
        let mut scopes: Vec<Arc<dyn ModuleScope>> = Vec::new();
        let build_file_version = self.cp.current_build_file_version();
        for uri in self.source_path.all() {
            let module_id = self.source_path.module_id(&uri);
            if seen_modules.contains(&module_id) {
                continue;
            }
            seen_modules.push(module_id);
            let Some(compiled) = self.source_path.current_compiled(&uri) else {
                continue;
            };
            let Some(module) = compiled.module else { continue };
            scopes.push(module.scope().clone());
        }

        let scope: Arc<dyn ModuleScope> = match scopes.len() {
            0 => return,
            1 => scopes.remove(0),
            _ => Arc::new(CompositeModuleScope::new(scopes)),
        };
        self.indexing.refresh_index(
            scope,
            RefreshParams {
                exclusions: Vec::new(),
                build_file_version,
                skip_if_valid: true,
                batch_size: config.indexing.batch_size,
            },
        );
    }

    fn lint(self: &Arc<Self>, files: Vec<Url>, token: CancellationToken) {
        let result = self.source_path.compile_files(&files);
        if token.is_cancelled() {
            return;
        }
        let open = self.source_files.open_uris();
        self.diagnostics.publish(result.diagnostics, &open);
    }

    // ------------------------------------------------------------------
    // Positional queries
    // ------------------------------------------------------------------

    fn recover(&self, uri: &Url, position: Position, recompile: Recompile) -> Option<CompiledFile> {
        match recompile {
            Recompile::Always => self.source_path.current_compiled(uri),
            Recompile::Never => self
                .source_path
                .latest_compiled(uri)
                .or_else(|| self.source_path.current_compiled(uri)),
            Recompile::AfterDot => {
                let content = self.source_path.content(uri)?;
                if completion::is_after_dot(&content, position) {
                    self.source_path.current_compiled(uri)
                } else {
                    self.source_path
                        .latest_compiled(uri)
                        .or_else(|| self.source_path.current_compiled(uri))
                }
            }
        }
    }

    fn cache_key(&self, uri: &Url, position: Position) -> CacheKey {
        let version = self.source_path.version(uri).unwrap_or(0);
        CacheKey::new(uri.clone(), position, version)
    }

    pub fn definition(self: &Arc<Self>, uri: &Url, position: Position) -> Vec<Location> {
        let key = self.cache_key(uri, position);
        if let Some(hit) = self.caches.definition.get(&key) {
            return hit;
        }

        let state = Arc::clone(self);
        let uri = uri.clone();
        self.executors
            .submit(OperationKind::Definition, move || {
                let result = state.compute_definition(&uri, position);
                state
                    .caches
                    .definition
                    .put(state.cache_key(&uri, position), result.clone());
                result
            })
            .wait()
            .unwrap_or_default()
    }

    fn compute_definition(&self, uri: &Url, position: Position) -> Vec<Location> {
        let Some(file) = self.recover(uri, position, Recompile::Never) else {
            return Vec::new();
        };
        let detector = self.detector.read().clone();
        let config = self.config.read().clone();
        let ctx = DefinitionContext {
            source_path: &self.source_path,
            index: &self.index,
            detector: &detector,
            decompiler: self.decompiler.as_deref(),
            use_kls_scheme: config.external_sources.use_kls_scheme,
        };
        definition::goto_definition(&ctx, &file, position)
            .into_iter()
            .collect()
    }

    pub fn hover(self: &Arc<Self>, uri: &Url, position: Position) -> Option<Hover> {
        let key = self.cache_key(uri, position);
        if let Some(hit) = self.caches.hover.get(&key) {
            return hit;
        }

        let state = Arc::clone(self);
        let uri = uri.clone();
        self.executors
            .submit(OperationKind::Hover, move || {
                let result = state
                    .recover(&uri, position, Recompile::Never)
                    .and_then(|file| hover::hover(&file, position));
                state
                    .caches
                    .hover
                    .put(state.cache_key(&uri, position), result.clone());
                result
            })
            .wait()
            .flatten()
    }

    pub fn completion(self: &Arc<Self>, uri: &Url, position: Position) -> Vec<CompletionItem> {
        let key = self.cache_key(uri, position);
        if let Some(hit) = self.caches.completion.get(&key) {
            return hit;
        }

        let state = Arc::clone(self);
        let uri = uri.clone();
        self.executors
            .submit(OperationKind::Completion, move || {
                let config = state.config.read().clone();
                let result = state
                    .recover(&uri, position, Recompile::AfterDot)
                    .map(|file| completion::completions(&file, &state.index, position, &config))
                    .unwrap_or_default();
                state
                    .caches
                    .completion
                    .put(state.cache_key(&uri, position), result.clone());
                result
            })
            .wait()
            .unwrap_or_default()
    }

    pub fn references(
        self: &Arc<Self>,
        uri: &Url,
        position: Position,
        include_declaration: bool,
    ) -> Vec<Location> {
        let key = self.cache_key(uri, position);
        if let Some(hit) = self.caches.references.get(&key) {
            return hit;
        }

        let state = Arc::clone(self);
        let uri = uri.clone();
        self.executors
            .submit(OperationKind::References, move || {
                let result = state
                    .recover(&uri, position, Recompile::Always)
                    .map(|file| {
                        references::find_references(
                            &state.source_path,
                            &file,
                            position,
                            include_declaration,
                        )
                    })
                    .unwrap_or_default();
                state
                    .caches
                    .references
                    .put(state.cache_key(&uri, position), result.clone());
                result
            })
            .wait()
            .unwrap_or_default()
    }

    pub fn document_symbols(&self, uri: &Url) -> Vec<DocumentSymbol> {
        self.source_path
            .parsed_file(uri)
            .map(|parsed| symbols::document_symbols(&parsed))
            .unwrap_or_default()
    }

    pub fn workspace_symbols(&self, query: &str) -> Vec<Symbol> {
        symbols::workspace_symbols(&self.index, query, 20)
    }

    pub fn signature_help(&self, uri: &Url, position: Position) -> Option<SignatureHelp> {
        let file = self.recover(uri, position, Recompile::Never)?;
        hover::signature_help(&file, position)
    }

    pub fn document_highlight(&self, uri: &Url, position: Position) -> Vec<Range> {
        self.recover(uri, position, Recompile::Never)
            .map(|file| references::document_highlight(&file, position))
            .unwrap_or_default()
    }

    pub fn semantic_tokens_full(&self, uri: &Url) -> Vec<SemanticToken> {
        self.source_path
            .current_compiled(uri)
            .map(|file| decorations::semantic_tokens_full(&file))
            .unwrap_or_default()
    }

    pub fn semantic_tokens_range(&self, uri: &Url, range: Range) -> Vec<SemanticToken> {
        self.source_path
            .current_compiled(uri)
            .map(|file| decorations::semantic_tokens_range(&file, range))
            .unwrap_or_default()
    }

    pub fn inlay_hints(&self, uri: &Url, range: Option<Range>) -> Vec<InlayHint> {
        let config = self.config.read().inlay_hints.clone();
        self.source_path
            .current_compiled(uri)
            .map(|file| decorations::inlay_hints(&file, &config, range))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Custom extensions
    // ------------------------------------------------------------------

    pub fn jar_class_contents(&self, uri: &Url) -> Option<String> {
        extensions::jar_class_contents(uri, self.decompiler.as_deref())
    }

    pub fn build_output_location(&self) -> Option<Url> {
        let dir = self.cp.output_directory()?;
        Url::from_directory_path(dir).ok()
    }

    pub fn main_class(&self, uri: &Url) -> Option<MainClassInfo> {
        let file = self.source_path.current_compiled(uri)?;
        extensions::main_class(&file)
    }

    pub fn override_members(&self, uri: &Url, position: Position) -> Vec<Symbol> {
        self.source_path
            .current_compiled(uri)
            .map(|file| extensions::override_members(&file, &self.index, position))
            .unwrap_or_default()
    }

    /// LSP shutdown: stop accepting work, cancel background state, release
    /// compilers and the output directory.
    pub fn close(&self) {
        self.diagnostics.close();
        self.executors.close();
        self.index.cancel_current_refresh();
        self.indexing.close();
        self.cp.close();
    }
}
