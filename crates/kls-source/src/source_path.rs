use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use url::Url;

use kls_classpath::CompilerClassPathHandle;
use kls_compiler::{
    BindingContext, CompilationKind, Compiler, Diagnostic, ModuleHandle, ParsedTree,
};
use kls_core::file_uri_to_path;
use kls_index::{DeclarationDelta, IndexingService};

use crate::document::normalize_line_endings;

/// How a file participates in compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    BuildScript,
    Default,
}

pub fn source_kind(uri: &Url) -> SourceKind {
    if uri.path().ends_with(".gradle.kts") {
        SourceKind::BuildScript
    } else {
        SourceKind::Default
    }
}

/// Reads file content for URIs the editor has not sent us.
pub trait ContentProvider: Send + Sync {
    fn read(&self, uri: &Url) -> std::io::Result<String>;
}

#[derive(Debug, Default)]
pub struct FileSystemContentProvider;

impl ContentProvider for FileSystemContentProvider {
    fn read(&self, uri: &Url) -> std::io::Result<String> {
        let path = file_uri_to_path(uri)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
        Ok(normalize_line_endings(&std::fs::read_to_string(path)?))
    }
}

/// The outcome of one batch compile: the composite binding context plus the
/// diagnostics every partition produced.
#[derive(Debug, Default)]
pub struct CompileResult {
    pub binding: BindingContext,
    pub diagnostics: Vec<Diagnostic>,
}

/// A point-in-time view of one compiled file for the query layer.
#[derive(Debug, Clone)]
pub struct CompiledFile {
    pub uri: Url,
    pub content: Arc<String>,
    pub version: i32,
    pub parsed: ParsedTree,
    pub compiled: ParsedTree,
    pub binding: BindingContext,
    pub module: Option<ModuleHandle>,
}

#[derive(Debug, Clone)]
struct FileMeta {
    content: Arc<String>,
    version: i32,
    path: Option<PathBuf>,
    kind: SourceKind,
    is_temporary: bool,
    module_id: Option<String>,
}

#[derive(Default)]
struct ParseData {
    parsed: Option<ParsedTree>,
    compiled: Option<ParsedTree>,
    binding: Option<BindingContext>,
    module: Option<ModuleHandle>,
    last_saved: Option<ParsedTree>,
}

struct FileEntry {
    meta: RwLock<FileMeta>,
    /// Protects only the parse/compile tuple so long compilations never block
    /// readers snapshotting content from `meta`.
    parse_data: Mutex<ParseData>,
}

impl FileEntry {
    fn meta_snapshot(&self) -> FileMeta {
        self.meta.read().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum PartitionKey {
    BuildScript,
    Module(Option<String>),
}

/// The `URI → SourceFile` map and its compile orchestration.
///
/// The map lock is never held across content-provider IO or compilation;
/// readers copy `FileMeta`, compilers run off-lock and results are published
/// per file under the entry's `parse_data` mutex.
pub struct SourcePath {
    files: RwLock<HashMap<Url, Arc<FileEntry>>>,
    cp: CompilerClassPathHandle,
    indexing: Arc<IndexingService>,
    content_provider: Arc<dyn ContentProvider>,
}

impl SourcePath {
    pub fn new(
        cp: CompilerClassPathHandle,
        indexing: Arc<IndexingService>,
        content_provider: Arc<dyn ContentProvider>,
    ) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            cp,
            indexing,
            content_provider,
        }
    }

    pub fn classpath(&self) -> &CompilerClassPathHandle {
        &self.cp
    }

    pub fn indexing(&self) -> &Arc<IndexingService> {
        &self.indexing
    }

    /// Creates or updates a file, bumping its version.
    pub fn put(&self, uri: &Url, content: &str, temporary: bool) {
        let next_version = self.version(uri).map_or(1, |v| v + 1);
        self.put_at_version(uri, content, next_version, temporary);
    }

    /// Creates or updates a file at an editor-supplied version.
    pub fn put_at_version(&self, uri: &Url, content: &str, version: i32, temporary: bool) {
        assert!(
            !content.contains('\r'),
            "source content must be normalized to \\n line endings"
        );

        let path = file_uri_to_path(uri).ok();
        let module_id = if temporary {
            None
        } else {
            path.as_deref().and_then(|p| {
                self.cp
                    .module_registry()
                    .find_module_for_file(p)
                    .map(|m| m.name)
            })
        };

        let mut files = self.files.write();
        match files.get(uri) {
            Some(entry) => {
                let mut meta = entry.meta.write();
                meta.content = Arc::new(content.to_string());
                meta.version = version;
                meta.module_id = module_id;
                // An explicit non-temporary put upgrades a temporary entry.
                if !temporary {
                    meta.is_temporary = false;
                }
            }
            None => {
                files.insert(
                    uri.clone(),
                    Arc::new(FileEntry {
                        meta: RwLock::new(FileMeta {
                            content: Arc::new(content.to_string()),
                            version,
                            path,
                            kind: source_kind(uri),
                            is_temporary: temporary,
                            module_id,
                        }),
                        parse_data: Mutex::new(ParseData::default()),
                    }),
                );
            }
        }
    }

    /// Removes the file, then off-lock retracts its index entries and
    /// generated code.
    pub fn delete(&self, uri: &Url) {
        let removed = self.files.write().remove(uri);
        let Some(entry) = removed else { return };

        let meta = entry.meta_snapshot();
        let mut data = entry.parse_data.lock();
        let old_compiled = data.compiled.take();
        let last_saved = data.last_saved.take();
        drop(data);

        if let Some(old) = old_compiled {
            let uri = uri.clone();
            self.indexing.update_indexes(
                meta.module_id.clone(),
                vec![DeclarationDelta {
                    uri: uri.clone(),
                    old: Box::new(move || old.declarations().to_vec()),
                    new: Box::new(Vec::new),
                }],
            );
        }

        if let (Some(tree), Some(output_dir)) = (last_saved, self.cp.output_directory()) {
            let compiler = self.cp.get_compiler_for_module(meta.module_id.as_deref());
            compiler.remove_generated_code(&tree, &output_dir);
        }
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.files.read().contains_key(uri)
    }

    pub fn content(&self, uri: &Url) -> Option<Arc<String>> {
        let entry = self.ensure_entry(uri)?;
        let content = entry.meta.read().content.clone();
        Some(content)
    }

    pub fn version(&self, uri: &Url) -> Option<i32> {
        Some(self.files.read().get(uri)?.meta.read().version)
    }

    pub fn is_temporary(&self, uri: &Url) -> Option<bool> {
        Some(self.files.read().get(uri)?.meta.read().is_temporary)
    }

    pub fn module_id(&self, uri: &Url) -> Option<String> {
        self.files.read().get(uri)?.meta.read().module_id.clone()
    }

    /// Parse-on-demand view of the file.
    pub fn parsed_file(&self, uri: &Url) -> Option<ParsedTree> {
        let entry = self.ensure_entry(uri)?;
        let module_id = entry.meta.read().module_id.clone();
        let compiler = self.cp.get_compiler_for_module(module_id.as_deref());
        Some(self.parse_entry(uri, &entry, compiler.as_ref()))
    }

    /// Latest compiled view, compiling first when the compiled tree is stale.
    pub fn current_compiled(&self, uri: &Url) -> Option<CompiledFile> {
        {
            let entry = self.ensure_entry(uri)?;
            let meta = entry.meta_snapshot();
            let data = entry.parse_data.lock();
            if let (Some(compiled), Some(binding)) = (&data.compiled, &data.binding) {
                if compiled.text() == meta.content.as_str() {
                    return Some(CompiledFile {
                        uri: uri.clone(),
                        content: meta.content.clone(),
                        version: meta.version,
                        parsed: data.parsed.clone().unwrap_or_else(|| compiled.clone()),
                        compiled: compiled.clone(),
                        binding: binding.clone(),
                        module: data.module.clone(),
                    });
                }
            }
        }

        self.compile_files(&[uri.clone()]);
        self.latest_compiled(uri)
    }

    /// Latest compiled view without compiling. Absent until the first
    /// successful compile.
    pub fn latest_compiled(&self, uri: &Url) -> Option<CompiledFile> {
        let entry = self.files.read().get(uri)?.clone();
        let meta = entry.meta_snapshot();
        let data = entry.parse_data.lock();
        let compiled = data.compiled.clone()?;
        Some(CompiledFile {
            uri: uri.clone(),
            content: meta.content.clone(),
            version: meta.version,
            parsed: data.parsed.clone().unwrap_or_else(|| compiled.clone()),
            compiled,
            binding: data.binding.clone().unwrap_or_default(),
            module: data.module.clone(),
        })
    }

    /// All tracked non-temporary files.
    pub fn all(&self) -> Vec<Url> {
        let files = self.files.read();
        let mut out: Vec<Url> = files
            .iter()
            .filter(|(_, entry)| !entry.meta.read().is_temporary)
            .map(|(uri, _)| uri.clone())
            .collect();
        out.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        out
    }

    pub fn all_in_module(&self, module_id: &str) -> Vec<Url> {
        let files = self.files.read();
        let mut out: Vec<Url> = files
            .iter()
            .filter(|(_, entry)| {
                let meta = entry.meta.read();
                !meta.is_temporary && meta.module_id.as_deref() == Some(module_id)
            })
            .map(|(uri, _)| uri.clone())
            .collect();
        out.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        out
    }

    /// Batch compile: partition by kind and module, compile each partition in
    /// isolation, publish per file, emit per-partition index deltas, and
    /// return the composite binding context with the collected diagnostics.
    pub fn compile_files(&self, uris: &[Url]) -> CompileResult {
        let mut partitions: BTreeMap<PartitionKey, Vec<Url>> = BTreeMap::new();
        for uri in uris {
            let Some(entry) = self.ensure_entry(uri) else {
                continue;
            };
            let meta = entry.meta_snapshot();
            let key = match meta.kind {
                SourceKind::BuildScript => PartitionKey::BuildScript,
                SourceKind::Default => PartitionKey::Module(meta.module_id.clone()),
            };
            partitions.entry(key).or_default().push(uri.clone());
        }

        let mut composite = CompileResult::default();
        for (key, partition_uris) in partitions {
            if let Some((binding, diagnostics)) = self.compile_partition(&key, &partition_uris) {
                composite.binding.merge(binding);
                composite.diagnostics.extend(diagnostics);
            }
        }
        composite
    }

    fn compile_partition(
        &self,
        key: &PartitionKey,
        uris: &[Url],
    ) -> Option<(BindingContext, Vec<Diagnostic>)> {
        let (compiler, context_uris, kind) = match key {
            PartitionKey::BuildScript => (
                self.cp.shared_compiler(),
                self.all(),
                CompilationKind::BuildScript,
            ),
            PartitionKey::Module(None) => (
                self.cp.shared_compiler(),
                self.all(),
                CompilationKind::Default,
            ),
            PartitionKey::Module(Some(module_id)) => (
                self.cp.get_compiler_for_module(Some(module_id)),
                self.all_in_module(module_id),
                CompilationKind::Default,
            ),
        };

        // Snapshot the old declarations per file before compiling so the
        // index delta is computed old vs new.
        let mut old_trees: HashMap<Url, Option<ParsedTree>> = HashMap::new();
        for uri in uris {
            let Some(entry) = self.files.read().get(uri).cloned() else {
                continue;
            };
            old_trees.insert(uri.clone(), entry.parse_data.lock().compiled.clone());
        }

        // Parse the compile set: the partition's files plus their context.
        let mut batch: Vec<ParsedTree> = Vec::new();
        let mut seen: Vec<Url> = Vec::new();
        for uri in uris.iter().chain(context_uris.iter()) {
            if seen.contains(uri) {
                continue;
            }
            seen.push(uri.clone());
            let Some(entry) = self.files.read().get(uri).cloned() else {
                continue;
            };
            batch.push(self.parse_entry(uri, &entry, compiler.as_ref()));
        }
        if batch.is_empty() {
            return None;
        }

        let output = compiler.compile(&batch, kind);

        // Publish atomically per file, but only when the produced tree still
        // matches the file's current parse.
        let mut deltas: Vec<DeclarationDelta> = Vec::new();
        for uri in uris {
            let Some(entry) = self.files.read().get(uri).cloned() else {
                continue;
            };
            let Some(produced) = output.trees.iter().find(|t| t.uri() == uri) else {
                continue;
            };

            let mut data = entry.parse_data.lock();
            let still_current = data
                .parsed
                .as_ref()
                .is_some_and(|parsed| parsed.text() == produced.text());
            if !still_current {
                continue;
            }
            data.compiled = Some(produced.clone());
            data.binding = Some(output.binding.clone());
            data.module = Some(output.module.clone());
            drop(data);

            let old = old_trees.remove(uri).flatten();
            let new = produced.clone();
            deltas.push(DeclarationDelta {
                uri: uri.clone(),
                old: Box::new(move || {
                    old.map(|t| t.declarations().to_vec()).unwrap_or_default()
                }),
                new: Box::new(move || new.declarations().to_vec()),
            });
        }

        if !deltas.is_empty() {
            let module_id = match key {
                PartitionKey::Module(Some(module_id)) => Some(module_id.clone()),
                _ => None,
            };
            self.indexing.update_indexes(module_id, deltas);
        }

        Some((output.binding, output.diagnostics))
    }

    /// Best-effort whole-project sweep; one file's failure never aborts the
    /// rest.
    pub fn compile_all_files(&self) {
        for uri in self.all() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.compile_files(&[uri.clone()]);
            }));
            if result.is_err() {
                tracing::warn!(
                    target = "kls.source",
                    uri = %uri,
                    "compilation panicked; continuing sweep"
                );
            }
        }
    }

    /// Records the saved tree and regenerates code through the façade.
    pub fn save(&self, uri: &Url) {
        let Some(entry) = self.files.read().get(uri).cloned() else {
            return;
        };
        let meta = entry.meta_snapshot();
        let mut data = entry.parse_data.lock();
        let Some(compiled) = data.compiled.clone() else {
            return;
        };
        let binding = data.binding.clone().unwrap_or_default();
        data.last_saved = Some(compiled.clone());
        drop(data);

        if let Some(output_dir) = self.cp.output_directory() {
            let compiler = self.cp.get_compiler_for_module(meta.module_id.as_deref());
            compiler.generate_code(&compiled, &binding, &output_dir);
        }
    }

    pub fn save_all_files(&self) {
        for uri in self.all() {
            self.save(&uri);
        }
    }

    /// Drops cached parse/compile data so the next read recomputes it.
    pub fn clean_files(&self, uris: &[Url]) {
        for uri in uris {
            let Some(entry) = self.files.read().get(uri).cloned() else {
                continue;
            };
            let mut data = entry.parse_data.lock();
            data.parsed = None;
            data.compiled = None;
            data.binding = None;
            data.module = None;
        }
    }

    pub fn clean_all_files(&self) {
        let uris: Vec<Url> = self.files.read().keys().cloned().collect();
        self.clean_files(&uris);
    }

    /// Recompiles everything from current content.
    pub fn refresh(&self) {
        self.clean_all_files();
        self.compile_all_files();
    }

    /// Recomputes module ownership after the registry changed; files whose
    /// module moved are cleaned so they recompile in the right partition.
    pub fn refresh_module_assignments(&self) {
        let entries: Vec<(Url, Arc<FileEntry>)> = {
            let files = self.files.read();
            files
                .iter()
                .map(|(uri, entry)| (uri.clone(), entry.clone()))
                .collect()
        };

        let mut moved = Vec::new();
        for (uri, entry) in entries {
            let mut meta = entry.meta.write();
            if meta.is_temporary {
                continue;
            }
            let next = meta.path.as_deref().and_then(|p| {
                self.cp
                    .module_registry()
                    .find_module_for_file(p)
                    .map(|m| m.name)
            });
            if next != meta.module_id {
                meta.module_id = next;
                moved.push(uri);
            }
        }

        if !moved.is_empty() {
            tracing::info!(
                target = "kls.source",
                count = moved.len(),
                "module assignments changed"
            );
            self.clean_files(&moved);
        }
    }

    fn parse_entry(
        &self,
        uri: &Url,
        entry: &Arc<FileEntry>,
        compiler: &dyn Compiler,
    ) -> ParsedTree {
        let meta = entry.meta_snapshot();
        let mut data = entry.parse_data.lock();
        match &data.parsed {
            Some(tree) if tree.text() == meta.content.as_str() => tree.clone(),
            _ => {
                let tree = compiler.parse(uri, &meta.content);
                data.parsed = Some(tree.clone());
                tree
            }
        }
    }

    /// Looks up the entry, creating a temporary one from the content provider
    /// for unknown URIs. The map lock is released around the provider read
    /// and the lookup is re-checked after reacquiring.
    fn ensure_entry(&self, uri: &Url) -> Option<Arc<FileEntry>> {
        if let Some(entry) = self.files.read().get(uri) {
            return Some(entry.clone());
        }

        let content = match self.content_provider.read(uri) {
            Ok(content) => content,
            Err(err) => {
                tracing::debug!(target = "kls.source", uri = %uri, error = %err, "no content for URI");
                return None;
            }
        };

        let mut files = self.files.write();
        if let Some(entry) = files.get(uri) {
            // Someone else created it while we were reading.
            return Some(entry.clone());
        }
        let entry = Arc::new(FileEntry {
            meta: RwLock::new(FileMeta {
                content: Arc::new(content),
                version: 1,
                path: file_uri_to_path(uri).ok(),
                kind: source_kind(uri),
                is_temporary: true,
                module_id: None,
            }),
            parse_data: Mutex::new(ParseData::default()),
        });
        files.insert(uri.clone(), entry.clone());
        Some(entry)
    }
}
