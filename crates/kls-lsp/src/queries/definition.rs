use std::path::{Path, PathBuf};

use url::Url;
use walkdir::WalkDir;

use kls_core::{file_uri_to_path, ArchiveDetector, KlsUri, Location, Position, Range};
use kls_index::SymbolIndex;
use kls_source::{CompiledFile, SourcePath};

/// JAR decompilation, specified only by this interface.
pub trait Decompiler: Send + Sync {
    /// Source text for one archive entry, best-effort.
    fn decompile(&self, uri: &KlsUri) -> Option<String>;
}

pub struct DefinitionContext<'a> {
    pub source_path: &'a SourcePath,
    pub index: &'a SymbolIndex,
    pub detector: &'a ArchiveDetector,
    pub decompiler: Option<&'a dyn Decompiler>,
    /// Return `kls:` URIs instead of materialized temp files.
    pub use_kls_scheme: bool,
}

/// Routes a goto-definition request.
///
/// Imports resolve through the symbol index first, then the module scope.
/// Other cursors resolve through the binding context; external locations
/// (archives, JDK, dependency caches) fall back to the index, then a
/// source-directory text search, then decompilation.
pub fn goto_definition(
    ctx: &DefinitionContext<'_>,
    file: &CompiledFile,
    position: Position,
) -> Option<Location> {
    if let Some(import) = file.parsed.import_at(position) {
        return resolve_import(ctx, file, &import.fq_name);
    }

    let resolved = file.binding.resolve_at(&file.uri, position)?;

    if let Some(location) = &resolved.location {
        if let Ok(path) = file_uri_to_path(&location.uri) {
            if !ctx.detector.is_external(&path) {
                return Some(location.clone());
            }
        }
    }

    // External or locationless: fall back in order.
    index_lookup(ctx, file, &resolved.short_name, &resolved.fq_name)
        .or_else(|| source_dir_search(ctx, file, &resolved.short_name))
        .or_else(|| {
            let archive_path = resolved
                .location
                .as_ref()
                .and_then(|loc| file_uri_to_path(&loc.uri).ok())
                .and_then(|path| containing_archive(&path));
            external_location(ctx, archive_path.as_deref(), &resolved.fq_name)
        })
}

fn resolve_import(
    ctx: &DefinitionContext<'_>,
    file: &CompiledFile,
    fq_name: &str,
) -> Option<Location> {
    let short_name = fq_name.rsplit('.').next()?;

    let module_id = ctx.source_path.module_id(&file.uri);
    let hit = ctx
        .index
        .query(short_name, None, 50, "%", module_id.as_deref())
        .into_iter()
        .find(|symbol| symbol.fq_name == fq_name && symbol.location.is_some());
    if let Some(symbol) = hit {
        return symbol.location;
    }

    // Not indexed (yet): ask the file's module scope.
    let module = file.module.as_ref()?;
    let package = fq_name.rsplit_once('.').map_or("", |(pkg, _)| pkg);
    module
        .scope()
        .declarations_in_package(package)
        .into_iter()
        .find(|decl| decl.fq_name == fq_name)
        .and_then(|decl| decl.location)
}

fn index_lookup(
    ctx: &DefinitionContext<'_>,
    file: &CompiledFile,
    short_name: &str,
    fq_name: &str,
) -> Option<Location> {
    let module_id = ctx.source_path.module_id(&file.uri);
    ctx.index
        .query(short_name, None, 50, "%", module_id.as_deref())
        .into_iter()
        .find(|symbol| symbol.fq_name == fq_name)
        .and_then(|symbol| symbol.location)
        .filter(|location| {
            file_uri_to_path(&location.uri)
                .map(|path| !ctx.detector.is_external(&path))
                .unwrap_or(false)
        })
}

/// Walks the module's source directories for a file declaring `short_name`,
/// parses it standalone, and returns the name-identifier range.
fn source_dir_search(
    ctx: &DefinitionContext<'_>,
    file: &CompiledFile,
    short_name: &str,
) -> Option<Location> {
    let module_id = ctx.source_path.module_id(&file.uri)?;
    let module = ctx
        .source_path
        .classpath()
        .module_registry()
        .module(&module_id)?;
    let compiler = ctx
        .source_path
        .classpath()
        .get_compiler_for_module(Some(&module_id));

    for source_dir in &module.source_dirs {
        for entry in WalkDir::new(source_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("kt") {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            if !content.contains(short_name) {
                continue;
            }
            let Some(uri) = Url::from_file_path(entry.path()).ok() else {
                continue;
            };
            let tree = compiler.create_syntax_tree(&uri, &content);
            if let Some(decl) = tree.find_declaration(&[short_name]) {
                if let Some(location) = &decl.location {
                    return Some(location.clone());
                }
            }
        }
    }
    None
}

fn containing_archive(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|ancestor| {
            matches!(
                ancestor.extension().and_then(|e| e.to_str()),
                Some("jar" | "zip" | "jmod")
            )
        })
        .map(Path::to_path_buf)
}

/// Last resort: hand out an archive-member location, either as a `kls:` URI
/// or as a materialized temp file with decompiled contents.
fn external_location(
    ctx: &DefinitionContext<'_>,
    archive: Option<&Path>,
    fq_name: &str,
) -> Option<Location> {
    let archive = archive?;
    let entry = format!("{}.class", fq_name.replace('.', "/"));
    let kls = KlsUri::new(archive, entry);

    if ctx.use_kls_scheme {
        let uri = kls.to_url()?;
        return Some(Location::new(uri, Range::default()));
    }

    let decompiler = ctx.decompiler?;
    let contents = decompiler.decompile(&kls)?;
    let file_name = format!("{}.kt", fq_name.replace('.', "_"));
    let path = std::env::temp_dir().join("kls-decompiled").join(file_name);
    std::fs::create_dir_all(path.parent()?).ok()?;
    std::fs::write(&path, contents).ok()?;
    let uri = Url::from_file_path(&path).ok()?;
    Some(Location::new(uri, Range::default()))
}
