//! Source-file state: editor buffers, the `SourcePath` file map and
//! incremental compilation.

mod document;
mod source_files;
mod source_path;

pub use document::{normalize_line_endings, ContentChange, Document, DocumentError};
pub use source_files::SourceFiles;
pub use source_path::{
    source_kind, CompiledFile, CompileResult, ContentProvider, FileSystemContentProvider,
    SourceKind, SourcePath,
};
