use std::path::PathBuf;

use kls_compiler::{Declaration, SymbolKind, Visibility};
use kls_core::Location;

/// Column caps; declarations exceeding them are not persisted.
pub(crate) const MAX_FQNAME_LEN: usize = 255;
pub(crate) const MAX_SHORTNAME_LEN: usize = 80;
pub(crate) const MAX_URI_LEN: usize = 511;

/// One persisted declaration.
///
/// A symbol with `module_id = None` is a dependency symbol visible to every
/// module; otherwise it is visible only within its module (plus dependency
/// symbols).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub fq_name: String,
    pub short_name: String,
    pub kind: SymbolKind,
    pub visibility: Visibility,
    pub extension_receiver_type: Option<String>,
    pub location: Option<Location>,
    pub source_jar: Option<PathBuf>,
    pub module_id: Option<String>,
}

impl Symbol {
    pub fn from_declaration(
        decl: &Declaration,
        source_jar: Option<PathBuf>,
        module_id: Option<String>,
    ) -> Self {
        Self {
            fq_name: decl.fq_name.clone(),
            short_name: decl.short_name.clone(),
            kind: decl.kind,
            visibility: decl.visibility,
            extension_receiver_type: decl.extension_receiver.clone(),
            location: decl.location.clone(),
            source_jar,
            module_id,
        }
    }

    /// Whether the symbol fits the store's column caps.
    pub(crate) fn fits_store(&self) -> bool {
        self.fq_name.len() <= MAX_FQNAME_LEN
            && self.short_name.len() <= MAX_SHORTNAME_LEN
            && self
                .location
                .as_ref()
                .map_or(true, |loc| loc.uri.as_str().len() <= MAX_URI_LEN)
    }
}

/// The index staleness record (singleton row).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolIndexMetadata {
    pub build_file_version: i64,
    pub indexed_at: i64,
    pub symbol_count: i64,
}
