use kls_compiler::ParsedTree;
use kls_core::Range;
use kls_index::{Symbol, SymbolIndex};

use super::DocumentSymbol;

/// Document outline from the parsed tree's declarations. Parse-only: no
/// compile is needed for an outline.
pub fn document_symbols(parsed: &ParsedTree) -> Vec<DocumentSymbol> {
    parsed
        .declarations()
        .iter()
        .map(|decl| DocumentSymbol {
            name: decl.short_name.clone(),
            kind: decl.kind,
            range: decl
                .location
                .as_ref()
                .map_or(Range::default(), |loc| loc.range),
            detail: decl.signature.clone(),
        })
        .collect()
}

/// Workspace-wide symbol search via the index; shares its bounded-wait
/// degradation.
pub fn workspace_symbols(index: &SymbolIndex, query: &str, limit: usize) -> Vec<Symbol> {
    index.query(query, None, limit, "%", None)
}
